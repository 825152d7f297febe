// ============================================================================
// src/report.rs – Diagnostics report and raw USB mount debug dump
// ============================================================================

use chrono::{DateTime, Local};
use std::fmt::Write as _;

use crate::cmd::{shell_quote, Runner};
use crate::disk::Drive;
use crate::efi::{EfiLocator, EfiStatus};
use crate::kext;
use crate::probe::PartitionProber;
use crate::system::{SipStatus, SystemFacts};

const TITLE: &str = "=== SystemMaintenance Complete Diagnostics Report ===";
const FOOTER: &str = "=== End of Report ===";

/// Kexts an audio setup depends on, in report order.
pub const AUDIO_KEXTS: [&str; 3] = ["Lilu", "AppleALC", "AppleHDA"];

/// Everything one report is built from, gathered up front so formatting
/// stays a pure function.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub generated: DateTime<Local>,
    pub facts: SystemFacts,
    pub sip: SipStatus,
    /// `(name, loaded)` for each of [`AUDIO_KEXTS`].
    pub audio_kexts: Vec<(String, bool)>,
    pub drives: Vec<Drive>,
    pub efi: EfiStatus,
    /// `ls -la` of the mounted EFI root.
    pub efi_contents: Option<String>,
}

pub struct DiagnosticsAggregator<'a> {
    runner: &'a dyn Runner,
    locator: EfiLocator<'a>,
}

impl<'a> DiagnosticsAggregator<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self {
            runner,
            locator: EfiLocator::new(runner),
        }
    }

    pub fn with_locator(mut self, locator: EfiLocator<'a>) -> Self {
        self.locator = locator;
        self
    }

    /// Runs every probe in order; none of them can abort the others.
    pub fn snapshot(&self) -> Snapshot {
        let generated = Local::now();
        let facts = SystemFacts::probe(self.runner);
        let sip = SipStatus::probe(self.runner);
        let audio_kexts = AUDIO_KEXTS
            .iter()
            .map(|name| (name.to_string(), kext::status(self.runner, name).loaded))
            .collect();
        let drives = PartitionProber::new(self.runner).list_drives();
        let efi = self.locator.status();
        let efi_contents = match (efi.mounted, &efi.path) {
            (true, Some(path)) => Some(self.list_contents(path)),
            _ => None,
        };
        Snapshot {
            generated,
            facts,
            sip,
            audio_kexts,
            drives,
            efi,
            efi_contents,
        }
    }

    fn list_contents(&self, path: &str) -> String {
        let res = self
            .runner
            .run_plain(&format!("ls -la {}", shell_quote(&format!("{path}/"))));
        res.output
    }

    pub fn build_report(&self) -> String {
        render(&self.snapshot())
    }
}

pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{TITLE}");
    let _ = writeln!(
        out,
        "Generated: {}\n",
        snapshot.generated.format("%A, %B %-d, %Y at %H:%M:%S %Z")
    );

    out.push_str("--- System Information ---\n");
    for (label, value) in snapshot.facts.rows() {
        let _ = writeln!(out, "{label}: {value}");
    }
    let _ = writeln!(out, "SIP Status: {}\n", snapshot.sip);

    out.push_str("--- Audio Kext Status ---\n");
    for (name, loaded) in &snapshot.audio_kexts {
        let state = if *loaded { "Loaded" } else { "Not loaded" };
        let _ = writeln!(out, "{name}: {state}");
    }
    out.push('\n');

    out.push_str("--- Drive Information ---\n");
    if snapshot.drives.is_empty() {
        out.push_str("No drives found\n\n");
    }
    for (index, drive) in snapshot.drives.iter().enumerate() {
        write_drive(&mut out, index + 1, drive);
    }

    out.push_str("--- EFI Status ---\n");
    match (snapshot.efi.mounted, &snapshot.efi.path) {
        (true, Some(path)) => {
            out.push_str("Mounted: Yes\n");
            let _ = writeln!(out, "Path: {path}");
            if let Some(device) = &snapshot.efi.device {
                let _ = writeln!(out, "Device: {device}");
            }
            if let Some(contents) = &snapshot.efi_contents {
                let _ = writeln!(out, "Contents: {}", contents.trim_end());
            }
        }
        _ => out.push_str("Mounted: No\n"),
    }

    let _ = writeln!(out, "\n{FOOTER}");
    out
}

fn write_drive(out: &mut String, ordinal: usize, drive: &Drive) {
    let _ = writeln!(out, "Drive {ordinal}: {}", drive.display_name);
    let _ = writeln!(out, "  ID: {}", drive.identifier);
    let _ = writeln!(out, "  Size: {}", drive.size_description);
    let _ = writeln!(out, "  Type: {}", drive.medium_kind);
    let _ = writeln!(out, "  Mount: {}", drive.mount_point);
    let _ = writeln!(out, "  Internal: {}", drive.is_internal);
    let _ = writeln!(out, "  EFI: {}", drive.is_efi_system_partition_candidate);
    if !drive.partitions.is_empty() {
        out.push_str("  Partitions:\n");
        for p in &drive.partitions {
            let _ = writeln!(
                out,
                "    - {} ({}): {} [{}]",
                p.name, p.identifier, p.size_description, p.type_description
            );
        }
    }
    out.push('\n');
}

/// Raw tool output for diagnosing a USB EFI that refuses to mount. Nothing
/// is parsed beyond boot-disk detection.
pub fn debug_usb_dump(runner: &dyn Runner) -> String {
    let mut out = String::from("=== USB Mount Debug ===\n\n");

    out.push_str("1. Current Mount Status:\n");
    let mounts = runner.run_plain("mount | grep -E 'EFI|msdos'");
    if mounts.has_output() {
        push_block(&mut out, &mounts.output);
    } else {
        out.push_str("No EFI mounted\n");
    }

    out.push_str("\n2. Disk List:\n");
    push_block(&mut out, &runner.run_plain("diskutil list").output);

    out.push_str("\n3. Root Disk Info:\n");
    push_block(&mut out, &runner.run_plain("diskutil info /").output);

    out.push_str("\n4. USB Devices:\n");
    push_block(
        &mut out,
        &runner
            .run_plain("system_profiler SPUSBDataType 2>/dev/null | grep -A 30 'Mass Storage'")
            .output,
    );

    out.push_str("\n5. Boot Drive Detection:\n");
    let prober = PartitionProber::new(runner);
    match prober.boot_disk().or_else(|| prober.first_usb_disk()) {
        Some(boot) => {
            let _ = writeln!(out, "Boot Drive: {boot}");
            out.push_str("\n6. Boot Drive Info:\n");
            push_block(&mut out, &runner.run_plain(&format!("diskutil info /dev/{boot}")).output);
            out.push_str("\n7. Partitions on Boot Drive:\n");
            push_block(&mut out, &runner.run_plain(&format!("diskutil list /dev/{boot}")).output);
        }
        None => out.push_str("Failed to detect boot drive\n"),
    }
    out
}

fn push_block(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{info_block, ScriptedRunner};
    use std::fs;
    use tempfile::tempdir;

    fn sections_in_order(report: &str) {
        let markers = [
            TITLE,
            "Generated: ",
            "--- System Information ---",
            "SIP Status: ",
            "--- Audio Kext Status ---",
            "--- Drive Information ---",
            "--- EFI Status ---",
            FOOTER,
        ];
        let mut from = 0;
        for marker in markers {
            let at = report[from..]
                .find(marker)
                .unwrap_or_else(|| panic!("missing {marker:?} in:\n{report}"));
            from += at + marker.len();
        }
    }

    #[test]
    fn report_survives_failed_sip_probe() {
        let volumes = tempdir().expect("tempdir");
        let runner = ScriptedRunner::new()
            .ok("sw_vers -productVersion", "13.6\n")
            .fail("csrutil", "")
            .ok(
                "diskutil list",
                "/dev/disk0 (internal, physical):\n   1: EFI EFI 209.7 MB disk0s1\n",
            );
        let report = DiagnosticsAggregator::new(&runner)
            .with_locator(EfiLocator::new(&runner).with_volumes_root(volumes.path()))
            .build_report();
        sections_in_order(&report);
        assert!(report.contains("SIP Status: Unknown\n"));
        assert!(report.contains("macOS Version: 13.6\n"));
        assert!(report.contains("Drive 1: Disk disk0\n"));
        assert!(report.contains("    - EFI (disk0s1): 209.7 MB [disk0s1]\n"));
        assert!(report.contains("Mounted: No\n"));
        assert!(report.contains("Lilu: Not loaded\nAppleALC: Not loaded\nAppleHDA: Not loaded\n"));
        assert!(!report.contains("Contents:"));
    }

    #[test]
    fn report_lists_audio_kexts_and_efi_contents() {
        let volumes = tempdir().expect("tempdir");
        let esp = volumes.path().join("EFI");
        fs::create_dir_all(esp.join("EFI/OC")).expect("mkdir");
        let listing = "total 8\ndrwxr-xr-x  1 root  wheel  512 Jan  1 00:00 EFI\n";
        let runner = ScriptedRunner::new()
            .ok(
                "kmutil showloaded",
                "  12  0 0xffffff 0x5000 0x5000 as.vit9696.Lilu (1.6.7) UUID <8 6 5 3 2 1>\n  \
                 80  0 0xffffff 0x9000 0x9000 com.apple.driver.AppleHDA (500.7.4) UUID <1>\n",
            )
            .ok("mount", "")
            .ok("ls -la", listing);
        let report = DiagnosticsAggregator::new(&runner)
            .with_locator(EfiLocator::new(&runner).with_volumes_root(volumes.path()))
            .build_report();
        sections_in_order(&report);
        assert!(report.contains("Lilu: Loaded\nAppleALC: Not loaded\nAppleHDA: Loaded\n\n"));
        assert!(report.contains(&format!("Path: {}\n", esp.display())));
        assert!(report.contains("Contents: total 8\ndrwxr-xr-x  1 root  wheel  512 Jan  1 00:00 EFI\n"));
        assert_eq!(
            runner.lines_matching("ls -la"),
            [format!("ls -la '{}/'", esp.display())]
        );
    }

    #[test]
    fn report_with_nothing_answering() {
        let volumes = tempdir().expect("tempdir");
        let runner = ScriptedRunner::new();
        let report = DiagnosticsAggregator::new(&runner)
            .with_locator(EfiLocator::new(&runner).with_volumes_root(volumes.path()))
            .build_report();
        sections_in_order(&report);
        assert!(report.contains("No drives found"));
        assert!(report.contains("Boot Mode: Unknown"));
    }

    #[test]
    fn render_is_deterministic_for_a_snapshot() {
        let snapshot = Snapshot {
            generated: Local::now(),
            facts: SystemFacts::probe(&ScriptedRunner::new()),
            sip: SipStatus::Disabled,
            audio_kexts: vec![("Lilu".into(), true), ("AppleALC".into(), false)],
            drives: vec![Drive::new("disk2".into(), Some("Stick".into()), "16 GB".into(), false)],
            efi: EfiStatus {
                mounted: true,
                path: Some("/Volumes/EFI".into()),
                device: Some("disk2s1".into()),
            },
            efi_contents: Some("total 0\ndrwxr-xr-x  EFI\n".into()),
        };
        let first = render(&snapshot);
        assert_eq!(first, render(&snapshot));
        assert!(first.contains("Drive 1: Stick\n  ID: disk2\n  Size: 16 GB\n  Type: USB Drive\n"));
        assert!(first.contains("--- Audio Kext Status ---\nLilu: Loaded\nAppleALC: Not loaded\n\n"));
        assert!(first.contains(
            "Mounted: Yes\nPath: /Volumes/EFI\nDevice: disk2s1\nContents: total 0\ndrwxr-xr-x  EFI\n"
        ));
        assert!(first.ends_with("=== End of Report ===\n"));
    }

    #[test]
    fn debug_dump_walks_all_sections_when_boot_disk_found() {
        let runner = ScriptedRunner::new()
            .ok("diskutil info / ", &info_block(&[("Part of Whole", "disk2")]))
            .ok("diskutil info /dev/disk2", &info_block(&[("Protocol", "USB")]))
            .ok("diskutil list /dev/disk2", "/dev/disk2 (external, physical):")
            .ok("diskutil list", "/dev/disk0 (internal):");
        let dump = debug_usb_dump(&runner);
        assert!(dump.contains("No EFI mounted"));
        assert!(dump.contains("Boot Drive: disk2"));
        assert!(dump.contains("7. Partitions on Boot Drive:\n/dev/disk2 (external, physical):\n"));
    }

    #[test]
    fn debug_dump_reports_detection_failure() {
        let dump = debug_usb_dump(&ScriptedRunner::new());
        assert!(dump.contains("Failed to detect boot drive"));
        assert!(!dump.contains("6. Boot Drive Info"));
    }
}
