// ============================================================================
// src/cmd/drives.rs – Drive inventory and partition listing
// ============================================================================

use anyhow::{Context, Result};

use crate::cmd::Session;
use crate::disk::Drive;
use crate::probe::PartitionProber;

pub fn run_drives(session: &Session, json: bool) -> Result<()> {
    let drives = PartitionProber::new(&session.runner).list_drives();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&drives).context("serialize drives")?
        );
        return Ok(());
    }

    let ui = &session.ui;
    ui.banner();
    ui.phase("Drive Inventory");
    if drives.is_empty() {
        ui.warn("No drives found. Is `diskutil` available on this system?");
        return Ok(());
    }
    for drive in &drives {
        ui.data_panel(&drive_title(drive), &drive_rows(drive));
    }
    Ok(())
}

fn drive_title(drive: &Drive) -> String {
    format!("{} ({})", drive.display_name, drive.identifier)
}

fn drive_rows(drive: &Drive) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("Size", drive.size_description.clone()),
        ("Type", drive.medium_kind.clone()),
        ("Mount", or_dash(&drive.mount_point)),
        ("EFI slot", yes_no(drive.is_efi_system_partition_candidate)),
    ];
    for p in &drive.partitions {
        let efi = if p.is_likely_efi { " [EFI?]" } else { "" };
        let mount = if p.is_mounted() { p.mount_point.as_str() } else { "unmounted" };
        rows.push((
            "Partition",
            format!("{} {} {} {mount}{efi}", p.identifier, p.name, p.size_description),
        ));
    }
    rows
}

/// Every slice identifier with a fresh EFI probe per entry.
pub fn run_partitions(session: &Session) -> Result<()> {
    let ui = &session.ui;
    let prober = PartitionProber::new(&session.runner);
    ui.banner();
    ui.phase("Partitions");

    let ids = prober.list_all_partition_identifiers();
    if ids.is_empty() {
        ui.warn("No partitions reported by `diskutil list`.");
        return Ok(());
    }
    let rows: Vec<(&str, String)> = ids
        .iter()
        .map(|id| {
            let efi = prober.is_efi_system_partition(id);
            let mount = prober.mount_point_of(id).unwrap_or_else(|| "-".to_string());
            let fs = prober
                .filesystem_type(id)
                .unwrap_or_else(|| "?".to_string());
            let tag = if efi { "  EFI" } else { "" };
            (id.as_str(), format!("{fs:<8} {mount}{tag}"))
        })
        .collect();
    ui.data_panel("diskutil partitions", &rows);
    Ok(())
}

fn or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

fn yes_no(b: bool) -> String {
    let s = if b { "Yes" } else { "No" };
    s.to_string()
}
