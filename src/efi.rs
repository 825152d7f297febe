// ============================================================================
// src/efi.rs – Locate, inspect and unmount a mounted EFI partition
// ============================================================================

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cmd::{shell_quote, CommandResult, Runner};
use crate::disk;
use crate::mount::{CoordinatorError, InFlight};
use crate::probe::{Occupancy, PartitionProber};

pub const VOLUMES_ROOT: &str = "/Volumes";

/// Directories an OpenCore layout is expected to carry, relative to the
/// partition root.
pub const OPENCORE_LAYOUT: [&str; 6] = [
    "EFI",
    "EFI/OC",
    "EFI/OC/Kexts",
    "EFI/OC/ACPI",
    "EFI/OC/Drivers",
    "EFI/OC/Tools",
];

/// Query-only view of the EFI mount; never mounts anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EfiStatus {
    pub mounted: bool,
    pub path: Option<String>,
    pub device: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    device: String,
    mount_point: String,
    filesystem: String,
}

/// One line of `mount`: `<device> on <mount point> (<fs>, <flags>...)`.
fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let (device, rest) = line.split_once(" on ")?;
    let (mount_point, opts) = rest.rsplit_once(" (")?;
    let filesystem = opts
        .trim_end_matches(')')
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    Some(MountEntry {
        device: device.trim().to_string(),
        mount_point: mount_point.trim().to_string(),
        filesystem,
    })
}

fn has_efi_dir(mount_point: &Path) -> bool {
    mount_point.join("EFI").is_dir()
}

pub struct EfiLocator<'a> {
    prober: PartitionProber<'a>,
    volumes_root: PathBuf,
}

impl<'a> EfiLocator<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self {
            prober: PartitionProber::new(runner),
            volumes_root: PathBuf::from(VOLUMES_ROOT),
        }
    }

    pub fn with_volumes_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.volumes_root = root.into();
        self
    }

    /// Looks in three places, cheapest first: the live mount table, the
    /// volumes directory, then every `sN1` slice that reports a mount point.
    pub fn status(&self) -> EfiStatus {
        if let Some(status) = self.from_mount_table() {
            return status;
        }
        if let Some(path) = self.from_volumes_dir() {
            return EfiStatus {
                mounted: true,
                path: Some(path),
                device: None,
            };
        }
        if let Some(status) = self.from_slot_probe() {
            return status;
        }
        debug!("no mounted EFI partition found");
        EfiStatus::default()
    }

    fn from_mount_table(&self) -> Option<EfiStatus> {
        let res = self.prober.runner().run_plain("mount");
        if !res.succeeded {
            return None;
        }
        res.output
            .lines()
            .filter_map(parse_mount_line)
            .find(|e| has_efi_dir(Path::new(&e.mount_point)))
            .map(|e| {
                debug!(device = %e.device, fs = %e.filesystem, "EFI found in mount table");
                EfiStatus {
                    mounted: true,
                    path: Some(e.mount_point),
                    device: Some(e.device.trim_start_matches("/dev/").to_string()),
                }
            })
    }

    fn from_volumes_dir(&self) -> Option<String> {
        let mut volumes: Vec<PathBuf> = fs::read_dir(&self.volumes_root)
            .ok()?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        volumes.sort();
        volumes
            .into_iter()
            .find(|v| has_efi_dir(v))
            .map(|v| v.display().to_string())
    }

    fn from_slot_probe(&self) -> Option<EfiStatus> {
        self.prober
            .list_all_partition_identifiers()
            .into_iter()
            .filter(|id| id.ends_with(disk::EFI_SLOT_SUFFIX))
            .find_map(|id| match self.prober.occupancy(&id) {
                Occupancy::Efi(mp) => Some(EfiStatus {
                    mounted: true,
                    path: Some(mp),
                    device: Some(id),
                }),
                _ => None,
            })
    }

    /// `diskutil unmount`, retried elevated when the plain attempt is refused.
    pub fn unmount(&self, path: &str, in_flight: &InFlight) -> Result<CommandResult, CoordinatorError> {
        let _guard = in_flight.acquire()?;
        let command = format!("diskutil unmount {}", shell_quote(path));
        let plain = self.prober.runner().run_plain(&command);
        if plain.succeeded {
            info!(path, "EFI unmounted");
            return Ok(plain);
        }
        warn!(path, output = %plain.trimmed(), "plain unmount refused; retrying elevated");
        let elevated = self.prober.runner().run_elevated(&command);
        if elevated.succeeded {
            info!(path, "EFI unmounted with elevation");
        }
        Ok(elevated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutEntry {
    pub relative: &'static str,
    pub present: bool,
}

/// Presence of each OpenCore directory under `root`.
pub fn check_structure(root: &Path) -> Vec<LayoutEntry> {
    OPENCORE_LAYOUT
        .iter()
        .map(|&relative| LayoutEntry {
            relative,
            present: root.join(relative).is_dir(),
        })
        .collect()
}

pub fn oc_kexts_dir(root: &Path) -> PathBuf {
    root.join("EFI/OC/Kexts")
}

/// Terminal walkthrough for mounting by hand when every automatic tier failed.
pub fn manual_mount_instructions(placeholder: &str) -> String {
    format!(
        "\
Manual EFI Mount Instructions:

1. Open Terminal
2. Run: diskutil list
3. Find the USB drive (usually disk1, disk2, ...)
4. Find its EFI partition (type \"EFI\" or \"Apple_Boot\")
5. Mount it with: sudo diskutil mount diskXsY

Example:
- USB is disk2 and EFI is partition 1: sudo diskutil mount disk2s1

Common EFI slots:
- macOS USB installer: diskXs1
- Windows USB: layout varies
- Linux USB: varies by distribution

If diskutil refuses, try:
sudo mkdir -p {placeholder}
sudo mount -t msdos /dev/diskXsY {placeholder}
"
    )
}
