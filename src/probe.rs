// ============================================================================
// src/probe.rs – Targeted `diskutil info` / `diskutil list` queries
// ============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

use crate::cmd::Runner;
use crate::disk::{self, Drive};
use crate::listing;

static PARTITION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"disk\d+s\d+").expect("Invalid partition identifier regex"));
static WHOLE_DISK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^/dev/(disk\d+)").expect("Invalid disk header regex"));

/// Key/value block printed by `diskutil info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    fields: Vec<(String, String)>,
}

impl DeviceInfo {
    pub fn parse(text: &str) -> Self {
        let fields = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .filter(|(k, _)| !k.is_empty())
            .collect();
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Only absolute paths count; "(Not Mounted)", "Not applicable (...)"
    /// and blanks all mean unmounted.
    pub fn mount_point(&self) -> Option<String> {
        self.get("Mount Point")
            .filter(|v| v.starts_with('/'))
            .map(str::to_string)
    }

    pub fn protocol(&self) -> Option<&str> {
        self.get("Protocol")
    }

    pub fn is_usb(&self) -> bool {
        self.protocol()
            .is_some_and(|p| p.to_ascii_uppercase().contains("USB"))
    }

    /// EFI named by the block itself. Slot position does not count here:
    /// `disk1s1` is the mounted APFS data volume on most Macs.
    pub fn shows_efi_content(&self) -> bool {
        ["Partition Type", "Content (IOContent)", "Volume Name"]
            .into_iter()
            .filter_map(|key| self.get(key))
            .any(|v| v.to_ascii_uppercase().contains("EFI"))
    }
}

/// What sits on a partition right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    Unmounted,
    /// Mounted EFI system partition.
    Efi(String),
    /// Mounted, but some other volume.
    Foreign(String),
}

/// Identifier-level queries for callers holding only a device name.
pub struct PartitionProber<'a> {
    runner: &'a dyn Runner,
}

impl<'a> PartitionProber<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &'a dyn Runner {
        self.runner
    }

    /// `diskutil info` for a device identifier or a path such as `/`.
    pub fn info(&self, target: &str) -> Option<DeviceInfo> {
        let res = self
            .runner
            .run_plain(&format!("diskutil info {} 2>/dev/null", device_arg(target)));
        if !res.succeeded {
            return None;
        }
        let info = DeviceInfo::parse(&res.output);
        (!info.is_empty()).then_some(info)
    }

    pub fn mount_point_of(&self, identifier: &str) -> Option<String> {
        self.info(identifier).and_then(|i| i.mount_point())
    }

    /// Mount state plus EFI identity from a single info query.
    pub fn occupancy(&self, identifier: &str) -> Occupancy {
        let Some(info) = self.info(identifier) else {
            return Occupancy::Unmounted;
        };
        match info.mount_point() {
            None => Occupancy::Unmounted,
            Some(mount_point) if info.shows_efi_content() => Occupancy::Efi(mount_point),
            Some(mount_point) => Occupancy::Foreign(mount_point),
        }
    }

    /// Re-derives the listing heuristic from a fresh info query.
    pub fn is_efi_system_partition(&self, identifier: &str) -> bool {
        let id = identifier.trim_start_matches("/dev/");
        let Some(info) = self.info(id) else {
            return id.ends_with(disk::EFI_SLOT_SUFFIX);
        };
        let name = info.get("Volume Name").unwrap_or_default();
        let kind = [
            info.get("Partition Type"),
            info.get("Type (Bundle)"),
            info.get("File System Personality"),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        disk::looks_like_efi(id, name, &kind)
    }

    pub fn is_usb(&self, identifier: &str) -> bool {
        self.info(identifier).is_some_and(|i| i.is_usb())
    }

    pub fn filesystem_type(&self, identifier: &str) -> Option<String> {
        self.info(identifier)
            .and_then(|i| i.get("Type (Bundle)").map(str::to_string))
    }

    /// Every `diskN sM` token in the full listing, sorted and unique.
    pub fn list_all_partition_identifiers(&self) -> Vec<String> {
        let res = self.runner.run_plain("diskutil list");
        if !res.succeeded {
            return Vec::new();
        }
        let ids: BTreeSet<String> = PARTITION_ID
            .find_iter(&res.output)
            .map(|m| m.as_str().to_string())
            .collect();
        ids.into_iter().collect()
    }

    pub fn list_whole_disks(&self) -> Vec<String> {
        let res = self.runner.run_plain("diskutil list");
        if !res.succeeded {
            return Vec::new();
        }
        WHOLE_DISK_HEADER
            .captures_iter(&res.output)
            .map(|c| c[1].to_string())
            .collect()
    }

    /// Whole disk backing the root filesystem, partition suffix stripped.
    pub fn boot_disk(&self) -> Option<String> {
        let info = self.info("/")?;
        let device = info
            .get("Part of Whole")
            .or_else(|| info.get("Device Identifier"))
            .or_else(|| info.get("Device Node"))?;
        let whole = disk::whole_disk_of(device);
        debug!(device, whole = %whole, "root filesystem device resolved");
        whole.starts_with("disk").then_some(whole)
    }

    /// First whole disk speaking USB, for boots where `/` cannot be resolved.
    pub fn first_usb_disk(&self) -> Option<String> {
        self.list_whole_disks()
            .into_iter()
            .find(|d| self.is_usb(d))
    }

    /// Full parsed inventory, presentation-sorted, with the profiler fallback.
    pub fn list_drives(&self) -> Vec<Drive> {
        let res = self.runner.run_plain("diskutil list");
        let mut drives = if res.succeeded {
            listing::parse(self, &res.output)
        } else {
            Vec::new()
        };
        if drives.is_empty() {
            debug!("diskutil listing empty; trying system_profiler");
            let profile = self
                .runner
                .run_plain("system_profiler SPStorageDataType 2>/dev/null");
            if profile.succeeded {
                drives = listing::parse_storage_profile(&profile.output);
            }
        }
        disk::sort_for_presentation(&mut drives);
        drives
    }

    /// Single-drive listing (`diskutil list /dev/diskN`).
    pub fn list_drive(&self, drive: &str) -> Option<Drive> {
        let res = self
            .runner
            .run_plain(&format!("diskutil list {}", device_arg(drive)));
        if !res.succeeded {
            return None;
        }
        let whole = disk::whole_disk_of(drive);
        listing::parse(self, &res.output)
            .into_iter()
            .find(|d| d.identifier == whole)
    }
}

fn device_arg(target: &str) -> String {
    if target.starts_with('/') {
        target.to_string()
    } else {
        format!("/dev/{target}")
    }
}
