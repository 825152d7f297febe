// ============================================================================
// src/listing.rs – Parser for the text form of `diskutil list`
// ============================================================================
//! The listing is one header per drive (`/dev/diskN (...):`) followed by
//! indented `N: ...` partition rows, sections separated by blank lines.
//! Anything else is ignored so extra tool chatter never breaks a scan.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::disk::{self, Drive, Partition};
use crate::probe::PartitionProber;

pub const DEVICE_PREFIX: &str = "/dev/disk";
const UNKNOWN_SIZE: &str = "Unknown";

static PARTITION_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+:\s").expect("Invalid partition row regex"));
static SIZE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9.]+ [GT]B").expect("Invalid size token regex"));

struct PendingDrive {
    identifier: String,
    name: Option<String>,
    size: String,
    internal: bool,
    partitions: Vec<Partition>,
}

impl PendingDrive {
    fn finish(self) -> Drive {
        Drive::new(self.identifier, self.name, self.size, self.internal)
            .with_partitions(self.partitions)
    }
}

/// Structural parse only: no probes, no mount points.
pub fn parse_listing(text: &str) -> Vec<Drive> {
    let mut drives = Vec::new();
    let mut current: Option<PendingDrive> = None;
    let mut in_section = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some(header) = parse_header(trimmed) {
            if let Some(done) = current.take() {
                drives.push(done.finish());
            }
            current = Some(header);
            in_section = true;
        } else if in_section && PARTITION_ROW.is_match(trimmed) {
            if let Some(pending) = current.as_mut() {
                // Newer listings carry the whole-disk size on the scheme row.
                if pending.size == UNKNOWN_SIZE {
                    if let Some(size) = size_after_marker(trimmed) {
                        pending.size = size;
                    }
                }
                if let Some(partition) = parse_partition_row(&pending.identifier, trimmed) {
                    pending.partitions.push(partition);
                }
            }
        } else if in_section && trimmed.is_empty() {
            in_section = false;
        }
    }

    if let Some(done) = current.take() {
        drives.push(done.finish());
    }
    drives
}

/// Full parse: structure plus one mount-point probe per partition and a
/// final probe per drive.
pub fn parse(prober: &PartitionProber<'_>, text: &str) -> Vec<Drive> {
    let mut drives = parse_listing(text);
    for drive in drives.iter_mut() {
        for partition in drive.partitions.iter_mut() {
            partition.mount_point = prober
                .mount_point_of(&partition.identifier)
                .unwrap_or_default();
        }
    }
    for drive in drives.iter_mut() {
        drive.mount_point = prober.mount_point_of(&drive.identifier).unwrap_or_default();
    }
    drives
}

fn parse_header(line: &str) -> Option<PendingDrive> {
    if !line.starts_with(DEVICE_PREFIX) || !line.contains(':') {
        return None;
    }
    let (device_part, description) = line.split_once(':').unwrap_or((line, ""));

    let identifier = device_part.find("disk").map(|at| {
        let tail = &device_part[at + 4..];
        let digits = tail.chars().take_while(|c| c.is_ascii_digit()).count();
        device_part[at..at + 4 + digits].to_string()
    })?;

    let size = size_after_marker(line).unwrap_or_else(|| UNKNOWN_SIZE.to_string());

    let name = description
        .split(',')
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    Some(PendingDrive {
        identifier,
        name,
        size,
        internal: disk::is_internal_description(line),
        partitions: Vec::new(),
    })
}

fn size_after_marker(line: &str) -> Option<String> {
    line.split_once('*')
        .and_then(|(_, after)| SIZE_TOKEN.find(after))
        .map(|m| m.as_str().to_string())
}

fn parse_partition_row(drive: &str, line: &str) -> Option<Partition> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 5 {
        return None;
    }
    let index = tokens[0].trim_end_matches(':');
    Some(Partition::new(
        disk::partition_identifier(drive, index),
        tokens[2].to_string(),
        format!("{} {}", tokens[3], tokens[4]),
        tokens[5..].join(" "),
    ))
}

/// Coarse fallback from `system_profiler SPStorageDataType`: key/value
/// blocks separated by blank lines, one drive per block, no partitions.
pub fn parse_storage_profile(text: &str) -> Vec<Drive> {
    let mut drives = Vec::new();
    let mut fields: Vec<(String, String)> = Vec::new();

    let lines = text.lines().chain(std::iter::once(""));
    for line in lines {
        let trimmed = line.trim();
        if trimmed.contains(':') {
            let parts: Vec<&str> = trimmed.split(':').collect();
            if parts.len() == 2 {
                fields.push((parts[0].trim().to_string(), parts[1].trim().to_string()));
            }
        } else if trimmed.is_empty() && !fields.is_empty() {
            if let Some(drive) = storage_block_to_drive(&fields, drives.len()) {
                drives.push(drive);
            }
            fields.clear();
        }
    }
    drives
}

fn storage_block_to_drive(fields: &[(String, String)], ordinal: usize) -> Option<Drive> {
    let get = |key: &str| {
        fields
            .iter()
            .rev()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    };

    let mount_point = get("Mount Point").unwrap_or_default();
    let name = if mount_point.is_empty() {
        get("Volume Name").or_else(|| get("Device Name"))?
    } else {
        mount_point
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("/")
            .to_string()
    };
    let size = get("Capacity")
        .or_else(|| get("Size"))
        .unwrap_or_else(|| UNKNOWN_SIZE.to_string());
    let internal = mount_point == "/" || !mount_point.starts_with("/Volumes");
    let identifier = get("BSD Name").unwrap_or_else(|| format!("disk{ordinal}"));

    let mut drive = Drive::new(identifier, Some(name.clone()), size, internal);
    drive.medium_kind = get("File System").unwrap_or_else(|| UNKNOWN_SIZE.to_string());
    drive.mount_point = mount_point;
    drive.is_efi_system_partition_candidate = name.to_ascii_uppercase().contains("EFI");
    Some(drive)
}
