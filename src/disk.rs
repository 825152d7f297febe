// ============================================================================
// src/disk.rs – Drive / partition model and the shared EFI heuristics
// ============================================================================

use serde::Serialize;
use std::cmp::Ordering;

/// Partition slot conventionally holding the EFI system partition.
pub const EFI_SLOT_SUFFIX: &str = "s1";

const EXTERNAL_KEYWORDS: [&str; 3] = ["external", "usb", "removable"];

/// One slice of a drive, as reported by the disk listing tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    pub identifier: String,
    pub name: String,
    pub size_description: String,
    pub type_description: String,
    /// Empty when unmounted.
    pub mount_point: String,
    /// Heuristic only; not a filesystem-verified fact.
    pub is_likely_efi: bool,
}

impl Partition {
    pub fn new(
        identifier: String,
        name: String,
        size_description: String,
        type_description: String,
    ) -> Self {
        let is_likely_efi = looks_like_efi(&identifier, &name, &type_description);
        Self {
            identifier,
            name,
            size_description,
            type_description,
            mount_point: String::new(),
            is_likely_efi,
        }
    }

    pub fn is_mounted(&self) -> bool {
        !self.mount_point.is_empty()
    }
}

/// One disk device within a single enumeration snapshot. Identifiers are not
/// stable across boots or reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Drive {
    pub identifier: String,
    pub display_name: String,
    pub size_description: String,
    pub medium_kind: String,
    pub mount_point: String,
    pub is_internal: bool,
    pub is_efi_system_partition_candidate: bool,
    pub partitions: Vec<Partition>,
}

impl Drive {
    pub fn new(identifier: String, display_name: Option<String>, size: String, internal: bool) -> Self {
        let display_name = display_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_display_name(&identifier));
        Self {
            identifier,
            display_name,
            size_description: size,
            medium_kind: medium_kind(internal).to_string(),
            mount_point: String::new(),
            is_internal: internal,
            is_efi_system_partition_candidate: false,
            partitions: Vec::new(),
        }
    }

    /// Attach partitions and lift the slot-1 EFI flag to the drive.
    pub fn with_partitions(mut self, partitions: Vec<Partition>) -> Self {
        let slot = efi_slot_of(&self.identifier);
        self.is_efi_system_partition_candidate = partitions
            .iter()
            .any(|p| p.identifier == slot && p.is_likely_efi);
        self.partitions = partitions;
        self
    }

    pub fn efi_candidates(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter().filter(|p| p.is_likely_efi)
    }
}

pub fn default_display_name(identifier: &str) -> String {
    format!("Disk {identifier}")
}

pub fn medium_kind(internal: bool) -> &'static str {
    if internal {
        "Internal Disk"
    } else {
        "USB Drive"
    }
}

/// Keyword heuristic on a listing line; no bus enumeration is available.
pub fn is_internal_description(text: &str) -> bool {
    let lower = text.to_lowercase();
    !EXTERNAL_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// EFI likelihood: first slot, or "EFI" anywhere in the name or type text.
pub fn looks_like_efi(identifier: &str, name: &str, type_description: &str) -> bool {
    identifier.ends_with(EFI_SLOT_SUFFIX)
        || contains_efi(name)
        || contains_efi(type_description)
}

fn contains_efi(text: &str) -> bool {
    text.to_ascii_uppercase().contains("EFI")
}

pub fn partition_identifier(drive: &str, index: &str) -> String {
    format!("{drive}s{index}")
}

pub fn efi_slot_of(drive: &str) -> String {
    format!("{drive}{EFI_SLOT_SUFFIX}")
}

/// `disk3s2` -> `disk3`. Whole-disk identifiers come back unchanged.
pub fn whole_disk_of(identifier: &str) -> String {
    let id = identifier.trim().trim_start_matches("/dev/");
    let Some(rest) = id.strip_prefix("disk") else {
        return id.to_string();
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    id[..4 + digits].to_string()
}

/// Presentation order: external media first, then identifier ascending with
/// numeric awareness (`disk2` before `disk10`).
pub fn sort_for_presentation(drives: &mut [Drive]) {
    drives.sort_by(|a, b| match (a.is_internal, b.is_internal) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => identifier_key(&a.identifier).cmp(&identifier_key(&b.identifier)),
    });
}

fn identifier_key(identifier: &str) -> (String, u64, String) {
    let prefix: String = identifier
        .chars()
        .take_while(|c| !c.is_ascii_digit())
        .collect();
    let digits: String = identifier[prefix.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let rest = identifier[prefix.len() + digits.len()..].to_string();
    (prefix, digits.parse().unwrap_or(u64::MAX), rest)
}
