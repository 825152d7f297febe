// ============================================================================
// src/mount.rs – EFI mount state machine with tiered fallbacks
// ============================================================================
//! No single identifier is reliable across internal installs, USB installer
//! boots and multi-disk rigs, so mounting walks a fixed ladder:
//!
//! `Idle → DetectingBootDisk → CheckingUsbProtocol → AttemptingKnownEfiSlot
//!  → AttemptingDiscoveredPartitions → AttemptingFallbackList → Mounted | Failed`
//!
//! Every tier checks its candidates for a mounted EFI partition before
//! issuing any mount command, so re-running against a mounted ESP is a no-op.
//! A candidate already mounted as some other volume is skipped, never taken
//! for the ESP.

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cmd::{shell_quote, Runner};
use crate::disk;
use crate::probe::{Occupancy, PartitionProber};

pub const DEFAULT_PLACEHOLDER: &str = "/Volumes/EFI";
pub const DEFAULT_LOCK_PATH: &str = "/tmp/sysmaint.lock";

pub fn default_fallback_identifiers() -> Vec<String> {
    (0..6).map(|n| format!("disk{n}s1")).collect()
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("another mount or unmount is already in progress")]
    Busy,
    #[error("cannot lock {path}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Single in-flight flag shared by every mutating EFI operation. Owned by
/// the caller; the core keeps no global state. With a lock file the flag
/// also covers other `sysmaint` processes through an advisory `flock`.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
    lock_path: Option<PathBuf>,
}

impl InFlight {
    /// In-process only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            busy: AtomicBool::new(false),
            lock_path: Some(path.into()),
        }
    }

    pub fn acquire(&self) -> Result<InFlightGuard<'_>, CoordinatorError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CoordinatorError::Busy)?;
        // Dropping the guard on an early return clears the flag again.
        let mut guard = InFlightGuard {
            flag: &self.busy,
            lock: None,
        };
        if let Some(path) = &self.lock_path {
            guard.lock = Some(lock_exclusive(path)?);
            debug!(path = %path.display(), "in-flight lock taken");
        }
        Ok(guard)
    }

    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

fn lock_exclusive(path: &Path) -> Result<Flock<File>, CoordinatorError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
        .map_err(|source| CoordinatorError::Lock {
            path: path.to_path_buf(),
            source,
        })?;
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
        if errno == Errno::EWOULDBLOCK {
            CoordinatorError::Busy
        } else {
            CoordinatorError::Lock {
                path: path.to_path_buf(),
                source: io::Error::from(errno),
            }
        }
    })
}

/// Releases the flag (and the file lock, if any) on drop, whichever path
/// the operation left by.
pub struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    lock: Option<Flock<File>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MountConfidence {
    /// Mount point re-read from the device after mounting.
    Confirmed,
    /// Mount command exited zero but no mount point could be read back.
    Assumed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountOutcome {
    pub succeeded: bool,
    /// Present only for a confirmed mount.
    pub mount_point: Option<String>,
    pub partition: Option<String>,
    pub confidence: Option<MountConfidence>,
    /// Guessed location reported when the mount could not be confirmed.
    pub assumed_path: Option<String>,
    pub already_mounted: bool,
}

impl MountOutcome {
    pub fn failed() -> Self {
        Self {
            succeeded: false,
            mount_point: None,
            partition: None,
            confidence: None,
            assumed_path: None,
            already_mounted: false,
        }
    }

    fn confirmed(partition: &str, mount_point: String, already_mounted: bool) -> Self {
        Self {
            succeeded: true,
            mount_point: Some(mount_point),
            partition: Some(partition.to_string()),
            confidence: Some(MountConfidence::Confirmed),
            assumed_path: None,
            already_mounted,
        }
    }

    fn assumed(partition: &str, placeholder: &str) -> Self {
        Self {
            succeeded: true,
            mount_point: None,
            partition: Some(partition.to_string()),
            confidence: Some(MountConfidence::Assumed),
            assumed_path: Some(placeholder.to_string()),
            already_mounted: false,
        }
    }

    /// Confirmed path, else the guessed one.
    pub fn best_effort_path(&self) -> Option<&str> {
        self.mount_point
            .as_deref()
            .or(self.assumed_path.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    Idle,
    DetectingBootDisk,
    CheckingUsbProtocol { boot_disk: String },
    AttemptingKnownEfiSlot { boot_disk: String, usb: bool },
    AttemptingDiscoveredPartitions { boot_disk: String, usb: bool },
    /// `any_efi` widens the list with every EFI-likely partition found.
    AttemptingFallbackList { any_efi: bool },
    Mounted(MountOutcome),
    Failed,
}

impl MountState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MountState::Mounted(_) | MountState::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MountState::Idle => "idle",
            MountState::DetectingBootDisk => "detecting boot disk",
            MountState::CheckingUsbProtocol { .. } => "checking usb protocol",
            MountState::AttemptingKnownEfiSlot { .. } => "attempting known efi slot",
            MountState::AttemptingDiscoveredPartitions { .. } => "attempting discovered partitions",
            MountState::AttemptingFallbackList { .. } => "attempting fallback list",
            MountState::Mounted(_) => "mounted",
            MountState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Diskutil,
    Msdos,
}

#[derive(Debug, Clone)]
pub struct MountSettings {
    pub fallback_identifiers: Vec<String>,
    pub scan_all_drives: bool,
    pub placeholder_path: String,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            fallback_identifiers: default_fallback_identifiers(),
            scan_all_drives: true,
            placeholder_path: DEFAULT_PLACEHOLDER.to_string(),
        }
    }
}

pub struct MountCoordinator<'a> {
    prober: PartitionProber<'a>,
    settings: MountSettings,
    in_flight: &'a InFlight,
    attempted: HashSet<String>,
    trace: Vec<MountState>,
}

impl<'a> MountCoordinator<'a> {
    pub fn new(runner: &'a dyn Runner, settings: MountSettings, in_flight: &'a InFlight) -> Self {
        Self {
            prober: PartitionProber::new(runner),
            settings,
            in_flight,
            attempted: HashSet::new(),
            trace: Vec::new(),
        }
    }

    /// States visited by the last run, in order.
    pub fn trace(&self) -> &[MountState] {
        &self.trace
    }

    /// Drives the ladder to a terminal state. A concurrent second call is
    /// rejected rather than racing the first against the same partition.
    pub fn mount_efi(&mut self) -> Result<MountOutcome, CoordinatorError> {
        let _guard = self.in_flight.acquire()?;
        self.attempted.clear();
        self.trace.clear();

        let mut state = MountState::Idle;
        loop {
            info!(state = state.label(), "efi mount");
            self.trace.push(state.clone());
            if state.is_terminal() {
                break;
            }
            state = self.step(state);
        }

        Ok(match state {
            MountState::Mounted(outcome) => outcome,
            _ => MountOutcome::failed(),
        })
    }

    fn step(&mut self, state: MountState) -> MountState {
        match state {
            MountState::Idle => MountState::DetectingBootDisk,
            MountState::DetectingBootDisk => {
                match self
                    .prober
                    .boot_disk()
                    .or_else(|| self.prober.first_usb_disk())
                {
                    Some(boot_disk) => MountState::CheckingUsbProtocol { boot_disk },
                    None => {
                        warn!("boot disk not detected; going straight to fallback list");
                        MountState::AttemptingFallbackList { any_efi: true }
                    }
                }
            }
            MountState::CheckingUsbProtocol { boot_disk } => {
                let usb = self.prober.is_usb(&boot_disk);
                info!(boot_disk = %boot_disk, usb, "boot disk transport");
                MountState::AttemptingKnownEfiSlot { boot_disk, usb }
            }
            MountState::AttemptingKnownEfiSlot { boot_disk, usb } => {
                let slot = disk::efi_slot_of(&boot_disk);
                let outcome = match self.prober.occupancy(&slot) {
                    Occupancy::Efi(mount_point) => Some(already_mounted(&slot, mount_point)),
                    Occupancy::Foreign(mount_point) => {
                        self.skip_foreign(&slot, &mount_point);
                        None
                    }
                    Occupancy::Unmounted => {
                        self.mount_with(&slot, &[Strategy::Diskutil, Strategy::Msdos])
                    }
                };
                match outcome {
                    Some(outcome) => MountState::Mounted(outcome),
                    None => MountState::AttemptingDiscoveredPartitions { boot_disk, usb },
                }
            }
            MountState::AttemptingDiscoveredPartitions { boot_disk, usb } => {
                let candidates: Vec<String> = self
                    .prober
                    .list_drive(&boot_disk)
                    .map(|d| d.efi_candidates().map(|p| p.identifier.clone()).collect())
                    .unwrap_or_default();
                match self.try_candidates(&candidates) {
                    Some(outcome) => MountState::Mounted(outcome),
                    None => MountState::AttemptingFallbackList { any_efi: !usb },
                }
            }
            MountState::AttemptingFallbackList { any_efi } => {
                let mut candidates = self.settings.fallback_identifiers.clone();
                if self.settings.scan_all_drives || any_efi {
                    for drive in self.prober.list_drives() {
                        candidates.extend(drive.efi_candidates().map(|p| p.identifier.clone()));
                    }
                }
                match self.try_candidates(&candidates) {
                    Some(outcome) => MountState::Mounted(outcome),
                    None => MountState::Failed,
                }
            }
            terminal => terminal,
        }
    }

    /// A mounted ESP wins before any mount command is issued; the rest are
    /// mounted in list order.
    fn try_candidates(&mut self, candidates: &[String]) -> Option<MountOutcome> {
        let mut fresh: Vec<&String> = Vec::new();
        for id in candidates {
            if !self.attempted.contains(id) && !fresh.contains(&id) {
                fresh.push(id);
            }
        }
        let mut unmounted = Vec::with_capacity(fresh.len());
        for id in fresh {
            match self.prober.occupancy(id) {
                Occupancy::Efi(mount_point) => return Some(already_mounted(id, mount_point)),
                Occupancy::Foreign(mount_point) => self.skip_foreign(id, &mount_point),
                Occupancy::Unmounted => unmounted.push(id),
            }
        }
        unmounted
            .into_iter()
            .find_map(|id| self.mount_with(id, &[Strategy::Diskutil]))
    }

    fn skip_foreign(&mut self, partition: &str, mount_point: &str) {
        info!(partition, mount_point, "mounted volume is not an EFI partition; skipping");
        self.attempted.insert(partition.to_string());
    }

    fn mount_with(&mut self, partition: &str, strategies: &[Strategy]) -> Option<MountOutcome> {
        self.attempted.insert(partition.to_string());
        for strategy in strategies {
            let command = self.command_for(*strategy, partition);
            let res = self.prober.runner().run_elevated(&command);
            if !res.succeeded {
                warn!(partition, ?strategy, output = %res.trimmed(), "mount attempt failed");
                continue;
            }
            // Exit status alone is not trusted; read the mount point back.
            return Some(match self.prober.mount_point_of(partition) {
                Some(mount_point) => MountOutcome::confirmed(partition, mount_point, false),
                None => {
                    warn!(partition, "mount reported success but no mount point is visible");
                    MountOutcome::assumed(partition, &self.settings.placeholder_path)
                }
            });
        }
        None
    }

    fn command_for(&self, strategy: Strategy, partition: &str) -> String {
        match strategy {
            Strategy::Diskutil => format!("diskutil mount {partition}"),
            Strategy::Msdos => {
                let target = shell_quote(&self.settings.placeholder_path);
                format!("mkdir -p {target} && mount -t msdos /dev/{partition} {target}")
            }
        }
    }
}

fn already_mounted(partition: &str, mount_point: String) -> MountOutcome {
    info!(partition, mount_point = %mount_point, "already mounted");
    MountOutcome::confirmed(partition, mount_point, true)
}
