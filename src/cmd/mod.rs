// ============================================================================
// src/cmd/mod.rs – command subsystem root
// ============================================================================
pub mod base; // shell execution (Runner, ShellRunner, elevation)
pub mod drives; // sysmaint drives / partitions
pub mod efi; // sysmaint mount-efi / unmount-efi / efi-status / efi-check / manual-mount
pub mod kext; // sysmaint kext ... / rebuild-cache / fix-permissions
pub mod report; // sysmaint report / debug-usb
pub mod system; // sysmaint system / sip

// Re-export common types for convenience:
pub use base::{
    shell_quote, AppleScriptElevator, CommandResult, Elevator, Runner, ShellRunner, SudoElevator,
};

use crate::config::Config;
use crate::mount::InFlight;
use crate::ui::UX;
use crate::util::audit::audit_log;
use std::path::PathBuf;

/// Everything a subcommand needs, built once in `main`.
pub struct Session {
    pub config: Config,
    pub runner: ShellRunner,
    pub ui: UX,
    pub in_flight: InFlight,
    audit_path: PathBuf,
}

impl Session {
    pub fn new(config: Config, ui: UX) -> Self {
        let runner = config.runner();
        let audit_path = config.audit_path();
        let in_flight = InFlight::with_lock_file(config.lock_path());
        Self {
            config,
            runner,
            ui,
            in_flight,
            audit_path,
        }
    }

    pub fn audit(&self, event: &str, detail: &str) {
        audit_log(&self.audit_path, event, detail);
    }
}
