// ============================================================================
// src/system.rs – OS / hardware facts and SIP status
// ============================================================================

use serde::Serialize;
use std::fmt;

use crate::cmd::Runner;
use crate::probe::PartitionProber;

pub const UNKNOWN: &str = "Unknown";
const BYTES_PER_GIB: f64 = 1_073_741_824.0;

/// Snapshot of identifiers shown in the system panel and the report.
/// Every field falls back to `"Unknown"`; building one never fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemFacts {
    pub macos_version: String,
    pub build_number: String,
    pub kernel_version: String,
    pub model_identifier: String,
    pub processor: String,
    pub memory: String,
    pub boot_mode: String,
}

impl SystemFacts {
    pub fn probe(runner: &dyn Runner) -> Self {
        Self {
            macos_version: query(runner, "sw_vers -productVersion"),
            build_number: query(runner, "sw_vers -buildVersion"),
            kernel_version: query(runner, "uname -r"),
            model_identifier: query(runner, "sysctl -n hw.model"),
            processor: query(runner, "sysctl -n machdep.cpu.brand_string"),
            memory: memory(runner),
            boot_mode: boot_mode(runner),
        }
    }

    /// Labelled rows in report order.
    pub fn rows(&self) -> [(&'static str, &str); 7] {
        [
            ("macOS Version", self.macos_version.as_str()),
            ("Build Number", self.build_number.as_str()),
            ("Kernel Version", self.kernel_version.as_str()),
            ("Model Identifier", self.model_identifier.as_str()),
            ("Processor", self.processor.as_str()),
            ("Memory", self.memory.as_str()),
            ("Boot Mode", self.boot_mode.as_str()),
        ]
    }
}

fn query(runner: &dyn Runner, command: &str) -> String {
    let res = runner.run_plain(&format!("{command} 2>/dev/null"));
    if res.has_output() {
        res.trimmed().to_string()
    } else {
        UNKNOWN.to_string()
    }
}

fn memory(runner: &dyn Runner) -> String {
    let res = runner.run_plain("sysctl -n hw.memsize 2>/dev/null");
    if !res.succeeded {
        return UNKNOWN.to_string();
    }
    res.trimmed()
        .parse::<u64>()
        .map(format_memory)
        .unwrap_or_else(|_| UNKNOWN.to_string())
}

pub fn format_memory(bytes: u64) -> String {
    format!("{:.0} GB", bytes as f64 / BYTES_PER_GIB)
}

fn boot_mode(runner: &dyn Runner) -> String {
    match PartitionProber::new(runner).info("/") {
        Some(info) if info.is_usb() => "USB Boot".to_string(),
        Some(_) => "Internal Boot".to_string(),
        None => UNKNOWN.to_string(),
    }
}

/// System Integrity Protection state from `csrutil status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SipStatus {
    Enabled,
    Disabled,
    Unknown,
}

impl SipStatus {
    pub fn probe(runner: &dyn Runner) -> Self {
        let res = runner.run_plain("csrutil status 2>/dev/null");
        if !res.has_output() {
            return SipStatus::Unknown;
        }
        Self::from_status_text(&res.output)
    }

    /// "disabled" anywhere wins, so custom configurations with individual
    /// protections turned off read as disabled too.
    pub fn from_status_text(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("disabled") {
            SipStatus::Disabled
        } else if lower.contains("enabled") {
            SipStatus::Enabled
        } else {
            SipStatus::Unknown
        }
    }
}

impl fmt::Display for SipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SipStatus::Enabled => "Enabled",
            SipStatus::Disabled => "Disabled",
            SipStatus::Unknown => UNKNOWN,
        })
    }
}
