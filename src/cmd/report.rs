// ============================================================================
// src/cmd/report.rs – Diagnostics report and USB debug dump
// ============================================================================

use anyhow::{Context, Result};
use std::path::Path;

use crate::cmd::Session;
use crate::report::{debug_usb_dump, DiagnosticsAggregator};
use crate::util::atomic::atomic_write_report;

/// Prints to stdout, or writes atomically when `output` is given.
pub fn run_report(session: &Session, output: Option<&Path>, force: bool) -> Result<()> {
    let text = DiagnosticsAggregator::new(&session.runner).build_report();
    match output {
        Some(path) => {
            atomic_write_report(path, &text, force)
                .with_context(|| format!("export report to {}", path.display()))?;
            session.audit("REPORT_EXPORT", &path.display().to_string());
            session
                .ui
                .success(&format!("Report saved to {}", path.display()));
        }
        None => print!("{text}"),
    }
    Ok(())
}

pub fn run_debug_usb(session: &Session) -> Result<()> {
    print!("{}", debug_usb_dump(&session.runner));
    Ok(())
}
