// ============================================================================
// src/cmd/kext.rs – Kext status, install / uninstall, cache and permissions
// ============================================================================

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::cmd::Session;
use crate::efi::EfiLocator;
use crate::kext::{self, ActionReport};
use crate::system::SipStatus;

pub fn run_status(session: &Session, name: &str) -> Result<()> {
    let status = kext::status(&session.runner, name);
    session.ui.data_panel(
        &format!("Kext {name}"),
        &[
            ("Loaded", if status.loaded { "Yes" } else { "No" }.to_string()),
            (
                "Version",
                status.version.unwrap_or_else(|| "-".to_string()),
            ),
        ],
    );
    Ok(())
}

pub fn run_install(session: &Session, source: &Path, yes: bool) -> Result<()> {
    let ui = &session.ui;
    ui.phase("Install Kext");
    warn_if_sip_enabled(session);

    let efi_root = mounted_efi_root(session);
    let bundles = kext::collect_bundles(source)?;
    for bundle in &bundles {
        let name = bundle
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = kext::destination_for(&name, efi_root.as_deref())?;
        ui.info(&format!("{name} → {}", dest.dir().display()));
    }

    if !ui.confirm("Copy these bundles and reset their ownership?", yes)? {
        ui.note("Nothing installed.");
        return Ok(());
    }

    let report = kext::install(&session.runner, source, efi_root.as_deref())
        .with_context(|| format!("install {}", source.display()))?;
    session.audit("KEXT_INSTALL", &summary(source.display().to_string(), &report));
    finish(session, "Install", &report)?;
    ui.note("Rebuild the kext cache (`sysmaint rebuild-cache`) and reboot to load changes.");
    Ok(())
}

pub fn run_uninstall(session: &Session, name: &str, yes: bool) -> Result<()> {
    let ui = &session.ui;
    ui.phase("Uninstall Kext");
    warn_if_sip_enabled(session);

    let efi_root = mounted_efi_root(session);
    if !ui.confirm(&format!("Remove {name}?"), yes)? {
        ui.note("Nothing removed.");
        return Ok(());
    }
    let report = kext::uninstall(&session.runner, name, efi_root.as_deref())?;
    session.audit("KEXT_UNINSTALL", &summary(name.to_string(), &report));
    finish(session, "Uninstall", &report)
}

pub fn run_rebuild_cache(session: &Session) -> Result<()> {
    session.ui.phase("Rebuild Kext Cache");
    session.ui.info("This can take several minutes.");
    let report = kext::rebuild_cache(&session.runner);
    session.audit("REBUILD_CACHE", &summary("/".to_string(), &report));
    finish(session, "Cache rebuild", &report)
}

pub fn run_fix_permissions(session: &Session, name: &str) -> Result<()> {
    session.ui.phase("Fix Kext Permissions");
    let report = kext::fix_permissions(&session.runner, name);
    session.audit("FIX_PERMISSIONS", &summary(name.to_string(), &report));
    finish(session, "Permission repair", &report)
}

fn mounted_efi_root(session: &Session) -> Option<PathBuf> {
    let status = EfiLocator::new(&session.runner).status();
    status
        .path
        .filter(|_| status.mounted)
        .map(PathBuf::from)
}

fn warn_if_sip_enabled(session: &Session) {
    if SipStatus::probe(&session.runner) == SipStatus::Enabled {
        session
            .ui
            .warn("SIP is enabled; writes to /System/Library/Extensions will be refused.");
    }
}

fn summary(subject: String, report: &ActionReport) -> String {
    let result = if report.succeeded() { "ok" } else { "failed" };
    format!("{subject} ({} steps, {result})", report.steps.len())
}

fn finish(session: &Session, action: &str, report: &ActionReport) -> Result<()> {
    let ui = &session.ui;
    for step in &report.steps {
        if step.succeeded {
            ui.success(&step.label);
        } else {
            ui.error(&format!("{}: {}", step.label, step.output));
        }
    }
    if report.succeeded() {
        ui.success(&format!("{action} complete."));
        return Ok(());
    }
    let failed = report
        .failed_step()
        .map(|s| s.command.clone())
        .unwrap_or_default();
    ui.remediation(
        &format!("{action} failed."),
        &format!("Last command: {failed}\nCheck SIP status (`sysmaint sip`) and administrator rights."),
    );
    bail!("{action} failed")
}
