// ============================================================================
// src/cmd/efi.rs – Mount / unmount / inspect the EFI partition
// ============================================================================

use anyhow::{anyhow, bail, Result};
use std::path::Path;

use crate::cmd::Session;
use crate::efi::{self, EfiLocator};
use crate::mount::{MountConfidence, MountCoordinator};

pub fn run_mount(session: &Session) -> Result<()> {
    let ui = &session.ui;
    ui.banner();
    ui.phase("Mount EFI");
    ui.info("Walking boot disk, known slot, discovered partitions, then fallback list.");

    let settings = session.config.mount_settings();
    let placeholder = settings.placeholder_path.clone();
    let mut coordinator = MountCoordinator::new(&session.runner, settings, &session.in_flight);
    let outcome = coordinator.mount_efi()?;

    let trail: Vec<&str> = coordinator.trace().iter().map(|s| s.label()).collect();
    ui.note(&format!("Path taken: {}", trail.join(" → ")));

    if !outcome.succeeded {
        session.audit("MOUNT_FAILED", &trail.join(" > "));
        ui.remediation(
            "Mount Failed: no EFI partition could be mounted.",
            &format!(
                "Try `sysmaint debug-usb` to see what the system reports.\n\n{}",
                efi::manual_mount_instructions(&placeholder)
            ),
        );
        bail!("EFI mount failed");
    }

    let partition = outcome.partition.as_deref().unwrap_or("?");
    let path = outcome.best_effort_path().unwrap_or(&placeholder);
    session.audit("MOUNT", &format!("{partition} at {path}"));

    if outcome.already_mounted {
        ui.success(&format!("EFI already mounted: {partition} at {path}"));
    } else {
        ui.success(&format!("EFI mounted: {partition}"));
    }
    match outcome.confidence {
        Some(MountConfidence::Assumed) => ui.warn(&format!(
            "Mount reported success but no mount point could be read back; \
             check {path} or run `sysmaint efi-status`."
        )),
        _ => ui.data_panel(
            "EFI",
            &[
                ("Partition", partition.to_string()),
                ("Location", path.to_string()),
            ],
        ),
    }
    Ok(())
}

pub fn run_unmount(session: &Session) -> Result<()> {
    let ui = &session.ui;
    let locator = EfiLocator::new(&session.runner);
    let status = locator.status();
    let Some(path) = status.path.filter(|_| status.mounted) else {
        ui.warn("EFI partition is not mounted; nothing to unmount.");
        return Ok(());
    };

    let res = locator.unmount(&path, &session.in_flight)?;
    if res.succeeded {
        session.audit("UNMOUNT", &path);
        ui.success(&format!("EFI partition unmounted ({path})."));
        Ok(())
    } else {
        ui.remediation(
            "Unmount Failed",
            &format!(
                "{}\nClose any Finder windows or shells using {path} and retry.",
                res.trimmed()
            ),
        );
        Err(anyhow!("unmount of {path} failed"))
    }
}

pub fn run_status(session: &Session, json: bool) -> Result<()> {
    let status = EfiLocator::new(&session.runner).status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    let ui = &session.ui;
    ui.data_panel(
        "EFI Status",
        &[
            ("Mounted", if status.mounted { "Yes" } else { "No" }.to_string()),
            ("Path", status.path.clone().unwrap_or_else(|| "-".into())),
            ("Device", status.device.clone().unwrap_or_else(|| "-".into())),
        ],
    );
    Ok(())
}

pub fn run_check(session: &Session) -> Result<()> {
    let ui = &session.ui;
    let status = EfiLocator::new(&session.runner).status();
    let Some(path) = status.path else {
        ui.remediation(
            "EFI partition not mounted.",
            "Mount it first with `sysmaint mount-efi`.",
        );
        bail!("EFI not mounted");
    };

    ui.phase("EFI Structure Check");
    let layout = efi::check_structure(Path::new(&path));
    for entry in &layout {
        if entry.present {
            ui.success(entry.relative);
        } else {
            ui.warn(&format!("{} missing", entry.relative));
        }
    }
    if layout.iter().all(|e| e.present) {
        ui.info(&format!("OpenCore layout complete under {path}."));
    }
    Ok(())
}

pub fn run_manual_mount(session: &Session) -> Result<()> {
    println!(
        "{}",
        efi::manual_mount_instructions(&session.config.mount.placeholder_path)
    );
    Ok(())
}
