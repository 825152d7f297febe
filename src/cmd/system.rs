// ============================================================================
// src/cmd/system.rs – System facts and SIP status
// ============================================================================

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cmd::Session;
use crate::system::{SipStatus, SystemFacts};

#[derive(Serialize)]
struct SystemView {
    #[serde(flatten)]
    facts: SystemFacts,
    sip: SipStatus,
}

pub fn run_system(session: &Session, json: bool) -> Result<()> {
    let facts = SystemFacts::probe(&session.runner);
    let sip = SipStatus::probe(&session.runner);

    if json {
        let view = SystemView { facts, sip };
        println!(
            "{}",
            serde_json::to_string_pretty(&view).context("serialize system facts")?
        );
        return Ok(());
    }

    let mut rows: Vec<(&str, String)> = facts
        .rows()
        .iter()
        .map(|(k, v)| (*k, v.to_string()))
        .collect();
    rows.push(("SIP Status", sip.to_string()));
    session.ui.banner();
    session.ui.data_panel("System Information", &rows);
    Ok(())
}

pub fn run_sip(session: &Session) -> Result<()> {
    let ui = &session.ui;
    match SipStatus::probe(&session.runner) {
        SipStatus::Disabled => ui.success("SIP is disabled; system extensions can be modified."),
        SipStatus::Enabled => ui.warn(
            "SIP is enabled. Boot into Recovery and run `csrutil disable` before changing system kexts.",
        ),
        SipStatus::Unknown => ui.warn("SIP status could not be determined (`csrutil` unavailable)."),
    }
    Ok(())
}
