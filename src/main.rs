// ============================================================================
// src/main.rs – sysmaint entrypoint (CLI parsing, logging, dispatch)
// ============================================================================

mod cmd;
mod config;
mod disk;
mod efi;
mod kext;
mod listing;
mod mount;
mod probe;
mod report;
mod system;
mod ui;
mod util;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::cmd::Session;
use crate::config::Config;
use crate::ui::UX;

#[derive(Parser)]
#[command(
    name = "sysmaint",
    version,
    about = "EFI mounting, drive inventory and kext upkeep for Hackintosh installs"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (.toml / .yaml); defaults to $SYSMAINT_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only print warnings and errors
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List drives with their partitions (external media first)
    Drives {
        #[arg(long)]
        json: bool,
    },
    /// Every partition identifier with a fresh EFI probe
    Partitions,
    /// Mount the EFI partition, trying every fallback tier
    MountEfi,
    /// Unmount the currently mounted EFI partition
    UnmountEfi,
    /// Show where the EFI partition is mounted, without mounting it
    EfiStatus {
        #[arg(long)]
        json: bool,
    },
    /// Check the OpenCore folder layout on the mounted EFI partition
    EfiCheck,
    /// OS, hardware and boot facts
    System {
        #[arg(long)]
        json: bool,
    },
    /// System Integrity Protection status
    Sip,
    /// Full diagnostics report
    Report {
        /// Write to FILE instead of stdout
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,
        /// Overwrite FILE if it exists
        #[arg(long)]
        force: bool,
    },
    /// Raw tool output for diagnosing USB EFI mount problems
    DebugUsb,
    /// Kernel extension management
    Kext {
        #[command(subcommand)]
        action: KextAction,
    },
    /// Rebuild the kernel extension cache
    RebuildCache,
    /// Reset ownership and mode of a kext in /System/Library/Extensions
    FixPermissions {
        #[arg(value_name = "KEXT")]
        name: String,
    },
    /// Print step-by-step instructions for mounting EFI by hand
    ManualMount,
}

#[derive(Subcommand)]
enum KextAction {
    /// Whether a kext is loaded, and its version
    Status { name: String },
    /// Install a .kext bundle, or every bundle in a folder
    Install {
        path: PathBuf,
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Remove an installed kext
    Uninstall {
        name: String,
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::resolve(cli.config.as_deref()).context("load configuration")?;
    let session = Session::new(config, UX::new(cli.quiet));

    match cli.command {
        Commands::Drives { json } => cmd::drives::run_drives(&session, json),
        Commands::Partitions => cmd::drives::run_partitions(&session),
        Commands::MountEfi => cmd::efi::run_mount(&session),
        Commands::UnmountEfi => cmd::efi::run_unmount(&session),
        Commands::EfiStatus { json } => cmd::efi::run_status(&session, json),
        Commands::EfiCheck => cmd::efi::run_check(&session),
        Commands::System { json } => cmd::system::run_system(&session, json),
        Commands::Sip => cmd::system::run_sip(&session),
        Commands::Report { output, force } => {
            cmd::report::run_report(&session, output.as_deref(), force)
        }
        Commands::DebugUsb => cmd::report::run_debug_usb(&session),
        Commands::Kext { action } => match action {
            KextAction::Status { name } => cmd::kext::run_status(&session, &name),
            KextAction::Install { path, yes } => cmd::kext::run_install(&session, &path, yes),
            KextAction::Uninstall { name, yes } => cmd::kext::run_uninstall(&session, &name, yes),
        },
        Commands::RebuildCache => cmd::kext::run_rebuild_cache(&session),
        Commands::FixPermissions { name } => cmd::kext::run_fix_permissions(&session, &name),
        Commands::ManualMount => cmd::efi::run_manual_mount(&session),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let ui = UX::new(cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui.error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_kext_and_global_flags() {
        let cli = Cli::try_parse_from(["sysmaint", "-vv", "kext", "install", "/tmp/Lilu.kext", "-y"])
            .expect("parse");
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Kext {
                action: KextAction::Install { path, yes },
            } => {
                assert_eq!(path, PathBuf::from("/tmp/Lilu.kext"));
                assert!(yes);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn report_output_flag() {
        let cli = Cli::try_parse_from(["sysmaint", "report", "-o", "diag.txt", "--quiet"])
            .expect("parse");
        assert!(cli.quiet);
        assert!(matches!(
            cli.command,
            Commands::Report { output: Some(_), force: false }
        ));
    }
}
