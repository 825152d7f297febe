// ============================================================================
// src/kext.rs – Kext status, placement, removal and cache maintenance
// ============================================================================
//! Only file placement, ownership and cache invalidation are handled here;
//! bundle contents are never inspected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::cmd::{shell_quote, Runner};
use crate::efi;

pub const SYSTEM_EXTENSIONS: &str = "/System/Library/Extensions";
const BUNDLE_EXT: &str = "kext";

/// Kexts that live in the system extensions folder rather than the
/// bootloader's kext directory.
const SYSTEM_KEXTS: [&str; 1] = ["AppleHDA"];

static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^()\s]+)\)").expect("Invalid kext version regex"));

#[derive(Debug, Error)]
pub enum KextError {
    #[error("{0} is not a .kext bundle or a folder containing one")]
    NoBundles(PathBuf),
    #[error("{0} belongs on the EFI partition, which is not mounted")]
    EfiNotMounted(String),
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KextStatus {
    pub name: String,
    pub loaded: bool,
    pub version: Option<String>,
}

/// Loaded-extension table; `kmutil` on current releases, `kextstat` before.
fn loaded_table(runner: &dyn Runner) -> String {
    let modern = runner.run_plain("kmutil showloaded --list-only 2>/dev/null");
    if modern.has_output() {
        return modern.output;
    }
    let legacy = runner.run_plain("kextstat 2>/dev/null");
    if legacy.succeeded {
        legacy.output
    } else {
        String::new()
    }
}

pub fn status(runner: &dyn Runner, name: &str) -> KextStatus {
    let needle = name.to_lowercase();
    let table = loaded_table(runner);
    let line = table
        .lines()
        .find(|l| l.to_lowercase().contains(&needle));
    KextStatus {
        name: name.to_string(),
        loaded: line.is_some(),
        version: line.and_then(version_of_line),
    }
}

/// Version is the parenthesised token, e.g. `com.apple.driver.AppleHDA (500.7.4)`.
fn version_of_line(line: &str) -> Option<String> {
    VERSION_TOKEN
        .captures(line)
        .map(|c| c[1].to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    System,
    Efi(PathBuf),
}

impl Destination {
    pub fn dir(&self) -> PathBuf {
        match self {
            Destination::System => PathBuf::from(SYSTEM_EXTENSIONS),
            Destination::Efi(root) => efi::oc_kexts_dir(root),
        }
    }
}

pub fn is_system_kext(name: &str) -> bool {
    let stem = name.trim_end_matches(".kext");
    SYSTEM_KEXTS.iter().any(|k| k.eq_ignore_ascii_case(stem))
}

/// Where a bundle named `name` goes, given the mounted EFI root if any.
pub fn destination_for(name: &str, efi_root: Option<&Path>) -> Result<Destination, KextError> {
    if is_system_kext(name) {
        return Ok(Destination::System);
    }
    efi_root
        .map(|root| Destination::Efi(root.to_path_buf()))
        .ok_or_else(|| KextError::EfiNotMounted(name.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub label: String,
    pub command: String,
    pub succeeded: bool,
    pub output: String,
}

/// Ordered record of the elevated commands an action issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    pub steps: Vec<Step>,
    /// Set by the last command sequence run; a failed primary followed by a
    /// working fallback still completes.
    pub completed: bool,
}

impl ActionReport {
    pub fn succeeded(&self) -> bool {
        self.completed
    }

    pub fn failed_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| !s.succeeded)
    }

    /// Runs each command elevated, stopping at the first failure.
    fn run(&mut self, runner: &dyn Runner, steps: Vec<(String, String)>) -> bool {
        for (label, command) in steps {
            let res = runner.run_elevated(&command);
            let succeeded = res.succeeded;
            if !succeeded {
                warn!(step = %label, output = %res.trimmed(), "kext step failed");
            }
            self.steps.push(Step {
                label,
                command,
                succeeded,
                output: res.trimmed().to_string(),
            });
            if !succeeded {
                self.completed = false;
                return false;
            }
        }
        self.completed = true;
        true
    }
}

/// A single bundle, or every bundle directly inside a folder.
pub fn collect_bundles(source: &Path) -> Result<Vec<PathBuf>, KextError> {
    if is_bundle(source) {
        return Ok(vec![source.to_path_buf()]);
    }
    if !source.is_dir() {
        return Err(KextError::NoBundles(source.to_path_buf()));
    }
    let mut bundles: Vec<PathBuf> = fs::read_dir(source)
        .map_err(|e| KextError::Read {
            path: source.to_path_buf(),
            source: e,
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| is_bundle(p))
        .collect();
    if bundles.is_empty() {
        return Err(KextError::NoBundles(source.to_path_buf()));
    }
    bundles.sort();
    Ok(bundles)
}

fn is_bundle(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(BUNDLE_EXT)
}

fn bundle_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn quoted(path: &Path) -> String {
    shell_quote(&path.to_string_lossy())
}

fn permission_steps(target: &Path) -> Vec<(String, String)> {
    vec![
        (
            "set ownership".to_string(),
            format!("chown -R root:wheel {}", quoted(target)),
        ),
        (
            "set mode".to_string(),
            format!("chmod -R 755 {}", quoted(target)),
        ),
    ]
}

fn touch_extensions_step() -> (String, String) {
    (
        "invalidate extensions folder".to_string(),
        format!("touch {}", shell_quote(SYSTEM_EXTENSIONS)),
    )
}

/// Copies every bundle from `source` into its destination, replacing any
/// previous copy, then fixes ownership and mode.
pub fn install(
    runner: &dyn Runner,
    source: &Path,
    efi_root: Option<&Path>,
) -> Result<ActionReport, KextError> {
    let bundles = collect_bundles(source)?;
    let plan = bundles
        .iter()
        .map(|b| destination_for(&bundle_name(b), efi_root).map(|d| (b, d)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut report = ActionReport::default();
    for (bundle, destination) in plan {
        let name = bundle_name(bundle);
        let dir = destination.dir();
        let target = dir.join(&name);

        let mut steps = Vec::new();
        if matches!(destination, Destination::Efi(_)) {
            steps.push((
                "create kext folder".to_string(),
                format!("mkdir -p {}", quoted(&dir)),
            ));
        }
        steps.push((
            format!("remove previous {name}"),
            format!("rm -rf {}", quoted(&target)),
        ));
        steps.push((
            format!("copy {name}"),
            format!("cp -R {} {}", quoted(bundle), quoted(&dir)),
        ));
        steps.extend(permission_steps(&target));
        if destination == Destination::System {
            steps.push(touch_extensions_step());
        }

        if !report.run(runner, steps) {
            return Ok(report);
        }
        info!(kext = %name, dir = %dir.display(), "kext installed");
    }
    Ok(report)
}

pub fn uninstall(
    runner: &dyn Runner,
    name: &str,
    efi_root: Option<&Path>,
) -> Result<ActionReport, KextError> {
    let bundle = bundle_file_name(name);
    let destination = destination_for(&bundle, efi_root)?;
    let target = destination.dir().join(&bundle);

    let mut steps = vec![(format!("remove {bundle}"), format!("rm -rf {}", quoted(&target)))];
    if destination == Destination::System {
        steps.push(touch_extensions_step());
    }
    let mut report = ActionReport::default();
    if report.run(runner, steps) {
        info!(kext = %bundle, "kext removed");
    }
    Ok(report)
}

fn bundle_file_name(name: &str) -> String {
    if name.ends_with(".kext") {
        name.to_string()
    } else {
        format!("{name}.kext")
    }
}

/// `kextcache -i /`, with `kmutil` taking over on releases without it.
pub fn rebuild_cache(runner: &dyn Runner) -> ActionReport {
    let mut report = ActionReport::default();
    if report.run(
        runner,
        vec![("rebuild kext cache".to_string(), "kextcache -i /".to_string())],
    ) {
        return report;
    }
    report.run(
        runner,
        vec![(
            "update kernel collections".to_string(),
            "kmutil install --update-all".to_string(),
        )],
    );
    report
}

/// Ownership, mode and folder timestamp for a kext in the system folder.
pub fn fix_permissions(runner: &dyn Runner, name: &str) -> ActionReport {
    let target = Path::new(SYSTEM_EXTENSIONS).join(bundle_file_name(name));
    let mut steps = permission_steps(&target);
    steps.push(touch_extensions_step());
    let mut report = ActionReport::default();
    report.run(runner, steps);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use tempfile::tempdir;

    const KMUTIL: &str = "\
Index Refs Address            Size       Wired      Name (Version) UUID <Linked Against>
   65    2 0xffffff7f83a2c000 0x1d000    0x1d000    as.vit9696.Lilu (1.6.7) 3A1C1C6E <8 6 5 3 2 1>
   66    0 0xffffff7f83a49000 0x9d000    0x9d000    as.vit9696.AppleALC (1.8.9) 0B6E2F9A <65 15 8 6 5 3 2 1>
";

    #[test]
    fn status_reads_loaded_table() {
        let runner = ScriptedRunner::new().ok("kmutil showloaded", KMUTIL);
        let lilu = status(&runner, "lilu");
        assert!(lilu.loaded);
        assert_eq!(lilu.version.as_deref(), Some("1.6.7"));

        let hda = status(&runner, "AppleHDA");
        assert!(!hda.loaded);
        assert_eq!(hda.version, None);
        assert_eq!(runner.count_matching("kextstat"), 0);
    }

    #[test]
    fn status_falls_back_to_kextstat() {
        let runner = ScriptedRunner::new()
            .fail("kmutil", "")
            .ok("kextstat", "  12  3 0xff 0x1 0x1 com.apple.driver.AppleHDA (500.7.4) ABC <1>\n");
        let hda = status(&runner, "AppleHDA");
        assert!(hda.loaded);
        assert_eq!(hda.version.as_deref(), Some("500.7.4"));
    }

    #[test]
    fn destinations() {
        let efi = Path::new("/Volumes/EFI");
        assert_eq!(destination_for("AppleHDA.kext", None).expect("system"), Destination::System);
        assert_eq!(
            destination_for("Lilu.kext", Some(efi)).expect("efi").dir(),
            PathBuf::from("/Volumes/EFI/EFI/OC/Kexts")
        );
        assert!(matches!(
            destination_for("Lilu.kext", None),
            Err(KextError::EfiNotMounted(_))
        ));
    }

    #[test]
    fn collects_bundles_from_folder() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("Lilu.kext")).expect("mkdir");
        fs::create_dir(dir.path().join("AppleALC.kext")).expect("mkdir");
        fs::write(dir.path().join("README.md"), "docs").expect("write");
        let bundles = collect_bundles(dir.path()).expect("bundles");
        let names: Vec<_> = bundles.iter().map(|b| bundle_name(b)).collect();
        assert_eq!(names, ["AppleALC.kext", "Lilu.kext"]);

        let empty = tempdir().expect("tempdir");
        assert!(matches!(collect_bundles(empty.path()), Err(KextError::NoBundles(_))));
    }

    #[test]
    fn install_to_efi_runs_steps_in_order() {
        let dir = tempdir().expect("tempdir");
        let bundle = dir.path().join("Lilu.kext");
        fs::create_dir(&bundle).expect("mkdir");
        let runner = ScriptedRunner::new()
            .elevated("mkdir", "", true)
            .elevated("rm -rf", "", true)
            .elevated("cp -R", "", true)
            .elevated("chown", "", true)
            .elevated("chmod", "", true);
        let report = install(&runner, &bundle, Some(Path::new("/Volumes/EFI"))).expect("install");
        assert!(report.succeeded());
        let copy = format!("cp -R '{}' '/Volumes/EFI/EFI/OC/Kexts'", bundle.display());
        let commands: Vec<_> = report.steps.iter().map(|s| s.command.as_str()).collect();
        assert_eq!(
            commands,
            [
                "mkdir -p '/Volumes/EFI/EFI/OC/Kexts'",
                "rm -rf '/Volumes/EFI/EFI/OC/Kexts/Lilu.kext'",
                copy.as_str(),
                "chown -R root:wheel '/Volumes/EFI/EFI/OC/Kexts/Lilu.kext'",
                "chmod -R 755 '/Volumes/EFI/EFI/OC/Kexts/Lilu.kext'",
            ]
        );
        assert!(runner.calls().iter().all(|(_, elevated)| *elevated));
    }

    #[test]
    fn system_install_stops_at_first_failure() {
        let dir = tempdir().expect("tempdir");
        let bundle = dir.path().join("AppleHDA.kext");
        fs::create_dir(&bundle).expect("mkdir");
        let runner = ScriptedRunner::new()
            .elevated("rm -rf", "", true)
            .elevated("cp -R", "Operation not permitted", false);
        let report = install(&runner, &bundle, None).expect("planned");
        assert!(!report.succeeded());
        assert_eq!(report.steps.len(), 2);
        assert_eq!(
            report.failed_step().map(|s| s.output.as_str()),
            Some("Operation not permitted")
        );
        assert_eq!(runner.count_matching("chown"), 0);
        assert_eq!(runner.count_matching("touch"), 0);
    }

    #[test]
    fn uninstall_system_kext_touches_extensions() {
        let runner = ScriptedRunner::new()
            .elevated("rm -rf", "", true)
            .elevated("touch", "", true);
        let report = uninstall(&runner, "AppleHDA", None).expect("planned");
        assert!(report.succeeded());
        assert_eq!(
            runner.lines_matching(""),
            [
                "rm -rf '/System/Library/Extensions/AppleHDA.kext'",
                "touch '/System/Library/Extensions'"
            ]
        );
    }

    #[test]
    fn cache_rebuild_falls_back_to_kmutil() {
        let runner = ScriptedRunner::new()
            .elevated("kextcache", "kextcache: command not found", false)
            .elevated("kmutil install", "", true);
        let report = rebuild_cache(&runner);
        assert!(report.succeeded());
        assert_eq!(report.steps.len(), 2);
        assert!(!report.steps[0].succeeded);

        let direct = ScriptedRunner::new().elevated("kextcache", "", true);
        let report = rebuild_cache(&direct);
        assert_eq!(report.steps.len(), 1);
        assert_eq!(direct.count_matching("kmutil"), 0);
    }

    #[test]
    fn permission_repair_targets_system_folder() {
        let runner = ScriptedRunner::new()
            .elevated("chown", "", true)
            .elevated("chmod", "", true)
            .elevated("touch", "", true);
        let report = fix_permissions(&runner, "AppleHDA.kext");
        assert!(report.succeeded());
        assert_eq!(
            report.steps[0].command,
            "chown -R root:wheel '/System/Library/Extensions/AppleHDA.kext'"
        );
    }
}
