// ============================================================================
// src/config.rs – Config loader (TOML / YAML by extension, all fields defaulted)
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cmd::{AppleScriptElevator, Elevator, ShellRunner, SudoElevator};
use crate::mount::{
    default_fallback_identifiers, MountSettings, DEFAULT_LOCK_PATH, DEFAULT_PLACEHOLDER,
};

pub const CONFIG_ENV: &str = "SYSMAINT_CONFIG";
const DEFAULT_CONFIG_REL: &str = ".config/sysmaint/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("parse YAML config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unsupported config extension for {0} (use .toml, .yaml or .yml)")]
    Extension(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellCfg {
    #[serde(default = "default_shell")]
    pub path: String,
    /// Unset means wait for the child indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_shell() -> String {
    "/bin/zsh".to_string()
}

impl Default for ShellCfg {
    fn default() -> Self {
        Self {
            path: default_shell(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElevationMethod {
    #[default]
    Osascript,
    Sudo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElevationCfg {
    #[serde(default)]
    pub method: ElevationMethod,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

fn default_prompt() -> String {
    "System Maintenance needs administrator access to manage disks and kexts.".to_string()
}

impl Default for ElevationCfg {
    fn default() -> Self {
        Self {
            method: ElevationMethod::default(),
            prompt: default_prompt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountCfg {
    #[serde(default = "default_fallback_identifiers")]
    pub fallback_identifiers: Vec<String>,
    #[serde(default = "default_true")]
    pub scan_all_drives: bool,
    #[serde(default = "default_placeholder")]
    pub placeholder_path: String,
    /// Advisory lock shared by concurrent `sysmaint` runs; `~/` expands.
    #[serde(default = "default_lock_path")]
    pub lock_path: String,
}

fn default_true() -> bool {
    true
}

fn default_placeholder() -> String {
    DEFAULT_PLACEHOLDER.to_string()
}

fn default_lock_path() -> String {
    DEFAULT_LOCK_PATH.to_string()
}

impl Default for MountCfg {
    fn default() -> Self {
        Self {
            fallback_identifiers: default_fallback_identifiers(),
            scan_all_drives: true,
            placeholder_path: default_placeholder(),
            lock_path: default_lock_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditCfg {
    /// `~/` is expanded against `$HOME`.
    #[serde(default = "default_audit_path")]
    pub path: String,
}

fn default_audit_path() -> String {
    "~/Library/Logs/SystemMaintenance/audit.log".to_string()
}

impl Default for AuditCfg {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shell: ShellCfg,
    #[serde(default)]
    pub elevation: ElevationCfg,
    #[serde(default)]
    pub mount: MountCfg,
    #[serde(default)]
    pub audit: AuditCfg,
}

impl Config {
    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self, ConfigError> {
        let path = p.as_ref().to_path_buf();
        let s = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&s).map_err(|source| ConfigError::Toml { path, source }),
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&s).map_err(|source| ConfigError::Yaml { path, source })
            }
            _ => Err(ConfigError::Extension(path)),
        }
    }

    /// An explicit path (flag or environment) must exist; the per-user
    /// default is optional and falls back to built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::load(PathBuf::from(path));
        }
        match home_dir().map(|h| h.join(DEFAULT_CONFIG_REL)) {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn runner(&self) -> ShellRunner {
        let elevator: Box<dyn Elevator> = match self.elevation.method {
            ElevationMethod::Osascript => Box::new(AppleScriptElevator::new(&self.elevation.prompt)),
            ElevationMethod::Sudo => Box::new(SudoElevator),
        };
        ShellRunner::new(&self.shell.path, elevator)
            .with_timeout(self.shell.timeout_secs.map(Duration::from_secs))
    }

    pub fn mount_settings(&self) -> MountSettings {
        MountSettings {
            fallback_identifiers: self.mount.fallback_identifiers.clone(),
            scan_all_drives: self.mount.scan_all_drives,
            placeholder_path: self.mount.placeholder_path.clone(),
        }
    }

    pub fn audit_path(&self) -> PathBuf {
        expand_home(&self.audit.path)
    }

    pub fn lock_path(&self) -> PathBuf {
        expand_home(&self.mount.lock_path)
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

fn expand_home(raw: &str) -> PathBuf {
    match (raw.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.shell.path, "/bin/zsh");
        assert_eq!(cfg.shell.timeout_secs, None);
        assert_eq!(cfg.elevation.method, ElevationMethod::Osascript);
        assert_eq!(cfg.mount.fallback_identifiers.len(), 6);
        assert_eq!(cfg.mount.fallback_identifiers[5], "disk5s1");
        assert!(cfg.mount.scan_all_drives);
        assert_eq!(cfg.mount.placeholder_path, "/Volumes/EFI");
        assert_eq!(cfg.lock_path(), PathBuf::from("/tmp/sysmaint.lock"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sysmaint.toml");
        fs::write(
            &path,
            "[shell]\ntimeout_secs = 30\n\n[elevation]\nmethod = \"sudo\"\n\n[mount]\nfallback_identifiers = [\"disk3s1\"]\n",
        )
        .expect("write");
        let cfg = Config::load(&path).expect("load");
        assert_eq!(cfg.shell.path, "/bin/zsh");
        assert_eq!(cfg.shell.timeout_secs, Some(30));
        assert_eq!(cfg.elevation.method, ElevationMethod::Sudo);
        assert_eq!(cfg.mount.fallback_identifiers, ["disk3s1"]);
        assert!(cfg.mount.scan_all_drives);
        assert_eq!(cfg.audit, AuditCfg::default());
    }

    #[test]
    fn yaml_is_accepted() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sysmaint.yml");
        fs::write(&path, "mount:\n  scan_all_drives: false\n  placeholder_path: /Volumes/ESP\n")
            .expect("write");
        let cfg = Config::load(&path).expect("load");
        assert!(!cfg.mount.scan_all_drives);
        assert_eq!(cfg.mount_settings().placeholder_path, "/Volumes/ESP");
    }

    #[test]
    fn load_errors_are_typed() {
        let dir = tempdir().expect("tempdir");
        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "[shell\npath = 1").expect("write");
        assert!(matches!(Config::load(&bad), Err(ConfigError::Toml { .. })));

        let ini = dir.path().join("cfg.ini");
        fs::write(&ini, "").expect("write");
        assert!(matches!(Config::load(&ini), Err(ConfigError::Extension(_))));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        assert!(Config::resolve(Some(&missing)).is_err());
    }

    #[test]
    fn tilde_expands_against_home() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_home("~/x/audit.log"), home.join("x/audit.log"));
        }
        assert_eq!(expand_home("/var/log/a.log"), PathBuf::from("/var/log/a.log"));
    }
}
