// ============================================================================
// src/util/audit.rs – Minimal append-only audit trail
// ============================================================================

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::debug;

/// Append a timestamped event (0600 permissions, parent created on demand).
/// Silent failure if the log is unwritable; it never blocks the action.
pub fn audit_log(path: &Path, event: &str, detail: &str) {
    if let Some(dir) = path.parent() {
        let _ = fs::create_dir_all(dir);
    }
    match OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
    {
        Ok(mut file) => {
            let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "[{ts}] {event}: {detail}");
        }
        Err(err) => debug!(path = %path.display(), "audit log unwritable: {err}"),
    }
}
