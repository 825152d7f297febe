// ============================================================================
// src/util/atomic.rs – Durable, permissioned atomic writes (report export)
// ============================================================================

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Mode for exported reports: world-readable, owner-writable.
pub const REPORT_MODE: u32 = 0o644;

/// Return the parent directory path or error with context.
fn parent_dir(path: &Path) -> Result<PathBuf> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(p) => Ok(p.to_path_buf()),
        None => bail!("Target path has no parent directory: {}", path.display()),
    }
}

/// Fsync a directory to persist metadata (like rename).
fn fsync_dir(dir: &Path) -> Result<()> {
    let f = File::open(dir).with_context(|| format!("Open dir for fsync: {dir:?}"))?;
    f.sync_all()
        .with_context(|| format!("Fsync dir failed: {dir:?}"))?;
    Ok(())
}

/// Reject writes if target is a symlink.
fn reject_symlink_target(path: &Path) -> Result<()> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            bail!("Refusing to write to symlink: {}", path.display());
        }
    }
    Ok(())
}

/// Writes bytes to a temp file in the same directory, fsyncs it, renames
/// into place, then fsyncs the parent directory. Applies the exact mode.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8], mode: u32, force: bool) -> Result<()> {
    reject_symlink_target(path)?;

    let dir = parent_dir(path)?;
    if !dir.exists() {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Create parent directory failed: {dir:?}"))?;
    }

    if !force && path.exists() {
        bail!(
            "File already exists (use --force to overwrite): {}",
            path.display()
        );
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Target path missing file name")?;

    // Unique sibling name; create_new below still guards the race.
    let mut tmp = dir.join(format!("{file_name}.tmp-{}", nanoid::nanoid!(8)));
    for _ in 0..8 {
        if !tmp.exists() {
            break;
        }
        tmp = dir.join(format!("{file_name}.tmp-{}", nanoid::nanoid!(8)));
    }

    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .mode(mode)
        .open(&tmp)
        .with_context(|| format!("Open temp file failed: {tmp:?}"))?;

    let written = f
        .write_all(bytes)
        .and_then(|_| f.sync_all())
        .context("Write to temp file failed");
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    fs::rename(&tmp, path).with_context(|| {
        format!(
            "Atomic rename failed ({} -> {})",
            tmp.display(),
            path.display()
        )
    })?;

    // umask may have narrowed the create mode.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Set permissions failed for {}", path.display()))?;

    fsync_dir(&dir)?;
    Ok(())
}

/// Diagnostics report export at 0644.
pub fn atomic_write_report(path: &Path, text: &str, force: bool) -> Result<()> {
    atomic_write_bytes(path, text.as_bytes(), REPORT_MODE, force)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn report_lands_with_exact_mode_and_no_temp_left() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("reports/diag.txt");
        atomic_write_report(&path, "=== report ===\n", false).expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "=== report ===\n");
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, REPORT_MODE);
        let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("read_dir")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn existing_file_needs_force() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("diag.txt");
        fs::write(&path, "old").expect("write");
        assert!(atomic_write_report(&path, "new", false).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "old");
        atomic_write_report(&path, "new", true).expect("forced");
        assert_eq!(fs::read_to_string(&path).expect("read"), "new");
    }

    #[test]
    fn symlink_target_is_refused() {
        let dir = tempdir().expect("tempdir");
        let real = dir.path().join("real.txt");
        fs::write(&real, "x").expect("write");
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");
        assert!(atomic_write_report(&link, "y", true).is_err());
    }
}
