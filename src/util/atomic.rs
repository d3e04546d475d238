// ============================================================================
// src/util/atomic.rs – Durable atomic writes for site definition files
// ============================================================================

use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Mode for files under sites-available.
pub const SITE_FILE_MODE: u32 = 0o644;

fn parent_dir(path: &Path) -> Result<PathBuf> {
    path.parent()
        .map(|p| p.to_path_buf())
        .context("Target path has no parent directory")
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

/// Write `bytes` to a temp file next to `path`, fsync, rename into place,
/// then fsync the parent directory. The parent must already exist.
/// With `replace == false` an existing target is an error.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8], mode: u32, replace: bool) -> Result<()> {
    reject_symlink_target(path)?;

    let dir = parent_dir(path)?;
    if !dir.is_dir() {
        bail!("Parent directory does not exist: {}", dir.display());
    }

    if !replace && path.exists() {
        bail!("File already exists: {}", path.display());
    }

    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("Target path missing file name")?;

    // hidden and without the .conf suffix so a concurrent scan never picks it up
    let mut tmp = dir.join(format!(".{base}.tmp-{}", nanoid::nanoid!(8)));
    for _ in 0..8 {
        if !tmp.exists() {
            break;
        }
        tmp = dir.join(format!(".{base}.tmp-{}", nanoid::nanoid!(8)));
    }

    let mut f = OpenOptions::new()
        .create_new(true)
        .write(true)
        .mode(mode)
        .open(&tmp)
        .with_context(|| format!("Open temp file failed: {tmp:?}"))?;

    let written = f
        .write_all(bytes)
        .context("Write to temp file failed")
        .and_then(|_| f.sync_all().context("Fsync temp file failed"));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| {
            format!(
                "Atomic rename failed ({} -> {})",
                tmp.display(),
                path.display()
            )
        });
    }

    // umask may have narrowed the create mode
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Set permissions failed for {}", path.display()))?;

    fsync_dir(&dir)?;

    Ok(())
}

/// Atomic write of a site definition with 0644 permissions.
pub fn atomic_write_site(path: &Path, content: &str, replace: bool) -> Result<()> {
    atomic_write_bytes(path, content.as_bytes(), SITE_FILE_MODE, replace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    #[test]
    fn writes_and_refuses_to_clobber() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a.conf");
        atomic_write_site(&target, "one", false).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "one");
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SITE_FILE_MODE);

        assert!(atomic_write_site(&target, "two", false).is_err());
        atomic_write_site(&target, "two", true).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "two");

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn refuses_symlink_targets() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        fs::write(&real, "x").unwrap();
        let link = tmp.path().join("link.conf");
        symlink(&real, &link).unwrap();
        assert!(atomic_write_site(&link, "y", true).is_err());
        assert_eq!(fs::read_to_string(&real).unwrap(), "x");
    }
}
