// ============================================================================
// src/util/pathguard.rs – Allow-listed path containment
// ============================================================================

use crate::error::{AdminError, AdminResult};
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Confirms that paths resolve beneath one of the configured roots.
#[derive(Debug, Clone)]
pub struct PathValidator {
    roots: Vec<PathBuf>,
}

impl PathValidator {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|r| {
                let r = r.as_ref();
                fs::canonicalize(r).unwrap_or_else(|_| r.to_path_buf())
            })
            .collect();
        Self { roots }
    }

    /// Canonicalize `path` (symlinks, `..`) and test it against the roots.
    /// Paths that do not exist never validate.
    pub fn validate(&self, path: &Path) -> bool {
        match fs::canonicalize(path) {
            Ok(canon) => self.contained(&canon),
            Err(_) => false,
        }
    }

    /// Like [`validate`](Self::validate) for a path that may not exist yet:
    /// the deepest existing ancestor is canonicalized and the rest re-appended.
    pub fn validate_prospective(&self, path: &Path) -> bool {
        if !path.is_absolute() {
            return false;
        }
        let mut existing = path;
        let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    rest.push(name);
                    existing = parent;
                }
                _ => return false,
            }
        }
        // `..` after the existing prefix would be resolved lexically; refuse it.
        if path
            .strip_prefix(existing)
            .map(|tail| tail.components().any(|c| matches!(c, Component::ParentDir)))
            .unwrap_or(true)
        {
            return false;
        }
        let Ok(mut canon) = fs::canonicalize(existing) else {
            return false;
        };
        for name in rest.iter().rev() {
            canon.push(name);
        }
        self.contained(&canon)
    }

    /// Create `path` (recursively, with `mode`) if it passes the gate.
    pub fn ensure_directory(&self, path: &Path, mode: u32) -> AdminResult<()> {
        if path.is_dir() {
            if self.validate(path) {
                return Ok(());
            }
            return Err(AdminError::Forbidden(format!(
                "Invalid directory path: {}",
                path.display()
            )));
        }
        if !self.validate_prospective(path) {
            return Err(AdminError::Forbidden(format!(
                "Invalid directory path: {}",
                path.display()
            )));
        }
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .map_err(|e| {
                AdminError::execution(format!(
                    "Failed to create directory {}: {e}",
                    path.display()
                ))
            })?;
        info!(path = %path.display(), "created directory");
        Ok(())
    }

    fn contained(&self, canon: &Path) -> bool {
        let ok = self.roots.iter().any(|root| canon.starts_with(root));
        debug!(path = %canon.display(), allowed = ok, "path containment check");
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("www");
        let outside = tmp.path().join("www-evil");
        fs::create_dir_all(root.join("site")).unwrap();
        fs::create_dir_all(&outside).unwrap();
        (tmp, root, outside)
    }

    #[test]
    fn accepts_paths_beneath_root() {
        let (_tmp, root, _) = setup();
        let v = PathValidator::new([&root]);
        assert!(v.validate(&root));
        assert!(v.validate(&root.join("site")));
    }

    #[test]
    fn rejects_sibling_prefix_and_dotdot_escape() {
        let (_tmp, root, outside) = setup();
        let v = PathValidator::new([&root]);
        assert!(!v.validate(&outside));
        assert!(!v.validate(&root.join("site/../../www-evil")));
        assert!(!v.validate(&root.join("missing")));
    }

    #[test]
    fn rejects_symlink_pointing_outside() {
        let (_tmp, root, outside) = setup();
        symlink(&outside, root.join("escape")).unwrap();
        let v = PathValidator::new([&root]);
        assert!(!v.validate(&root.join("escape")));
        assert!(!v.validate_prospective(&root.join("escape/new")));
    }

    #[test]
    fn ensure_directory_is_gated() {
        let (_tmp, root, outside) = setup();
        let v = PathValidator::new([&root]);

        let nested = root.join("a/b/c");
        v.ensure_directory(&nested, 0o755).unwrap();
        assert!(nested.is_dir());

        let err = v.ensure_directory(&outside.join("x"), 0o755).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(!outside.join("x").exists());

        let err = v
            .ensure_directory(&root.join("a/../../www-evil/y"), 0o755)
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
