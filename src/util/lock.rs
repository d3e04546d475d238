// ============================================================================
// src/util/lock.rs – Coarse administrative lock around site mutations
// ============================================================================

use crate::error::{AdminError, AdminResult};
use nix::fcntl::{Flock, FlockArg};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive `flock(2)` on a well-known file. One holder at a time across
/// every vhostctl process on the host.
#[derive(Debug, Clone)]
pub struct AdminLock {
    path: PathBuf,
}

/// Released on drop.
pub struct LockGuard {
    _flock: Flock<File>,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

impl AdminLock {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Block until the lock is held.
    pub fn acquire(&self) -> AdminResult<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .open(&self.path)
            .map_err(|e| {
                AdminError::execution(format!(
                    "open lock file {} failed: {e}",
                    self.path.display()
                ))
            })?;
        let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            AdminError::execution(format!(
                "lock {} failed: {errno}",
                self.path.display()
            ))
        })?;
        debug!(path = %self.path.display(), "administrative lock held");
        Ok(LockGuard { _flock: flock })
    }
}
