// ============================================================================
// src/util/audit.rs – Minimal append-only audit trail of site mutations
// ============================================================================

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    path: Option<PathBuf>,
}

impl AuditTrail {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Append a timestamped event (0640 permissions on first create).
    /// Failure to write never blocks the mutation that triggered it.
    pub fn record(&self, event: &str, detail: &str) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        if let Err(e) = append(path, event, detail) {
            warn!(path = %path.display(), "audit write failed: {e}");
        }
    }
}

fn append(path: &Path, event: &str, detail: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o640)
        .open(path)?;
    let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "[{ts}] {event}: {detail}")
}
