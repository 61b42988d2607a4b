//! Session metadata snapshot persisted for post-mortem review.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CleanupFailure;
use crate::types::{Phase, RoleAssignment, SessionId, TargetAp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub phase: Phase,
    pub target: TargetAp,
    pub assignments: Vec<RoleAssignment>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub cleanup_failures: Vec<CleanupFailure>,
}

/// Write the snapshot atomically (temp file + rename), so a reader never
/// observes a partial document.
pub fn write_snapshot(path: &Path, snapshot: &SessionSnapshot) {
    let result = (|| -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();
    if let Err(err) = result {
        warn!(path = %path.display(), error = %err, "failed to persist session snapshot");
    }
}

pub fn read_snapshot(path: &Path) -> anyhow::Result<SessionSnapshot> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
