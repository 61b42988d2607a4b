//! Seam between the session and the credential-capture HTTP server.
//!
//! The server itself lives in `twinjack-portal`; the session only needs to
//! launch it against the shared credential log and shut it down during
//! teardown, bounded in time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::CleanupFailure;
use crate::runner::ClientResolver;
use crate::store::CredentialLog;

/// Handle to a running capture server.
pub struct CaptureServerHandle {
    pub local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CaptureServerHandle {
    pub fn new(local_addr: SocketAddr, shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            local_addr,
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Graceful shutdown, bounded by `deadline`. Idempotent: a handle whose
    /// shutdown already fired resolves immediately.
    pub async fn stop(mut self, deadline: Duration) -> Option<CleanupFailure> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(())) => None,
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "capture server task failed during shutdown");
                Some(CleanupFailure::new(
                    "stop capture server",
                    join_err.to_string(),
                ))
            }
            Err(_) => {
                self.task.abort();
                Some(CleanupFailure::new(
                    "stop capture server",
                    format!("no graceful exit within {:?}; aborted", deadline),
                ))
            }
        }
    }
}

/// Launch a capture server bound to `bind`, appending into `log`.
pub trait CaptureLauncher: Send + Sync {
    fn launch(
        &self,
        bind: SocketAddr,
        log: Arc<CredentialLog>,
        resolver: Arc<dyn ClientResolver>,
    ) -> anyhow::Result<CaptureServerHandle>;
}
