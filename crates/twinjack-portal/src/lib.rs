//! Credential-capture HTTP server for twinjack sessions.
//!
//! Serves the login page, answers the connectivity probes client devices
//! use to decide whether the uplink works, and appends submissions to the
//! session's credential log. Launched and shut down by the session state
//! machine through the `CaptureLauncher` seam.

pub mod page;
pub mod server;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::oneshot;

use twinjack_core::capture::{CaptureLauncher, CaptureServerHandle};
use twinjack_core::runner::ClientResolver;
use twinjack_core::store::CredentialLog;

use crate::server::{build_router, run_server, CaptureState};

/// Portal tuning knobs.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub max_concurrency: usize,
    /// Login page markup; `None` serves the built-in page.
    pub page_html: Option<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 16 * 1024,
            request_timeout: Duration::from_secs(10),
            max_concurrency: 64,
            page_html: None,
        }
    }
}

/// Launches the portal on the session's gateway address.
pub struct PortalLauncher {
    config: PortalConfig,
}

impl PortalLauncher {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

impl CaptureLauncher for PortalLauncher {
    fn launch(
        &self,
        bind: SocketAddr,
        log: Arc<CredentialLog>,
        resolver: Arc<dyn ClientResolver>,
    ) -> anyhow::Result<CaptureServerHandle> {
        let listener = TcpListener::bind(bind)
            .with_context(|| format!("binding capture listener to {bind}"))?;
        listener
            .set_nonblocking(true)
            .context("setting capture listener nonblocking")?;
        let local_addr = listener
            .local_addr()
            .context("reading capture listener address")?;

        let page = self
            .config
            .page_html
            .clone()
            .unwrap_or_else(|| page::LOGIN_PAGE.to_string());
        let state = CaptureState::new(log, resolver, page);
        let app = build_router(&self.config, state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tracing::info!(addr = %local_addr, "starting capture server");
        let task = tokio::spawn(async move {
            if let Err(err) = run_server(listener, app, shutdown_rx).await {
                tracing::error!(error = %err, "capture server exited with error");
            }
        });

        Ok(CaptureServerHandle::new(local_addr, shutdown_tx, task))
    }
}
