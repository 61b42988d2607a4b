//! Fake collaborators for exercising the orchestrator without touching
//! real processes, firewalls, or radios.
//!
//! Used by this crate's own tests and by downstream integration tests; the
//! fakes are scriptable (fail a spawn, drop a rule install, delay a
//! connection attempt) so failure-path behavior can be driven
//! deterministically.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::capture::{CaptureLauncher, CaptureServerHandle};
use crate::error::RuleApplyError;
use crate::redirect::RedirectRule;
use crate::runner::{
    ApNetwork, ClientResolver, ConfigWriter, ConnectOutcome, DeauthSender, LinkController,
    NetworkRuleEngine, ProcessId, ProcessRunner, Readiness, ServiceCommand,
    WifiConnector, WirelessCapabilityProbe,
};
use crate::store::CredentialLog;
use crate::types::{InterfaceCaps, InterfaceInfo, InterfaceMode, TargetAp};

/// Build a wireless interface description for tests.
pub fn wireless_iface(name: &str, ap: bool, monitor: bool, managed: bool) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        caps: InterfaceCaps {
            supports_ap: ap,
            supports_monitor: monitor,
            supports_managed: managed,
        },
        mode: InterfaceMode::Managed,
        is_wireless: true,
        is_up: true,
        has_address: false,
    }
}

/// Build a wired uplink description for tests.
pub fn wired_iface(name: &str) -> InterfaceInfo {
    InterfaceInfo {
        name: name.to_string(),
        caps: InterfaceCaps::default(),
        mode: InterfaceMode::Other,
        is_wireless: false,
        is_up: true,
        has_address: true,
    }
}

#[derive(Default)]
struct RunnerState {
    next_pid: u32,
    alive: HashSet<u32>,
    fail_spawn: HashSet<String>,
}

/// Scripted process table.
#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<RunnerState>,
    spawned: Mutex<Vec<(String, ServiceCommand)>>,
    exit_immediately: AtomicBool,
    ignore_signals: AtomicBool,
    terminate_count: AtomicUsize,
    kill_count: AtomicUsize,
}

impl FakeRunner {
    /// Spawned processes are already dead when first probed.
    pub fn exit_immediately(&self) {
        self.exit_immediately.store(true, Ordering::SeqCst);
    }

    /// Processes stay alive through SIGTERM and SIGKILL.
    pub fn ignore_signals(&self) {
        self.ignore_signals.store(true, Ordering::SeqCst);
    }

    /// Fail any spawn of the named process.
    pub fn fail_spawn_of(&self, process_name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_spawn
            .insert(process_name.to_string());
    }

    /// Kill a process out from under the supervisor.
    pub fn die(&self, pid: ProcessId) {
        self.state.lock().unwrap().alive.remove(&pid.0);
    }

    pub fn spawned(&self) -> Vec<(String, ServiceCommand)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn terminate_count(&self) -> usize {
        self.terminate_count.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.kill_count.load(Ordering::SeqCst)
    }
}

impl ProcessRunner for FakeRunner {
    fn spawn(&self, kind_name: &str, command: &ServiceCommand) -> anyhow::Result<ProcessId> {
        let mut state = self.state.lock().unwrap();
        if state.fail_spawn.contains(kind_name) {
            anyhow::bail!("scripted spawn failure for {}", kind_name);
        }
        state.next_pid += 1;
        let pid = state.next_pid;
        if !self.exit_immediately.load(Ordering::SeqCst) {
            state.alive.insert(pid);
        }
        drop(state);
        self.spawned
            .lock()
            .unwrap()
            .push((kind_name.to_string(), command.clone()));
        Ok(ProcessId(pid))
    }

    fn alive(&self, pid: ProcessId) -> bool {
        self.state.lock().unwrap().alive.contains(&pid.0)
    }

    fn terminate(&self, pid: ProcessId) -> anyhow::Result<()> {
        self.terminate_count.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_signals.load(Ordering::SeqCst) {
            self.state.lock().unwrap().alive.remove(&pid.0);
        }
        Ok(())
    }

    fn kill(&self, pid: ProcessId) -> anyhow::Result<()> {
        self.kill_count.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_signals.load(Ordering::SeqCst) {
            self.state.lock().unwrap().alive.remove(&pid.0);
        }
        Ok(())
    }

    fn kill_stale(&self, _process_name: &str) -> usize {
        0
    }
}

/// Rule engine that records every install/remove instead of touching
/// netfilter.
#[derive(Default)]
pub struct RecordingRuleEngine {
    installed: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    forwarding: AtomicBool,
    install_calls: AtomicUsize,
    fail_install_at: Mutex<Option<usize>>,
    fail_removals: AtomicBool,
}

impl RecordingRuleEngine {
    /// Fail the Nth install call (0-based).
    pub fn fail_install_at(&self, call: usize) {
        *self.fail_install_at.lock().unwrap() = Some(call);
    }

    /// Every removal fails (cleanup-failure scenarios).
    pub fn fail_removals(&self) {
        self.fail_removals.store(true, Ordering::SeqCst);
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.forwarding.load(Ordering::SeqCst)
    }
}

impl NetworkRuleEngine for RecordingRuleEngine {
    fn install(&self, rule: &RedirectRule) -> Result<(), RuleApplyError> {
        let call = self.install_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_install_at.lock().unwrap() == Some(call) {
            return Err(RuleApplyError::Install {
                rule: rule.to_string(),
                message: "scripted install failure".to_string(),
            });
        }
        self.installed.lock().unwrap().push(rule.to_string());
        Ok(())
    }

    fn remove(&self, rule: &RedirectRule) -> Result<(), RuleApplyError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(RuleApplyError::Remove {
                rule: rule.to_string(),
                message: "scripted removal failure".to_string(),
            });
        }
        self.removed.lock().unwrap().push(rule.to_string());
        Ok(())
    }

    fn ip_forwarding(&self) -> Result<bool, RuleApplyError> {
        Ok(self.forwarding.load(Ordering::SeqCst))
    }

    fn set_ip_forwarding(&self, enabled: bool) -> Result<(), RuleApplyError> {
        self.forwarding.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

/// Canned interface list.
pub struct FakeProbe {
    interfaces: Mutex<Vec<InterfaceInfo>>,
}

impl FakeProbe {
    pub fn with(interfaces: Vec<InterfaceInfo>) -> Self {
        Self {
            interfaces: Mutex::new(interfaces),
        }
    }
}

impl WirelessCapabilityProbe for FakeProbe {
    fn interfaces(&self) -> anyhow::Result<Vec<InterfaceInfo>> {
        Ok(self.interfaces.lock().unwrap().clone())
    }
}

/// Config writer that renders nothing: commands reference the well-known
/// service binaries, readiness is process liveness.
#[derive(Default)]
pub struct FakeConfigWriter;

impl ConfigWriter for FakeConfigWriter {
    fn access_point_config(
        &self,
        _target: &TargetAp,
        interface: &str,
    ) -> anyhow::Result<(PathBuf, Readiness)> {
        Ok((
            PathBuf::from(format!("/tmp/fake-hostapd-{}.conf", interface)),
            Readiness::ProcessAlive,
        ))
    }

    fn dhcp_dns_config(&self, interface: &str, _network: &ApNetwork) -> anyhow::Result<PathBuf> {
        Ok(PathBuf::from(format!("/tmp/fake-dnsmasq-{}.conf", interface)))
    }

    fn access_point_command(&self, config_path: &std::path::Path) -> ServiceCommand {
        ServiceCommand::new(
            "hostapd",
            vec![config_path.to_string_lossy().into_owned()],
        )
    }

    fn dhcp_dns_command(&self, config_path: &std::path::Path) -> ServiceCommand {
        ServiceCommand::new(
            "dnsmasq",
            vec![
                "-k".to_string(),
                format!("--conf-file={}", config_path.display()),
            ],
        )
    }
}

/// Records address assignments and flushes.
#[derive(Default)]
pub struct FakeLink {
    pub assigned: Mutex<Vec<(String, String)>>,
    pub flushed: Mutex<Vec<String>>,
}

impl LinkController for FakeLink {
    fn assign_address(&self, interface: &str, cidr: &str) -> anyhow::Result<()> {
        self.assigned
            .lock()
            .unwrap()
            .push((interface.to_string(), cidr.to_string()));
        Ok(())
    }

    fn flush_addresses(&self, interface: &str) -> anyhow::Result<()> {
        self.flushed.lock().unwrap().push(interface.to_string());
        Ok(())
    }
}

/// Counting deauth sender with scriptable failures.
#[derive(Default)]
pub struct FakeDeauthSender {
    bursts: AtomicUsize,
    fail_all: AtomicBool,
    fail_next: AtomicU32,
}

impl FakeDeauthSender {
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn bursts(&self) -> usize {
        self.bursts.load(Ordering::SeqCst)
    }
}

impl DeauthSender for FakeDeauthSender {
    fn send_burst(
        &self,
        _interface: &str,
        _target: &TargetAp,
        _clients: &[String],
    ) -> anyhow::Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            anyhow::bail!("scripted send failure");
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("scripted transient send failure");
        }
        self.bursts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted association attempts.
pub struct FakeConnector {
    outcome: Mutex<ConnectOutcome>,
    delay: Mutex<Duration>,
    attempts: AtomicUsize,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(ConnectOutcome::Unreachable),
            delay: Mutex::new(Duration::ZERO),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl FakeConnector {
    pub fn respond_with(&self, outcome: ConnectOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl WifiConnector for FakeConnector {
    fn try_connect(
        &self,
        _interface: &str,
        _ssid: &str,
        _psk: &str,
        _bssid: Option<&str>,
        _timeout: Duration,
    ) -> anyhow::Result<ConnectOutcome> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(*self.outcome.lock().unwrap())
    }
}

/// Static IP-to-MAC mapping.
#[derive(Default)]
pub struct FakeResolver {
    map: Mutex<HashMap<IpAddr, String>>,
}

impl FakeResolver {
    pub fn insert(&self, ip: IpAddr, mac: &str) {
        self.map.lock().unwrap().insert(ip, mac.to_string());
    }
}

impl ClientResolver for FakeResolver {
    fn mac_for_ip(&self, ip: IpAddr) -> Option<String> {
        self.map.lock().unwrap().get(&ip).cloned()
    }
}

/// Capture launcher that runs a stub task instead of binding a socket.
/// Holds on to the launched log so tests can feed submissions in.
#[derive(Default)]
pub struct FakeCaptureLauncher {
    launched: AtomicUsize,
    fail: AtomicBool,
    log: Mutex<Option<Arc<CredentialLog>>>,
}

impl FakeCaptureLauncher {
    pub fn fail_launch(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    /// The credential log of the most recently launched server.
    pub fn log(&self) -> Option<Arc<CredentialLog>> {
        self.log.lock().unwrap().clone()
    }
}

impl CaptureLauncher for FakeCaptureLauncher {
    fn launch(
        &self,
        bind: SocketAddr,
        log: Arc<CredentialLog>,
        _resolver: Arc<dyn ClientResolver>,
    ) -> anyhow::Result<CaptureServerHandle> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scripted capture launch failure");
        }
        self.launched.fetch_add(1, Ordering::SeqCst);
        *self.log.lock().unwrap() = Some(log);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let _ = shutdown_rx.await;
        });
        Ok(CaptureServerHandle::new(bind, shutdown_tx, task))
    }
}
