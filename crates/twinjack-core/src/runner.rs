//! Collaborator seams between the orchestrator and the host system.
//!
//! Every side effect the session takes (spawning a process, installing a
//! firewall rule, probing an interface, attempting a connection) goes
//! through one of these traits, so supervision and teardown logic can be
//! tested with fakes that never touch real tooling.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RuleApplyError;
use crate::redirect::RedirectRule;
use crate::types::{InterfaceInfo, TargetAp};

/// Opaque handle to a spawned external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

/// Fully rendered command line for one external service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ServiceCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Spawn, probe, and signal external service processes.
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, kind_name: &str, command: &ServiceCommand) -> anyhow::Result<ProcessId>;

    /// Non-blocking liveness check.
    fn alive(&self, pid: ProcessId) -> bool;

    /// Graceful termination (SIGTERM).
    fn terminate(&self, pid: ProcessId) -> anyhow::Result<()>;

    /// Forced termination (SIGKILL).
    fn kill(&self, pid: ProcessId) -> anyhow::Result<()>;

    /// Kill leftover processes of the same service from earlier runs.
    /// Returns how many were signalled.
    fn kill_stale(&self, process_name: &str) -> usize;
}

/// Per-service readiness condition checked after spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A TCP listener accepting connections.
    TcpPort(SocketAddr),
    /// A file or socket path the service creates once it is up.
    MarkerFile(PathBuf),
    /// A line in the service log containing the needle.
    LogLine { path: PathBuf, needle: String },
    /// The process staying alive is the only observable signal.
    ProcessAlive,
}

impl Readiness {
    /// Evaluate the probe. Cheap and non-blocking apart from a short
    /// connect timeout.
    pub fn check(&self, runner: &dyn ProcessRunner, pid: ProcessId) -> bool {
        match self {
            Readiness::TcpPort(addr) => {
                TcpStream::connect_timeout(addr, Duration::from_millis(200)).is_ok()
            }
            Readiness::MarkerFile(path) => path.exists(),
            Readiness::LogLine { path, needle } => std::fs::read_to_string(path)
                .map(|contents| contents.contains(needle.as_str()))
                .unwrap_or(false),
            Readiness::ProcessAlive => runner.alive(pid),
        }
    }
}

/// Report per-interface supported modes and current state.
pub trait WirelessCapabilityProbe: Send + Sync {
    fn interfaces(&self) -> anyhow::Result<Vec<InterfaceInfo>>;
}

/// Addressing plan for the rogue network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApNetwork {
    pub gateway: Ipv4Addr,
    pub prefix_len: u8,
    pub dhcp_start: Ipv4Addr,
    pub dhcp_end: Ipv4Addr,
    pub lease_time: String,
    pub upstream_dns: Option<Ipv4Addr>,
    /// Hostnames answered with the gateway address so connectivity checks
    /// and login flows land on the portal.
    pub spoofed_hosts: Vec<String>,
}

impl Default for ApNetwork {
    fn default() -> Self {
        Self {
            gateway: crate::config::DEFAULT_GATEWAY,
            prefix_len: 24,
            dhcp_start: crate::config::DEFAULT_DHCP_START,
            dhcp_end: crate::config::DEFAULT_DHCP_END,
            lease_time: crate::config::DEFAULT_DHCP_LEASE.to_string(),
            upstream_dns: None,
            spoofed_hosts: vec![
                "www.msftncsi.com".to_string(),
                "www.msftconnecttest.com".to_string(),
                "connectivitycheck.gstatic.com".to_string(),
                "clients1.google.com".to_string(),
                "clients3.google.com".to_string(),
                "captive.apple.com".to_string(),
                "captiveportal.apple.com".to_string(),
                "detectportal.firefox.com".to_string(),
                "connectivitycheck.platform.hicloud.com".to_string(),
            ],
        }
    }
}

impl ApNetwork {
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.prefix_len)
    }
}

/// Render external service configuration files from session state.
pub trait ConfigWriter: Send + Sync {
    /// hostapd-style config for the rogue access point. Returns the config
    /// path and the readiness marker the service creates once up.
    fn access_point_config(
        &self,
        target: &TargetAp,
        interface: &str,
    ) -> anyhow::Result<(PathBuf, Readiness)>;

    /// dnsmasq-style config for DHCP plus spoofed DNS.
    fn dhcp_dns_config(&self, interface: &str, network: &ApNetwork) -> anyhow::Result<PathBuf>;

    /// Command line to launch the access point service in the foreground.
    fn access_point_command(&self, config_path: &std::path::Path) -> ServiceCommand;

    /// Command line to launch the DHCP/DNS service in the foreground.
    fn dhcp_dns_command(&self, config_path: &std::path::Path) -> ServiceCommand;
}

/// Low-level firewall/NAT backend.
pub trait NetworkRuleEngine: Send + Sync {
    fn install(&self, rule: &RedirectRule) -> Result<(), RuleApplyError>;
    fn remove(&self, rule: &RedirectRule) -> Result<(), RuleApplyError>;
    fn ip_forwarding(&self) -> Result<bool, RuleApplyError>;
    fn set_ip_forwarding(&self, enabled: bool) -> Result<(), RuleApplyError>;
}

/// Bring-up and restore of interface addressing.
pub trait LinkController: Send + Sync {
    fn assign_address(&self, interface: &str, cidr: &str) -> anyhow::Result<()>;
    fn flush_addresses(&self, interface: &str) -> anyhow::Result<()>;
}

/// Send one deauthentication burst at the target network.
pub trait DeauthSender: Send + Sync {
    /// `clients` empty means broadcast to all clients of the target BSSID.
    fn send_burst(&self, interface: &str, target: &TargetAp, clients: &[String])
        -> anyhow::Result<()>;
}

/// Outcome of one association attempt against the real target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    AuthFailed,
    Timeout,
    Unreachable,
}

/// Attempt to join a network with captured material.
pub trait WifiConnector: Send + Sync {
    fn try_connect(
        &self,
        interface: &str,
        ssid: &str,
        psk: &str,
        bssid: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<ConnectOutcome>;
}

/// Map a client's IP address back to its MAC (lease table lookup).
pub trait ClientResolver: Send + Sync {
    fn mac_for_ip(&self, ip: IpAddr) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct NoRunner;
    impl ProcessRunner for NoRunner {
        fn spawn(&self, _: &str, _: &ServiceCommand) -> anyhow::Result<ProcessId> {
            anyhow::bail!("unused")
        }
        fn alive(&self, _: ProcessId) -> bool {
            true
        }
        fn terminate(&self, _: ProcessId) -> anyhow::Result<()> {
            Ok(())
        }
        fn kill(&self, _: ProcessId) -> anyhow::Result<()> {
            Ok(())
        }
        fn kill_stale(&self, _: &str) -> usize {
            0
        }
    }

    #[test]
    fn marker_file_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ctrl");
        let probe = Readiness::MarkerFile(marker.clone());
        assert!(!probe.check(&NoRunner, ProcessId(1)));
        std::fs::File::create(&marker).unwrap();
        assert!(probe.check(&NoRunner, ProcessId(1)));
    }

    #[test]
    fn log_line_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("service.log");
        let probe = Readiness::LogLine {
            path: log.clone(),
            needle: "AP-ENABLED".to_string(),
        };
        assert!(!probe.check(&NoRunner, ProcessId(1)));
        let mut f = std::fs::File::create(&log).unwrap();
        writeln!(f, "wlan0: interface state UNINITIALIZED->AP-ENABLED").unwrap();
        assert!(probe.check(&NoRunner, ProcessId(1)));
    }

    #[test]
    fn gateway_cidr_rendering() {
        let net = ApNetwork::default();
        assert_eq!(net.gateway_cidr(), "10.0.0.1/24");
    }
}
