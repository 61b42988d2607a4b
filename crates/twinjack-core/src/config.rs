use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RUNTIME_DIR: &str = "/var/lib/twinjack";
pub const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READINESS_POLL_MS: u64 = 100;
pub const DEFAULT_STOP_GRACE_MS: u64 = 3_000;
pub const DEFAULT_STOP_FORCE_MS: u64 = 1_000;
pub const DEFAULT_HEALTH_TICK_MS: u64 = 2_000;
pub const DEFAULT_HEALTH_WINDOW_MS: u64 = 10_000;
pub const DEFAULT_HEALTH_FAILURES: u32 = 3;
pub const DEFAULT_RESTART_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_DEAUTH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_DEAUTH_FAILURES: u32 = 5;
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_PORTAL_PORT: u16 = 80;
pub const DEFAULT_GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const DEFAULT_DHCP_START: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 10);
pub const DEFAULT_DHCP_END: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 250);
pub const DEFAULT_DHCP_LEASE: &str = "12h";

/// Orchestrator-wide timing and layout configuration.
///
/// The original tooling left health cadence, restart thresholds, and
/// grace/force timeouts unspecified; the values here are the fixed,
/// documented defaults, each overridable through `TWINJACK_*` environment
/// variables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub runtime_dir: PathBuf,
    pub start_timeout: Duration,
    pub readiness_poll: Duration,
    pub stop_grace: Duration,
    pub stop_force: Duration,
    pub health_tick: Duration,
    pub health_window: Duration,
    pub health_failures: u32,
    pub restart_window: Duration,
    pub deauth_interval: Duration,
    pub deauth_failures: u32,
    pub verify_timeout: Duration,
    pub portal_port: u16,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from(DEFAULT_RUNTIME_DIR),
            start_timeout: Duration::from_millis(DEFAULT_START_TIMEOUT_MS),
            readiness_poll: Duration::from_millis(DEFAULT_READINESS_POLL_MS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            stop_force: Duration::from_millis(DEFAULT_STOP_FORCE_MS),
            health_tick: Duration::from_millis(DEFAULT_HEALTH_TICK_MS),
            health_window: Duration::from_millis(DEFAULT_HEALTH_WINDOW_MS),
            health_failures: DEFAULT_HEALTH_FAILURES,
            restart_window: Duration::from_millis(DEFAULT_RESTART_WINDOW_MS),
            deauth_interval: Duration::from_millis(DEFAULT_DEAUTH_INTERVAL_MS),
            deauth_failures: DEFAULT_DEAUTH_FAILURES,
            verify_timeout: Duration::from_millis(DEFAULT_VERIFY_TIMEOUT_MS),
            portal_port: DEFAULT_PORTAL_PORT,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            runtime_dir: env::var("TWINJACK_RUNTIME_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.runtime_dir),
            start_timeout: env_ms("TWINJACK_START_TIMEOUT_MS", defaults.start_timeout),
            readiness_poll: env_ms("TWINJACK_READINESS_POLL_MS", defaults.readiness_poll),
            stop_grace: env_ms("TWINJACK_STOP_GRACE_MS", defaults.stop_grace),
            stop_force: env_ms("TWINJACK_STOP_FORCE_MS", defaults.stop_force),
            health_tick: env_ms("TWINJACK_HEALTH_TICK_MS", defaults.health_tick),
            health_window: env_ms("TWINJACK_HEALTH_WINDOW_MS", defaults.health_window),
            health_failures: env_u32("TWINJACK_HEALTH_FAILURES", defaults.health_failures),
            restart_window: env_ms("TWINJACK_RESTART_WINDOW_MS", defaults.restart_window),
            deauth_interval: env_ms("TWINJACK_DEAUTH_INTERVAL_MS", defaults.deauth_interval),
            deauth_failures: env_u32("TWINJACK_DEAUTH_FAILURES", defaults.deauth_failures),
            verify_timeout: env_ms("TWINJACK_VERIFY_TIMEOUT_MS", defaults.verify_timeout),
            portal_port: env::var("TWINJACK_PORTAL_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.portal_port),
        }
    }

    /// Upper bound on how long stopping one unresponsive service may take.
    pub fn stop_deadline(&self) -> Duration {
        self.stop_grace + self.stop_force
    }

    pub fn captures_dir(&self) -> PathBuf {
        self.runtime_dir.join("captures")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.runtime_dir.join("run")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.runtime_dir.join("session.json")
    }

    pub fn pidfile_path(&self) -> PathBuf {
        self.runtime_dir.join("twinjack.pid")
    }
}

fn env_ms(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.stop_deadline(), Duration::from_millis(4_000));
        assert!(cfg.health_window >= cfg.health_tick);
        assert_eq!(cfg.captures_dir(), PathBuf::from(DEFAULT_RUNTIME_DIR).join("captures"));
    }
}
