//! Credential verification through NetworkManager's `nmcli`.

use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use tracing::{debug, info, warn};

use twinjack_core::runner::{ConnectOutcome, WifiConnector};

/// Creates a throwaway connection profile, brings it up with a bounded
/// wait, and deletes the profile afterwards whatever the outcome.
#[derive(Default)]
pub struct NmcliConnector;

impl NmcliConnector {
    pub fn new() -> Self {
        Self
    }

    fn run(args: &[&str]) -> anyhow::Result<(bool, String)> {
        debug!(args = ?args, "nmcli");
        let output = Command::new("nmcli")
            .args(args)
            .output()
            .context("running nmcli")?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Ok((output.status.success(), stderr))
    }
}

impl WifiConnector for NmcliConnector {
    fn try_connect(
        &self,
        interface: &str,
        ssid: &str,
        psk: &str,
        bssid: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<ConnectOutcome> {
        let profile = format!("twinjack-verify-{:08x}", rand::thread_rng().gen::<u32>());

        let mut add_args = vec![
            "con", "add", "type", "wifi", "ifname", interface, "con-name", &profile, "ssid",
            ssid, "wifi-sec.key-mgmt", "wpa-psk", "wifi-sec.psk", psk,
        ];
        if let Some(bssid) = bssid {
            add_args.push("bssid");
            add_args.push(bssid);
        }
        let (added, stderr) = Self::run(&add_args)?;
        if !added {
            warn!(profile, error = %stderr, "creating verify profile failed");
            return Ok(ConnectOutcome::Unreachable);
        }

        let wait = timeout.as_secs().max(1).to_string();
        let up_result = Self::run(&["--wait", &wait, "con", "up", &profile]);

        // Always drop the throwaway profile, even when the attempt failed.
        if let Err(err) = Self::run(&["con", "delete", &profile]) {
            warn!(profile, error = %err, "deleting verify profile failed");
        }

        let (connected, stderr) = up_result?;
        if connected {
            info!(interface, ssid, "verification connect succeeded");
            return Ok(ConnectOutcome::Connected);
        }
        Ok(classify_failure(&stderr))
    }
}

/// Map nmcli's activation error text to an outcome.
fn classify_failure(stderr: &str) -> ConnectOutcome {
    let lowered = stderr.to_lowercase();
    if lowered.contains("secrets were required")
        || lowered.contains("invalid key")
        || lowered.contains("802.1x supplicant")
    {
        ConnectOutcome::AuthFailed
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        ConnectOutcome::Timeout
    } else {
        ConnectOutcome::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified() {
        assert_eq!(
            classify_failure("Error: Connection activation failed: Secrets were required, but not provided."),
            ConnectOutcome::AuthFailed
        );
        assert_eq!(
            classify_failure("Error: 802.1X supplicant failed"),
            ConnectOutcome::AuthFailed
        );
    }

    #[test]
    fn timeouts_and_unknowns_are_classified() {
        assert_eq!(
            classify_failure("Error: Timeout expired (90 seconds)"),
            ConnectOutcome::Timeout
        );
        assert_eq!(
            classify_failure("Error: No network with SSID found"),
            ConnectOutcome::Unreachable
        );
    }
}
