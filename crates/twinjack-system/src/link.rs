//! Interface addressing via the `ip` tool.

use std::process::Command;

use anyhow::{bail, Context};
use tracing::debug;

use twinjack_core::runner::LinkController;

#[derive(Default)]
pub struct IpLinkController;

impl IpLinkController {
    pub fn new() -> Self {
        Self
    }

    fn ip(args: &[&str]) -> anyhow::Result<()> {
        debug!(args = ?args, "ip");
        let output = Command::new("ip")
            .args(args)
            .output()
            .context("running ip")?;
        if !output.status.success() {
            bail!(
                "ip {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl LinkController for IpLinkController {
    /// Flush whatever addressing is present, assign the gateway address,
    /// and bring the link up.
    fn assign_address(&self, interface: &str, cidr: &str) -> anyhow::Result<()> {
        Self::ip(&["link", "set", interface, "down"])?;
        Self::ip(&["addr", "flush", "dev", interface])?;
        Self::ip(&["addr", "add", cidr, "dev", interface])?;
        Self::ip(&["link", "set", interface, "up"])?;
        Ok(())
    }

    fn flush_addresses(&self, interface: &str) -> anyhow::Result<()> {
        Self::ip(&["addr", "flush", "dev", interface])?;
        // Cycle the link so a network manager can reclaim it.
        Self::ip(&["link", "set", interface, "down"])?;
        Self::ip(&["link", "set", interface, "up"])?;
        Ok(())
    }
}
