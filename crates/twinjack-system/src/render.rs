//! Service configuration rendering (hostapd and dnsmasq).

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use twinjack_core::runner::{ApNetwork, ConfigWriter, Readiness, ServiceCommand};
use twinjack_core::types::TargetAp;

/// Writes config files under the session run directory and knows how each
/// service is launched in the foreground so it can be supervised.
pub struct SystemConfigWriter {
    run_dir: PathBuf,
    hostapd_bin: String,
    dnsmasq_bin: String,
}

impl SystemConfigWriter {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
            hostapd_bin: "hostapd".to_string(),
            dnsmasq_bin: "dnsmasq".to_string(),
        }
    }

    pub fn hostapd_ctrl_dir(&self) -> PathBuf {
        self.run_dir.join("hostapd")
    }

    pub fn lease_file(&self, interface: &str) -> PathBuf {
        self.run_dir.join(format!("dnsmasq-{interface}.leases"))
    }
}

impl ConfigWriter for SystemConfigWriter {
    fn access_point_config(
        &self,
        target: &TargetAp,
        interface: &str,
    ) -> anyhow::Result<(PathBuf, Readiness)> {
        std::fs::create_dir_all(&self.run_dir).context("creating run directory")?;
        let ctrl_dir = self.hostapd_ctrl_dir();

        let config = render_hostapd_config(target, interface, &ctrl_dir);
        let path = self.run_dir.join(format!("hostapd-{interface}.conf"));
        std::fs::write(&path, config)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), "hostapd config written");

        // hostapd creates its control socket once the AP is enabled.
        let marker = ctrl_dir.join(interface);
        Ok((path, Readiness::MarkerFile(marker)))
    }

    fn dhcp_dns_config(&self, interface: &str, network: &ApNetwork) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.run_dir).context("creating run directory")?;
        let config = render_dnsmasq_config(interface, network, &self.lease_file(interface));
        let path = self.run_dir.join(format!("dnsmasq-{interface}.conf"));
        std::fs::write(&path, config)
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), "dnsmasq config written");
        Ok(path)
    }

    fn access_point_command(&self, config_path: &Path) -> ServiceCommand {
        ServiceCommand::new(
            self.hostapd_bin.clone(),
            vec![config_path.to_string_lossy().into_owned()],
        )
    }

    fn dhcp_dns_command(&self, config_path: &Path) -> ServiceCommand {
        ServiceCommand::new(
            self.dnsmasq_bin.clone(),
            vec![
                "-k".to_string(),
                format!("--conf-file={}", config_path.display()),
            ],
        )
    }
}

fn render_hostapd_config(target: &TargetAp, interface: &str, ctrl_dir: &Path) -> String {
    // Open network: the rogue AP impersonates the SSID without its
    // encryption so clients can associate straight into the portal.
    let lines = [
        format!("interface={interface}"),
        "driver=nl80211".to_string(),
        format!("ssid={}", target.ssid),
        format!("hw_mode={}", target.hw_mode()),
        format!("channel={}", target.channel),
        format!("ctrl_interface={}", ctrl_dir.display()),
        "macaddr_acl=0".to_string(),
        "auth_algs=1".to_string(),
        "wmm_enabled=1".to_string(),
        "ignore_broadcast_ssid=0".to_string(),
    ];
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn render_dnsmasq_config(interface: &str, network: &ApNetwork, lease_file: &Path) -> String {
    let mut lines = vec![
        format!("interface={interface}"),
        "bind-interfaces".to_string(),
        format!("listen-address={}", network.gateway),
        format!(
            "dhcp-range={},{},{}",
            network.dhcp_start, network.dhcp_end, network.lease_time
        ),
        format!("dhcp-option=3,{}", network.gateway),
        format!("dhcp-option=6,{}", network.gateway),
        format!("dhcp-leasefile={}", lease_file.display()),
        "no-resolv".to_string(),
    ];
    if let Some(upstream) = network.upstream_dns {
        lines.push(format!("server={upstream}"));
    }
    for host in &network.spoofed_hosts {
        lines.push(format!("address=/{host}/{}", network.gateway));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
