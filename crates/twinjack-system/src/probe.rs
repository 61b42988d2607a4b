//! Interface discovery and capability probing via `/sys` and `iw`.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use tracing::{debug, warn};

use twinjack_core::runner::WirelessCapabilityProbe;
use twinjack_core::types::{InterfaceCaps, InterfaceInfo, InterfaceMode};

pub struct IwCapabilityProbe {
    sys_net: PathBuf,
}

impl Default for IwCapabilityProbe {
    fn default() -> Self {
        Self {
            sys_net: PathBuf::from("/sys/class/net"),
        }
    }
}

impl IwCapabilityProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn phy_name(&self, interface: &str) -> Option<String> {
        let path = self.sys_net.join(interface).join("phy80211/name");
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }

    fn is_up(&self, interface: &str) -> bool {
        let path = self.sys_net.join(interface).join("operstate");
        match fs::read_to_string(path) {
            // Wireless interfaces often report "dormant" while associated
            // to nothing; treat anything but "down" as usable.
            Ok(state) => state.trim() != "down",
            Err(_) => false,
        }
    }

    fn has_address(&self, interface: &str) -> bool {
        let output = Command::new("ip")
            .args(["-o", "-4", "addr", "show", "dev", interface])
            .output();
        match output {
            Ok(output) if output.status.success() => !output.stdout.is_empty(),
            _ => false,
        }
    }

    fn capabilities(&self, interface: &str) -> InterfaceCaps {
        let Some(phy) = self.phy_name(interface) else {
            return InterfaceCaps::default();
        };
        let output = Command::new("iw").args(["phy", &phy, "info"]).output();
        match output {
            Ok(output) if output.status.success() => {
                parse_supported_modes(&String::from_utf8_lossy(&output.stdout))
            }
            _ => {
                warn!(interface, phy, "iw phy info failed; assuming no capabilities");
                InterfaceCaps::default()
            }
        }
    }

    fn current_mode(&self, interface: &str) -> InterfaceMode {
        let output = Command::new("iw").args(["dev", interface, "info"]).output();
        match output {
            Ok(output) if output.status.success() => {
                parse_interface_mode(&String::from_utf8_lossy(&output.stdout))
            }
            _ => InterfaceMode::Other,
        }
    }
}

impl WirelessCapabilityProbe for IwCapabilityProbe {
    fn interfaces(&self) -> anyhow::Result<Vec<InterfaceInfo>> {
        let mut interfaces = Vec::new();
        let entries = fs::read_dir(&self.sys_net)
            .with_context(|| format!("reading {}", self.sys_net.display()))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "lo" {
                continue;
            }
            let is_wireless = entry.path().join("wireless").exists()
                || entry.path().join("phy80211").exists();
            let info = InterfaceInfo {
                caps: if is_wireless {
                    self.capabilities(&name)
                } else {
                    InterfaceCaps::default()
                },
                mode: if is_wireless {
                    self.current_mode(&name)
                } else {
                    InterfaceMode::Other
                },
                is_wireless,
                is_up: self.is_up(&name),
                has_address: self.has_address(&name),
                name,
            };
            debug!(interface = ?info, "discovered interface");
            interfaces.push(info);
        }
        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(interfaces)
    }
}

/// Parse the "Supported interface modes" block of `iw phy <phy> info`.
fn parse_supported_modes(output: &str) -> InterfaceCaps {
    let mut caps = InterfaceCaps::default();
    let mut in_modes = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Supported interface modes") {
            in_modes = true;
            continue;
        }
        if in_modes {
            if let Some(mode) = trimmed.strip_prefix("* ") {
                match mode {
                    "AP" => caps.supports_ap = true,
                    "monitor" => caps.supports_monitor = true,
                    "managed" | "station" => caps.supports_managed = true,
                    _ => {}
                }
            } else if !trimmed.is_empty() {
                // Next section reached.
                break;
            }
        }
    }
    caps
}

/// Parse the `type` line of `iw dev <iface> info`.
fn parse_interface_mode(output: &str) -> InterfaceMode {
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(mode) = trimmed.strip_prefix("type ") {
            return match mode.trim() {
                "managed" => InterfaceMode::Managed,
                "monitor" => InterfaceMode::Monitor,
                "AP" => InterfaceMode::AccessPoint,
                _ => InterfaceMode::Other,
            };
        }
    }
    InterfaceMode::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    const IW_PHY_INFO: &str = "\
Wiphy phy0
\tmax # scan SSIDs: 4
\tSupported interface modes:
\t\t * IBSS
\t\t * managed
\t\t * AP
\t\t * AP/VLAN
\t\t * monitor
\t\t * P2P-client
\tBand 1:
\t\tCapabilities: 0x1062
";

    #[test]
    fn parses_supported_modes() {
        let caps = parse_supported_modes(IW_PHY_INFO);
        assert!(caps.supports_ap);
        assert!(caps.supports_monitor);
        assert!(caps.supports_managed);
    }

    #[test]
    fn missing_modes_yield_no_capabilities() {
        let caps = parse_supported_modes("Wiphy phy1\n\tBand 1:\n");
        assert_eq!(caps, InterfaceCaps::default());
    }

    #[test]
    fn parses_interface_mode() {
        let output = "Interface wlan0\n\tifindex 3\n\ttype managed\n\twiphy 0\n";
        assert_eq!(parse_interface_mode(output), InterfaceMode::Managed);

        let output = "Interface wlan0mon\n\ttype monitor\n";
        assert_eq!(parse_interface_mode(output), InterfaceMode::Monitor);

        assert_eq!(parse_interface_mode("no type line"), InterfaceMode::Other);
    }
}
