//! Netfilter backend shelling out to the `iptables` binary.

use std::process::Command;

use tracing::{debug, warn};

use twinjack_core::error::RuleApplyError;
use twinjack_core::redirect::RedirectRule;
use twinjack_core::runner::NetworkRuleEngine;

const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

/// Installs and removes exactly the rules it is given; never flushes.
#[derive(Default)]
pub struct IptablesEngine;

impl IptablesEngine {
    pub fn new() -> Self {
        Self
    }

    fn execute(args: &[String]) -> Result<(), String> {
        debug!(args = ?args, "iptables");
        let output = Command::new("iptables")
            .args(args)
            .output()
            .map_err(|err| format!("failed to run iptables: {err}"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

impl NetworkRuleEngine for IptablesEngine {
    fn install(&self, rule: &RedirectRule) -> Result<(), RuleApplyError> {
        Self::execute(&rule.to_args("-A")).map_err(|message| RuleApplyError::Install {
            rule: rule.to_string(),
            message,
        })
    }

    fn remove(&self, rule: &RedirectRule) -> Result<(), RuleApplyError> {
        match Self::execute(&rule.to_args("-D")) {
            Ok(()) => Ok(()),
            // Removing an already-absent rule is not a failure.
            Err(message)
                if message.contains("does a matching rule exist")
                    || message.contains("No chain/target/match") =>
            {
                warn!(rule = %rule, "rule already absent; treating removal as success");
                Ok(())
            }
            Err(message) => Err(RuleApplyError::Remove {
                rule: rule.to_string(),
                message,
            }),
        }
    }

    fn ip_forwarding(&self) -> Result<bool, RuleApplyError> {
        let contents = std::fs::read_to_string(IP_FORWARD_PATH)
            .map_err(|err| RuleApplyError::Forwarding(err.to_string()))?;
        Ok(contents.trim() == "1")
    }

    fn set_ip_forwarding(&self, enabled: bool) -> Result<(), RuleApplyError> {
        let value = if enabled { "1\n" } else { "0\n" };
        std::fs::write(IP_FORWARD_PATH, value)
            .map_err(|err| RuleApplyError::Forwarding(err.to_string()))
    }
}
