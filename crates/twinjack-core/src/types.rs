use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Short random identifier for a session, stable across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let bytes: [u8; 6] = rng.gen();
        let mut id = String::with_capacity(12);
        for b in bytes {
            id.push_str(&format!("{:02x}", b));
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encryption advertised by the legitimate target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionKind {
    Open,
    WpaPsk,
    Wpa2Psk,
    Wpa3Sae,
}

/// The access point being impersonated. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAp {
    pub bssid: String,
    pub ssid: String,
    pub channel: u8,
    pub encryption: EncryptionKind,
}

impl TargetAp {
    /// Validate the target descriptor before a session is created.
    pub fn validate(&self) -> Result<(), String> {
        if self.ssid.len() > 32 {
            return Err("SSID must be at most 32 bytes".to_string());
        }
        if !is_valid_bssid(&self.bssid) {
            return Err(format!("invalid BSSID {:?}", self.bssid));
        }
        let valid_5ghz = [
            36, 40, 44, 48, 52, 56, 60, 64, 100, 104, 108, 112, 116, 120, 124, 128, 132, 136, 140,
            144, 149, 153, 157, 161, 165,
        ];
        if !(1..=14).contains(&self.channel) && !valid_5ghz.contains(&self.channel) {
            return Err(format!("invalid channel {}", self.channel));
        }
        Ok(())
    }

    /// hostapd-style hardware mode for the target channel.
    pub fn hw_mode(&self) -> &'static str {
        if self.channel <= 14 {
            "g"
        } else {
            "a"
        }
    }
}

fn is_valid_bssid(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Interface roles in fixed allocation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ap,
    Deauth,
    Verify,
    Internet,
}

impl Role {
    pub const PRIORITY: [Role; 4] = [Role::Ap, Role::Deauth, Role::Verify, Role::Internet];

    /// Human-readable name of the capability the role needs.
    pub fn capability_name(self) -> &'static str {
        match self {
            Role::Ap => "ap-mode",
            Role::Deauth => "monitor-mode",
            Role::Verify => "managed-mode",
            Role::Internet => "up with address",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Ap => "ap",
            Role::Deauth => "deauth",
            Role::Verify => "verify",
            Role::Internet => "internet",
        };
        f.write_str(name)
    }
}

/// Supported-mode flags reported by the capability probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCaps {
    pub supports_ap: bool,
    pub supports_monitor: bool,
    pub supports_managed: bool,
}

/// Current operating mode of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceMode {
    Managed,
    Monitor,
    AccessPoint,
    Other,
}

/// One discovered interface with its capabilities and state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub caps: InterfaceCaps,
    pub mode: InterfaceMode,
    pub is_wireless: bool,
    pub is_up: bool,
    pub has_address: bool,
}

impl InterfaceInfo {
    /// Structural capability match, no runtime introspection.
    pub fn satisfies(&self, role: Role) -> bool {
        match role {
            Role::Ap => self.is_wireless && self.is_up && self.caps.supports_ap,
            Role::Deauth => self.is_wireless && self.is_up && self.caps.supports_monitor,
            Role::Verify => self.is_wireless && self.is_up && self.caps.supports_managed,
            Role::Internet => self.is_up && self.has_address,
        }
    }
}

/// An interface bound to a role for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    pub interface: String,
    /// Set when the interface is shared with another role (hardware
    /// scarcity fallback).
    pub degraded: bool,
}

/// Session lifecycle phase. Exactly one authoritative value at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    Init = 0,
    Allocating = 1,
    StartingServices = 2,
    Attacking = 3,
    Stopping = 4,
    Done = 5,
    Failed = 6,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            0 => Phase::Init,
            1 => Phase::Allocating,
            2 => Phase::StartingServices,
            3 => Phase::Attacking,
            4 => Phase::Stopping,
            5 => Phase::Done,
            _ => Phase::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Allocating => "allocating",
            Phase::StartingServices => "starting_services",
            Phase::Attacking => "attacking",
            Phase::Stopping => "stopping",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Atomic phase holder with compare-and-set transitions, so two concurrent
/// failure paths cannot both begin teardown.
#[derive(Debug)]
pub struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Transition `from -> to`; fails if another context moved first.
    pub fn transition(&self, from: Phase, to: Phase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Claim the teardown path. Succeeds for exactly one caller; returns
    /// false once the session is already stopping or terminal.
    pub fn begin_stopping(&self) -> bool {
        loop {
            let current = self.load();
            if matches!(current, Phase::Stopping | Phase::Done | Phase::Failed) {
                return false;
            }
            if self.transition(current, Phase::Stopping) {
                return true;
            }
        }
    }

    /// Settle the terminal phase after teardown. Only valid from Stopping.
    pub fn finish(&self, terminal: Phase) {
        debug_assert!(terminal.is_terminal());
        let _ = self.transition(Phase::Stopping, terminal);
    }
}

/// External service processes the supervisor manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    AccessPoint,
    DhcpDns,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::AccessPoint => "access-point",
            ServiceKind::DhcpDns => "dhcp-dns",
        };
        f.write_str(name)
    }
}

/// Supervised process lifecycle state. Transitions are strictly
/// directional; `Stopped` is reachable from every state via `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Verification verdict attached to a captured credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
    Inconclusive,
    Skipped,
}

/// One captured submission. Append-only; only the verification field is
/// ever updated, exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedCredential {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub client_mac: String,
    pub fields: BTreeMap<String, String>,
    pub verification: VerificationStatus,
}

impl CapturedCredential {
    /// The secret to verify, if the submission carried one.
    pub fn password(&self) -> Option<&str> {
        self.fields
            .get("password")
            .or_else(|| self.fields.get("pass"))
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetAp {
        TargetAp {
            bssid: "AA:BB:CC:DD:EE:FF".to_string(),
            ssid: "Lab".to_string(),
            channel: 6,
            encryption: EncryptionKind::Wpa2Psk,
        }
    }

    #[test]
    fn target_validation() {
        assert!(target().validate().is_ok());

        let mut bad = target();
        bad.bssid = "not-a-mac".to_string();
        assert!(bad.validate().is_err());

        let mut bad = target();
        bad.channel = 15;
        assert!(bad.validate().is_err());

        let mut five_ghz = target();
        five_ghz.channel = 36;
        assert!(five_ghz.validate().is_ok());
        assert_eq!(five_ghz.hw_mode(), "a");
    }

    #[test]
    fn phase_cell_single_stopping_winner() {
        let cell = PhaseCell::new(Phase::Attacking);
        assert!(cell.begin_stopping());
        assert!(!cell.begin_stopping());
        cell.finish(Phase::Done);
        assert_eq!(cell.load(), Phase::Done);
        assert!(!cell.begin_stopping());
    }

    #[test]
    fn phase_cell_cas_transitions() {
        let cell = PhaseCell::new(Phase::Init);
        assert!(cell.transition(Phase::Init, Phase::Allocating));
        assert!(!cell.transition(Phase::Init, Phase::Allocating));
        assert_eq!(cell.load(), Phase::Allocating);
    }

    #[test]
    fn password_field_lookup() {
        let mut fields = BTreeMap::new();
        fields.insert("user".to_string(), "alice".to_string());
        fields.insert("pass".to_string(), "hunter2".to_string());
        let record = CapturedCredential {
            seq: 0,
            timestamp: Utc::now(),
            client_mac: "11:22:33:44:55:66".to_string(),
            fields,
            verification: VerificationStatus::Pending,
        };
        assert_eq!(record.password(), Some("hunter2"));
    }
}
