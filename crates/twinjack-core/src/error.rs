use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Role, ServiceKind, SessionId};

/// No interface, assigned or not, satisfies a requested role.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no interface satisfies role {role}: requires {capability}")]
    NoCandidate { role: Role, capability: &'static str },

    #[error("no wireless interfaces discovered")]
    NoInterfaces,

    #[error("interface discovery failed: {0}")]
    Probe(String),
}

/// A supervised service never reached its readiness condition.
#[derive(Debug, Error)]
pub enum ServiceStartError {
    #[error("{service} config generation failed: {message}")]
    Config { service: ServiceKind, message: String },

    #[error("failed to spawn {service}: {message}")]
    Spawn { service: ServiceKind, message: String },

    #[error("{service} exited during startup")]
    ExitedEarly { service: ServiceKind },

    #[error("{service} not ready after {waited_ms}ms")]
    NotReady { service: ServiceKind, waited_ms: u64 },
}

impl ServiceStartError {
    pub fn service(&self) -> ServiceKind {
        match self {
            ServiceStartError::Config { service, .. }
            | ServiceStartError::Spawn { service, .. }
            | ServiceStartError::ExitedEarly { service }
            | ServiceStartError::NotReady { service, .. } => *service,
        }
    }
}

/// A running service stopped responding to its liveness probe.
#[derive(Debug, Clone, Error)]
pub enum ServiceHealthError {
    #[error("{service} unresponsive after {failures} consecutive probe failures")]
    Unresponsive { service: ServiceKind, failures: u32 },

    #[error("deauth loop failed {failures} consecutive sends")]
    DeauthFailed { failures: u32 },
}

/// Installing or reverting firewall/NAT state failed.
#[derive(Debug, Error)]
pub enum RuleApplyError {
    #[error("rule install failed ({rule}): {message}")]
    Install { rule: String, message: String },

    #[error("rule removal failed ({rule}): {message}")]
    Remove { rule: String, message: String },

    #[error("ip forwarding control failed: {0}")]
    Forwarding(String),
}

/// Appending to the durable credential log failed.
#[derive(Debug, Error)]
pub enum CaptureWriteError {
    #[error("credential log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Non-fatal: a verification attempt could not produce a verdict.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("verify interface busy")]
    Busy,

    #[error("no verify interface available")]
    NoInterface,

    #[error("connection attempt failed: {0}")]
    Connector(String),
}

/// One teardown step failed. Collected, never escalated: the remaining
/// cleanup actions still run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupFailure {
    pub action: String,
    pub message: String,
}

impl CleanupFailure {
    pub fn new(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Top-level session error surfaced to callers.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    ServiceStart(#[from] ServiceStartError),

    #[error(transparent)]
    ServiceHealth(#[from] ServiceHealthError),

    #[error(transparent)]
    RuleApply(#[from] RuleApplyError),

    #[error(transparent)]
    CaptureWrite(#[from] CaptureWriteError),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session setup failed: {0}")]
    Setup(String),
}

impl SessionError {
    /// Errors raised before any attack action was taken map to CLI exit
    /// code 1; everything else is an internal failure (exit code 2).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SessionError::Allocation(_) | SessionError::UnknownSession(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn allocation_error_renders_role_and_capability() {
        let err = AllocationError::NoCandidate {
            role: Role::Ap,
            capability: "ap-mode",
        };
        assert_eq!(
            err.to_string(),
            "no interface satisfies role ap: requires ap-mode"
        );
    }

    #[test]
    fn configuration_errors_are_distinguished() {
        let alloc: SessionError = AllocationError::NoInterfaces.into();
        assert!(alloc.is_configuration());

        let health: SessionError = ServiceHealthError::DeauthFailed { failures: 5 }.into();
        assert!(!health.is_configuration());
    }
}
