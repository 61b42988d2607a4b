//! The session cleanup stack.
//!
//! Every reversible side effect registers an action here at the moment its
//! setup succeeds. Teardown drains the stack once, newest first, so the
//! executed cleanup sequence is exactly the reverse of the successful setup
//! sequence and no action can run twice even when cleanup is reached from
//! multiple failure paths.

use std::sync::Mutex;

use crate::redirect::RuleToken;
use crate::types::ServiceKind;

/// One reversible side effect to undo during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    /// Stop a supervised external service.
    StopService(ServiceKind),
    /// Shut down the in-process credential capture server.
    StopCapture,
    /// Revert the firewall/NAT rules recorded under the token.
    RevertRules(RuleToken),
    /// Flush addresses assigned to an interface during bring-up.
    FlushAddresses(String),
}

#[derive(Debug, Clone)]
pub struct CleanupEntry {
    pub label: String,
    pub action: CleanupAction,
}

#[derive(Debug, Default)]
pub struct CleanupStack {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: impl Into<String>, action: CleanupAction) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.push(CleanupEntry {
            label: label.into(),
            action,
        });
    }

    /// Take every pending action, newest first. The stack is left empty, so
    /// a second drain (from a racing failure path) observes nothing to do.
    pub fn drain_lifo(&self) -> Vec<CleanupEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut drained: Vec<CleanupEntry> = entries.drain(..).collect();
        drained.reverse();
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_is_lifo_and_single_shot() {
        let stack = CleanupStack::new();
        stack.push("ap", CleanupAction::StopService(ServiceKind::AccessPoint));
        stack.push("dhcp", CleanupAction::StopService(ServiceKind::DhcpDns));
        stack.push("capture", CleanupAction::StopCapture);
        assert_eq!(stack.len(), 3);

        let drained = stack.drain_lifo();
        let labels: Vec<&str> = drained.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["capture", "dhcp", "ap"]);

        assert!(stack.is_empty());
        assert!(stack.drain_lifo().is_empty());
    }
}
