//! Per-bundle forwarding log
//!
//! Append-only record of what happened to a bundle at each remote
//! endpoint. The router consults it to avoid forwarding a bundle back
//! to the peer it arrived from and to avoid re-sending superseded
//! link-state announcements.

use crate::eid::EndpointId;
use crate::types::now;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardAction {
    /// Bundle arrived from this peer.
    Received,
    /// Queued on a link toward this peer.
    ForwardAttempted,
    /// Convergence layer reported full transmission.
    Transmitted,
    /// Deliberately not sent to this peer.
    Suppressed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardEntry {
    pub remote: EndpointId,
    pub action: ForwardAction,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForwardingLog {
    entries: Vec<ForwardEntry>,
}

impl ForwardingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, remote: EndpointId, action: ForwardAction) {
        self.entries.push(ForwardEntry {
            remote,
            action,
            timestamp: now(),
        });
    }

    pub fn entries(&self) -> &[ForwardEntry] {
        &self.entries
    }

    /// Did this bundle arrive from `remote`? Used for loop suppression.
    pub fn received_from(&self, remote: &EndpointId) -> bool {
        self.has(remote, ForwardAction::Received)
    }

    pub fn has(&self, remote: &EndpointId, action: ForwardAction) -> bool {
        self.entries
            .iter()
            .any(|e| e.action == action && e.remote == *remote)
    }

    /// Count of entries with the given action.
    pub fn count(&self, action: ForwardAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_suppression_lookup() {
        let peer = EndpointId::parse("dtn://b.dtn").unwrap();
        let other = EndpointId::parse("dtn://c.dtn").unwrap();

        let mut log = ForwardingLog::new();
        log.add(peer.clone(), ForwardAction::Received);
        log.add(other.clone(), ForwardAction::ForwardAttempted);

        assert!(log.received_from(&peer));
        assert!(!log.received_from(&other));
        assert_eq!(log.count(ForwardAction::ForwardAttempted), 1);
    }
}
