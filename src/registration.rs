//! Application registrations and local delivery
//!
//! A registration binds an EID pattern to a delivery channel. When a
//! received bundle's destination matches, the daemon hands a copy to
//! the channel; a DEFER registration keeps the bundle pending until
//! the application drains it, an ABORT registration lets it drop.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::eid::{EidPattern, EndpointId};

/// What to do when delivery to the application fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Keep the bundle pending and retry later.
    Defer,
    /// Drop the bundle.
    Abort,
}

/// Capacity of each registration's delivery channel.
const DELIVERY_QUEUE_DEPTH: usize = 64;

pub struct Registration {
    pub id: u32,
    pub pattern: EidPattern,
    pub failure_action: FailureAction,
    tx: mpsc::Sender<Bundle>,
}

impl Registration {
    /// Hand a bundle to the application. `true` means delivered (or
    /// dropped per ABORT); `false` means the bundle stays pending.
    pub fn deliver_bundle(&self, bundle: &Bundle) -> bool {
        match self.tx.try_send(bundle.clone()) {
            Ok(()) => {
                debug!(reg = self.id, bundle = %bundle, "delivered");
                true
            }
            Err(e) => {
                warn!(reg = self.id, error = %e, "delivery failed");
                match self.failure_action {
                    FailureAction::Defer => false,
                    FailureAction::Abort => true,
                }
            }
        }
    }
}

#[derive(Default)]
pub struct RegistrationTable {
    regs: Vec<Registration>,
    next_id: u32,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern, returning the registration id and the
    /// receiving end of its delivery channel.
    pub fn add(
        &mut self,
        pattern: EidPattern,
        failure_action: FailureAction,
    ) -> (u32, mpsc::Receiver<Bundle>) {
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);
        let id = self.next_id;
        self.next_id += 1;
        self.regs.push(Registration {
            id,
            pattern,
            failure_action,
            tx,
        });
        (id, rx)
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.regs.len();
        self.regs.retain(|r| r.id != id);
        before != self.regs.len()
    }

    pub fn matching(&self, dest: &EndpointId) -> Vec<&Registration> {
        self.regs
            .iter()
            .filter(|r| r.pattern.matches(dest))
            .collect()
    }

    pub fn get(&self, id: u32) -> Option<&Registration> {
        self.regs.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.regs.iter()
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_to(dest: &str) -> Bundle {
        Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse(dest).unwrap(),
            60,
        )
    }

    #[tokio::test]
    async fn matching_and_delivery() {
        let mut table = RegistrationTable::new();
        let (id, mut rx) = table.add(
            EidPattern::parse("dtn://b.dtn/*").unwrap(),
            FailureAction::Defer,
        );

        let b = bundle_to("dtn://b.dtn/app");
        let matches = table.matching(&b.dest);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);
        assert!(matches[0].deliver_bundle(&b));

        let got = rx.recv().await.unwrap();
        assert_eq!(got.dest, b.dest);

        assert!(table.matching(&bundle_to("dtn://c.dtn/app").dest).is_empty());
    }

    #[tokio::test]
    async fn defer_keeps_bundle_when_channel_full() {
        let mut table = RegistrationTable::new();
        let (_, _rx) = table.add(
            EidPattern::parse("dtn://b.dtn/*").unwrap(),
            FailureAction::Defer,
        );
        let b = bundle_to("dtn://b.dtn/app");
        let reg = &table.regs[0];
        for _ in 0..DELIVERY_QUEUE_DEPTH {
            assert!(reg.deliver_bundle(&b));
        }
        // Channel full: DEFER reports not-delivered.
        assert!(!reg.deliver_bundle(&b));
    }
}
