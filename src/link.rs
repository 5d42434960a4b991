//! Links: named channels to next-hop peers
//!
//! A link owns a FIFO queue of bundle ids, per-link statistics, and a
//! state machine gating when a convergence-layer session may exist.
//! Only the transitions in the table below are legal; anything else is
//! an internal error, except that a broken transport may always force
//! UNAVAILABLE.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::eid::EndpointId;
use crate::types::BundleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Unavailable,
    Available,
    Opening,
    Open,
    Busy,
    Closing,
}

impl LinkState {
    /// A contact exists exactly while the link is in one of these.
    pub fn has_contact(self) -> bool {
        matches!(
            self,
            LinkState::Opening | LinkState::Open | LinkState::Busy | LinkState::Closing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    AlwaysOn,
    OnDemand,
    Scheduled,
    Opportunistic,
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alwayson" => Ok(LinkType::AlwaysOn),
            "ondemand" => Ok(LinkType::OnDemand),
            "scheduled" => Ok(LinkType::Scheduled),
            "opportunistic" => Ok(LinkType::Opportunistic),
            other => Err(format!("unknown link type: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("illegal link state transition {0:?} -> {1:?}")]
    IllegalTransition(LinkState, LinkState),
}

/// Per-link tunables, defaulted from the agent config.
#[derive(Debug, Clone)]
pub struct LinkParams {
    pub min_retry_interval: u64,
    pub max_retry_interval: u64,
    /// ONDEMAND links close after this many idle seconds.
    pub idle_close_time: u64,
    /// Queue depth at which an OPEN link goes BUSY.
    pub busy_queue_depth: usize,
    /// Insert a previous-hop block on bundles sent over this link.
    pub prevhop_hdr: bool,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            min_retry_interval: 5,
            max_retry_interval: 600,
            idle_close_time: 30,
            busy_queue_depth: 10,
            prevhop_hdr: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStats {
    pub contact_attempts: u64,
    pub contacts: u64,
    pub bundles_transmitted: u64,
    pub bytes_transmitted: u64,
    pub bundles_cancelled: u64,
    pub unavailable_transitions: u64,
}

/// Thread-safe FIFO of bundle ids with an async pop.
///
/// Push and pop are safe from any thread; the convergence-layer task
/// blocks on `pop` while the daemon pushes.
#[derive(Clone, Default)]
pub struct BundleQueue {
    inner: Arc<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    queue: Mutex<VecDeque<BundleId>>,
    notify: Notify,
}

impl BundleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: BundleId) {
        self.inner.queue.lock().expect("queue lock").push_back(id);
        self.inner.notify.notify_one();
    }

    /// Re-queue at the front, preserving FIFO order for a bundle that
    /// could not be sent.
    pub fn push_front(&self, id: BundleId) {
        self.inner.queue.lock().expect("queue lock").push_front(id);
        self.inner.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<BundleId> {
        self.inner.queue.lock().expect("queue lock").pop_front()
    }

    pub async fn pop(&self) -> BundleId {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(id) = self.try_pop() {
                return id;
            }
            notified.await;
        }
    }

    pub fn remove(&self, id: BundleId) -> bool {
        let mut q = self.inner.queue.lock().expect("queue lock");
        if let Some(pos) = q.iter().position(|&x| x == id) {
            q.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: BundleId) -> bool {
        self.inner.queue.lock().expect("queue lock").contains(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().expect("queue lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake any task blocked in `pop`, e.g. for shutdown.
    pub fn interrupt(&self) {
        self.inner.notify.notify_waiters();
    }
}

/// A named, typed channel to a next-hop EID.
///
/// Two links to the same next hop are distinct; routing identity is
/// the name.
pub struct Link {
    pub name: String,
    pub link_type: LinkType,
    pub remote_eid: EndpointId,
    pub remote_addr: Option<SocketAddr>,
    pub params: LinkParams,
    pub stats: LinkStats,
    state: LinkState,
    queue: BundleQueue,
    /// Bundles handed to the convergence layer but not yet fully
    /// acknowledged.
    in_flight: Vec<BundleId>,
    /// Delay before the next re-open attempt; doubles per failure.
    retry_interval: u64,
}

impl Link {
    pub fn new(
        name: &str,
        link_type: LinkType,
        remote_eid: EndpointId,
        remote_addr: Option<SocketAddr>,
        params: LinkParams,
    ) -> Self {
        let retry = params.min_retry_interval;
        Self {
            name: name.to_string(),
            link_type,
            remote_eid,
            remote_addr,
            params,
            stats: LinkStats::default(),
            state: LinkState::Unavailable,
            queue: BundleQueue::new(),
            in_flight: Vec::new(),
            retry_interval: retry,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn queue(&self) -> BundleQueue {
        self.queue.clone()
    }

    /// Share a queue created elsewhere, e.g. by an inbound session
    /// that existed before its link did.
    pub fn adopt_queue(&mut self, queue: BundleQueue) {
        self.queue = queue;
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open | LinkState::Busy)
    }

    /// Apply a state transition, enforcing the legal set.
    pub fn set_state(&mut self, to: LinkState) -> Result<(), LinkError> {
        use LinkState::*;
        let from = self.state;
        let legal = match (from, to) {
            (Unavailable, Available) => true,
            (Available, Opening) => true,
            (Opening, Open) => true,
            (Open, Busy) => true,
            (Busy, Open) => true,
            (Open, Closing) | (Busy, Closing) => true,
            // A broken transport forces UNAVAILABLE from anywhere.
            (_, Unavailable) => true,
            _ => false,
        };
        if !legal {
            return Err(LinkError::IllegalTransition(from, to));
        }
        debug!(link = %self.name, ?from, ?to, "link state");
        if to == Unavailable {
            self.stats.unavailable_transitions += 1;
        }
        if to == Opening {
            self.stats.contact_attempts += 1;
        }
        if to == Open && from == Opening {
            self.stats.contacts += 1;
            info!(link = %self.name, "contact up");
        }
        self.state = to;
        Ok(())
    }

    /// Current backoff delay, doubling it for the next failure.
    pub fn next_retry_interval(&mut self) -> u64 {
        let current = self.retry_interval;
        self.retry_interval = (self.retry_interval * 2).min(self.params.max_retry_interval);
        current
    }

    /// A successful open resets the backoff.
    pub fn reset_retry_interval(&mut self) {
        self.retry_interval = self.params.min_retry_interval;
    }

    pub fn enqueue(&self, id: BundleId) {
        self.queue.push(id);
    }

    pub fn mark_in_flight(&mut self, id: BundleId) {
        self.in_flight.push(id);
    }

    pub fn clear_in_flight(&mut self, id: BundleId) {
        self.in_flight.retain(|&x| x != id);
    }

    pub fn in_flight(&self) -> &[BundleId] {
        &self.in_flight
    }

    /// Queue depth counting in-flight bundles; drives OPEN<->BUSY.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    pub fn over_busy_threshold(&self) -> bool {
        self.pending() >= self.params.busy_queue_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> Link {
        Link::new(
            "l0",
            LinkType::OnDemand,
            EndpointId::parse("dtn://peer.dtn").unwrap(),
            None,
            LinkParams {
                min_retry_interval: 5,
                max_retry_interval: 60,
                ..LinkParams::default()
            },
        )
    }

    #[test]
    fn legal_lifecycle() {
        let mut l = link();
        assert_eq!(l.state(), LinkState::Unavailable);
        l.set_state(LinkState::Available).unwrap();
        l.set_state(LinkState::Opening).unwrap();
        l.set_state(LinkState::Open).unwrap();
        l.set_state(LinkState::Busy).unwrap();
        l.set_state(LinkState::Open).unwrap();
        l.set_state(LinkState::Closing).unwrap();
        l.set_state(LinkState::Unavailable).unwrap();
    }

    #[test]
    fn illegal_transitions_rejected() {
        let mut l = link();
        assert!(l.set_state(LinkState::Open).is_err());
        assert!(l.set_state(LinkState::Busy).is_err());

        l.set_state(LinkState::Available).unwrap();
        assert!(l.set_state(LinkState::Open).is_err());
        assert!(l.set_state(LinkState::Closing).is_err());
    }

    #[test]
    fn busy_exits_only_to_open_closing_unavailable() {
        for target in [
            LinkState::Available,
            LinkState::Opening,
            LinkState::Busy,
        ] {
            let mut l = link();
            l.set_state(LinkState::Available).unwrap();
            l.set_state(LinkState::Opening).unwrap();
            l.set_state(LinkState::Open).unwrap();
            l.set_state(LinkState::Busy).unwrap();
            assert!(l.set_state(target).is_err(), "BUSY -> {:?} must fail", target);
        }
        for target in [LinkState::Open, LinkState::Closing, LinkState::Unavailable] {
            let mut l = link();
            l.set_state(LinkState::Available).unwrap();
            l.set_state(LinkState::Opening).unwrap();
            l.set_state(LinkState::Open).unwrap();
            l.set_state(LinkState::Busy).unwrap();
            assert!(l.set_state(target).is_ok());
        }
    }

    #[test]
    fn retry_backoff_doubles_and_resets() {
        let mut l = link();
        assert_eq!(l.next_retry_interval(), 5);
        assert_eq!(l.next_retry_interval(), 10);
        assert_eq!(l.next_retry_interval(), 20);
        assert_eq!(l.next_retry_interval(), 40);
        // Capped at the max.
        assert_eq!(l.next_retry_interval(), 60);
        assert_eq!(l.next_retry_interval(), 60);

        l.reset_retry_interval();
        assert_eq!(l.next_retry_interval(), 5);
    }

    #[test]
    fn queue_fifo_and_remove() {
        let q = BundleQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert!(q.remove(2));
        assert!(!q.remove(9));
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[tokio::test]
    async fn queue_async_pop_wakes() {
        let q = BundleQueue::new();
        let q2 = q.clone();
        let task = tokio::spawn(async move { q2.pop().await });
        tokio::task::yield_now().await;
        q.push(42);
        assert_eq!(task.await.unwrap(), 42);
    }

    #[test]
    fn busy_threshold_counts_in_flight() {
        let mut l = link();
        l.params.busy_queue_depth = 2;
        l.enqueue(1);
        assert!(!l.over_busy_threshold());
        l.mark_in_flight(2);
        assert!(l.over_busy_threshold());
        l.clear_in_flight(2);
        assert!(!l.over_busy_threshold());
    }
}
