//! Contacts and the contact manager
//!
//! A [`Contact`] is the active session bound to a link while it is
//! opening, open, busy or closing; its lifetime follows the link state
//! machine, never a separate reference count. The [`ContactManager`]
//! owns the link table and the availability backoff timers.

use std::collections::HashMap;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cl::tcp::SessionHandle;
use crate::daemon::{ContactDownReason, Event, EventSender};
use crate::eid::EndpointId;
use crate::link::{Link, LinkState, LinkType};
use crate::types::now;

/// Session bookkeeping for a link with an active contact.
#[derive(Debug, Clone)]
pub struct Contact {
    pub link_name: String,
    pub started_at: u64,
    pub last_activity: u64,
    /// Graceful-shutdown handle for the convergence-layer session.
    pub session: Option<SessionHandle>,
}

impl Contact {
    fn new(link_name: &str) -> Self {
        let t = now();
        Self {
            link_name: link_name.to_string(),
            started_at: t,
            last_activity: t,
            session: None,
        }
    }

    pub fn idle_secs(&self) -> u64 {
        now().saturating_sub(self.last_activity)
    }
}

/// Link table plus retry and idle timers. Mutated only on the daemon
/// task; timers post events rather than touching links directly.
pub struct ContactManager {
    links: HashMap<String, Link>,
    contacts: HashMap<String, Contact>,
    retry_timers: HashMap<String, JoinHandle<()>>,
    events: EventSender,
}

impl ContactManager {
    pub fn new(events: EventSender) -> Self {
        Self {
            links: HashMap::new(),
            contacts: HashMap::new(),
            retry_timers: HashMap::new(),
            events,
        }
    }

    pub fn add_link(&mut self, link: Link) {
        let name = link.name.clone();
        info!(link = %name, remote = %link.remote_eid, "link added");
        self.links.insert(name.clone(), link);
        self.events.post(Event::LinkCreated { link: name });
    }

    pub fn del_link(&mut self, name: &str) -> Option<Link> {
        self.cancel_retry(name);
        self.contacts.remove(name);
        let link = self.links.remove(name);
        if link.is_some() {
            self.events.post(Event::LinkDeleted {
                link: name.to_string(),
            });
        }
        link
    }

    pub fn get(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Link> {
        self.links.get_mut(name)
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn contact(&self, name: &str) -> Option<&Contact> {
        self.contacts.get(name)
    }

    pub fn find_by_remote(&self, remote: &EndpointId) -> Option<&Link> {
        self.links.values().find(|l| l.remote_eid == *remote)
    }

    /// The contact-exists-iff-session-state invariant.
    #[cfg(test)]
    fn check_contact_invariant(&self) {
        for link in self.links.values() {
            assert_eq!(
                link.state().has_contact(),
                self.contacts.contains_key(&link.name),
                "contact invariant violated for {}",
                link.name
            );
        }
    }

    /// The convergence layer has begun a connection attempt.
    pub fn contact_opening(&mut self, name: &str) {
        if let Some(link) = self.links.get_mut(name) {
            if link.set_state(LinkState::Opening).is_ok() {
                self.contacts.insert(name.to_string(), Contact::new(name));
            }
        }
    }

    /// Handshake completed; the link is usable.
    pub fn contact_up(&mut self, name: &str, session: Option<SessionHandle>) {
        if let Some(link) = self.links.get_mut(name) {
            if let Err(e) = link.set_state(LinkState::Open) {
                warn!(link = name, error = %e, "contact up in unexpected state");
                return;
            }
            link.reset_retry_interval();
            self.cancel_retry(name);
            let contact = self
                .contacts
                .entry(name.to_string())
                .or_insert_with(|| Contact::new(name));
            if session.is_some() {
                contact.session = session;
            }
        }
    }

    /// Ask every active session to shut down gracefully.
    pub fn close_all_sessions(&self) {
        for contact in self.contacts.values() {
            if let Some(session) = &contact.session {
                session.close();
            }
        }
    }

    /// Session torn down. Schedules a backoff re-open for link types
    /// that maintain availability on their own, returning the delay.
    pub fn contact_down(&mut self, name: &str, reason: ContactDownReason) -> Option<u64> {
        self.contacts.remove(name);
        let link = self.links.get_mut(name)?;
        if let Err(e) = link.set_state(LinkState::Unavailable) {
            warn!(link = name, error = %e, "contact down transition failed");
            return None;
        }
        self.events.post(Event::LinkUnavailable {
            link: name.to_string(),
        });

        let auto_reopen = matches!(link.link_type, LinkType::OnDemand | LinkType::AlwaysOn);
        if auto_reopen && reason != ContactDownReason::UserClose {
            let delay = link.next_retry_interval();
            self.schedule_retry(name, delay);
            return Some(delay);
        }
        None
    }

    /// Record traffic so the idle timer stays quiet.
    pub fn note_activity(&mut self, name: &str) {
        if let Some(c) = self.contacts.get_mut(name) {
            c.last_activity = now();
        }
    }

    /// Post LinkAvailable after `delay` seconds. A successful open
    /// cancels the timer; cancellation tolerates the timer having
    /// already fired.
    fn schedule_retry(&mut self, name: &str, delay: u64) {
        debug!(link = name, delay, "scheduling re-open");
        self.cancel_retry(name);
        let events = self.events.clone();
        let link_name = name.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
            events.post(Event::LinkAvailable { link: link_name });
        });
        self.retry_timers.insert(name.to_string(), handle);
    }

    fn cancel_retry(&mut self, name: &str) {
        if let Some(handle) = self.retry_timers.remove(name) {
            // If it already fired, the LinkAvailable event is benign.
            handle.abort();
        }
    }

    /// Close ONDEMAND links that have been idle past their limit.
    pub fn close_idle_links(&mut self) -> Vec<String> {
        let mut to_close = Vec::new();
        for link in self.links.values() {
            if link.link_type != LinkType::OnDemand || !link.is_open() || !link.is_idle() {
                continue;
            }
            if let Some(contact) = self.contacts.get(&link.name) {
                if contact.idle_secs() >= link.params.idle_close_time {
                    to_close.push(link.name.clone());
                }
            }
        }
        for name in &to_close {
            info!(link = %name, "closing idle ondemand link");
            self.events.post_at_head(Event::LinkStateChangeRequest {
                link: name.clone(),
                state: LinkState::Closing,
            });
        }
        to_close
    }

    /// Abort all timers at shutdown.
    pub fn shutdown(&mut self) {
        for (_, handle) in self.retry_timers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::EventQueue;
    use crate::link::LinkParams;
    use std::sync::Arc;

    fn mgr() -> (ContactManager, Arc<EventQueue>) {
        let queue = Arc::new(EventQueue::new());
        (ContactManager::new(EventSender::new(queue.clone())), queue)
    }

    fn ondemand(name: &str) -> Link {
        Link::new(
            name,
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

    #[tokio::test]
    async fn contact_lifecycle_tracks_state() {
        let (mut cm, _q) = mgr();
        cm.add_link(ondemand("l0"));
        cm.get_mut("l0")
            .unwrap()
            .set_state(LinkState::Available)
            .unwrap();
        cm.check_contact_invariant();

        cm.contact_opening("l0");
        assert!(cm.contact("l0").is_some());
        cm.check_contact_invariant();

        cm.contact_up("l0", None);
        assert_eq!(cm.get("l0").unwrap().state(), LinkState::Open);
        cm.check_contact_invariant();

        cm.contact_down("l0", ContactDownReason::Broken);
        assert_eq!(cm.get("l0").unwrap().state(), LinkState::Unavailable);
        assert!(cm.contact("l0").is_none());
        cm.check_contact_invariant();
    }

    #[tokio::test]
    async fn broken_contacts_back_off() {
        let (mut cm, _q) = mgr();
        cm.add_link(ondemand("l0"));

        // Four consecutive failures schedule at 5, 10, 20, 40.
        let mut delays = Vec::new();
        for _ in 0..4 {
            cm.get_mut("l0")
                .unwrap()
                .set_state(LinkState::Available)
                .unwrap();
            cm.contact_opening("l0");
            delays.push(cm.contact_down("l0", ContactDownReason::Broken).unwrap());
        }
        assert_eq!(delays, vec![5, 10, 20, 40]);

        // A successful open resets the backoff to the minimum.
        cm.get_mut("l0")
            .unwrap()
            .set_state(LinkState::Available)
            .unwrap();
        cm.contact_opening("l0");
        cm.contact_up("l0", None);
        assert_eq!(cm.contact_down("l0", ContactDownReason::Broken), Some(5));
    }

    #[tokio::test]
    async fn user_close_does_not_retry() {
        let (mut cm, _q) = mgr();
        cm.add_link(ondemand("l0"));
        let link = cm.get_mut("l0").unwrap();
        link.set_state(LinkState::Available).unwrap();
        cm.contact_opening("l0");
        cm.contact_up("l0", None);

        cm.contact_down("l0", ContactDownReason::UserClose);
        assert!(cm.retry_timers.is_empty());
    }
}
