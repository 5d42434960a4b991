//! The daemon core: event queue and dispatch
//!
//! Every mutation of shared agent state — the link table, the route
//! table, the bundle store index — happens here, on one task, by
//! draining a FIFO event queue. Convergence-layer and timer tasks
//! only post events. The queue supports head-of-line posting so a
//! LinkStateChangeRequest is processed before anything that depends
//! on it.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::bundle::status::{
    CustodyReason, CustodySignal, StatusReport, STATUS_CUSTODY_ACCEPTED, STATUS_DELETED,
    STATUS_DELIVERED, STATUS_FORWARDED, STATUS_RECEIVED,
};
use crate::bundle::{status, Bundle, ForwardAction, FragmentManager, StatusReason};
use crate::cl::tcp::{SessionHandle, TcpConvergenceLayer};
use crate::config::Config;
use crate::contact::ContactManager;
use crate::eid::EndpointId;
use crate::link::{BundleQueue, Link, LinkState, LinkType};
use crate::registration::{FailureAction, RegistrationTable};
use crate::router::{create_router, Router, RouterCtx};
use crate::store::{BundleStore, StoreError};
use crate::types::{dtn_now, BundleId};

/// Dispatch slower than this, or queue dwell longer than this, earns
/// a warning.
const LATENCY_WARN: Duration = Duration::from_secs(2);

/// Why a contact ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactDownReason {
    /// Transport error or unexpected EOF.
    Broken,
    /// Keepalive silence exceeded.
    Timeout,
    /// Peer sent SHUTDOWN.
    Shutdown,
    /// Local close request; no retry.
    UserClose,
    /// ONDEMAND idle close.
    Idle,
}

/// Everything that can happen to the agent.
pub enum Event {
    BundleReceived {
        bundle: Box<Bundle>,
        link: Option<String>,
    },
    BundleInjected {
        bundle: Box<Bundle>,
    },
    /// A received bundle failed parsing or validation.
    ReceiveFailed {
        bundle: Box<Bundle>,
        reason: StatusReason,
    },
    BundleSend {
        id: BundleId,
        link: String,
    },
    /// The convergence layer pulled a bundle off the queue and put it
    /// on the wire.
    BundleInflight {
        id: BundleId,
        link: String,
    },
    BundleTransmitted {
        id: BundleId,
        link: String,
        bytes_sent: u64,
        reliably: bool,
    },
    BundleDelivered {
        id: BundleId,
        reg_id: u32,
    },
    BundleExpired {
        id: BundleId,
    },
    /// A reference to the bundle went away; delete it if nothing else
    /// needs it.
    BundleFree {
        id: BundleId,
    },
    LinkCreated {
        link: String,
    },
    LinkDeleted {
        link: String,
    },
    LinkAvailable {
        link: String,
    },
    LinkUnavailable {
        link: String,
    },
    ContactUp {
        link: String,
        handle: SessionHandle,
    },
    /// An inbound session with no pre-existing link.
    OpportunisticContact {
        link: String,
        addr: SocketAddr,
        queue: BundleQueue,
        handle: SessionHandle,
    },
    ContactDown {
        link: String,
        reason: ContactDownReason,
        /// Bundles on the wire when the session died, with acked
        /// payload byte counts.
        inflight: Vec<(BundleId, u64)>,
    },
    LinkStateChangeRequest {
        link: String,
        state: LinkState,
    },
    RegistrationAdded {
        endpoint: String,
    },
    /// One-second timer pulse; drives expiry, idle close, LSAs.
    Tick,
    ShutdownRequest,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::BundleReceived { bundle, link } => {
                write!(f, "BundleReceived({}, via {:?})", bundle.id, link)
            }
            Event::BundleInjected { bundle } => write!(f, "BundleInjected({})", bundle.id),
            Event::ReceiveFailed { reason, .. } => write!(f, "ReceiveFailed({:?})", reason),
            Event::BundleSend { id, link } => write!(f, "BundleSend({}, {})", id, link),
            Event::BundleInflight { id, link } => write!(f, "BundleInflight({}, {})", id, link),
            Event::BundleTransmitted { id, link, .. } => {
                write!(f, "BundleTransmitted({}, {})", id, link)
            }
            Event::BundleDelivered { id, reg_id } => {
                write!(f, "BundleDelivered({}, reg {})", id, reg_id)
            }
            Event::BundleExpired { id } => write!(f, "BundleExpired({})", id),
            Event::BundleFree { id } => write!(f, "BundleFree({})", id),
            Event::LinkCreated { link } => write!(f, "LinkCreated({})", link),
            Event::LinkDeleted { link } => write!(f, "LinkDeleted({})", link),
            Event::LinkAvailable { link } => write!(f, "LinkAvailable({})", link),
            Event::LinkUnavailable { link } => write!(f, "LinkUnavailable({})", link),
            Event::ContactUp { link, .. } => write!(f, "ContactUp({})", link),
            Event::OpportunisticContact { link, addr, .. } => {
                write!(f, "OpportunisticContact({}, {})", link, addr)
            }
            Event::ContactDown { link, reason, .. } => {
                write!(f, "ContactDown({}, {:?})", link, reason)
            }
            Event::LinkStateChangeRequest { link, state } => {
                write!(f, "LinkStateChangeRequest({}, {:?})", link, state)
            }
            Event::RegistrationAdded { endpoint } => {
                write!(f, "RegistrationAdded({})", endpoint)
            }
            Event::Tick => write!(f, "Tick"),
            Event::ShutdownRequest => write!(f, "ShutdownRequest"),
        }
    }
}

/// An event plus the moment it was posted, for dwell accounting.
#[derive(Debug)]
pub struct PostedEvent {
    pub event: Event,
    pub posted: Instant,
}

/// Single-reader multi-writer FIFO with head posting and drain-on-stop.
#[derive(Default)]
pub struct EventQueue {
    queue: Mutex<VecDeque<PostedEvent>>,
    notify: Notify,
    stopped: AtomicBool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, event: Event) {
        self.queue.lock().expect("event queue").push_back(PostedEvent {
            event,
            posted: Instant::now(),
        });
        self.notify.notify_one();
    }

    /// Jump the line: processed before everything already queued.
    pub fn post_at_head(&self, event: Event) {
        self.queue
            .lock()
            .expect("event queue")
            .push_front(PostedEvent {
                event,
                posted: Instant::now(),
            });
        self.notify.notify_one();
    }

    pub fn try_next(&self) -> Option<PostedEvent> {
        self.queue.lock().expect("event queue").pop_front()
    }

    /// Next event; `None` once stopped and fully drained.
    pub async fn next(&self) -> Option<PostedEvent> {
        loop {
            let notified = self.notify.notified();
            if let Some(ev) = self.try_next() {
                return Some(ev);
            }
            if self.stopped.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting the idle wait; queued events still drain.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("event queue").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cloneable posting handle for I/O and timer tasks.
#[derive(Clone)]
pub struct EventSender(Arc<EventQueue>);

impl EventSender {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self(queue)
    }

    pub fn post(&self, event: Event) {
        self.0.post(event);
    }

    pub fn post_at_head(&self, event: Event) {
        self.0.post_at_head(event);
    }
}

/// The agent: one task owning all shared state.
pub struct Daemon {
    config: Config,
    store: Arc<BundleStore>,
    queue: Arc<EventQueue>,
    events: EventSender,
    contacts: ContactManager,
    router: Box<dyn Router>,
    fragments: FragmentManager,
    registrations: RegistrationTable,
    cl: Arc<TcpConvergenceLayer>,
}

impl Daemon {
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let queue = Arc::new(EventQueue::new());
        let events = EventSender::new(queue.clone());
        let store = Arc::new(BundleStore::open(config.storage_type, &config.data_dir)?);
        let cl = TcpConvergenceLayer::new(
            config.local_eid.clone(),
            events.clone(),
            store.clone(),
            config.keepalive_interval,
            config.partial_ack_length,
            config.reactive_frag_enabled,
            config.pipelining,
            true,
        );
        let contacts = ContactManager::new(events.clone());
        let router = create_router(&config);
        Ok(Self {
            config,
            store,
            queue,
            events,
            contacts,
            router,
            fragments: FragmentManager::new(),
            registrations: RegistrationTable::new(),
            cl,
        })
    }

    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub fn queue(&self) -> Arc<EventQueue> {
        self.queue.clone()
    }

    pub fn store(&self) -> Arc<BundleStore> {
        self.store.clone()
    }

    /// Register an application endpoint; bundles matching the pattern
    /// arrive on the returned channel.
    pub fn register(
        &mut self,
        pattern: crate::eid::EidPattern,
        failure_action: FailureAction,
    ) -> (u32, tokio::sync::mpsc::Receiver<Bundle>) {
        let (id, rx) = self.registrations.add(pattern.clone(), failure_action);
        self.events.post(Event::RegistrationAdded {
            endpoint: pattern.to_string(),
        });
        (id, rx)
    }

    /// Bring up configured links and background tasks, then run the
    /// event loop until shutdown.
    pub async fn run(&mut self) {
        info!(local = %self.config.local_eid, "daemon starting");

        for lc in self.config.links.clone() {
            let mut link = Link::new(
                &lc.name,
                lc.link_type,
                lc.remote_eid.clone(),
                Some(lc.remote_addr),
                self.config.link_params(),
            );
            if link.set_state(LinkState::Available).is_err() {
                continue;
            }
            self.contacts.add_link(link);
            if lc.link_type == LinkType::AlwaysOn {
                self.open_link(&lc.name);
            }
        }

        let listener = {
            let cl = self.cl.clone();
            let addr = self.config.listen_addr;
            tokio::spawn(async move {
                if let Err(e) = cl.listen(addr).await {
                    error!(error = %e, "listener failed");
                }
            })
        };

        let ticker = {
            let events = self.events.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                loop {
                    interval.tick().await;
                    events.post(Event::Tick);
                }
            })
        };

        while let Some(posted) = self.queue.next().await {
            let dwell = posted.posted.elapsed();
            if dwell > LATENCY_WARN {
                warn!(event = ?posted.event, ?dwell, "event sat in queue too long");
            }
            let started = Instant::now();
            let label = format!("{:?}", posted.event);
            self.dispatch(posted.event);
            let took = started.elapsed();
            if took > LATENCY_WARN {
                warn!(event = %label, ?took, "slow event dispatch");
            }
        }

        ticker.abort();
        listener.abort();
        self.contacts.close_all_sessions();
        self.contacts.shutdown();
        info!("daemon stopped");
    }

    /// Post the shutdown request; the queue drains then exits.
    pub fn shutdown(&self) {
        self.events.post(Event::ShutdownRequest);
    }

    fn route_event(&mut self, event: &Event) {
        let mut ctx = RouterCtx {
            local_eid: &self.config.local_eid,
            contacts: &mut self.contacts,
            store: &self.store,
            events: &self.events,
            config: &self.config,
        };
        self.router.handle_event(event, &mut ctx);
    }

    fn dispatch(&mut self, event: Event) {
        debug!(?event, "dispatch");
        match event {
            Event::BundleReceived { bundle, link } => self.on_bundle_received(*bundle, link),
            Event::BundleInjected { bundle } => self.on_bundle_injected(*bundle),
            Event::ReceiveFailed { bundle, reason } => self.on_receive_failed(*bundle, reason),
            Event::BundleSend { id, link } => self.on_bundle_send(id, &link),
            Event::BundleInflight { id, link } => {
                if let Some(l) = self.contacts.get_mut(&link) {
                    l.mark_in_flight(id);
                }
            }
            Event::BundleTransmitted {
                id,
                link,
                bytes_sent,
                reliably,
            } => self.on_bundle_transmitted(id, &link, bytes_sent, reliably),
            Event::BundleDelivered { id, .. } => self.try_delete(id),
            Event::BundleExpired { id } => self.on_bundle_expired(id),
            Event::BundleFree { id } => self.try_delete(id),
            Event::LinkCreated { .. } | Event::LinkDeleted { .. } => self.route_event(&event),
            Event::LinkAvailable { link } => self.on_link_available(&link),
            Event::LinkUnavailable { link } => {
                self.route_event(&Event::LinkUnavailable { link })
            }
            Event::ContactUp { link, handle } => self.on_contact_up(&link, handle),
            Event::OpportunisticContact {
                link,
                addr,
                queue,
                handle,
            } => self.on_opportunistic_contact(link, addr, queue, handle),
            Event::ContactDown {
                link,
                reason,
                inflight,
            } => self.on_contact_down(&link, reason, inflight),
            Event::LinkStateChangeRequest { link, state } => {
                self.on_link_state_change_request(&link, state)
            }
            Event::RegistrationAdded { endpoint } => {
                self.route_event(&Event::RegistrationAdded { endpoint })
            }
            Event::Tick => self.on_tick(),
            Event::ShutdownRequest => {
                info!("shutdown requested; draining event queue");
                self.queue.stop();
            }
        }
    }

    // ------------------------------------------------------------------
    // Bundle path
    // ------------------------------------------------------------------

    fn on_bundle_received(&mut self, mut bundle: Bundle, link: Option<String>) {
        if let Some(name) = &link {
            self.contacts.note_activity(name);
            if let Some(l) = self.contacts.get(name) {
                if !l.remote_eid.is_null() {
                    bundle
                        .fwd_log
                        .add(l.remote_eid.clone(), ForwardAction::Received);
                }
            }
            // The previous-hop block names the sender even when the
            // link has no configured remote EID.
            if let Some(prevhop) = bundle.prevhop.clone() {
                if !bundle.fwd_log.received_from(&prevhop) {
                    bundle.fwd_log.add(prevhop, ForwardAction::Received);
                }
            }
        }

        if bundle.is_expired(dtn_now()) {
            info!(bundle = %bundle, "received bundle already expired");
            self.delete_with_report(bundle, StatusReason::LifetimeExpired);
            return;
        }

        if bundle.receive_rcpt {
            self.send_status_report(&bundle, STATUS_RECEIVED, StatusReason::NoAdditionalInfo);
        }

        if bundle.custody_requested && !bundle.local_custody {
            self.accept_custody(&mut bundle);
        }

        // Reassemble fragments when we host a matching registration;
        // otherwise fragments travel onward as they are.
        if bundle.is_fragment && !self.registrations.matching(&bundle.dest).is_empty() {
            match self.fragments.received_fragment(&bundle) {
                Ok(Some(whole)) => {
                    info!(bundle = %whole, "reassembled");
                    self.events.post(Event::BundleInjected {
                        bundle: Box::new(whole),
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "reassembly failed"),
            }
            // The fragment itself has served its purpose.
            return;
        }

        if let Err(e) = self.store.put(&bundle) {
            error!(error = %e, bundle = %bundle, "store refused bundle");
            return;
        }

        self.deliver_locally(&bundle);

        let event = Event::BundleReceived {
            bundle: Box::new(bundle),
            link,
        };
        self.route_event(&event);
    }

    fn on_bundle_injected(&mut self, bundle: Bundle) {
        if let Err(e) = self.store.put(&bundle) {
            error!(error = %e, bundle = %bundle, "store refused bundle");
            return;
        }
        self.deliver_locally(&bundle);
        let event = Event::BundleInjected {
            bundle: Box::new(bundle),
        };
        self.route_event(&event);
    }

    fn on_receive_failed(&mut self, bundle: Bundle, reason: StatusReason) {
        warn!(bundle = %bundle, ?reason, "dropping unintelligible bundle");
        self.delete_with_report(bundle, reason);
    }

    /// Hand the bundle to every matching registration.
    fn deliver_locally(&mut self, bundle: &Bundle) {
        let mut delivered = Vec::new();
        for reg in self.registrations.matching(&bundle.dest) {
            if reg.deliver_bundle(bundle) {
                delivered.push(reg.id);
            }
        }
        for reg_id in delivered {
            if bundle.delivery_rcpt {
                self.send_status_report(bundle, STATUS_DELIVERED, StatusReason::NoAdditionalInfo);
            }
            self.events.post(Event::BundleDelivered {
                id: bundle.id,
                reg_id,
            });
        }
    }

    fn on_bundle_send(&mut self, id: BundleId, link_name: &str) {
        let Some(link) = self.contacts.get(link_name) else {
            return;
        };
        if link.queue().contains(id) || link.in_flight().contains(&id) {
            return;
        }
        let Ok(Some(mut bundle)) = self.store.get(id) else {
            return;
        };

        // Oversized bundles split before they queue.
        if self.config.max_bundle_payload > 0
            && bundle.payload.len() > self.config.max_bundle_payload
            && !bundle.do_not_fragment
        {
            match self
                .fragments
                .proactive_fragment(&bundle, self.config.max_bundle_payload)
            {
                Ok(frags) => {
                    info!(bundle = %bundle, count = frags.len(), "fragmenting for transmission");
                    for frag in frags {
                        if self.store.put(&frag).is_ok() {
                            self.events.post(Event::BundleSend {
                                id: frag.id,
                                link: link_name.to_string(),
                            });
                        }
                    }
                    self.try_delete(id);
                    return;
                }
                Err(e) => warn!(error = %e, "proactive fragmentation failed"),
            }
        }

        let link = self.contacts.get_mut(link_name).expect("checked above");
        let remote = link.remote_eid.clone();
        link.enqueue(id);
        debug!(bundle = %bundle, link = link_name, "queued for transmission");

        if !remote.is_null() {
            bundle.fwd_log.add(remote, ForwardAction::ForwardAttempted);
            let _ = self.store.put(&bundle);
        }

        // Queue growth can tip an open link into BUSY.
        let link = self.contacts.get_mut(link_name).expect("checked above");
        if link.state() == LinkState::Open && link.over_busy_threshold() {
            let _ = link.set_state(LinkState::Busy);
        }
        let state = link.state();
        if state == LinkState::Available {
            self.open_link(link_name);
        }
    }

    fn on_bundle_transmitted(&mut self, id: BundleId, link_name: &str, bytes: u64, reliably: bool) {
        self.contacts.note_activity(link_name);
        if let Some(link) = self.contacts.get_mut(link_name) {
            link.clear_in_flight(id);
            link.stats.bundles_transmitted += 1;
            link.stats.bytes_transmitted += bytes;
            if link.state() == LinkState::Busy && !link.over_busy_threshold() {
                let _ = link.set_state(LinkState::Open);
            }
        }

        if let Ok(Some(mut bundle)) = self.store.get(id) {
            if let Some(link) = self.contacts.get(link_name) {
                if !link.remote_eid.is_null() {
                    bundle
                        .fwd_log
                        .add(link.remote_eid.clone(), ForwardAction::Transmitted);
                }
            }
            if bundle.forward_rcpt {
                self.send_status_report(&bundle, STATUS_FORWARDED, StatusReason::NoAdditionalInfo);
            }
            let _ = self.store.put(&bundle);
            debug!(bundle = %bundle, link = link_name, bytes, reliably, "transmitted");
        }

        self.try_delete(id);
    }

    fn on_bundle_expired(&mut self, id: BundleId) {
        self.route_event(&Event::BundleExpired { id });
        if let Ok(Some(bundle)) = self.store.get(id) {
            info!(bundle = %bundle, "expired");
            // Pull it off any link queues before deletion.
            for link in self.contacts.links() {
                link.queue().remove(id);
            }
            self.delete_with_report(bundle, StatusReason::LifetimeExpired);
        }
    }

    /// Delete a bundle that is going away abnormally, reporting if the
    /// source asked for deletion reports.
    fn delete_with_report(&mut self, bundle: Bundle, reason: StatusReason) {
        if bundle.deletion_rcpt && !bundle.source.is_null() {
            self.send_status_report(&bundle, STATUS_DELETED, reason);
        }
        let _ = self.store.del(bundle.id);
    }

    /// Delete when nothing references the bundle any more: no queue,
    /// nothing in flight, no custody, and the router concurs.
    fn try_delete(&mut self, id: BundleId) {
        let Ok(Some(bundle)) = self.store.get(id) else {
            return;
        };
        if bundle.local_custody {
            return;
        }
        if !self.router.can_delete_bundle(&bundle) {
            return;
        }
        for link in self.contacts.links() {
            if link.queue().contains(id) || link.in_flight().contains(&id) {
                return;
            }
        }
        debug!(bundle = %bundle, "deleting");
        let _ = self.store.del(id);
    }

    // ------------------------------------------------------------------
    // Custody and status reports
    // ------------------------------------------------------------------

    fn accept_custody(&mut self, bundle: &mut Bundle) {
        let previous = bundle.custodian.clone();
        bundle.custodian = self.config.local_eid.clone();
        bundle.local_custody = true;
        info!(bundle = %bundle, "custody accepted");

        if bundle.custody_rcpt {
            self.send_status_report(bundle, STATUS_CUSTODY_ACCEPTED, StatusReason::NoAdditionalInfo);
        }
        if !previous.is_null() {
            let signal = CustodySignal::about(bundle, true, CustodyReason::NoAdditionalInfo);
            let report = status::admin_bundle(
                &self.config.local_eid,
                previous,
                signal.encode(),
                bundle.expiration.max(60),
            );
            self.events.post(Event::BundleInjected {
                bundle: Box::new(report),
            });
        }
    }

    fn send_status_report(&mut self, orig: &Bundle, flags: u8, reason: StatusReason) {
        let dest = if !orig.replyto.is_null() {
            orig.replyto.clone()
        } else if !orig.source.is_null() {
            orig.source.clone()
        } else {
            return;
        };
        let report = StatusReport::about(orig, flags, reason);
        let bundle = status::admin_bundle(
            &self.config.local_eid,
            dest,
            report.encode(),
            orig.expiration.max(60),
        );
        debug!(about = %orig, flags, "status report generated");
        self.events.post(Event::BundleInjected {
            bundle: Box::new(bundle),
        });
    }

    // ------------------------------------------------------------------
    // Links and contacts
    // ------------------------------------------------------------------

    /// Start a convergence-layer session for an AVAILABLE link.
    fn open_link(&mut self, name: &str) {
        let Some(link) = self.contacts.get(name) else {
            return;
        };
        if link.state() != LinkState::Available {
            return;
        }
        let Some(addr) = link.remote_addr else {
            warn!(link = name, "cannot open link with no remote address");
            return;
        };
        let queue = link.queue();
        self.contacts.contact_opening(name);
        info!(link = name, %addr, "opening contact");
        self.cl.open_contact(name.to_string(), addr, queue);
    }

    fn on_link_available(&mut self, name: &str) {
        {
            let Some(link) = self.contacts.get_mut(name) else {
                return;
            };
            if link.state() == LinkState::Unavailable {
                let _ = link.set_state(LinkState::Available);
            }
        }
        let (link_type, pending) = {
            let link = self.contacts.get(name).expect("checked above");
            (link.link_type, link.pending())
        };
        // ALWAYSON links reopen eagerly; ONDEMAND only with traffic.
        match link_type {
            LinkType::AlwaysOn => self.open_link(name),
            LinkType::OnDemand if pending > 0 => self.open_link(name),
            _ => {}
        }
        self.route_event(&Event::LinkAvailable {
            link: name.to_string(),
        });
    }

    fn on_contact_up(&mut self, name: &str, handle: SessionHandle) {
        self.contacts.contact_up(name, Some(handle.clone()));
        self.route_event(&Event::ContactUp {
            link: name.to_string(),
            handle,
        });
    }

    fn on_opportunistic_contact(
        &mut self,
        name: String,
        addr: SocketAddr,
        queue: BundleQueue,
        handle: SessionHandle,
    ) {
        if self.contacts.get(&name).is_none() {
            let mut link = Link::new(
                &name,
                LinkType::Opportunistic,
                EndpointId::null(),
                Some(addr),
                self.config.link_params(),
            );
            link.adopt_queue(queue);
            let _ = link.set_state(LinkState::Available);
            self.contacts.add_link(link);
            self.contacts.contact_opening(&name);
        }
        self.on_contact_up(&name, handle);
    }

    fn on_contact_down(
        &mut self,
        name: &str,
        reason: ContactDownReason,
        inflight: Vec<(BundleId, u64)>,
    ) {
        // Salvage whatever was on the wire, back to front so that
        // push_front preserves FIFO order.
        for (id, payload_acked) in inflight.into_iter().rev() {
            if let Some(link) = self.contacts.get_mut(name) {
                link.clear_in_flight(id);
            }
            let Ok(Some(bundle)) = self.store.get(id) else {
                continue;
            };
            let salvage = self.config.reactive_frag_enabled && payload_acked > 0;
            if salvage {
                match self.fragments.reactive_fragment(&bundle, payload_acked) {
                    Ok(Some(tail)) => {
                        info!(bundle = %bundle, payload_acked, "re-queueing unsent tail");
                        if self.store.put(&tail).is_ok() {
                            if let Some(link) = self.contacts.get(name) {
                                link.queue().push_front(tail.id);
                            }
                        }
                        let _ = self.store.del(id);
                        continue;
                    }
                    Ok(None) => continue, // fully delivered after all
                    Err(e) => warn!(error = %e, "reactive fragmentation failed"),
                }
            }
            if let Some(link) = self.contacts.get(name) {
                link.queue().push_front(id);
            }
        }

        let _ = self.contacts.contact_down(name, reason);
        self.route_event(&Event::ContactDown {
            link: name.to_string(),
            reason,
            inflight: Vec::new(),
        });

        // Opportunistic inbound links disappear with their session.
        let opportunistic = self
            .contacts
            .get(name)
            .map(|l| l.link_type == LinkType::Opportunistic)
            .unwrap_or(false);
        if opportunistic {
            self.contacts.del_link(name);
        }
    }

    fn on_link_state_change_request(&mut self, name: &str, state: LinkState) {
        match state {
            LinkState::Closing => {
                let Some(link) = self.contacts.get_mut(name) else {
                    return;
                };
                if link.set_state(LinkState::Closing).is_ok() {
                    if let Some(contact) = self.contacts.contact(name) {
                        if let Some(session) = &contact.session {
                            session.close();
                        }
                    }
                }
            }
            LinkState::Open | LinkState::Opening => self.open_link(name),
            LinkState::Available => self.on_link_available(name),
            other => {
                if let Some(link) = self.contacts.get_mut(name) {
                    if let Err(e) = link.set_state(other) {
                        warn!(link = name, error = %e, "state change request refused");
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn on_tick(&mut self) {
        let now = dtn_now();
        if let Ok(ids) = self.store.iterate() {
            for id in ids {
                if let Ok(Some(bundle)) = self.store.get(id) {
                    if bundle.is_expired(now) {
                        self.events.post(Event::BundleExpired { id });
                    }
                }
            }
        }
        self.fragments.expire(now);
        self.contacts.close_idle_links();
        self.route_event(&Event::Tick);
    }
}
