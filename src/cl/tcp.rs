//! TCP convergence layer
//!
//! Byte-framed session over a stream transport. Both sides exchange a
//! contact header immediately after connection; afterwards the stream
//! carries one-byte-typed messages: bundle data with a declared
//! length, cumulative in-band acknowledgements, keepalives, and an
//! advisory shutdown. A broken transport mid-bundle triggers reactive
//! fragmentation on both ends when negotiated.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitflags::bitflags;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::ClError;
use crate::bundle::{format_bundle, BundleParser, BlockProcessorRegistry, XmitContext};
use crate::daemon::{ContactDownReason, Event, EventSender};
use crate::eid::EndpointId;
use crate::link::BundleQueue;
use crate::sdnv;
use crate::store::BundleStore;
use crate::types::BundleId;

/// "dtn!" in ASCII.
pub const MAGIC: u32 = 0x6474_6e21;
pub const TCPCL_VERSION: u8 = 3;

const TYPE_BUNDLE_DATA: u8 = 0x1;
const TYPE_BUNDLE_ACK: u8 = 0x2;
const TYPE_KEEPALIVE: u8 = 0x3;
const TYPE_SHUTDOWN: u8 = 0x4;

/// Read/write chunk for bundle bodies.
const SEGMENT_LEN: usize = 32 * 1024;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const BUNDLE_ACK_ENABLED   = 1 << 0;
        const REACTIVE_FRAG_ENABLED = 1 << 1;
        const RECEIVER_CONNECT     = 1 << 2;
    }
}

/// Contact header, exchanged both directions at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactHeader {
    pub flags: HeaderFlags,
    pub keepalive_interval: u16,
    pub partial_ack_len: u64,
}

impl ContactHeader {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(8 + sdnv::MAX_LENGTH);
        buf.extend_from_slice(&MAGIC.to_be_bytes());
        buf.push(TCPCL_VERSION);
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.keepalive_interval.to_be_bytes());
        sdnv::append(self.partial_ack_len, &mut buf);
        w.write_all(&buf).await?;
        w.flush().await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self, ClError> {
        let mut fixed = [0u8; 8];
        r.read_exact(&mut fixed).await?;
        let magic = u32::from_be_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        if magic != MAGIC {
            return Err(ClError::BadMagic(magic));
        }
        let version = fixed[4];
        if version != TCPCL_VERSION {
            return Err(ClError::VersionMismatch(version, TCPCL_VERSION));
        }
        let flags = HeaderFlags::from_bits_truncate(fixed[5]);
        let keepalive_interval = u16::from_be_bytes([fixed[6], fixed[7]]);
        let partial_ack_len = read_sdnv(r).await?;
        Ok(Self {
            flags,
            keepalive_interval,
            partial_ack_len,
        })
    }

    /// MIN on numeric fields, AND on flags.
    pub fn negotiate(&self, theirs: &ContactHeader) -> SessionParams {
        let flags = self.flags & theirs.flags;
        SessionParams {
            keepalive_interval: self.keepalive_interval.min(theirs.keepalive_interval),
            partial_ack_len: self.partial_ack_len.min(theirs.partial_ack_len).max(1),
            ack_enabled: flags.contains(HeaderFlags::BUNDLE_ACK_ENABLED),
            reactive_frag: flags.contains(HeaderFlags::REACTIVE_FRAG_ENABLED),
        }
    }
}

/// Result of contact-header negotiation.
#[derive(Debug, Clone, Copy)]
pub struct SessionParams {
    pub keepalive_interval: u16,
    pub partial_ack_len: u64,
    pub ack_enabled: bool,
    pub reactive_frag: bool,
}

/// Read one SDNV off a stream, byte by byte.
async fn read_sdnv<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64, ClError> {
    let mut buf = [0u8; sdnv::MAX_LENGTH];
    for i in 0..sdnv::MAX_LENGTH {
        buf[i] = r.read_u8().await?;
        if buf[i] & 0x80 == 0 {
            return sdnv::decode(&buf[..=i])
                .map(|(v, _)| v)
                .map_err(|e| ClError::Protocol(e.to_string()));
        }
    }
    Err(ClError::Protocol("oversized SDNV on wire".into()))
}

/// Handle the daemon uses to ask a session to shut down gracefully.
#[derive(Clone, Default)]
pub struct SessionHandle {
    close: Arc<Notify>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request SHUTDOWN + teardown; tolerates the session being gone.
    /// The permit is stored, so a close between select polls is not
    /// lost.
    pub fn close(&self) {
        self.close.notify_one();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionHandle")
    }
}

/// One bundle on the wire awaiting acknowledgement.
struct Inflight {
    local_id: u64,
    bundle_id: BundleId,
    /// Total serialised length, declared in BUNDLE_DATA.
    total: u64,
    /// Payload bytes sit at the tail of the serialised bundle.
    payload_len: u64,
    acked: u64,
}

#[derive(Default)]
struct SendState {
    inflight: Vec<Inflight>,
    next_local_id: u64,
}

impl SendState {
    fn begin(&mut self, bundle_id: BundleId, total: u64, payload_len: u64) -> u64 {
        self.next_local_id += 1;
        self.inflight.push(Inflight {
            local_id: self.next_local_id,
            bundle_id,
            total,
            payload_len,
            acked: 0,
        });
        self.next_local_id
    }

    /// Apply a cumulative ack. `Err` on a non-monotonic value,
    /// `Ok(Some(bundle_id))` when the bundle is fully acked.
    fn apply_ack(&mut self, local_id: u64, acked: u64) -> Result<Option<(BundleId, u64)>, String> {
        let Some(pos) = self.inflight.iter().position(|i| i.local_id == local_id) else {
            return Err(format!("ack for unknown bundle id {}", local_id));
        };
        let entry = &mut self.inflight[pos];
        if acked < entry.acked {
            return Err(format!(
                "ack regressed from {} to {}",
                entry.acked, acked
            ));
        }
        if acked > entry.total {
            return Err(format!(
                "acked {} beyond declared length {}",
                acked, entry.total
            ));
        }
        entry.acked = acked;
        if acked == entry.total {
            let done = self.inflight.remove(pos);
            return Ok(Some((done.bundle_id, done.total)));
        }
        Ok(None)
    }

    /// Unfinished bundles with their acked payload byte counts, for
    /// requeueing or reactive fragmentation after a break.
    fn drain_unacked(&mut self) -> Vec<(BundleId, u64)> {
        self.inflight
            .drain(..)
            .map(|i| {
                let header_len = i.total - i.payload_len;
                (i.bundle_id, i.acked.saturating_sub(header_len))
            })
            .collect()
    }
}

enum WriterCmd {
    SendAck { local_id: u64, acked: u64 },
    PeerShutdown,
    Fail,
}

/// Shared per-convergence-layer configuration and handles.
pub struct TcpConvergenceLayer {
    pub local_eid: EndpointId,
    pub keepalive_interval: u16,
    pub partial_ack_len: u64,
    pub reactive_frag: bool,
    pub pipelining: bool,
    pub prevhop_hdr: bool,
    events: EventSender,
    store: Arc<BundleStore>,
}

impl TcpConvergenceLayer {
    pub fn new(
        local_eid: EndpointId,
        events: EventSender,
        store: Arc<BundleStore>,
        keepalive_interval: u16,
        partial_ack_len: u64,
        reactive_frag: bool,
        pipelining: bool,
        prevhop_hdr: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_eid,
            keepalive_interval,
            partial_ack_len,
            reactive_frag,
            pipelining,
            prevhop_hdr,
            events,
            store,
        })
    }

    fn local_header(&self) -> ContactHeader {
        let mut flags = HeaderFlags::BUNDLE_ACK_ENABLED;
        if self.reactive_frag {
            flags |= HeaderFlags::REACTIVE_FRAG_ENABLED;
        }
        ContactHeader {
            flags,
            keepalive_interval: self.keepalive_interval,
            partial_ack_len: self.partial_ack_len,
        }
    }

    /// Accept inbound sessions forever. Each one becomes an
    /// opportunistic contact announced to the daemon.
    pub async fn listen(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "tcp convergence layer listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "inbound connection");
            let cl = self.clone();
            tokio::spawn(async move {
                let link = format!("tcp-in:{}", peer);
                let queue = BundleQueue::new();
                cl.run_session(stream, link, queue, true, Some(peer)).await;
            });
        }
    }

    /// Dial a peer and run the session; called when the daemon opens
    /// a link. Failures post ContactDown so the backoff machinery
    /// reschedules.
    pub fn open_contact(self: &Arc<Self>, link: String, addr: SocketAddr, queue: BundleQueue) {
        let cl = self.clone();
        tokio::spawn(async move {
            match timeout(Duration::from_secs(30), TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    cl.run_session(stream, link, queue, false, None).await;
                }
                Ok(Err(e)) => {
                    warn!(link = %link, error = %e, "connect failed");
                    cl.events.post(Event::ContactDown {
                        link,
                        reason: ContactDownReason::Broken,
                        inflight: Vec::new(),
                    });
                }
                Err(_) => {
                    warn!(link = %link, "connect timed out");
                    cl.events.post(Event::ContactDown {
                        link,
                        reason: ContactDownReason::Broken,
                        inflight: Vec::new(),
                    });
                }
            }
        });
    }

    /// Full session lifecycle on an established transport.
    pub async fn run_session<S>(
        self: Arc<Self>,
        stream: S,
        link: String,
        queue: BundleQueue,
        inbound: bool,
        peer: Option<SocketAddr>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut rd, mut wr) = tokio::io::split(stream);

        // Contact headers cross immediately in both directions.
        let ours = self.local_header();
        if let Err(e) = ours.write(&mut wr).await {
            warn!(link = %link, error = %e, "header write failed");
            self.post_down(&link, ContactDownReason::Broken, Vec::new());
            return;
        }
        let theirs = match timeout(Duration::from_secs(30), ContactHeader::read(&mut rd)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => {
                warn!(link = %link, error = %e, "bad contact header");
                self.post_down(&link, ContactDownReason::Broken, Vec::new());
                return;
            }
            Err(_) => {
                warn!(link = %link, "contact header timed out");
                self.post_down(&link, ContactDownReason::Timeout, Vec::new());
                return;
            }
        };
        let params = ours.negotiate(&theirs);
        info!(
            link = %link,
            keepalive = params.keepalive_interval,
            partial_ack = params.partial_ack_len,
            acks = params.ack_enabled,
            "contact established"
        );

        let handle = SessionHandle::new();
        if inbound {
            self.events.post(Event::OpportunisticContact {
                link: link.clone(),
                addr: peer.unwrap_or_else(|| ([0, 0, 0, 0], 0).into()),
                queue: queue.clone(),
                handle: handle.clone(),
            });
        } else {
            self.events.post(Event::ContactUp {
                link: link.clone(),
                handle: handle.clone(),
            });
        }

        let send_state = Arc::new(Mutex::new(SendState::default()));
        let ack_progress = Arc::new(Notify::new());
        let down_reason = Arc::new(Mutex::new(None::<ContactDownReason>));
        let (cmd_tx, cmd_rx) = mpsc::channel::<WriterCmd>(32);

        let reader = {
            let cl = self.clone();
            let link = link.clone();
            let send_state = send_state.clone();
            let ack_progress = ack_progress.clone();
            let down_reason = down_reason.clone();
            tokio::spawn(async move {
                let r = cl
                    .reader_loop(&mut rd, &link, params, cmd_tx, send_state, ack_progress)
                    .await;
                if let Err(reason) = r {
                    down_reason.lock().expect("reason lock").get_or_insert(reason);
                }
            })
        };

        let writer_reason = self
            .writer_loop(&mut wr, &link, params, cmd_rx, &queue, &send_state, &ack_progress, &handle)
            .await;

        reader.abort();
        let _ = reader.await;

        let reason = down_reason
            .lock()
            .expect("reason lock")
            .take()
            .or(writer_reason)
            .unwrap_or(ContactDownReason::Broken);

        let unacked = send_state.lock().expect("send state").drain_unacked();
        self.post_down(&link, reason, unacked);
    }

    fn post_down(&self, link: &str, reason: ContactDownReason, inflight: Vec<(BundleId, u64)>) {
        self.events.post(Event::ContactDown {
            link: link.to_string(),
            reason,
            inflight,
        });
    }

    /// Receive side: framed messages until error, shutdown or abort.
    async fn reader_loop<R: AsyncRead + Unpin>(
        &self,
        rd: &mut R,
        link: &str,
        params: SessionParams,
        cmd_tx: mpsc::Sender<WriterCmd>,
        send_state: Arc<Mutex<SendState>>,
        ack_progress: Arc<Notify>,
    ) -> Result<(), ContactDownReason> {
        // Silence past twice the keepalive interval breaks the contact.
        let idle_limit = if params.keepalive_interval == 0 {
            Duration::from_secs(3600)
        } else {
            Duration::from_secs(2 * params.keepalive_interval as u64)
        };

        loop {
            let typecode = match timeout(idle_limit, rd.read_u8()).await {
                Ok(Ok(t)) => t,
                Ok(Err(e)) => {
                    debug!(link, error = %e, "read failed");
                    let _ = cmd_tx.send(WriterCmd::Fail).await;
                    return Err(ContactDownReason::Broken);
                }
                Err(_) => {
                    warn!(link, "keepalive timeout");
                    let _ = cmd_tx.send(WriterCmd::Fail).await;
                    return Err(ContactDownReason::Timeout);
                }
            };

            match typecode {
                TYPE_BUNDLE_DATA => {
                    self.recv_bundle(rd, link, params, &cmd_tx, idle_limit)
                        .await?;
                }
                TYPE_BUNDLE_ACK => {
                    let local_id = read_sdnv(rd).await.map_err(|_| ContactDownReason::Broken)?;
                    let acked = read_sdnv(rd).await.map_err(|_| ContactDownReason::Broken)?;
                    // The guard must not live across an await point.
                    let result = send_state
                        .lock()
                        .expect("send state")
                        .apply_ack(local_id, acked);
                    match result {
                        Ok(Some((bundle_id, bytes))) => {
                            self.events.post(Event::BundleTransmitted {
                                id: bundle_id,
                                link: link.to_string(),
                                bytes_sent: bytes,
                                reliably: true,
                            });
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(link, error = %e, "protocol error in ack");
                            let _ = cmd_tx.send(WriterCmd::Fail).await;
                            return Err(ContactDownReason::Broken);
                        }
                    }
                    ack_progress.notify_one();
                }
                TYPE_KEEPALIVE => {
                    debug!(link, "keepalive");
                }
                TYPE_SHUTDOWN => {
                    info!(link, "peer shutdown");
                    let _ = cmd_tx.send(WriterCmd::PeerShutdown).await;
                    return Err(ContactDownReason::Shutdown);
                }
                other => {
                    warn!(link, typecode = other, "unknown typecode");
                    let _ = cmd_tx.send(WriterCmd::Fail).await;
                    return Err(ContactDownReason::Broken);
                }
            }
        }
    }

    /// One BUNDLE_DATA frame: declared length, streamed through the
    /// parser, partial acks on the way.
    async fn recv_bundle<R: AsyncRead + Unpin>(
        &self,
        rd: &mut R,
        link: &str,
        params: SessionParams,
        cmd_tx: &mpsc::Sender<WriterCmd>,
        idle_limit: Duration,
    ) -> Result<(), ContactDownReason> {
        let local_id = read_sdnv(rd).await.map_err(|_| ContactDownReason::Broken)?;
        let total = read_sdnv(rd).await.map_err(|_| ContactDownReason::Broken)?;

        let mut parser = BundleParser::new();
        let mut received: u64 = 0;
        let mut last_ack: u64 = 0;
        let mut buf = vec![0u8; SEGMENT_LEN];

        while received < total {
            let want = ((total - received) as usize).min(buf.len());
            let n = match timeout(idle_limit, rd.read(&mut buf[..want])).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => {
                    // Transport died mid-bundle: salvage what arrived.
                    self.salvage_partial(parser, link);
                    let _ = cmd_tx.send(WriterCmd::Fail).await;
                    return Err(ContactDownReason::Broken);
                }
                Ok(Ok(n)) => n,
            };

            let consumed = match parser.consume(&buf[..n]) {
                Ok(c) => c,
                Err(e) => {
                    warn!(link, error = %e, "unparseable bundle data");
                    let _ = cmd_tx.send(WriterCmd::Fail).await;
                    return Err(ContactDownReason::Broken);
                }
            };
            if consumed != n {
                warn!(link, "bundle ended before declared length");
                let _ = cmd_tx.send(WriterCmd::Fail).await;
                return Err(ContactDownReason::Broken);
            }
            received += n as u64;

            // The final ack after the loop covers the last stretch.
            if params.ack_enabled
                && received < total
                && received - last_ack >= params.partial_ack_len
            {
                last_ack = received;
                let _ = cmd_tx
                    .send(WriterCmd::SendAck {
                        local_id,
                        acked: received,
                    })
                    .await;
            }
        }

        if !parser.is_complete() {
            warn!(link, "declared length reached but bundle incomplete");
            let _ = cmd_tx.send(WriterCmd::Fail).await;
            return Err(ContactDownReason::Broken);
        }

        if params.ack_enabled {
            let _ = cmd_tx
                .send(WriterCmd::SendAck {
                    local_id,
                    acked: total,
                })
                .await;
        }

        match parser.finish() {
            Ok(parsed) => {
                debug!(link, bundle = %parsed.bundle, "bundle received");
                self.events.post(Event::BundleReceived {
                    bundle: Box::new(parsed.bundle),
                    link: Some(link.to_string()),
                });
            }
            Err((bundle, reason)) => {
                warn!(link, ?reason, "bundle failed validation");
                self.events.post(Event::ReceiveFailed {
                    bundle: Box::new(bundle),
                    reason,
                });
            }
        }
        Ok(())
    }

    /// Turn a half-received bundle into a received-fragment covering
    /// the bytes that did arrive.
    fn salvage_partial(&self, parser: BundleParser, link: &str) {
        if !self.reactive_frag {
            return;
        }
        let declared = parser.payload_declared();
        let got = parser.payload_received();
        if got == 0 {
            return;
        }
        let Some(declared) = declared else { return };
        let mut partial = parser.into_partial();
        if partial.source.is_null() {
            return; // primary never finished parsing
        }
        if !partial.is_fragment {
            partial.is_fragment = true;
            partial.orig_length = declared;
            // frag_offset stays 0: we hold the head of the payload.
        }
        info!(link, bundle = %partial, got, "holding partial bundle as fragment");
        self.events.post(Event::BundleReceived {
            bundle: Box::new(partial),
            link: Some(link.to_string()),
        });
    }

    /// Transmit side: queue-driven bundle sends, acks requested by the
    /// reader, keepalives, graceful shutdown.
    #[allow(clippy::too_many_arguments)]
    async fn writer_loop<W: AsyncWrite + Unpin>(
        &self,
        wr: &mut W,
        link: &str,
        params: SessionParams,
        mut cmd_rx: mpsc::Receiver<WriterCmd>,
        queue: &BundleQueue,
        send_state: &Arc<Mutex<SendState>>,
        ack_progress: &Arc<Notify>,
        handle: &SessionHandle,
    ) -> Option<ContactDownReason> {
        let registry = BlockProcessorRegistry::new();
        let keepalive = if params.keepalive_interval == 0 {
            Duration::from_secs(3600)
        } else {
            Duration::from_secs(params.keepalive_interval as u64)
        };
        let mut keepalive_timer = tokio::time::interval(keepalive);
        keepalive_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        keepalive_timer.reset();

        loop {
            // Without pipelining the previous bundle must be fully
            // acked before the next leaves the queue.
            let may_send = self.pipelining
                || !params.ack_enabled
                || send_state.lock().expect("send state").inflight.is_empty();

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(WriterCmd::SendAck { local_id, acked }) => {
                        if let Err(e) = self.write_ack(wr, local_id, acked).await {
                            debug!(link, error = %e, "ack write failed");
                            return Some(ContactDownReason::Broken);
                        }
                    }
                    Some(WriterCmd::PeerShutdown) => return Some(ContactDownReason::Shutdown),
                    Some(WriterCmd::Fail) | None => return Some(ContactDownReason::Broken),
                },
                id = queue.pop(), if may_send => {
                    match self.send_bundle(wr, link, id, params, &registry, send_state).await {
                        Ok(()) => keepalive_timer.reset(),
                        Err(e) => {
                            debug!(link, error = %e, "bundle write failed");
                            queue.push_front(id);
                            return Some(ContactDownReason::Broken);
                        }
                    }
                }
                _ = ack_progress.notified(), if !may_send => {
                    // Re-evaluate the send gate.
                }
                _ = keepalive_timer.tick() => {
                    if let Err(e) = wr.write_all(&[TYPE_KEEPALIVE]).await {
                        debug!(link, error = %e, "keepalive write failed");
                        return Some(ContactDownReason::Broken);
                    }
                    let _ = wr.flush().await;
                }
                _ = handle.close.notified() => {
                    let _ = wr.write_all(&[TYPE_SHUTDOWN]).await;
                    let _ = wr.flush().await;
                    info!(link, "sent shutdown");
                    return Some(ContactDownReason::UserClose);
                }
            }
        }
    }

    async fn write_ack<W: AsyncWrite + Unpin>(
        &self,
        wr: &mut W,
        local_id: u64,
        acked: u64,
    ) -> std::io::Result<()> {
        let mut buf = Vec::with_capacity(1 + 2 * sdnv::MAX_LENGTH);
        buf.push(TYPE_BUNDLE_ACK);
        sdnv::append(local_id, &mut buf);
        sdnv::append(acked, &mut buf);
        wr.write_all(&buf).await?;
        wr.flush().await
    }

    async fn send_bundle<W: AsyncWrite + Unpin>(
        &self,
        wr: &mut W,
        link: &str,
        id: BundleId,
        params: SessionParams,
        registry: &BlockProcessorRegistry,
        send_state: &Arc<Mutex<SendState>>,
    ) -> std::io::Result<()> {
        let Ok(Some(bundle)) = self.store.get(id) else {
            debug!(link, bundle_id = id, "queued bundle no longer in store");
            return Ok(());
        };
        let ctx = XmitContext {
            local_eid: self.local_eid.clone(),
            include_prevhop: self.prevhop_hdr,
        };
        let wire = match format_bundle(&bundle, &ctx, registry) {
            Ok(w) => w,
            Err(e) => {
                warn!(link, bundle = %bundle, error = %e, "cannot serialise bundle");
                return Ok(());
            }
        };

        let local_id = send_state.lock().expect("send state").begin(
            id,
            wire.len() as u64,
            bundle.payload.len(),
        );
        self.events.post(Event::BundleInflight {
            id,
            link: link.to_string(),
        });

        let mut head = Vec::with_capacity(1 + 2 * sdnv::MAX_LENGTH);
        head.push(TYPE_BUNDLE_DATA);
        sdnv::append(local_id, &mut head);
        sdnv::append(wire.len() as u64, &mut head);
        wr.write_all(&head).await?;
        for chunk in wire.chunks(SEGMENT_LEN) {
            wr.write_all(chunk).await?;
        }
        wr.flush().await?;
        debug!(link, bundle = %bundle, bytes = wire.len(), "bundle written");

        if !params.ack_enabled {
            // No acks coming: call it transmitted on write completion.
            let mut state = send_state.lock().expect("send state");
            state.inflight.retain(|i| i.local_id != local_id);
            drop(state);
            self.events.post(Event::BundleTransmitted {
                id,
                link: link.to_string(),
                bytes_sent: wire.len() as u64,
                reliably: false,
            });
        }
        Ok(())
    }
}
