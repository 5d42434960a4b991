//! DTLSR: delay-tolerant link-state routing
//!
//! Each node floods link-state announcements describing its outbound
//! edges; every node maintains a multigraph of the learned topology
//! and runs Dijkstra with a configurable edge-weight function to
//! install one next-hop route per destination node. LSAs ride in
//! ordinary bundles addressed to `dtn://*/dtlsr?lsa_seqno=N` so they
//! queue and forward through outages like any other traffic.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::bundle::{Bundle, CodecError, ForwardAction, Payload};
use crate::config::{Config, WeightFnKind};
use crate::daemon::{Event, EventSender};
use crate::eid::{EidPattern, EndpointId};
use crate::graph::{Edge, MultiGraph, INFINITY};
use crate::sdnv;
use crate::types::{now, BundleId};

use super::{forwarding_links, post_sends, RouteTable, Router, RouterCtx};

/// Service tag for announcement registrations and LSA destinations.
pub const ANNOUNCE_TAG: &str = "dtlsr";

/// First payload byte of an LSA bundle.
pub const MSG_LSA: u8 = 1;

/// Estimated-delay weight is capped at one day.
const MAX_ESTIMATED_DELAY: u32 = 86_400;

#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub last_lsa_seqno: u64,
    pub last_lsa_creation_ts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeParams {
    pub cost: u32,
    pub delay: u32,
    pub bw: u32,
    pub qcount: u32,
    pub qsize: u32,
    pub up: bool,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            cost: 100,
            delay: 10,
            bw: 65_536,
            qcount: 0,
            qsize: 0,
            up: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeInfo {
    /// Link name on the owning node; unique among its out-edges.
    pub id: String,
    pub params: EdgeParams,
    /// Wall-clock seconds when this edge was last refreshed by an LSA
    /// or local link event.
    pub last_update: u64,
    /// Edge to a local application endpoint: infinite bandwidth,
    /// zero delay.
    pub is_registration: bool,
}

impl EdgeInfo {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            params: EdgeParams::default(),
            last_update: now(),
            is_registration: false,
        }
    }

    fn registration(id: &str) -> Self {
        Self {
            id: id.to_string(),
            params: EdgeParams {
                cost: 0,
                delay: 0,
                bw: u32::MAX,
                qcount: 0,
                qsize: 0,
                up: true,
            },
            last_update: now(),
            is_registration: true,
        }
    }
}

pub type RoutingGraph = MultiGraph<NodeInfo, EdgeInfo>;

/// One edge announcement within an LSA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsaEdge {
    pub dest: String,
    pub id: String,
    pub params: EdgeParams,
}

/// A parsed link-state announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lsa {
    pub seqno: u64,
    pub edges: Vec<LsaEdge>,
}

impl Lsa {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.edges.len() * 32);
        out.push(MSG_LSA);
        sdnv::append(self.seqno, &mut out);
        sdnv::append(self.edges.len() as u64, &mut out);
        for e in &self.edges {
            sdnv::append(e.dest.len() as u64, &mut out);
            out.extend_from_slice(e.dest.as_bytes());
            sdnv::append(e.id.len() as u64, &mut out);
            out.extend_from_slice(e.id.as_bytes());
            sdnv::append(e.params.cost as u64, &mut out);
            sdnv::append(e.params.delay as u64, &mut out);
            sdnv::append(e.params.bw as u64, &mut out);
            sdnv::append(e.params.qcount as u64, &mut out);
            sdnv::append(e.params.qsize as u64, &mut out);
            sdnv::append(u64::from(e.params.up), &mut out);
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut pos = 0;
        let first = *buf.first().ok_or(CodecError::Incomplete)?;
        pos += 1;
        if first != MSG_LSA {
            return Err(CodecError::Malformed(format!(
                "unknown dtlsr message type {}",
                first
            )));
        }
        let mut read_sdnv = |pos: &mut usize| -> Result<u64, CodecError> {
            let (v, n) = sdnv::decode(&buf[*pos..])?;
            *pos += n;
            Ok(v)
        };
        let seqno = read_sdnv(&mut pos)?;
        let n_edges = read_sdnv(&mut pos)? as usize;
        // Each edge costs at least 8 bytes on the wire; reject counts
        // the buffer cannot possibly hold.
        if n_edges > buf.len() / 8 {
            return Err(CodecError::Malformed("LSA edge count implausible".into()));
        }
        let mut edges = Vec::with_capacity(n_edges);
        for _ in 0..n_edges {
            let dest = read_string(buf, &mut pos)?;
            let id = read_string(buf, &mut pos)?;
            let mut vals = [0u64; 6];
            for v in vals.iter_mut() {
                let (val, n) = sdnv::decode(&buf[pos..])?;
                pos += n;
                *v = val;
            }
            edges.push(LsaEdge {
                dest,
                id,
                params: EdgeParams {
                    cost: vals[0] as u32,
                    delay: vals[1] as u32,
                    bw: vals[2] as u32,
                    qcount: vals[3] as u32,
                    qsize: vals[4] as u32,
                    up: vals[5] != 0,
                },
            });
        }
        Ok(Self { seqno, edges })
    }
}

fn read_string(buf: &[u8], pos: &mut usize) -> Result<String, CodecError> {
    let (len, n) = sdnv::decode(&buf[*pos..])?;
    *pos += n;
    let len = len as usize;
    if buf.len() - *pos < len {
        return Err(CodecError::Incomplete);
    }
    let s = std::str::from_utf8(&buf[*pos..*pos + len])
        .map_err(|_| CodecError::Malformed("LSA string is not utf-8".into()))?;
    *pos += len;
    Ok(s.to_string())
}

/// Is this bundle a DTLSR announcement?
pub fn is_lsa_bundle(bundle: &Bundle) -> bool {
    bundle.dest.scheme() == "dtn"
        && bundle
            .dest
            .ssp()
            .strip_prefix("//*/")
            .map(|rest| rest == ANNOUNCE_TAG || rest.starts_with(&format!("{}?", ANNOUNCE_TAG)))
            .unwrap_or(false)
}

pub struct DtlsrRouter {
    table: RouteTable,
    graph: RoutingGraph,
    local: String,
    weight_fn: WeightFnKind,
    weight_shift: u32,
    lsa_interval: u64,
    min_lsa_interval: u64,
    lsa_lifetime: u64,
    keep_down_links: bool,
    /// Wall-clock time of the last LSA transmission.
    last_lsa_sent: u64,
    /// Deferred transmission to honour min_lsa_interval.
    lsa_due_at: Option<u64>,
    next_periodic_lsa: u64,
    /// The freshest LSA bundle per source node; these bundles stay
    /// pending so late-joining peers still get them.
    current_lsas: HashMap<String, BundleId>,
}

impl DtlsrRouter {
    pub fn new(config: &Config) -> Self {
        let local = config.local_eid.uri();
        let mut graph = RoutingGraph::new();
        graph.add_node(&local, NodeInfo::default());
        info!(local = %local, weight_fn = ?config.weight_fn, "dtlsr router up");
        Self {
            table: RouteTable::new(),
            graph,
            local,
            weight_fn: config.weight_fn,
            weight_shift: config.weight_shift,
            lsa_interval: config.lsa_interval,
            min_lsa_interval: config.min_lsa_interval,
            lsa_lifetime: config.lsa_lifetime,
            keep_down_links: config.keep_down_links,
            last_lsa_sent: 0,
            lsa_due_at: None,
            next_periodic_lsa: now() + config.lsa_interval,
            current_lsas: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &RoutingGraph {
        &self.graph
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Edge weight under the configured function; INFINITY excludes
    /// the edge from Dijkstra.
    fn edge_weight(&self, wall_now: u64, info: &EdgeInfo) -> u32 {
        match self.weight_fn {
            WeightFnKind::Cost => {
                if !info.params.up {
                    INFINITY
                } else {
                    info.params.cost
                }
            }
            WeightFnKind::Delay => {
                let silent = wall_now.saturating_sub(info.last_update);
                if !info.params.up
                    || (self.lsa_interval != 0 && silent > 2 * self.lsa_interval)
                {
                    INFINITY
                } else {
                    info.params.delay
                }
            }
            WeightFnKind::EstimatedDelay => {
                if !info.params.up {
                    let downtime = wall_now.saturating_sub(info.last_update) as u32;
                    ((downtime + 5) >> self.weight_shift).min(MAX_ESTIMATED_DELAY)
                } else {
                    let p = &info.params;
                    let bwdelay = if p.bw == 0 { 0 } else { p.qsize / p.bw };
                    (p.qcount + 1).saturating_mul(p.delay).saturating_add(bwdelay)
                }
            }
        }
    }

    /// Accept or reject an LSA by (seqno, creation_ts) lexicographic
    /// order; on acceptance the prior LSA bundle from the same source
    /// is released for deletion.
    fn update_current_lsa(
        &mut self,
        node_id: &str,
        bundle_id: BundleId,
        seqno: u64,
        creation_secs: u64,
        events: Option<&EventSender>,
    ) -> bool {
        let node = self.graph.add_node(node_id, NodeInfo::default());
        let fresh = (seqno, creation_secs)
            > (node.info.last_lsa_seqno, node.info.last_lsa_creation_ts)
            || (node.info.last_lsa_seqno == 0 && node.info.last_lsa_creation_ts == 0);
        if !fresh {
            debug!(
                node = node_id,
                seqno,
                last = node.info.last_lsa_seqno,
                "ignoring stale LSA"
            );
            return false;
        }
        node.info.last_lsa_seqno = seqno;
        node.info.last_lsa_creation_ts = creation_secs;

        if let Some(stale) = self.current_lsas.insert(node_id.to_string(), bundle_id) {
            if stale != bundle_id {
                debug!(node = node_id, stale, "superseded LSA released");
                if let Some(events) = events {
                    events.post_at_head(Event::BundleFree { id: stale });
                }
            }
        }
        true
    }

    /// Apply an accepted LSA's edges to the graph. Edges from the
    /// source that the LSA no longer mentions go DOWN, or away
    /// entirely when keep_down_links is off.
    fn apply_lsa_edges(&mut self, source: &str, lsa: &Lsa) {
        let wall = now();
        for e in &lsa.edges {
            if !self.graph.has_node(&e.dest) {
                self.graph.add_node(&e.dest, NodeInfo::default());
            }
            let updated = self
                .graph
                .find_edge_mut(source, |edge| edge.info.id == e.id)
                .map(|edge| {
                    edge.info.params = e.params;
                    edge.info.last_update = wall;
                    edge.to = e.dest.clone();
                })
                .is_some();
            if !updated {
                let mut info = EdgeInfo::new(&e.id);
                info.params = e.params;
                info.last_update = wall;
                self.graph.add_edge(source, &e.dest, info);
            }
        }

        let mentioned: Vec<&str> = lsa.edges.iter().map(|e| e.id.as_str()).collect();
        if self.keep_down_links {
            if let Some(node) = self.graph.find_node_mut(source) {
                for edge in node.out_edges.iter_mut() {
                    if !mentioned.contains(&edge.info.id.as_str()) {
                        edge.info.params.up = false;
                    }
                }
            }
        } else {
            self.graph
                .del_edges(source, |edge| !mentioned.contains(&edge.info.id.as_str()));
        }
    }

    /// Full route recomputation: flush all dynamic entries and rebuild
    /// one next-hop entry per reachable destination node.
    fn recompute_routes(&mut self, ctx: &mut RouterCtx<'_>) {
        let wall = now();
        self.table.flush_dynamic();

        let dests: Vec<String> = self
            .graph
            .nodes()
            .filter(|n| n.id != self.local)
            .map(|n| n.id.clone())
            .collect();

        for dest in dests {
            let Some(hop) = self
                .graph
                .best_next_hop(&self.local, &dest, |e| self.edge_weight(wall, &e.info))
            else {
                continue;
            };
            // Registration edges have no link in the contact manager.
            if hop.info.is_registration || ctx.contacts.get(&hop.info.id).is_none() {
                continue;
            }
            match EidPattern::parse(&format!("{}*", dest)) {
                Ok(pattern) => self.table.add(pattern, &hop.info.id, true),
                Err(e) => warn!(dest = %dest, error = %e, "bad destination pattern"),
            }
        }
        debug!(routes = self.table.len(), "routes recomputed");

        self.reroute_pending(ctx);
    }

    fn reroute_pending(&self, ctx: &mut RouterCtx<'_>) {
        let Ok(ids) = ctx.store.iterate() else {
            return;
        };
        for id in ids {
            if let Ok(Some(bundle)) = ctx.store.get(id) {
                self.route_bundle(&bundle, ctx);
            }
        }
    }

    /// LSAs flood everywhere except back where they came from; data
    /// bundles follow the route table.
    fn route_bundle(&self, bundle: &Bundle, ctx: &mut RouterCtx<'_>) {
        let links = if is_lsa_bundle(bundle) {
            self.flooding_links(bundle, ctx)
        } else {
            forwarding_links(&self.table, bundle, ctx)
        };
        post_sends(bundle.id, &links, ctx);
    }

    fn flooding_links(&self, bundle: &Bundle, ctx: &RouterCtx<'_>) -> Vec<String> {
        ctx.contacts
            .links()
            .filter(|l| {
                !bundle.fwd_log.received_from(&l.remote_eid)
                    && !bundle.fwd_log.has(&l.remote_eid, ForwardAction::Suppressed)
                    && !bundle
                        .fwd_log
                        .has(&l.remote_eid, ForwardAction::ForwardAttempted)
            })
            .map(|l| l.name.clone())
            .collect()
    }

    /// A received announcement: supersession check, graph update,
    /// previous-hop suppression, recompute, onward flood.
    fn handle_lsa_bundle(&mut self, bundle: &Bundle, ctx: &mut RouterCtx<'_>) {
        if bundle.source == *ctx.local_eid {
            debug!("ignoring our own LSA echoed back");
            return;
        }
        let payload = match bundle.payload.read_all() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot read LSA payload");
                return;
            }
        };
        let lsa = match Lsa::decode(&payload) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "malformed LSA from {}", bundle.source);
                return;
            }
        };

        let source = bundle.source.uri();
        if !self.update_current_lsa(
            &source,
            bundle.id,
            lsa.seqno,
            bundle.creation_ts.secs,
            Some(ctx.events),
        ) {
            // Stale announcements are not forwarded anywhere.
            self.suppress_everywhere(bundle.id, ctx);
            return;
        }

        info!(source = %source, seqno = lsa.seqno, edges = lsa.edges.len(), "LSA accepted");
        self.apply_lsa_edges(&source, &lsa);

        // Never send an LSA back to the hop that delivered it; the
        // daemon recorded the receive entry before dispatching.
        self.recompute_routes(ctx);
        self.route_bundle(bundle, ctx);
    }

    fn suppress_everywhere(&self, id: BundleId, ctx: &mut RouterCtx<'_>) {
        if let Ok(Some(mut bundle)) = ctx.store.get(id) {
            for link in ctx.contacts.links() {
                bundle
                    .fwd_log
                    .add(link.remote_eid.clone(), ForwardAction::Suppressed);
            }
            if let Err(e) = ctx.store.put(&bundle) {
                warn!(error = %e, "failed to persist suppression entries");
            }
        }
    }

    /// Rate-limited LSA trigger: transmit now if the minimum interval
    /// has passed, otherwise leave one deferred transmission pending.
    fn schedule_lsa(&mut self, ctx: &mut RouterCtx<'_>) {
        let wall = now();
        if wall.saturating_sub(self.last_lsa_sent) >= self.min_lsa_interval {
            self.send_lsa(ctx);
        } else if self.lsa_due_at.is_none() {
            let due = self.last_lsa_sent + self.min_lsa_interval;
            debug!(due, "deferring LSA for rate limit");
            self.lsa_due_at = Some(due);
        }
    }

    fn send_lsa(&mut self, ctx: &mut RouterCtx<'_>) {
        let seqno = self
            .graph
            .find_node(&self.local)
            .map(|n| n.info.last_lsa_seqno + 1)
            .unwrap_or(1);

        let mut edges = Vec::new();
        if let Some(node) = self.graph.find_node(&self.local) {
            for edge in &node.out_edges {
                let mut params = edge.info.params;
                // Live queue occupancy comes from the link itself.
                if !edge.info.is_registration {
                    if let Some(link) = ctx.contacts.get(&edge.info.id) {
                        params.qcount = link.pending() as u32;
                        params.qsize = 0;
                    }
                }
                edges.push(LsaEdge {
                    dest: edge.to.clone(),
                    id: edge.info.id.clone(),
                    params,
                });
            }
        }

        let lsa = Lsa { seqno, edges };
        let dest = match EndpointId::parse(&format!(
            "dtn://*/{}?lsa_seqno={}",
            ANNOUNCE_TAG, seqno
        )) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "cannot build LSA destination");
                return;
            }
        };

        let mut bundle = Bundle::new(ctx.local_eid.clone(), dest, self.lsa_lifetime);
        bundle.singleton_dest = false;
        bundle.payload = Payload::in_memory(lsa.encode());

        info!(seqno, edges = lsa.edges.len(), "sending LSA");
        self.update_current_lsa(
            &self.local.clone(),
            bundle.id,
            seqno,
            bundle.creation_ts.secs,
            Some(ctx.events),
        );

        self.last_lsa_sent = now();
        self.lsa_due_at = None;
        ctx.events.post_at_head(Event::BundleInjected {
            bundle: Box::new(bundle),
        });
    }

    /// Find the local out-edge for a link, creating the peer node and
    /// edge as needed, and set its state.
    fn set_local_edge(&mut self, link_name: &str, ctx: &RouterCtx<'_>, up: bool) -> bool {
        let Some(link) = ctx.contacts.get(link_name) else {
            return false;
        };
        if link.remote_eid.is_null() {
            // Opportunistic inbound session with no known peer EID;
            // nothing to announce.
            return false;
        }
        let remote = link.remote_eid.uri();
        if !self.graph.has_node(&remote) {
            self.graph.add_node(&remote, NodeInfo::default());
        }
        let wall = now();
        let local = self.local.clone();
        let updated = self
            .graph
            .find_edge_mut(&local, |e| e.info.id == link_name)
            .map(|edge| {
                edge.info.params.up = up;
                edge.info.last_update = wall;
            })
            .is_some();
        if !updated {
            let mut info = EdgeInfo::new(link_name);
            info.params.up = up;
            self.graph.add_edge(&local, &remote, info);
        }
        true
    }
}

impl Router for DtlsrRouter {
    fn handle_event(&mut self, event: &Event, ctx: &mut RouterCtx<'_>) {
        match event {
            Event::BundleReceived { bundle, .. } => {
                if is_lsa_bundle(bundle) {
                    self.handle_lsa_bundle(bundle, ctx);
                } else {
                    self.route_bundle(bundle, ctx);
                }
            }
            Event::BundleInjected { bundle } => {
                self.route_bundle(bundle, ctx);
            }
            Event::ContactUp { link, .. } => {
                if self.set_local_edge(link, ctx, true) {
                    self.recompute_routes(ctx);
                    self.schedule_lsa(ctx);
                }
            }
            Event::ContactDown { link, .. } | Event::LinkUnavailable { link } => {
                let changed = self.set_local_edge(link, ctx, false);
                if changed && !self.keep_down_links {
                    self.graph.del_edges(&self.local, |e| e.info.id == *link);
                }
                if changed {
                    self.recompute_routes(ctx);
                    self.schedule_lsa(ctx);
                }
            }
            Event::LinkDeleted { link } => {
                self.graph.del_edges(&self.local, |e| e.info.id == *link);
                self.table.del_for_link(link);
                self.recompute_routes(ctx);
                self.schedule_lsa(ctx);
            }
            Event::RegistrationAdded { endpoint } => {
                // Endpoints already under the local EID are reachable
                // through the node itself; anything else gets its own
                // infinite-bandwidth edge.
                if endpoint.starts_with(&self.local) {
                    return;
                }
                if !self.graph.has_node(endpoint) {
                    self.graph.add_node(endpoint, NodeInfo::default());
                }
                let id = format!("reg-{}", endpoint);
                if self
                    .graph
                    .find_edge(&self.local, |e| e.info.id == id)
                    .is_none()
                {
                    self.graph
                        .add_edge(&self.local, endpoint, EdgeInfo::registration(&id));
                    self.schedule_lsa(ctx);
                }
            }
            Event::BundleExpired { id } => {
                // An expired current LSA just loses its retention.
                self.current_lsas.retain(|_, v| *v != *id);
            }
            Event::Tick => {
                let wall = now();
                if let Some(due) = self.lsa_due_at {
                    if wall >= due {
                        self.send_lsa(ctx);
                    }
                }
                if self.lsa_interval != 0 && wall >= self.next_periodic_lsa {
                    self.next_periodic_lsa = wall + self.lsa_interval;
                    self.send_lsa(ctx);
                }
            }
            _ => {}
        }
    }

    fn can_delete_bundle(&self, bundle: &Bundle) -> bool {
        !self.current_lsas.values().any(|&id| id == bundle.id)
    }

    fn routing_state(&self) -> String {
        let mut out = format!(
            "dtlsr: local {} nodes {} routes {}\n",
            self.local,
            self.graph.node_count(),
            self.table.len()
        );
        for node in self.graph.nodes() {
            out.push_str(&format!(
                "  {} (seqno {}):\n",
                node.id, node.info.last_lsa_seqno
            ));
            for Edge { to, info } in &node.out_edges {
                out.push_str(&format!(
                    "    -> {} via {} {} cost={} delay={}\n",
                    to,
                    info.id,
                    if info.params.up { "UP" } else { "DOWN" },
                    info.params.cost,
                    info.params.delay
                ));
            }
        }
        for e in self.table.entries() {
            out.push_str(&format!("  route {} -> {}\n", e.pattern, e.link));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lsa_with_edges(seqno: u64, ids: &[&str]) -> Lsa {
        Lsa {
            seqno,
            edges: ids
                .iter()
                .map(|id| LsaEdge {
                    dest: format!("dtn://{}.dtn", id),
                    id: id.to_string(),
                    params: EdgeParams::default(),
                })
                .collect(),
        }
    }

    fn router(keep_down_links: bool) -> DtlsrRouter {
        let mut config = Config::default();
        config.local_eid = EndpointId::parse("dtn://x.dtn").unwrap();
        config.keep_down_links = keep_down_links;
        DtlsrRouter::new(&config)
    }

    #[test]
    fn lsa_codec_round_trip() {
        let lsa = Lsa {
            seqno: 42,
            edges: vec![
                LsaEdge {
                    dest: "dtn://b.dtn".into(),
                    id: "link-b".into(),
                    params: EdgeParams {
                        cost: 7,
                        delay: 250,
                        bw: 9600,
                        qcount: 3,
                        qsize: 4096,
                        up: true,
                    },
                },
                LsaEdge {
                    dest: "dtn://c.dtn".into(),
                    id: "link-c".into(),
                    params: EdgeParams {
                        up: false,
                        ..EdgeParams::default()
                    },
                },
            ],
        };
        let wire = lsa.encode();
        assert_eq!(wire[0], MSG_LSA);
        assert_eq!(Lsa::decode(&wire).unwrap(), lsa);
    }

    #[test]
    fn lsa_decode_rejects_junk() {
        assert!(Lsa::decode(&[]).is_err());
        assert!(Lsa::decode(&[9, 1, 0]).is_err());
        // Implausible edge count.
        let mut wire = vec![MSG_LSA];
        sdnv::append(1, &mut wire);
        sdnv::append(1_000_000, &mut wire);
        assert!(Lsa::decode(&wire).is_err());
    }

    #[test]
    fn lsa_destination_detection() {
        let mut b = Bundle::new(
            EndpointId::parse("dtn://y.dtn").unwrap(),
            EndpointId::parse("dtn://*/dtlsr?lsa_seqno=3").unwrap(),
            60,
        );
        assert!(is_lsa_bundle(&b));
        b.dest = EndpointId::parse("dtn://b.dtn/app").unwrap();
        assert!(!is_lsa_bundle(&b));
        b.dest = EndpointId::parse("dtn://*/other").unwrap();
        assert!(!is_lsa_bundle(&b));
    }

    #[test]
    fn supersession_is_lexicographic() {
        let mut r = router(true);
        assert!(r.update_current_lsa("dtn://y.dtn", 1, 5, 100, None));
        // Lower seqno and older ts: stale.
        assert!(!r.update_current_lsa("dtn://y.dtn", 2, 4, 99, None));
        // Same seqno, newer ts: accepted.
        assert!(r.update_current_lsa("dtn://y.dtn", 3, 5, 101, None));
        // Higher seqno always wins.
        assert!(r.update_current_lsa("dtn://y.dtn", 4, 6, 50, None));
        assert_eq!(r.current_lsas["dtn://y.dtn"], 4);
    }

    #[test]
    fn omitted_edges_marked_down() {
        let mut r = router(true);
        r.apply_lsa_edges("dtn://y.dtn", &lsa_with_edges(1, &["e1", "e2", "e3"]));
        let up = |r: &DtlsrRouter, id: &str| {
            r.graph
                .find_edge("dtn://y.dtn", |e| e.info.id == id)
                .map(|e| e.info.params.up)
        };
        assert_eq!(up(&r, "e1"), Some(true));

        r.apply_lsa_edges("dtn://y.dtn", &lsa_with_edges(2, &["e2"]));
        assert_eq!(up(&r, "e1"), Some(false));
        assert_eq!(up(&r, "e2"), Some(true));
        assert_eq!(up(&r, "e3"), Some(false));
    }

    #[test]
    fn omitted_edges_removed_without_keep_down_links() {
        let mut r = router(false);
        r.apply_lsa_edges("dtn://y.dtn", &lsa_with_edges(1, &["e1", "e2", "e3"]));
        r.apply_lsa_edges("dtn://y.dtn", &lsa_with_edges(2, &["e2"]));
        assert!(r
            .graph
            .find_edge("dtn://y.dtn", |e| e.info.id == "e1")
            .is_none());
        assert!(r
            .graph
            .find_edge("dtn://y.dtn", |e| e.info.id == "e2")
            .is_some());
        assert!(r
            .graph
            .find_edge("dtn://y.dtn", |e| e.info.id == "e3")
            .is_none());
    }

    #[test]
    fn estimated_delay_weight() {
        let mut r = router(true);
        r.weight_fn = WeightFnKind::EstimatedDelay;
        r.weight_shift = 2;

        let wall = now();
        let mut info = EdgeInfo::new("e");
        info.params.up = false;
        info.last_update = wall - 95;
        // (95 + 5) >> 2 = 25
        assert_eq!(r.edge_weight(wall, &info), 25);

        // Up edge: (qcount + 1) * delay + qsize / bw.
        info.params = EdgeParams {
            cost: 1,
            delay: 10,
            bw: 100,
            qcount: 2,
            qsize: 500,
            up: true,
        };
        assert_eq!(r.edge_weight(wall, &info), 3 * 10 + 5);
    }

    #[test]
    fn delay_weight_ages_out() {
        let mut r = router(true);
        r.weight_fn = WeightFnKind::Delay;
        r.lsa_interval = 60;

        let wall = now();
        let mut info = EdgeInfo::new("e");
        info.params.delay = 30;
        info.last_update = wall;
        assert_eq!(r.edge_weight(wall, &info), 30);

        // Silent for more than 2 intervals: unusable.
        info.last_update = wall - 121;
        assert_eq!(r.edge_weight(wall, &info), INFINITY);
    }
}
