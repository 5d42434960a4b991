//! Routing: route table, base router interface, static routes

pub mod dtlsr;

use tracing::{debug, info};

use crate::bundle::{Bundle, ForwardAction};
use crate::config::{Config, RouterType};
use crate::contact::ContactManager;
use crate::daemon::{Event, EventSender};
use crate::eid::{EidPattern, EndpointId};
use crate::store::BundleStore;
use crate::types::BundleId;

/// One route-table entry: destinations matching `pattern` leave via
/// link `link`.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub pattern: EidPattern,
    pub link: String,
    /// Installed by a routing protocol rather than configuration;
    /// flushed and rebuilt atomically on recomputation.
    pub dynamic: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pattern: EidPattern, link: &str, dynamic: bool) {
        debug!(%pattern, link, dynamic, "route added");
        self.entries.push(RouteEntry {
            pattern,
            link: link.to_string(),
            dynamic,
        });
    }

    pub fn del_for_link(&mut self, link: &str) {
        self.entries.retain(|e| e.link != link);
    }

    /// Remove every dynamic entry; static configuration survives.
    pub fn flush_dynamic(&mut self) {
        self.entries.retain(|e| !e.dynamic);
    }

    pub fn matches(&self, dest: &EndpointId) -> Vec<&RouteEntry> {
        self.entries
            .iter()
            .filter(|e| e.pattern.matches(dest))
            .collect()
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the daemon lends a router while it handles one event.
pub struct RouterCtx<'a> {
    pub local_eid: &'a EndpointId,
    pub contacts: &'a mut ContactManager,
    pub store: &'a BundleStore,
    pub events: &'a EventSender,
    pub config: &'a Config,
}

/// Event-driven routing engine. All methods run on the daemon task.
pub trait Router: Send {
    fn handle_event(&mut self, event: &Event, ctx: &mut RouterCtx<'_>);

    /// May the daemon delete this bundle now? Routers veto deletion
    /// for bundles they still need (e.g. the freshest LSA per node).
    fn can_delete_bundle(&self, _bundle: &Bundle) -> bool {
        true
    }

    /// Human-readable dump for diagnostics.
    fn routing_state(&self) -> String;
}

pub fn create_router(config: &Config) -> Box<dyn Router> {
    match config.router_type {
        RouterType::Static => Box::new(StaticRouter::from_config(config)),
        RouterType::Dtlsr => Box::new(dtlsr::DtlsrRouter::new(config)),
    }
}

/// Pick the links a bundle should be forwarded on: route-table
/// matches, minus the peer it came from and links already tried.
pub fn forwarding_links(
    table: &RouteTable,
    bundle: &Bundle,
    ctx: &RouterCtx<'_>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for entry in table.matches(&bundle.dest) {
        let Some(link) = ctx.contacts.get(&entry.link) else {
            continue;
        };
        if bundle.fwd_log.received_from(&link.remote_eid) {
            continue;
        }
        if bundle.fwd_log.has(&link.remote_eid, ForwardAction::ForwardAttempted) {
            continue;
        }
        if !out.contains(&entry.link) {
            out.push(entry.link.clone());
        }
    }
    out
}

/// Queue `id` on each named link by posting BundleSend events.
pub fn post_sends(id: BundleId, links: &[String], ctx: &RouterCtx<'_>) {
    for link in links {
        ctx.events.post(Event::BundleSend {
            id,
            link: link.clone(),
        });
    }
}

/// Fixed routes from configuration; no topology awareness.
pub struct StaticRouter {
    table: RouteTable,
}

impl StaticRouter {
    pub fn from_config(config: &Config) -> Self {
        let mut table = RouteTable::new();
        for route in &config.static_routes {
            match EidPattern::parse(&route.pattern) {
                Ok(pattern) => table.add(pattern, &route.link, false),
                Err(e) => info!(pattern = %route.pattern, error = %e, "skipping bad route"),
            }
        }
        Self { table }
    }

    fn route_bundle(&self, bundle: &Bundle, ctx: &mut RouterCtx<'_>) {
        let links = forwarding_links(&self.table, bundle, ctx);
        post_sends(bundle.id, &links, ctx);
    }

    /// A link came up: anything stored that now has a route through
    /// it gets another chance.
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
}

impl Router for StaticRouter {
    fn handle_event(&mut self, event: &Event, ctx: &mut RouterCtx<'_>) {
        match event {
            Event::BundleReceived { bundle, .. } | Event::BundleInjected { bundle } => {
                self.route_bundle(bundle, ctx);
            }
            Event::ContactUp { link, .. } | Event::LinkAvailable { link } => {
                debug!(link = %link, "static router rerouting pending bundles");
                self.reroute_pending(ctx);
            }
            _ => {}
        }
    }

    fn routing_state(&self) -> String {
        let mut out = String::from("static routes:\n");
        for e in self.table.entries() {
            out.push_str(&format!("  {} -> {}\n", e.pattern, e.link));
        }
        out
    }
}
