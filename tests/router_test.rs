//! Routing: shortest-path selection and LSA supersession.

use std::sync::Arc;

use caravan::bundle::{Bundle, Payload};
use caravan::config::Config;
use caravan::contact::ContactManager;
use caravan::daemon::{Event, EventQueue, EventSender};
use caravan::eid::EndpointId;
use caravan::graph::MultiGraph;
use caravan::link::{Link, LinkParams, LinkType};
use caravan::router::dtlsr::{DtlsrRouter, EdgeParams, Lsa, LsaEdge};
use caravan::router::{Router, RouterCtx};
use caravan::store::BundleStore;
use caravan::types::CreationTimestamp;

// ---------------------------------------------------------------------
// Scenario: ring of 16 nodes, forward edges weight 0, reverse 100.
// ---------------------------------------------------------------------

#[test]
fn ring_16_weighting_vs_hop_count() {
    let mut g: MultiGraph<(), u32> = MultiGraph::new();
    for i in 0..16 {
        g.add_node(&format!("n{}", i), ());
    }
    for i in 0..16u32 {
        let next = (i + 1) % 16;
        g.add_edge(&format!("n{}", i), &format!("n{}", next), 0);
        g.add_edge(&format!("n{}", next), &format!("n{}", i), 100);
    }

    // Cost-based: ten zero-weight forward hops.
    let forward = g.shortest_path("n0", "n10", |e| e.info).unwrap();
    assert_eq!(forward.len(), 10);
    assert_eq!(forward.iter().map(|e| e.info).sum::<u32>(), 0);

    // Hop-count: six backward hops.
    let backward = g.shortest_path("n0", "n10", |_| 1).unwrap();
    assert_eq!(backward.len(), 6);
}

// ---------------------------------------------------------------------
// Scenario: LSA supersession.
// ---------------------------------------------------------------------

struct Fixture {
    router: DtlsrRouter,
    contacts: ContactManager,
    store: BundleStore,
    events: EventSender,
    queue: Arc<EventQueue>,
    config: Config,
}

impl Fixture {
    fn new(keep_down_links: bool) -> Self {
        let queue = Arc::new(EventQueue::new());
        let events = EventSender::new(queue.clone());
        let mut config = Config::default();
        config.local_eid = EndpointId::parse("dtn://x.dtn").unwrap();
        config.keep_down_links = keep_down_links;
        Self {
            router: DtlsrRouter::new(&config),
            contacts: ContactManager::new(events.clone()),
            store: BundleStore::open_memory(),
            events,
            queue,
            config,
        }
    }

    fn handle(&mut self, event: Event) {
        let mut ctx = RouterCtx {
            local_eid: &self.config.local_eid,
            contacts: &mut self.contacts,
            store: &self.store,
            events: &self.events,
            config: &self.config,
        };
        self.router.handle_event(&event, &mut ctx);
    }
}

fn lsa_bundle(source: &str, seqno: u64, ts: u64, edge_ids: &[&str]) -> Bundle {
    let lsa = Lsa {
        seqno,
        edges: edge_ids
            .iter()
            .map(|id| LsaEdge {
                dest: format!("dtn://{}.dtn", id),
                id: id.to_string(),
                params: EdgeParams::default(),
            })
            .collect(),
    };
    let mut b = Bundle::new(
        EndpointId::parse(source).unwrap(),
        EndpointId::parse(&format!("dtn://*/dtlsr?lsa_seqno={}", seqno)).unwrap(),
        3600,
    );
    b.singleton_dest = false;
    b.creation_ts = CreationTimestamp::new(ts, 0);
    b.payload = Payload::in_memory(lsa.encode());
    b
}

fn edge_state(router: &DtlsrRouter, from: &str, id: &str) -> Option<bool> {
    router
        .graph()
        .find_edge(from, |e| e.info.id == id)
        .map(|e| e.info.params.up)
}

#[test]
fn newer_lsa_supersedes_and_releases_the_old_bundle() {
    let mut fx = Fixture::new(true);

    let lsa1 = lsa_bundle("dtn://y.dtn", 1, 1000, &["e1", "e2", "e3"]);
    let lsa1_id = lsa1.id;
    fx.store.put(&lsa1).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa1.clone()),
        link: None,
    });

    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e1"), Some(true));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e2"), Some(true));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e3"), Some(true));
    // The freshest LSA is pinned in the store.
    assert!(!fx.router.can_delete_bundle(&lsa1));

    let lsa2 = lsa_bundle("dtn://y.dtn", 2, 1001, &["e2"]);
    fx.store.put(&lsa2).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa2.clone()),
        link: None,
    });

    // Omitted edges are down, the mentioned one stays up.
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e1"), Some(false));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e2"), Some(true));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e3"), Some(false));

    // LSA1 lost its retention and its deletion was requested.
    assert!(fx.router.can_delete_bundle(&lsa1));
    assert!(!fx.router.can_delete_bundle(&lsa2));

    let mut freed = false;
    while let Some(posted) = fx.queue.try_next() {
        if let Event::BundleFree { id } = posted.event {
            assert_eq!(id, lsa1_id);
            freed = true;
        }
    }
    assert!(freed, "superseded LSA must be released for deletion");
}

#[test]
fn stale_lsa_is_ignored() {
    let mut fx = Fixture::new(true);

    let lsa2 = lsa_bundle("dtn://y.dtn", 2, 1001, &["e1", "e2"]);
    fx.store.put(&lsa2).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa2.clone()),
        link: None,
    });

    // An older announcement arrives late.
    let lsa1 = lsa_bundle("dtn://y.dtn", 1, 1000, &["e3"]);
    fx.store.put(&lsa1).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa1),
        link: None,
    });

    // Graph still reflects the newer LSA only.
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e1"), Some(true));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e2"), Some(true));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e3"), None);
    assert!(!fx.router.can_delete_bundle(&lsa2));
}

#[test]
fn without_keep_down_links_omitted_edges_vanish() {
    let mut fx = Fixture::new(false);

    let lsa1 = lsa_bundle("dtn://y.dtn", 1, 1000, &["e1", "e2", "e3"]);
    fx.store.put(&lsa1).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa1),
        link: None,
    });

    let lsa2 = lsa_bundle("dtn://y.dtn", 2, 1001, &["e2"]);
    fx.store.put(&lsa2).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa2),
        link: None,
    });

    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e1"), None);
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e2"), Some(true));
    assert_eq!(edge_state(&fx.router, "dtn://y.dtn", "e3"), None);
}

// ---------------------------------------------------------------------
// Learned topology installs next-hop routes.
// ---------------------------------------------------------------------

#[tokio::test]
async fn lsa_learned_route_points_at_local_link() {
    let mut fx = Fixture::new(true);

    // A live local link to Y.
    fx.contacts.add_link(Link::new(
        "x-y",
        LinkType::OnDemand,
        EndpointId::parse("dtn://y.dtn").unwrap(),
        Some("127.0.0.1:4556".parse().unwrap()),
        LinkParams::default(),
    ));
    fx.handle(Event::ContactUp {
        link: "x-y".to_string(),
        handle: Default::default(),
    });

    // Y announces an edge to Z.
    let lsa = lsa_bundle("dtn://y.dtn", 1, 1000, &["z"]);
    fx.store.put(&lsa).unwrap();
    fx.handle(Event::BundleReceived {
        bundle: Box::new(lsa),
        link: None,
    });

    // Both Y and Z route via the local link to Y.
    let to_y = fx
        .router
        .table()
        .matches(&EndpointId::parse("dtn://y.dtn/app").unwrap());
    assert!(!to_y.is_empty());
    assert_eq!(to_y[0].link, "x-y");

    let to_z = fx
        .router
        .table()
        .matches(&EndpointId::parse("dtn://z.dtn/app").unwrap());
    assert!(!to_z.is_empty(), "route to z should be installed");
    assert_eq!(to_z[0].link, "x-y");
}
