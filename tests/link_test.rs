//! Link lifecycle: retry backoff and state machine properties.

use caravan::contact::ContactManager;
use caravan::daemon::{ContactDownReason, EventQueue, EventSender};
use caravan::eid::EndpointId;
use caravan::link::{Link, LinkParams, LinkState, LinkType};
use std::sync::Arc;

fn manager() -> ContactManager {
    let queue = Arc::new(EventQueue::new());
    ContactManager::new(EventSender::new(queue))
}

fn ondemand_link(name: &str) -> Link {
    Link::new(
        name,
        LinkType::OnDemand,
        EndpointId::parse("dtn://peer.dtn").unwrap(),
        Some("127.0.0.1:4556".parse().unwrap()),
        LinkParams {
            min_retry_interval: 5,
            max_retry_interval: 60,
            ..LinkParams::default()
        },
    )
}

#[tokio::test]
async fn four_breaks_schedule_5_10_20_40() {
    let mut cm = manager();
    cm.add_link(ondemand_link("l0"));

    let mut delays = Vec::new();
    for _ in 0..4 {
        cm.get_mut("l0")
            .unwrap()
            .set_state(LinkState::Available)
            .unwrap();
        cm.contact_opening("l0");
        delays.push(
            cm.contact_down("l0", ContactDownReason::Broken)
                .expect("ondemand link must schedule a retry"),
        );
    }
    assert_eq!(delays, vec![5, 10, 20, 40]);

    // Success resets: the next break schedules at 5 again.
    cm.get_mut("l0")
        .unwrap()
        .set_state(LinkState::Available)
        .unwrap();
    cm.contact_opening("l0");
    cm.contact_up("l0", None);
    assert_eq!(
        cm.contact_down("l0", ContactDownReason::Broken),
        Some(5)
    );
}

#[tokio::test]
async fn backoff_caps_at_max() {
    let mut cm = manager();
    cm.add_link(ondemand_link("l0"));

    let mut last = 0;
    for _ in 0..8 {
        cm.get_mut("l0")
            .unwrap()
            .set_state(LinkState::Available)
            .unwrap();
        cm.contact_opening("l0");
        last = cm.contact_down("l0", ContactDownReason::Broken).unwrap();
    }
    assert_eq!(last, 60);
}

#[tokio::test]
async fn user_close_schedules_nothing() {
    let mut cm = manager();
    cm.add_link(ondemand_link("l0"));
    cm.get_mut("l0")
        .unwrap()
        .set_state(LinkState::Available)
        .unwrap();
    cm.contact_opening("l0");
    cm.contact_up("l0", None);
    assert_eq!(cm.contact_down("l0", ContactDownReason::UserClose), None);
}

#[test]
fn busy_never_skips_states() {
    // From BUSY the only ways out are OPEN, CLOSING and UNAVAILABLE.
    let reachable = [LinkState::Open, LinkState::Closing, LinkState::Unavailable];
    let unreachable = [LinkState::Available, LinkState::Opening, LinkState::Busy];

    for target in reachable {
        let mut l = ondemand_link("l");
        l.set_state(LinkState::Available).unwrap();
        l.set_state(LinkState::Opening).unwrap();
        l.set_state(LinkState::Open).unwrap();
        l.set_state(LinkState::Busy).unwrap();
        assert!(l.set_state(target).is_ok(), "BUSY -> {:?} must be legal", target);
    }
    for target in unreachable {
        let mut l = ondemand_link("l");
        l.set_state(LinkState::Available).unwrap();
        l.set_state(LinkState::Opening).unwrap();
        l.set_state(LinkState::Open).unwrap();
        l.set_state(LinkState::Busy).unwrap();
        assert!(
            l.set_state(target).is_err(),
            "BUSY -> {:?} must be illegal",
            target
        );
    }
}

#[test]
fn contact_exists_iff_session_states() {
    assert!(!LinkState::Unavailable.has_contact());
    assert!(!LinkState::Available.has_contact());
    assert!(LinkState::Opening.has_contact());
    assert!(LinkState::Open.has_contact());
    assert!(LinkState::Busy.has_contact());
    assert!(LinkState::Closing.has_contact());
}

#[test]
fn broken_transport_forces_unavailable_from_anywhere() {
    for setup in 0..4 {
        let mut l = ondemand_link("l");
        l.set_state(LinkState::Available).unwrap();
        if setup >= 1 {
            l.set_state(LinkState::Opening).unwrap();
        }
        if setup >= 2 {
            l.set_state(LinkState::Open).unwrap();
        }
        if setup >= 3 {
            l.set_state(LinkState::Busy).unwrap();
        }
        l.set_state(LinkState::Unavailable).unwrap();
        assert_eq!(l.state(), LinkState::Unavailable);
    }
}
