//! Proactive fragmentation and out-of-order reassembly.

use caravan::bundle::{Bundle, FragmentManager, Payload};
use caravan::eid::EndpointId;
use rand::RngCore;

fn bundle_with_random_payload(len: usize) -> (Bundle, Vec<u8>) {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    let mut b = Bundle::new(
        EndpointId::parse("dtn://a.dtn/app").unwrap(),
        EndpointId::parse("dtn://b.dtn/app").unwrap(),
        600,
    );
    b.payload = Payload::in_memory(data.clone());
    (b, data)
}

#[test]
fn four_kib_splits_into_four_fragments() {
    let (bundle, data) = bundle_with_random_payload(4096);
    let mgr = FragmentManager::new();
    let frags = mgr.proactive_fragment(&bundle, 1024).unwrap();

    assert_eq!(frags.len(), 4);
    for (i, frag) in frags.iter().enumerate() {
        assert!(frag.is_fragment);
        assert_eq!(frag.frag_offset, i as u64 * 1024);
        assert_eq!(frag.orig_length, 4096);
        assert_eq!(frag.payload.len(), 1024);
        assert_eq!(frag.source, bundle.source);
        assert_eq!(frag.creation_ts, bundle.creation_ts);
        assert_eq!(frag.expiration, bundle.expiration);
    }

    // Reassemble in the order (2, 0, 3, 1).
    let mut reasm = FragmentManager::new();
    assert!(reasm.received_fragment(&frags[2]).unwrap().is_none());
    assert!(reasm.received_fragment(&frags[0]).unwrap().is_none());
    assert!(reasm.received_fragment(&frags[3]).unwrap().is_none());
    let whole = reasm
        .received_fragment(&frags[1])
        .unwrap()
        .expect("final fragment completes the bundle");

    assert!(!whole.is_fragment);
    assert_eq!(whole.source, bundle.source);
    assert_eq!(whole.dest, bundle.dest);
    assert_eq!(whole.creation_ts, bundle.creation_ts);
    assert_eq!(whole.payload.read_all().unwrap(), data);
}

#[test]
fn uneven_split_covers_everything() {
    let (bundle, data) = bundle_with_random_payload(1000);
    let mgr = FragmentManager::new();
    let frags = mgr.proactive_fragment(&bundle, 300).unwrap();
    assert_eq!(frags.len(), 4);
    assert_eq!(frags[3].payload.len(), 100);

    let mut reasm = FragmentManager::new();
    let mut whole = None;
    for f in frags.iter().rev() {
        whole = reasm.received_fragment(f).unwrap();
    }
    assert_eq!(whole.unwrap().payload.read_all().unwrap(), data);
}

#[test]
fn reassembly_order_invariance() {
    let (bundle, data) = bundle_with_random_payload(2048);
    let mgr = FragmentManager::new();
    let frags = mgr.proactive_fragment(&bundle, 512).unwrap();

    for order in [[0usize, 1, 2, 3], [3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]] {
        let mut reasm = FragmentManager::new();
        let mut whole = None;
        for &idx in &order {
            whole = reasm.received_fragment(&frags[idx]).unwrap();
        }
        let whole = whole.unwrap_or_else(|| panic!("order {:?} did not complete", order));
        assert_eq!(whole.payload.read_all().unwrap(), data);
    }
}

#[test]
fn duplicate_fragments_are_harmless() {
    let (bundle, data) = bundle_with_random_payload(1024);
    let mgr = FragmentManager::new();
    let frags = mgr.proactive_fragment(&bundle, 512).unwrap();

    let mut reasm = FragmentManager::new();
    assert!(reasm.received_fragment(&frags[0]).unwrap().is_none());
    assert!(reasm.received_fragment(&frags[0]).unwrap().is_none());
    let whole = reasm.received_fragment(&frags[1]).unwrap().unwrap();
    assert_eq!(whole.payload.read_all().unwrap(), data);
}

#[test]
fn fragments_of_fragments_keep_absolute_offsets() {
    let (bundle, data) = bundle_with_random_payload(4096);
    let mgr = FragmentManager::new();
    let outer = mgr.proactive_fragment(&bundle, 2048).unwrap();
    assert_eq!(outer.len(), 2);

    // Split the second half again; offsets stay relative to the
    // original application data unit.
    let inner = mgr.proactive_fragment(&outer[1], 1024).unwrap();
    assert_eq!(inner.len(), 2);
    assert_eq!(inner[0].frag_offset, 2048);
    assert_eq!(inner[1].frag_offset, 3072);
    assert_eq!(inner[0].orig_length, 4096);

    let mut reasm = FragmentManager::new();
    assert!(reasm.received_fragment(&inner[1]).unwrap().is_none());
    assert!(reasm.received_fragment(&outer[0]).unwrap().is_none());
    let whole = reasm.received_fragment(&inner[0]).unwrap().unwrap();
    assert_eq!(whole.payload.read_all().unwrap(), data);
}

#[test]
fn reactive_fragment_resumes_from_acked_offset() {
    let (bundle, data) = bundle_with_random_payload(4096);
    let mgr = FragmentManager::new();

    let tail = mgr.reactive_fragment(&bundle, 1500).unwrap().unwrap();
    assert!(tail.is_fragment);
    assert_eq!(tail.frag_offset, 1500);
    assert_eq!(tail.orig_length, 4096);
    assert_eq!(tail.payload.read_all().unwrap(), &data[1500..]);

    // Receiver-side partial plus the tail reassemble the original.
    let mut head = Bundle::new(bundle.source.clone(), bundle.dest.clone(), 600);
    bundle.copy_metadata(&mut head);
    head.is_fragment = true;
    head.frag_offset = 0;
    head.orig_length = 4096;
    head.payload = Payload::in_memory(data[..1500].to_vec());

    let mut reasm = FragmentManager::new();
    assert!(reasm.received_fragment(&tail).unwrap().is_none());
    let whole = reasm.received_fragment(&head).unwrap().unwrap();
    assert_eq!(whole.payload.read_all().unwrap(), data);
}
