//! Fragmentation and reassembly
//!
//! Proactive fragmentation splits a bundle ahead of transmission so
//! each piece fits a size limit; reactive fragmentation salvages a
//! partially transmitted bundle after a transport break. Reassembly
//! collects fragments keyed by (source, creation timestamp, original
//! length) until their ranges cover the whole original payload.

use std::collections::HashMap;
use tracing::{debug, info};

use crate::types::CreationTimestamp;

use super::block::BlockFlags;
use super::bundle::{Bundle, Payload};

/// Fragments of one original bundle share all three components.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub source: String,
    pub creation_ts: CreationTimestamp,
    pub orig_length: u64,
}

impl ReassemblyKey {
    fn of(fragment: &Bundle) -> Self {
        Self {
            source: fragment.source.uri(),
            creation_ts: fragment.creation_ts,
            orig_length: fragment.orig_length,
        }
    }
}

struct ReassemblyState {
    bundle: Bundle,
    /// Sorted, disjoint half-open byte ranges received so far.
    ranges: Vec<(u64, u64)>,
}

impl ReassemblyState {
    /// Insert a range, merging any overlap with neighbours.
    fn add_range(&mut self, start: u64, end: u64) {
        let mut merged = (start, end);
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for &(s, e) in &self.ranges {
            if e < merged.0 || s > merged.1 {
                out.push((s, e));
            } else {
                merged.0 = merged.0.min(s);
                merged.1 = merged.1.max(e);
            }
        }
        out.push(merged);
        out.sort_unstable();
        self.ranges = out;
    }

    fn covers(&self, len: u64) -> bool {
        self.ranges.len() == 1 && self.ranges[0] == (0, len)
    }
}

/// Creates fragments and reconstitutes whole bundles from them.
#[derive(Default)]
pub struct FragmentManager {
    states: HashMap<ReassemblyKey, ReassemblyState>,
}

/// Build one fragment of `bundle` covering payload bytes
/// [offset, offset+length) of the original application data unit.
fn make_fragment(bundle: &Bundle, offset: u64, length: u64) -> std::io::Result<Bundle> {
    let mut frag = Bundle::empty();
    bundle.copy_metadata(&mut frag);
    frag.is_fragment = true;
    frag.orig_length = if bundle.is_fragment {
        bundle.orig_length
    } else {
        bundle.payload.len()
    };
    // Offsets compose when fragmenting a fragment.
    frag.frag_offset = bundle.frag_offset + offset;
    let data = bundle.payload.read_range(offset, length)?;
    frag.payload = Payload::in_memory(data);

    // The first fragment carries every extension block; later ones
    // carry only those flagged replicate-in-every-fragment.
    frag.recv_blocks = bundle
        .recv_blocks
        .iter()
        .filter(|b| {
            frag.frag_offset == 0
                || b.block_flags().contains(BlockFlags::REPLICATE)
        })
        .cloned()
        .collect();
    Ok(frag)
}

impl FragmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `bundle` into fragments whose payloads are each at most
    /// `max_payload` bytes. The offsets partition the original with
    /// no gaps or overlaps.
    pub fn proactive_fragment(
        &self,
        bundle: &Bundle,
        max_payload: u64,
    ) -> std::io::Result<Vec<Bundle>> {
        assert!(max_payload > 0);
        let total = bundle.payload.len();
        let mut fragments = Vec::new();
        let mut offset = 0;
        while offset < total {
            let length = max_payload.min(total - offset);
            fragments.push(make_fragment(bundle, offset, length)?);
            offset += length;
        }
        debug!(
            bundle = %bundle,
            count = fragments.len(),
            "proactively fragmented"
        );
        Ok(fragments)
    }

    /// After a transport break with `sent` payload bytes acked, build
    /// the fragment covering the unsent remainder [sent, end).
    pub fn reactive_fragment(&self, bundle: &Bundle, sent: u64) -> std::io::Result<Option<Bundle>> {
        let total = bundle.payload.len();
        if sent >= total {
            return Ok(None);
        }
        let frag = make_fragment(bundle, sent, total - sent)?;
        info!(bundle = %bundle, sent, "reactively fragmented unsent tail");
        Ok(Some(frag))
    }

    /// Fold a received fragment into reassembly state. Returns the
    /// reconstituted original once its payload is fully covered.
    pub fn received_fragment(&mut self, fragment: &Bundle) -> std::io::Result<Option<Bundle>> {
        if !fragment.is_fragment || fragment.orig_length == 0 {
            return Ok(None);
        }
        let key = ReassemblyKey::of(fragment);
        let state = self.states.entry(key.clone()).or_insert_with(|| {
            let mut bundle = Bundle::empty();
            fragment.copy_metadata(&mut bundle);
            ReassemblyState {
                bundle,
                ranges: Vec::new(),
            }
        });

        let len = fragment.payload.len();
        let data = fragment.payload.read_all()?;
        state.bundle.payload.write_at(fragment.frag_offset, &data)?;
        state.add_range(fragment.frag_offset, fragment.frag_offset + len);

        if state.covers(key.orig_length) {
            let state = self.states.remove(&key).expect("state just inserted");
            info!(source = %state.bundle.source, "reassembly complete");
            return Ok(Some(state.bundle));
        }
        Ok(None)
    }

    /// Drop reassembly state whose constituent bundles have expired.
    pub fn expire(&mut self, dtn_now: u64) -> usize {
        let before = self.states.len();
        self.states.retain(|_, s| !s.bundle.is_expired(dtn_now));
        before - self.states.len()
    }

    pub fn pending(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eid::EndpointId;

    fn bundle_with_payload(data: Vec<u8>) -> Bundle {
        let mut b = Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse("dtn://b.dtn/app").unwrap(),
            300,
        );
        b.payload = Payload::in_memory(data);
        b
    }

    #[test]
    fn partition_has_no_gaps() {
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let bundle = bundle_with_payload(data.clone());
        let mgr = FragmentManager::new();
        let frags = mgr.proactive_fragment(&bundle, 300).unwrap();
        assert_eq!(frags.len(), 4);

        let mut expected_offset = 0;
        for f in &frags {
            assert!(f.is_fragment);
            assert_eq!(f.frag_offset, expected_offset);
            assert_eq!(f.orig_length, 1000);
            expected_offset += f.payload.len();
        }
        assert_eq!(expected_offset, 1000);
    }

    #[test]
    fn reassembly_out_of_order() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();
        let bundle = bundle_with_payload(data.clone());
        let mgr = FragmentManager::new();
        let frags = mgr.proactive_fragment(&bundle, 1024).unwrap();
        assert_eq!(frags.len(), 4);

        let mut reasm = FragmentManager::new();
        for idx in [2usize, 0, 3] {
            assert!(reasm.received_fragment(&frags[idx]).unwrap().is_none());
        }
        let whole = reasm.received_fragment(&frags[1]).unwrap().unwrap();
        assert_eq!(whole.payload.read_all().unwrap(), data);
        assert!(!whole.is_fragment);
        assert_eq!(whole.source, bundle.source);
        assert_eq!(whole.creation_ts, bundle.creation_ts);
        assert_eq!(reasm.pending(), 0);
    }

    #[test]
    fn overlapping_fragments_merge() {
        let data: Vec<u8> = (0..100u32).map(|i| i as u8).collect();
        let bundle = bundle_with_payload(data.clone());
        let mgr = FragmentManager::new();

        // Overlapping cover: [0,60) and [40,100).
        let a = make_fragment(&bundle, 0, 60).unwrap();
        let b = make_fragment(&bundle, 40, 60).unwrap();

        let mut reasm = FragmentManager::new();
        assert!(reasm.received_fragment(&a).unwrap().is_none());
        let whole = reasm.received_fragment(&b).unwrap().unwrap();
        assert_eq!(whole.payload.read_all().unwrap(), data);
    }

    #[test]
    fn reactive_tail() {
        let data: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let bundle = bundle_with_payload(data.clone());
        let mgr = FragmentManager::new();

        let tail = mgr.reactive_fragment(&bundle, 200).unwrap().unwrap();
        assert_eq!(tail.frag_offset, 200);
        assert_eq!(tail.orig_length, 500);
        assert_eq!(tail.payload.read_all().unwrap(), &data[200..]);

        // Fully sent: nothing to salvage.
        assert!(mgr.reactive_fragment(&bundle, 500).unwrap().is_none());
    }

    #[test]
    fn expiry_discards_state() {
        let mut b = bundle_with_payload(vec![0; 100]);
        b.creation_ts = CreationTimestamp::new(1000, 0);
        b.expiration = 50;
        let mgr = FragmentManager::new();
        let frags = mgr.proactive_fragment(&b, 60).unwrap();

        let mut reasm = FragmentManager::new();
        reasm.received_fragment(&frags[0]).unwrap();
        assert_eq!(reasm.pending(), 1);
        assert_eq!(reasm.expire(2000), 1);
        assert_eq!(reasm.pending(), 0);
    }
}
