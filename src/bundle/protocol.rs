//! Bundle serialisation and streaming deserialisation
//!
//! Transmit: `prepare` builds the outgoing block list (primary first,
//! payload last), `generate` fills each buffer, `finalize` runs a
//! second pass, and the serialiser concatenates — payload bytes come
//! straight from payload storage.
//!
//! Receive: a [`BundleParser`] is fed byte ranges as they arrive off
//! the wire, in any chunking. Blocks complete one at a time; when the
//! block carrying the last-block flag completes, the validate sweep
//! runs and the bundle is handed over or condemned.

use tracing::debug;

use super::block::{BlockInfo, PAYLOAD_BLOCK, PREVIOUS_HOP_BLOCK, PRIMARY_BLOCK};
use super::bundle::Bundle;
use super::processor::{BlockProcessor, BlockProcessorRegistry, XmitContext};
use super::status::StatusReason;
use super::CodecError;

/// Build and fill the outgoing block list for a bundle.
pub fn format_blocks(
    bundle: &Bundle,
    ctx: &XmitContext,
    registry: &BlockProcessorRegistry,
) -> Result<Vec<BlockInfo>, CodecError> {
    let mut xmit: Vec<BlockInfo> = Vec::with_capacity(bundle.recv_blocks.len() + 3);

    registry.primary().prepare(bundle, &mut xmit, None, ctx);
    registry.prevhop().prepare(bundle, &mut xmit, None, ctx);

    // Carry received extension blocks through; primary, payload and
    // previous-hop are always regenerated rather than copied.
    for src in &bundle.recv_blocks {
        match src.block_type {
            PRIMARY_BLOCK | PAYLOAD_BLOCK | PREVIOUS_HOP_BLOCK => continue,
            t => registry.find(t).prepare(bundle, &mut xmit, Some(src), ctx),
        }
    }

    registry.payload().prepare(bundle, &mut xmit, None, ctx);

    let count = xmit.len();
    for i in 0..count {
        let last = i == count - 1;
        let t = xmit[i].block_type;
        registry.find(t).generate(bundle, &mut xmit[i], ctx, last)?;
    }

    for i in 0..count {
        let t = xmit[i].block_type;
        registry.find(t).finalize(bundle, &mut xmit, i, ctx)?;
    }

    Ok(xmit)
}

/// Total on-wire length of a formatted block list.
pub fn formatted_length(blocks: &[BlockInfo]) -> u64 {
    blocks
        .iter()
        .map(|b| {
            if b.block_type == PAYLOAD_BLOCK {
                b.contents.len() as u64 + b.data_length as u64
            } else {
                b.contents.len() as u64
            }
        })
        .sum()
}

/// Serialise a formatted block list, pulling payload bytes from the
/// bundle's payload storage.
pub fn serialize(bundle: &Bundle, blocks: &[BlockInfo]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(formatted_length(blocks) as usize);
    for block in blocks {
        out.extend_from_slice(&block.contents);
        if block.block_type == PAYLOAD_BLOCK {
            let data = bundle
                .payload
                .read_all()
                .map_err(|e| CodecError::Malformed(format!("payload read failed: {}", e)))?;
            out.extend_from_slice(&data);
        }
    }
    Ok(out)
}

/// One-shot convenience: prepare, generate and serialise.
pub fn format_bundle(
    bundle: &Bundle,
    ctx: &XmitContext,
    registry: &BlockProcessorRegistry,
) -> Result<Vec<u8>, CodecError> {
    let blocks = format_blocks(bundle, ctx, registry)?;
    serialize(bundle, &blocks)
}

/// A successfully received and validated bundle.
pub struct ParsedBundle {
    pub bundle: Bundle,
    /// A reception status report should cite this reason, if any.
    pub reception_reason: Option<StatusReason>,
}

/// Streaming decoder for one incoming bundle.
pub struct BundleParser {
    registry: BlockProcessorRegistry,
    bundle: Bundle,
    blocks: Vec<BlockInfo>,
    current: Option<BlockInfo>,
    primary_done: bool,
    last_seen: bool,
}

impl BundleParser {
    pub fn new() -> Self {
        Self {
            registry: BlockProcessorRegistry::new(),
            bundle: Bundle::empty(),
            blocks: Vec::new(),
            current: None,
            primary_done: false,
            last_seen: false,
        }
    }

    /// All blocks received through the one flagged last-block.
    pub fn is_complete(&self) -> bool {
        self.last_seen && self.current.is_none()
    }

    /// Payload bytes received so far; drives receiver-side reactive
    /// fragmentation when the transport breaks mid-bundle.
    pub fn payload_received(&self) -> u64 {
        self.bundle.payload.len()
    }

    /// Declared length of the payload block, once its preamble has
    /// arrived.
    pub fn payload_declared(&self) -> Option<u64> {
        let find = |b: &BlockInfo| {
            (b.block_type == PAYLOAD_BLOCK && b.preamble_parsed()).then(|| b.data_length as u64)
        };
        self.blocks
            .iter()
            .find_map(find)
            .or_else(|| self.current.as_ref().and_then(find))
    }

    /// Feed the next byte range. Returns the number of bytes consumed,
    /// which is less than `buf.len()` only once the bundle is
    /// complete.
    pub fn consume(&mut self, buf: &[u8]) -> Result<usize, CodecError> {
        let mut consumed = 0;
        while consumed < buf.len() && !self.is_complete() {
            if self.current.is_none() {
                let mut block = BlockInfo::default();
                if !self.primary_done {
                    block.block_type = PRIMARY_BLOCK;
                } else {
                    // Type code is the first byte of the preamble.
                    block.block_type = buf[consumed];
                }
                self.current = Some(block);
            }

            let mut block = self.current.take().unwrap_or_default();
            let proc = self.registry.find(block.block_type);
            let n = proc.consume(&mut self.bundle, &mut block, &buf[consumed..])?;
            consumed += n;

            if block.complete {
                if self.primary_done && block.last_block() {
                    self.last_seen = true;
                }
                self.primary_done = true;
                self.blocks.push(block);
            } else {
                self.current = Some(block);
                debug_assert_eq!(consumed, buf.len());
            }
        }
        Ok(consumed)
    }

    /// Run the validate sweep and hand over the bundle.
    ///
    /// On a fatal validation result the partially assembled bundle is
    /// returned alongside the deletion reason so the caller can raise
    /// a deletion status report toward its source.
    pub fn finish(mut self) -> Result<ParsedBundle, (Bundle, StatusReason)> {
        if !self.is_complete() {
            return Err((self.bundle, StatusReason::BlockUnintelligible));
        }

        let payload_count = self
            .blocks
            .iter()
            .filter(|b| b.block_type == PAYLOAD_BLOCK)
            .count();
        if payload_count != 1 {
            debug!(payload_count, "bundle does not carry exactly one payload block");
            return Err((self.bundle, StatusReason::BlockUnintelligible));
        }

        let mut reception_reason = None;
        let mut keep = vec![true; self.blocks.len()];
        for (i, block) in self.blocks.iter().enumerate() {
            let proc = self.registry.find(block.block_type);
            let result = proc.validate(&self.bundle, &self.blocks, block);
            if let Some(reason) = result.deletion_reason {
                return Err((self.bundle, reason));
            }
            if result.discard_block {
                keep[i] = false;
            }
            if reception_reason.is_none() {
                reception_reason = result.reception_reason;
            }
        }

        let mut iter = keep.iter();
        self.blocks.retain(|_| *iter.next().unwrap_or(&true));
        self.bundle.recv_blocks = self.blocks;

        Ok(ParsedBundle {
            bundle: self.bundle,
            reception_reason,
        })
    }

    /// Abandon parsing, keeping whatever arrived. Used by the
    /// convergence layer to build a received-fragment after a
    /// transport break.
    pub fn into_partial(self) -> Bundle {
        self.bundle
    }
}

impl Default for BundleParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::bundle::Payload;
    use crate::eid::EndpointId;
    use crate::types::CreationTimestamp;

    fn ctx() -> XmitContext {
        XmitContext {
            local_eid: EndpointId::parse("dtn://a.dtn").unwrap(),
            include_prevhop: false,
        }
    }

    fn sample() -> Bundle {
        let mut b = Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse("dtn://b.dtn/app").unwrap(),
            1000,
        );
        b.creation_ts = CreationTimestamp::new(10101010, 44556677);
        b.payload = Payload::in_memory(b"test payload".to_vec());
        b
    }

    #[test]
    fn round_trip() {
        let orig = sample();
        let registry = BlockProcessorRegistry::new();
        let wire = format_bundle(&orig, &ctx(), &registry).unwrap();

        let mut parser = BundleParser::new();
        let n = parser.consume(&wire).unwrap();
        assert_eq!(n, wire.len());
        assert!(parser.is_complete());

        let parsed = parser.finish().map_err(|(_, r)| r).unwrap();
        let b = parsed.bundle;
        assert_eq!(b.source, orig.source);
        assert_eq!(b.dest, orig.dest);
        assert_eq!(b.creation_ts, orig.creation_ts);
        assert_eq!(b.expiration, orig.expiration);
        assert_eq!(b.payload.read_all().unwrap(), b"test payload");
    }

    #[test]
    fn prevhop_inserted_when_asked() {
        let orig = sample();
        let registry = BlockProcessorRegistry::new();
        let with_ph = XmitContext {
            local_eid: EndpointId::parse("dtn://relay.dtn").unwrap(),
            include_prevhop: true,
        };
        let wire = format_bundle(&orig, &with_ph, &registry).unwrap();

        let mut parser = BundleParser::new();
        parser.consume(&wire).unwrap();
        let parsed = parser.finish().map_err(|(_, r)| r).unwrap();
        assert_eq!(
            parsed.bundle.prevhop,
            Some(EndpointId::parse("dtn://relay.dtn").unwrap())
        );
    }

    #[test]
    fn trailing_bytes_not_consumed() {
        let orig = sample();
        let registry = BlockProcessorRegistry::new();
        let mut wire = format_bundle(&orig, &ctx(), &registry).unwrap();
        let len = wire.len();
        wire.extend_from_slice(&[1, 2, 3, 4]);

        let mut parser = BundleParser::new();
        let n = parser.consume(&wire).unwrap();
        assert_eq!(n, len);
        assert!(parser.is_complete());
    }

    #[test]
    fn missing_payload_is_fatal() {
        // Hand-build: primary followed by a lone extension block
        // flagged last. No payload block anywhere.
        let orig = sample();
        let registry = BlockProcessorRegistry::new();
        let blocks = format_blocks(&orig, &ctx(), &registry).unwrap();
        let mut wire = blocks[0].contents.clone();
        // Extension block of type 0x42, flags=last-block, len 1.
        wire.extend_from_slice(&[0x42, 0x08, 0x01, 0x00]);

        let mut parser = BundleParser::new();
        parser.consume(&wire).unwrap();
        assert!(parser.is_complete());
        let err = parser.finish().err().unwrap();
        assert_eq!(err.1, StatusReason::BlockUnintelligible);
    }
}
