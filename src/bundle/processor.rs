//! The block processor interface and type registry
//!
//! Each 8-bit block type code maps to one processor. Processors are
//! stateless; all per-block state lives in the [`BlockInfo`] they are
//! handed. Types with no registered processor fall back to the
//! unknown-block processor, which preserves bytes verbatim.

use crate::eid::EndpointId;

use super::block::BlockInfo;
use super::bundle::Bundle;
use super::extension::{OpaqueBlockProcessor, PreviousHopBlockProcessor, UnknownBlockProcessor};
use super::payload::PayloadBlockProcessor;
use super::primary::PrimaryBlockProcessor;
use super::status::StatusReason;
use super::{block, CodecError};

/// Outcome of `validate` for one block.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationResult {
    /// When set, the whole bundle is deleted with this reason.
    pub deletion_reason: Option<StatusReason>,
    /// When set, a reception status report should mention this reason
    /// but processing continues.
    pub reception_reason: Option<StatusReason>,
    /// Drop just this block and keep the bundle.
    pub discard_block: bool,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn delete(reason: StatusReason) -> Self {
        Self {
            deletion_reason: Some(reason),
            ..Self::default()
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.deletion_reason.is_some()
    }
}

/// Context handed to `prepare`/`generate` describing the transmission.
#[derive(Debug, Clone)]
pub struct XmitContext {
    pub local_eid: EndpointId,
    /// Insert a previous-hop block identifying this node.
    pub include_prevhop: bool,
}

/// Per-block-type parse/generate/validate behaviour.
///
/// `consume` may be called repeatedly with successive chunks until the
/// block is complete; it must tolerate the preamble being split across
/// chunks and must consume nothing it cannot use.
pub trait BlockProcessor: Send + Sync {
    fn block_type(&self) -> u8;

    /// Feed received bytes into `block`, updating derived fields on
    /// `bundle` where the block defines them. Returns bytes consumed.
    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, CodecError>;

    /// Invoked once per block after the whole bundle has arrived.
    fn validate(&self, bundle: &Bundle, blocks: &[BlockInfo], block: &BlockInfo)
        -> ValidationResult;

    /// Append outgoing [`BlockInfo`]s for this processor to `xmit`,
    /// optionally copying from a received block.
    fn prepare(
        &self,
        bundle: &Bundle,
        xmit: &mut Vec<BlockInfo>,
        source: Option<&BlockInfo>,
        ctx: &XmitContext,
    );

    /// Fill `block.contents` with preamble plus data, ready for the
    /// wire. `last` controls the last-block flag.
    fn generate(
        &self,
        bundle: &Bundle,
        block: &mut BlockInfo,
        ctx: &XmitContext,
        last: bool,
    ) -> Result<(), CodecError>;

    /// Second pass for blocks whose content depends on other blocks.
    /// The default does nothing.
    fn finalize(
        &self,
        _bundle: &Bundle,
        _xmit: &mut [BlockInfo],
        _index: usize,
        _ctx: &XmitContext,
    ) -> Result<(), CodecError> {
        Ok(())
    }

    /// Default chunk-safe consume: accumulate preamble, then copy data
    /// bytes into the block buffer until `data_length` is reached.
    fn consume_into_contents(
        &self,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, CodecError> {
        let mut consumed = 0;
        if !block.preamble_parsed() {
            consumed = consume_preamble(block, buf)?;
            if !block.preamble_parsed() {
                return Ok(consumed);
            }
        }
        let have = block.contents.len() - block.data_offset;
        let want = block.data_length - have;
        let take = want.min(buf.len() - consumed);
        block
            .contents
            .extend_from_slice(&buf[consumed..consumed + take]);
        consumed += take;
        if block.contents.len() - block.data_offset == block.data_length {
            block.complete = true;
        }
        Ok(consumed)
    }
}

/// Feed bytes one at a time until the preamble parses. The preamble is
/// at most 1 + 2×10 bytes, so this stays within a small bound even on
/// hostile input.
pub fn consume_preamble(block: &mut BlockInfo, buf: &[u8]) -> Result<usize, CodecError> {
    let mut consumed = 0;
    while !block.preamble_parsed() && consumed < buf.len() {
        block.contents.push(buf[consumed]);
        consumed += 1;
        if block.contents.len() > 1 + 2 * crate::sdnv::MAX_LENGTH {
            return Err(CodecError::Malformed("oversized block preamble".into()));
        }
        block.parse_preamble()?;
    }
    Ok(consumed)
}

/// Fixed table of processors keyed by block type code.
pub struct BlockProcessorRegistry {
    primary: PrimaryBlockProcessor,
    payload: PayloadBlockProcessor,
    prevhop: PreviousHopBlockProcessor,
    security: [OpaqueBlockProcessor; 4],
    unknown: UnknownBlockProcessor,
}

impl BlockProcessorRegistry {
    pub fn new() -> Self {
        Self {
            primary: PrimaryBlockProcessor,
            payload: PayloadBlockProcessor,
            prevhop: PreviousHopBlockProcessor,
            security: [
                OpaqueBlockProcessor::new(block::BUNDLE_AUTHENTICATION_BLOCK),
                OpaqueBlockProcessor::new(block::PAYLOAD_SECURITY_BLOCK),
                OpaqueBlockProcessor::new(block::CONFIDENTIALITY_BLOCK),
                OpaqueBlockProcessor::new(block::EXTENSION_SECURITY_BLOCK),
            ],
            unknown: UnknownBlockProcessor,
        }
    }

    pub fn find(&self, block_type: u8) -> &dyn BlockProcessor {
        if block_type == block::PRIMARY_BLOCK {
            return &self.primary;
        }
        if block_type == block::PAYLOAD_BLOCK {
            return &self.payload;
        }
        if block_type == block::PREVIOUS_HOP_BLOCK {
            return &self.prevhop;
        }
        for p in &self.security {
            if p.block_type() == block_type {
                return p;
            }
        }
        &self.unknown
    }

    pub fn primary(&self) -> &PrimaryBlockProcessor {
        &self.primary
    }

    pub fn payload(&self) -> &PayloadBlockProcessor {
        &self.payload
    }

    pub fn prevhop(&self) -> &PreviousHopBlockProcessor {
        &self.prevhop
    }
}

impl Default for BlockProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
