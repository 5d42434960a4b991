//! Extension block processors: previous-hop, security stubs, unknown
//!
//! Security block types are carried as opaque extension points: their
//! bytes are preserved end to end but no ciphersuite processing
//! happens here. Types with no processor at all go through the
//! unknown-block path, which honours the on-error preamble flags.

use crate::eid::EndpointId;

use super::block::{BlockFlags, BlockInfo, PREVIOUS_HOP_BLOCK};
use super::bundle::Bundle;
use super::processor::{BlockProcessor, ValidationResult, XmitContext};
use super::status::StatusReason;
use super::CodecError;

/// Rebuild a received block for forwarding: same data bytes, preamble
/// rewritten with forwarded-unprocessed set and the last-block flag
/// matching the block's position in the outgoing list.
fn regenerate_verbatim(block: &mut BlockInfo, last: bool) {
    let data = block.data().to_vec();
    block.set_flag(BlockFlags::FORWARDED_UNPROCESSED);
    block.data_length = data.len();
    block.generate_preamble(last);
    block.contents.extend_from_slice(&data);
    block.complete = true;
}

/// Fallback processor for block types nobody registered.
pub struct UnknownBlockProcessor;

impl UnknownBlockProcessor {
    /// Sentinel type code; the real code lives in each BlockInfo.
    pub const UNKNOWN_TYPE: u8 = 0xff;
}

impl BlockProcessor for UnknownBlockProcessor {
    fn block_type(&self) -> u8 {
        Self::UNKNOWN_TYPE
    }

    fn consume(
        &self,
        _bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, CodecError> {
        self.consume_into_contents(block, buf)
    }

    fn validate(
        &self,
        _bundle: &Bundle,
        _blocks: &[BlockInfo],
        block: &BlockInfo,
    ) -> ValidationResult {
        let flags = block.block_flags();
        let mut result = ValidationResult::ok();
        if flags.contains(BlockFlags::REPORT_ON_ERROR) {
            result.reception_reason = Some(StatusReason::BlockUnintelligible);
        }
        if flags.contains(BlockFlags::DELETE_BUNDLE_ON_ERROR) {
            result.deletion_reason = Some(StatusReason::BlockUnintelligible);
        } else if flags.contains(BlockFlags::DISCARD_BLOCK_ON_ERROR) {
            result.discard_block = true;
        }
        result
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut Vec<BlockInfo>,
        source: Option<&BlockInfo>,
        _ctx: &XmitContext,
    ) {
        if let Some(src) = source {
            xmit.push(src.clone());
        }
    }

    fn generate(
        &self,
        _bundle: &Bundle,
        block: &mut BlockInfo,
        _ctx: &XmitContext,
        last: bool,
    ) -> Result<(), CodecError> {
        regenerate_verbatim(block, last);
        Ok(())
    }
}

/// Named pass-through for the security block types. Bytes are
/// preserved verbatim; ciphersuite handling is an extension point.
pub struct OpaqueBlockProcessor {
    block_type: u8,
}

impl OpaqueBlockProcessor {
    pub fn new(block_type: u8) -> Self {
        Self { block_type }
    }
}

impl BlockProcessor for OpaqueBlockProcessor {
    fn block_type(&self) -> u8 {
        self.block_type
    }

    fn consume(
        &self,
        _bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, CodecError> {
        self.consume_into_contents(block, buf)
    }

    fn validate(
        &self,
        _bundle: &Bundle,
        _blocks: &[BlockInfo],
        _block: &BlockInfo,
    ) -> ValidationResult {
        ValidationResult::ok()
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut Vec<BlockInfo>,
        source: Option<&BlockInfo>,
        _ctx: &XmitContext,
    ) {
        if let Some(src) = source {
            xmit.push(src.clone());
        }
    }

    fn generate(
        &self,
        _bundle: &Bundle,
        block: &mut BlockInfo,
        _ctx: &XmitContext,
        last: bool,
    ) -> Result<(), CodecError> {
        regenerate_verbatim(block, last);
        Ok(())
    }
}

/// Previous-hop block (type 0x05): the EID of the node that sent the
/// bundle on this hop, encoded as `scheme NUL ssp NUL`.
pub struct PreviousHopBlockProcessor;

impl BlockProcessor for PreviousHopBlockProcessor {
    fn block_type(&self) -> u8 {
        PREVIOUS_HOP_BLOCK
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, CodecError> {
        let consumed = self.consume_into_contents(block, buf)?;
        if block.complete {
            let data = block.data();
            let mut parts = data.split(|&b| b == 0);
            let scheme = parts.next().unwrap_or_default();
            let ssp = parts.next().unwrap_or_default();
            let scheme = std::str::from_utf8(scheme)
                .map_err(|_| CodecError::Malformed("previous-hop scheme not utf-8".into()))?;
            let ssp = std::str::from_utf8(ssp)
                .map_err(|_| CodecError::Malformed("previous-hop ssp not utf-8".into()))?;
            bundle.prevhop = EndpointId::from_parts(scheme, ssp).ok();
        }
        Ok(consumed)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _blocks: &[BlockInfo],
        _block: &BlockInfo,
    ) -> ValidationResult {
        if bundle.prevhop.is_none() {
            return ValidationResult::delete(StatusReason::BlockUnintelligible);
        }
        ValidationResult::ok()
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut Vec<BlockInfo>,
        _source: Option<&BlockInfo>,
        ctx: &XmitContext,
    ) {
        // Always regenerated with our own EID, never copied through.
        if ctx.include_prevhop {
            xmit.push(BlockInfo::new(PREVIOUS_HOP_BLOCK));
        }
    }

    fn generate(
        &self,
        _bundle: &Bundle,
        block: &mut BlockInfo,
        ctx: &XmitContext,
        last: bool,
    ) -> Result<(), CodecError> {
        let mut data = Vec::new();
        data.extend_from_slice(ctx.local_eid.scheme().as_bytes());
        data.push(0);
        data.extend_from_slice(ctx.local_eid.ssp().as_bytes());
        data.push(0);
        block.data_length = data.len();
        block.generate_preamble(last);
        block.contents.extend_from_slice(&data);
        block.complete = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> XmitContext {
        XmitContext {
            local_eid: EndpointId::parse("dtn://relay.dtn").unwrap(),
            include_prevhop: true,
        }
    }

    #[test]
    fn prevhop_round_trip() {
        let p = PreviousHopBlockProcessor;
        let bundle = Bundle::empty();
        let mut block = BlockInfo::new(PREVIOUS_HOP_BLOCK);
        p.generate(&bundle, &mut block, &ctx(), false).unwrap();

        let mut rx = Bundle::empty();
        let mut rblock = BlockInfo::default();
        let n = p.consume(&mut rx, &mut rblock, &block.contents).unwrap();
        assert_eq!(n, block.contents.len());
        assert_eq!(
            rx.prevhop,
            Some(EndpointId::parse("dtn://relay.dtn").unwrap())
        );
    }

    #[test]
    fn unknown_preserved_with_forwarded_flag() {
        let p = UnknownBlockProcessor;
        // A block of unregistered type 0x42 carrying four data bytes.
        let mut rx = Bundle::empty();
        let mut rblock = BlockInfo::default();
        let wire = [0x42u8, 0x08, 0x04, 0xde, 0xad, 0xbe, 0xef]; // last-block set
        p.consume(&mut rx, &mut rblock, &wire).unwrap();
        assert!(rblock.complete);
        assert!(rblock.last_block());

        // Forward it mid-list: last flag cleared, forwarded flag set.
        let mut fwd = rblock.clone();
        p.generate(&rx, &mut fwd, &ctx(), false).unwrap();
        assert!(!fwd.last_block());
        assert!(fwd
            .block_flags()
            .contains(BlockFlags::FORWARDED_UNPROCESSED));
        assert_eq!(fwd.data(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn unknown_error_flags_drive_validation() {
        let p = UnknownBlockProcessor;
        let bundle = Bundle::empty();

        let mut block = BlockInfo::new(0x42);
        block.flags = BlockFlags::DELETE_BUNDLE_ON_ERROR.bits();
        assert!(p.validate(&bundle, &[], &block).is_fatal());

        block.flags = BlockFlags::DISCARD_BLOCK_ON_ERROR.bits();
        let r = p.validate(&bundle, &[], &block);
        assert!(!r.is_fatal());
        assert!(r.discard_block);

        block.flags = BlockFlags::REPORT_ON_ERROR.bits();
        let r = p.validate(&bundle, &[], &block);
        assert!(!r.is_fatal());
        assert_eq!(r.reception_reason, Some(StatusReason::BlockUnintelligible));
    }
}
