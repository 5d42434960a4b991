//! Payload block (RFC 5050 §4.5.2)
//!
//! Standard preamble; the data bytes are the application payload.
//! `consume` streams arriving bytes straight into the bundle's payload
//! storage instead of accumulating them in the block buffer, so a
//! large payload never lives twice in memory.

use super::block::{BlockInfo, PAYLOAD_BLOCK};
use super::bundle::Bundle;
use super::processor::{consume_preamble, BlockProcessor, ValidationResult, XmitContext};
use super::status::StatusReason;
use super::CodecError;

pub struct PayloadBlockProcessor;

impl BlockProcessor for PayloadBlockProcessor {
    fn block_type(&self) -> u8 {
        PAYLOAD_BLOCK
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
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
        let want = block.data_length - block.data_received;
        let take = want.min(buf.len() - consumed);
        bundle
            .payload
            .append(&buf[consumed..consumed + take])
            .map_err(|e| CodecError::Malformed(format!("payload write failed: {}", e)))?;
        block.data_received += take;
        consumed += take;
        if block.data_received == block.data_length {
            block.complete = true;
        }
        Ok(consumed)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _blocks: &[BlockInfo],
        block: &BlockInfo,
    ) -> ValidationResult {
        if bundle.payload.len() < block.data_length as u64 {
            return ValidationResult::delete(StatusReason::BlockUnintelligible);
        }
        ValidationResult::ok()
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut Vec<BlockInfo>,
        source: Option<&BlockInfo>,
        _ctx: &XmitContext,
    ) {
        let mut block = BlockInfo::new(PAYLOAD_BLOCK);
        if let Some(src) = source {
            block.flags = src.flags;
        }
        xmit.push(block);
    }

    /// Writes the preamble only; the serialiser appends the payload
    /// bytes from storage when the bundle goes on the wire.
    fn generate(
        &self,
        bundle: &Bundle,
        block: &mut BlockInfo,
        _ctx: &XmitContext,
        last: bool,
    ) -> Result<(), CodecError> {
        block.data_length = usize::try_from(bundle.payload.len())
            .map_err(|_| CodecError::Malformed("payload too large".into()))?;
        block.generate_preamble(last);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::bundle::Payload;
    use crate::eid::EndpointId;

    fn ctx() -> XmitContext {
        XmitContext {
            local_eid: EndpointId::parse("dtn://a.dtn").unwrap(),
            include_prevhop: false,
        }
    }

    #[test]
    fn streams_into_payload_storage() {
        let mut sender = Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse("dtn://b.dtn/app").unwrap(),
            60,
        );
        sender.payload = Payload::in_memory(b"hello fragment world".to_vec());

        let p = PayloadBlockProcessor;
        let mut block = BlockInfo::new(PAYLOAD_BLOCK);
        p.generate(&sender, &mut block, &ctx(), true).unwrap();

        let mut wire = block.contents.clone();
        wire.extend_from_slice(&sender.payload.read_all().unwrap());

        let mut receiver = Bundle::empty();
        let mut rblock = BlockInfo::default();
        // Feed in awkward chunk sizes.
        let mut fed = 0;
        for chunk in wire.chunks(3) {
            fed += p.consume(&mut receiver, &mut rblock, chunk).unwrap();
        }
        assert_eq!(fed, wire.len());
        assert!(rblock.complete);
        assert!(rblock.last_block());
        assert_eq!(receiver.payload.read_all().unwrap(), b"hello fragment world");
        // The block buffer holds only the preamble.
        assert_eq!(rblock.contents.len(), rblock.data_offset);
    }
}
