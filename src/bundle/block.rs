//! Block representation and the per-block preamble
//!
//! Every block except the primary starts with a preamble: one type
//! byte, an SDNV of processing flags, and an SDNV of the data length.
//! A [`BlockInfo`] holds the exact on-wire bytes for received blocks
//! and ready-to-send bytes for generated ones.

use crate::sdnv;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::CodecError;

/// Well-known block type codes.
pub const PRIMARY_BLOCK: u8 = 0x00;
pub const PAYLOAD_BLOCK: u8 = 0x01;
pub const BUNDLE_AUTHENTICATION_BLOCK: u8 = 0x02;
pub const PAYLOAD_SECURITY_BLOCK: u8 = 0x03;
pub const CONFIDENTIALITY_BLOCK: u8 = 0x04;
pub const PREVIOUS_HOP_BLOCK: u8 = 0x05;
pub const EXTENSION_SECURITY_BLOCK: u8 = 0x09;

bitflags! {
    /// Block processing control flags (RFC 5050 §4.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u64 {
        const REPLICATE              = 1 << 0;
        const REPORT_ON_ERROR        = 1 << 1;
        const DELETE_BUNDLE_ON_ERROR = 1 << 2;
        const LAST_BLOCK             = 1 << 3;
        const DISCARD_BLOCK_ON_ERROR = 1 << 4;
        const FORWARDED_UNPROCESSED  = 1 << 5;
        const EID_REFS               = 1 << 6;
    }
}

/// One element of a bundle's block list.
///
/// For received bundles `contents` accumulates the exact on-wire
/// bytes as they arrive; `data_offset`/`data_length` delimit the data
/// portion once the preamble has been parsed. The payload block is
/// the exception: its data bytes stream into the bundle's payload
/// storage and `data_received` counts them instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_type: u8,
    pub flags: u64,
    pub contents: Vec<u8>,
    pub data_offset: usize,
    pub data_length: usize,
    pub data_received: usize,
    pub complete: bool,
}

impl BlockInfo {
    pub fn new(block_type: u8) -> Self {
        Self {
            block_type,
            ..Default::default()
        }
    }

    pub fn block_flags(&self) -> BlockFlags {
        BlockFlags::from_bits_truncate(self.flags)
    }

    pub fn set_flag(&mut self, flag: BlockFlags) {
        self.flags |= flag.bits();
    }

    pub fn clear_flag(&mut self, flag: BlockFlags) {
        self.flags &= !flag.bits();
    }

    pub fn last_block(&self) -> bool {
        self.block_flags().contains(BlockFlags::LAST_BLOCK)
    }

    /// The data portion of a fully received non-payload block.
    pub fn data(&self) -> &[u8] {
        &self.contents[self.data_offset..self.data_offset + self.data_length]
    }

    /// Full on-wire length once the preamble is known.
    pub fn full_length(&self) -> usize {
        self.data_offset + self.data_length
    }

    /// True once enough of the preamble has arrived to know the data
    /// offset and length.
    pub fn preamble_parsed(&self) -> bool {
        self.data_offset != 0
    }

    /// Try to parse the preamble from the accumulated `contents`.
    ///
    /// Returns `Ok(true)` when the preamble is complete (fields are
    /// filled in), `Ok(false)` when more bytes are needed.
    pub fn parse_preamble(&mut self) -> Result<bool, CodecError> {
        let buf = &self.contents[..];
        if buf.is_empty() {
            return Ok(false);
        }
        let mut off = 1; // type byte
        let (flags, n) = match sdnv::decode(&buf[off..]) {
            Ok(v) => v,
            Err(sdnv::SdnvError::Incomplete) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        off += n;
        let (len, n) = match sdnv::decode(&buf[off..]) {
            Ok(v) => v,
            Err(sdnv::SdnvError::Incomplete) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        off += n;

        self.block_type = buf[0];
        self.flags = flags;
        self.data_offset = off;
        self.data_length = usize::try_from(len)
            .map_err(|_| CodecError::Malformed("block length exceeds usize".into()))?;
        Ok(true)
    }

    /// Write a preamble for this block into a fresh contents buffer.
    pub fn generate_preamble(&mut self, last: bool) {
        if last {
            self.set_flag(BlockFlags::LAST_BLOCK);
        } else {
            self.clear_flag(BlockFlags::LAST_BLOCK);
        }
        let mut out = Vec::with_capacity(1 + 2 * sdnv::MAX_LENGTH);
        out.push(self.block_type);
        sdnv::append(self.flags, &mut out);
        sdnv::append(self.data_length as u64, &mut out);
        self.data_offset = out.len();
        self.contents = out;
    }
}
