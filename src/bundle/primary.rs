//! Primary block (RFC 5050 §4.5)
//!
//! The primary block has no preamble: version byte, processing flags
//! SDNV, a block-length SDNV covering the remainder, eight dictionary
//! offsets, creation timestamp, lifetime, the dictionary itself, and
//! the fragment fields. Every read during parsing is bounded both by
//! the available bytes and by the declared block length, so malformed
//! input can never drive allocation past the declared size.

use crate::eid::EndpointId;
use crate::sdnv;
use crate::types::{CreationTimestamp, Priority};

use super::block::{BlockInfo, PRIMARY_BLOCK};
use super::bundle::Bundle;
use super::processor::{BlockProcessor, ValidationResult, XmitContext};
use super::status::StatusReason;
use super::CodecError;

/// Version this agent speaks.
pub const BUNDLE_VERSION: u8 = 6;

/// Upper bound on the declared primary block length. The dictionary
/// is the only variable part and holds at most eight URIs.
const MAX_PRIMARY_LEN: u64 = 64 * 1024;

// Bundle processing flag bits.
const FLAG_IS_FRAGMENT: u64 = 1 << 0;
const FLAG_IS_ADMIN: u64 = 1 << 1;
const FLAG_DO_NOT_FRAGMENT: u64 = 1 << 2;
const FLAG_CUSTODY_REQUESTED: u64 = 1 << 3;
const FLAG_SINGLETON_DEST: u64 = 1 << 4;
const FLAG_APP_ACK_REQUESTED: u64 = 1 << 5;
const PRIORITY_SHIFT: u64 = 7;
const FLAG_RECEIVE_SRR: u64 = 1 << 14;
const FLAG_CUSTODY_SRR: u64 = 1 << 15;
const FLAG_FORWARD_SRR: u64 = 1 << 16;
const FLAG_DELIVERY_SRR: u64 = 1 << 17;
const FLAG_DELETION_SRR: u64 = 1 << 18;

pub struct PrimaryBlockProcessor;

impl PrimaryBlockProcessor {
    /// Assemble the processing-flags word from the bundle record.
    pub fn format_flags(bundle: &Bundle) -> u64 {
        let mut flags = 0;
        if bundle.is_fragment {
            flags |= FLAG_IS_FRAGMENT;
        }
        if bundle.is_admin {
            flags |= FLAG_IS_ADMIN;
        }
        if bundle.do_not_fragment {
            flags |= FLAG_DO_NOT_FRAGMENT;
        }
        if bundle.custody_requested {
            flags |= FLAG_CUSTODY_REQUESTED;
        }
        if bundle.singleton_dest {
            flags |= FLAG_SINGLETON_DEST;
        }
        if bundle.app_ack_requested {
            flags |= FLAG_APP_ACK_REQUESTED;
        }
        flags |= bundle.priority.bits() << PRIORITY_SHIFT;
        if bundle.receive_rcpt {
            flags |= FLAG_RECEIVE_SRR;
        }
        if bundle.custody_rcpt {
            flags |= FLAG_CUSTODY_SRR;
        }
        if bundle.forward_rcpt {
            flags |= FLAG_FORWARD_SRR;
        }
        if bundle.delivery_rcpt {
            flags |= FLAG_DELIVERY_SRR;
        }
        if bundle.deletion_rcpt {
            flags |= FLAG_DELETION_SRR;
        }
        flags
    }

    fn apply_flags(bundle: &mut Bundle, flags: u64) {
        bundle.is_fragment = flags & FLAG_IS_FRAGMENT != 0;
        bundle.is_admin = flags & FLAG_IS_ADMIN != 0;
        bundle.do_not_fragment = flags & FLAG_DO_NOT_FRAGMENT != 0;
        bundle.custody_requested = flags & FLAG_CUSTODY_REQUESTED != 0;
        bundle.singleton_dest = flags & FLAG_SINGLETON_DEST != 0;
        bundle.app_ack_requested = flags & FLAG_APP_ACK_REQUESTED != 0;
        bundle.priority = Priority::from_bits(flags >> PRIORITY_SHIFT);
        bundle.receive_rcpt = flags & FLAG_RECEIVE_SRR != 0;
        bundle.custody_rcpt = flags & FLAG_CUSTODY_SRR != 0;
        bundle.forward_rcpt = flags & FLAG_FORWARD_SRR != 0;
        bundle.delivery_rcpt = flags & FLAG_DELIVERY_SRR != 0;
        bundle.deletion_rcpt = flags & FLAG_DELETION_SRR != 0;
    }

    /// Try to learn the total on-wire length from the accumulated
    /// front of the block. `None` means more bytes are needed.
    fn total_length(contents: &[u8]) -> Result<Option<usize>, CodecError> {
        if contents.is_empty() {
            return Ok(None);
        }
        if contents[0] != BUNDLE_VERSION {
            return Err(CodecError::Malformed(format!(
                "unsupported bundle protocol version {}",
                contents[0]
            )));
        }
        let mut pos = 1;
        match sdnv::decode(&contents[pos..]) {
            Ok((_, n)) => pos += n,
            Err(sdnv::SdnvError::Incomplete) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let block_len = match sdnv::decode(&contents[pos..]) {
            Ok((v, n)) => {
                pos += n;
                v
            }
            Err(sdnv::SdnvError::Incomplete) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if block_len > MAX_PRIMARY_LEN {
            return Err(CodecError::Malformed(format!(
                "primary block length {} exceeds limit",
                block_len
            )));
        }
        Ok(Some(pos + block_len as usize))
    }

    /// Full parse of a completely received primary block.
    fn parse(bundle: &mut Bundle, contents: &[u8]) -> Result<(), CodecError> {
        let mut r = BoundedReader::new(contents);
        r.byte()?; // version, checked in total_length
        let flags = r.sdnv()?;
        let block_len = r.sdnv()?;
        r.bound(block_len as usize)?;

        Self::apply_flags(bundle, flags);

        let dest_scheme = r.offset()?;
        let dest_ssp = r.offset()?;
        let src_scheme = r.offset()?;
        let src_ssp = r.offset()?;
        let replyto_scheme = r.offset()?;
        let replyto_ssp = r.offset()?;
        let cust_scheme = r.offset()?;
        let cust_ssp = r.offset()?;

        let secs = r.sdnv()?;
        let seqno = r.sdnv()?;
        bundle.creation_ts = CreationTimestamp::new(secs, seqno);
        bundle.expiration = r.sdnv()?;

        let dict_len = r.sdnv()? as usize;
        let dict = r.bytes(dict_len)?.to_vec();
        if dict.last() != Some(&0) {
            return Err(CodecError::Malformed(
                "dictionary does not end in NUL".into(),
            ));
        }

        bundle.dest = extract_eid(&dict, dest_scheme, dest_ssp)?;
        bundle.source = extract_eid(&dict, src_scheme, src_ssp)?;
        bundle.replyto = extract_eid(&dict, replyto_scheme, replyto_ssp)?;
        bundle.custodian = extract_eid(&dict, cust_scheme, cust_ssp)?;

        if bundle.is_fragment {
            bundle.frag_offset = r.sdnv()?;
            bundle.orig_length = r.sdnv()?;
        } else {
            bundle.frag_offset = 0;
            bundle.orig_length = 0;
        }
        Ok(())
    }
}

impl BlockProcessor for PrimaryBlockProcessor {
    fn block_type(&self) -> u8 {
        PRIMARY_BLOCK
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, CodecError> {
        let mut consumed = 0;
        // Accumulate byte-wise until the length-carrying front parses.
        if block.data_length == 0 {
            while consumed < buf.len() {
                block.contents.push(buf[consumed]);
                consumed += 1;
                if let Some(total) = Self::total_length(&block.contents)? {
                    block.data_length = total;
                    break;
                }
            }
            if block.data_length == 0 {
                return Ok(consumed);
            }
        }
        let want = block.data_length - block.contents.len();
        let take = want.min(buf.len() - consumed);
        block
            .contents
            .extend_from_slice(&buf[consumed..consumed + take]);
        consumed += take;
        if block.contents.len() == block.data_length {
            let contents = std::mem::take(&mut block.contents);
            Self::parse(bundle, &contents)?;
            block.contents = contents;
            block.complete = true;
        }
        Ok(consumed)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _blocks: &[BlockInfo],
        _block: &BlockInfo,
    ) -> ValidationResult {
        if !bundle.is_fragment && (bundle.frag_offset != 0 || bundle.orig_length != 0) {
            return ValidationResult::delete(StatusReason::BlockUnintelligible);
        }
        if bundle.is_fragment && bundle.frag_offset + bundle.payload.len() > bundle.orig_length {
            return ValidationResult::delete(StatusReason::BlockUnintelligible);
        }
        ValidationResult::ok()
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit: &mut Vec<BlockInfo>,
        _source: Option<&BlockInfo>,
        _ctx: &XmitContext,
    ) {
        // The primary block always leads the outgoing list.
        xmit.insert(0, BlockInfo::new(PRIMARY_BLOCK));
    }

    fn generate(
        &self,
        bundle: &Bundle,
        block: &mut BlockInfo,
        _ctx: &XmitContext,
        _last: bool,
    ) -> Result<(), CodecError> {
        let mut dict = Dictionary::new();
        let (dest_scheme, dest_ssp) = dict.add_eid(&bundle.dest);
        let (src_scheme, src_ssp) = dict.add_eid(&bundle.source);
        let (replyto_scheme, replyto_ssp) = dict.add_eid(&bundle.replyto);
        let (cust_scheme, cust_ssp) = dict.add_eid(&bundle.custodian);
        let dict_bytes = dict.into_bytes();

        let mut body = Vec::with_capacity(64 + dict_bytes.len());
        for off in [
            dest_scheme,
            dest_ssp,
            src_scheme,
            src_ssp,
            replyto_scheme,
            replyto_ssp,
            cust_scheme,
            cust_ssp,
        ] {
            sdnv::append(off, &mut body);
        }
        sdnv::append(bundle.creation_ts.secs, &mut body);
        sdnv::append(bundle.creation_ts.seqno, &mut body);
        sdnv::append(bundle.expiration, &mut body);
        sdnv::append(dict_bytes.len() as u64, &mut body);
        body.extend_from_slice(&dict_bytes);
        if bundle.is_fragment {
            sdnv::append(bundle.frag_offset, &mut body);
            sdnv::append(bundle.orig_length, &mut body);
        }

        let mut out = Vec::with_capacity(2 + 2 * sdnv::MAX_LENGTH + body.len());
        out.push(BUNDLE_VERSION);
        sdnv::append(Self::format_flags(bundle), &mut out);
        sdnv::append(body.len() as u64, &mut out);
        out.extend_from_slice(&body);

        block.data_offset = 0;
        block.data_length = out.len();
        block.contents = out;
        block.complete = true;
        Ok(())
    }
}

/// Dictionary of NUL-terminated strings, each unique string stored
/// once; offsets are byte positions within the assembled bytes.
struct Dictionary {
    strings: Vec<String>,
}

impl Dictionary {
    fn new() -> Self {
        Self {
            strings: Vec::with_capacity(8),
        }
    }

    fn add(&mut self, s: &str) -> u64 {
        let mut off = 0u64;
        for existing in &self.strings {
            if existing == s {
                return off;
            }
            off += existing.len() as u64 + 1;
        }
        self.strings.push(s.to_string());
        off
    }

    fn add_eid(&mut self, eid: &EndpointId) -> (u64, u64) {
        (self.add(eid.scheme()), self.add(eid.ssp()))
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::new();
        for s in self.strings {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        out
    }
}

/// Pull a NUL-terminated string pair out of the dictionary, checking
/// every offset against the dictionary bounds.
fn extract_eid(dict: &[u8], scheme_off: u64, ssp_off: u64) -> Result<EndpointId, CodecError> {
    let scheme = dict_str(dict, scheme_off)?;
    let ssp = dict_str(dict, ssp_off)?;
    EndpointId::from_parts(scheme, ssp).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn dict_str(dict: &[u8], off: u64) -> Result<&str, CodecError> {
    if off > u16::MAX as u64 || off as usize >= dict.len() {
        return Err(CodecError::Malformed(format!(
            "dictionary offset {} out of range",
            off
        )));
    }
    let start = off as usize;
    let end = dict[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .ok_or_else(|| CodecError::Malformed("unterminated dictionary string".into()))?;
    std::str::from_utf8(&dict[start..end])
        .map_err(|_| CodecError::Malformed("dictionary string is not utf-8".into()))
}

/// Reader over a fully received primary block that refuses to read
/// past the declared block length.
struct BoundedReader<'a> {
    buf: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> BoundedReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            limit: buf.len(),
        }
    }

    /// Restrict further reads to `len` bytes past the current position.
    fn bound(&mut self, len: usize) -> Result<(), CodecError> {
        let end = self.pos.saturating_add(len);
        if end > self.buf.len() {
            return Err(CodecError::Malformed(
                "primary block length exceeds received bytes".into(),
            ));
        }
        self.limit = end;
        Ok(())
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        if self.pos >= self.limit {
            return Err(CodecError::Malformed("read past primary block end".into()));
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn sdnv(&mut self) -> Result<u64, CodecError> {
        let (v, n) = sdnv::decode(&self.buf[self.pos..self.limit]).map_err(|e| match e {
            sdnv::SdnvError::Incomplete => {
                CodecError::Malformed("truncated SDNV in primary block".into())
            }
            other => other.into(),
        })?;
        self.pos += n;
        Ok(v)
    }

    /// Dictionary offsets fit in 16 bits.
    fn offset(&mut self) -> Result<u64, CodecError> {
        let v = self.sdnv()?;
        if v > u16::MAX as u64 {
            return Err(CodecError::Malformed(format!(
                "dictionary offset {} exceeds 16 bits",
                v
            )));
        }
        Ok(v)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.limit - self.pos < len {
            return Err(CodecError::Malformed(
                "dictionary extends past primary block end".into(),
            ));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}
