//! Administrative records: status reports and custody signals
//!
//! The only admin records this agent produces or consumes. A status
//! report is generated when a bundle's status-report-request flags ask
//! for one; a custody signal reports acceptance or refusal of custody
//! back to the current custodian.

use crate::eid::EndpointId;
use crate::sdnv;
use crate::types::{dtn_now, CreationTimestamp};

use super::bundle::Bundle;
use super::CodecError;

/// Admin record type codes (high nibble of the first payload byte).
pub const ADMIN_STATUS_REPORT: u8 = 0x01;
pub const ADMIN_CUSTODY_SIGNAL: u8 = 0x02;

/// Low-nibble flag: the record concerns a fragment.
pub const ADMIN_IS_FRAGMENT: u8 = 0x01;

/// Status flags within a status report.
pub const STATUS_RECEIVED: u8 = 1 << 0;
pub const STATUS_CUSTODY_ACCEPTED: u8 = 1 << 1;
pub const STATUS_FORWARDED: u8 = 1 << 2;
pub const STATUS_DELIVERED: u8 = 1 << 3;
pub const STATUS_DELETED: u8 = 1 << 4;
pub const STATUS_ACKED_BY_APP: u8 = 1 << 5;

/// Reason codes carried in status reports and deletion decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusReason {
    NoAdditionalInfo = 0,
    LifetimeExpired = 1,
    ForwardedOverUnidirectional = 2,
    TransmissionCancelled = 3,
    DepletedStorage = 4,
    EndpointIdUnintelligible = 5,
    NoRouteToDest = 6,
    NoTimelyContact = 7,
    BlockUnintelligible = 8,
}

impl StatusReason {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => StatusReason::LifetimeExpired,
            2 => StatusReason::ForwardedOverUnidirectional,
            3 => StatusReason::TransmissionCancelled,
            4 => StatusReason::DepletedStorage,
            5 => StatusReason::EndpointIdUnintelligible,
            6 => StatusReason::NoRouteToDest,
            7 => StatusReason::NoTimelyContact,
            8 => StatusReason::BlockUnintelligible,
            _ => StatusReason::NoAdditionalInfo,
        }
    }
}

/// Custody signal reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CustodyReason {
    NoAdditionalInfo = 0,
    RedundantReception = 3,
    DepletedStorage = 4,
    EndpointIdUnintelligible = 5,
    NoRouteToDest = 6,
    NoTimelyContact = 7,
    BlockUnintelligible = 8,
}

impl CustodyReason {
    pub fn from_u8(v: u8) -> Self {
        match v {
            3 => CustodyReason::RedundantReception,
            4 => CustodyReason::DepletedStorage,
            5 => CustodyReason::EndpointIdUnintelligible,
            6 => CustodyReason::NoRouteToDest,
            7 => CustodyReason::NoTimelyContact,
            8 => CustodyReason::BlockUnintelligible,
            _ => CustodyReason::NoAdditionalInfo,
        }
    }
}

/// Parsed status report payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status_flags: u8,
    pub reason: StatusReason,
    pub frag_offset: Option<u64>,
    pub frag_length: Option<u64>,
    /// One (secs-since-DTN-epoch, seqno 0) time per set status flag,
    /// in flag-bit order.
    pub times: Vec<u64>,
    pub orig_creation_ts: CreationTimestamp,
    pub orig_source: EndpointId,
}

impl StatusReport {
    /// Build a report about `orig` with the given flags and reason.
    pub fn about(orig: &Bundle, status_flags: u8, reason: StatusReason) -> Self {
        let now = dtn_now();
        Self {
            status_flags,
            reason,
            frag_offset: orig.is_fragment.then_some(orig.frag_offset),
            frag_length: orig.is_fragment.then(|| orig.payload.len()),
            times: (0..6)
                .filter(|bit| status_flags & (1 << bit) != 0)
                .map(|_| now)
                .collect(),
            orig_creation_ts: orig.creation_ts,
            orig_source: orig.source.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        let mut first = ADMIN_STATUS_REPORT << 4;
        if self.frag_offset.is_some() {
            first |= ADMIN_IS_FRAGMENT;
        }
        out.push(first);
        out.push(self.status_flags);
        out.push(self.reason as u8);
        if let (Some(off), Some(len)) = (self.frag_offset, self.frag_length) {
            sdnv::append(off, &mut out);
            sdnv::append(len, &mut out);
        }
        for t in &self.times {
            sdnv::append(*t, &mut out);
            sdnv::append(0, &mut out);
        }
        sdnv::append(self.orig_creation_ts.secs, &mut out);
        sdnv::append(self.orig_creation_ts.seqno, &mut out);
        let uri = self.orig_source.uri();
        sdnv::append(uri.len() as u64, &mut out);
        out.extend_from_slice(uri.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = AdminReader::new(buf);
        let first = r.byte()?;
        if first >> 4 != ADMIN_STATUS_REPORT {
            return Err(CodecError::Malformed("not a status report".into()));
        }
        let for_fragment = first & ADMIN_IS_FRAGMENT != 0;
        let status_flags = r.byte()?;
        let reason = StatusReason::from_u8(r.byte()?);
        let (frag_offset, frag_length) = if for_fragment {
            (Some(r.sdnv()?), Some(r.sdnv()?))
        } else {
            (None, None)
        };
        let mut times = Vec::new();
        for bit in 0..6 {
            if status_flags & (1 << bit) != 0 {
                times.push(r.sdnv()?);
                r.sdnv()?; // sub-second part, unused
            }
        }
        let secs = r.sdnv()?;
        let seqno = r.sdnv()?;
        let orig_source = r.eid()?;
        Ok(Self {
            status_flags,
            reason,
            frag_offset,
            frag_length,
            times,
            orig_creation_ts: CreationTimestamp::new(secs, seqno),
            orig_source,
        })
    }
}

/// Parsed custody signal payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustodySignal {
    pub succeeded: bool,
    pub reason: CustodyReason,
    pub frag_offset: Option<u64>,
    pub frag_length: Option<u64>,
    pub signal_time: u64,
    pub orig_creation_ts: CreationTimestamp,
    pub orig_source: EndpointId,
}

impl CustodySignal {
    pub fn about(orig: &Bundle, succeeded: bool, reason: CustodyReason) -> Self {
        Self {
            succeeded,
            reason,
            frag_offset: orig.is_fragment.then_some(orig.frag_offset),
            frag_length: orig.is_fragment.then(|| orig.payload.len()),
            signal_time: dtn_now(),
            orig_creation_ts: orig.creation_ts,
            orig_source: orig.source.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48);
        let mut first = ADMIN_CUSTODY_SIGNAL << 4;
        if self.frag_offset.is_some() {
            first |= ADMIN_IS_FRAGMENT;
        }
        out.push(first);
        let mut status = self.reason as u8 & 0x7f;
        if self.succeeded {
            status |= 0x80;
        }
        out.push(status);
        if let (Some(off), Some(len)) = (self.frag_offset, self.frag_length) {
            sdnv::append(off, &mut out);
            sdnv::append(len, &mut out);
        }
        sdnv::append(self.signal_time, &mut out);
        sdnv::append(0, &mut out);
        sdnv::append(self.orig_creation_ts.secs, &mut out);
        sdnv::append(self.orig_creation_ts.seqno, &mut out);
        let uri = self.orig_source.uri();
        sdnv::append(uri.len() as u64, &mut out);
        out.extend_from_slice(uri.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = AdminReader::new(buf);
        let first = r.byte()?;
        if first >> 4 != ADMIN_CUSTODY_SIGNAL {
            return Err(CodecError::Malformed("not a custody signal".into()));
        }
        let for_fragment = first & ADMIN_IS_FRAGMENT != 0;
        let status = r.byte()?;
        let (frag_offset, frag_length) = if for_fragment {
            (Some(r.sdnv()?), Some(r.sdnv()?))
        } else {
            (None, None)
        };
        let signal_time = r.sdnv()?;
        r.sdnv()?;
        let secs = r.sdnv()?;
        let seqno = r.sdnv()?;
        let orig_source = r.eid()?;
        Ok(Self {
            succeeded: status & 0x80 != 0,
            reason: CustodyReason::from_u8(status & 0x7f),
            frag_offset,
            frag_length,
            signal_time,
            orig_creation_ts: CreationTimestamp::new(secs, seqno),
            orig_source,
        })
    }
}

/// Peek the admin record type of a payload without a full parse.
pub fn admin_record_type(payload: &[u8]) -> Option<u8> {
    payload.first().map(|b| b >> 4)
}

/// Wrap an admin record payload in a new bundle addressed to `dest`.
pub fn admin_bundle(local_eid: &EndpointId, dest: EndpointId, payload: Vec<u8>, lifetime: u64) -> Bundle {
    let mut bundle = Bundle::new(local_eid.clone(), dest, lifetime);
    bundle.is_admin = true;
    bundle.payload = super::bundle::Payload::in_memory(payload);
    bundle
}

struct AdminReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> AdminReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::Incomplete)?;
        self.pos += 1;
        Ok(b)
    }

    fn sdnv(&mut self) -> Result<u64, CodecError> {
        let (v, n) = sdnv::decode(&self.buf[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    fn eid(&mut self) -> Result<EndpointId, CodecError> {
        let len = self.sdnv()? as usize;
        if self.buf.len() - self.pos < len {
            return Err(CodecError::Incomplete);
        }
        let s = std::str::from_utf8(&self.buf[self.pos..self.pos + len])
            .map_err(|_| CodecError::Malformed("eid is not utf-8".into()))?;
        self.pos += len;
        EndpointId::parse(s).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
