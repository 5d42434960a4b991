//! The in-memory bundle record
//!
//! Bundles are owned by the store and referred to everywhere else by
//! their local `u32` id; queues, registrations and routers never hold
//! the record itself. A record is deleted when nothing references it,
//! the router agrees, and no convergence layer has it on the wire.

use crate::eid::EndpointId;
use crate::types::{next_bundle_id, BundleId, CreationTimestamp, Priority};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use super::block::BlockInfo;
use super::fwdlog::ForwardingLog;

/// Payload bytes, either held in memory or spilled to a file named by
/// the bundle id.
///
/// Readers may share the file concurrently; writes happen only on the
/// receive path and during reassembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    Memory(Vec<u8>),
    Disk { path: PathBuf, len: u64 },
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Memory(Vec::new())
    }
}

impl Payload {
    pub fn in_memory(data: Vec<u8>) -> Self {
        Payload::Memory(data)
    }

    pub fn on_disk(path: PathBuf) -> std::io::Result<Self> {
        let len = match std::fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                File::create(&path)?;
                0
            }
            Err(e) => return Err(e),
        };
        Ok(Payload::Disk { path, len })
    }

    pub fn len(&self) -> u64 {
        match self {
            Payload::Memory(data) => data.len() as u64,
            Payload::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Payload::Memory(data) => {
                data.extend_from_slice(bytes);
                Ok(())
            }
            Payload::Disk { path, len } => {
                let mut f = OpenOptions::new().append(true).open(path)?;
                f.write_all(bytes)?;
                *len += bytes.len() as u64;
                Ok(())
            }
        }
    }

    /// Write `bytes` at `offset`, growing the payload if needed.
    /// Reassembly fills fragments in whatever order they arrive.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Payload::Memory(data) => {
                let end = (offset as usize).saturating_add(bytes.len());
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[offset as usize..end].copy_from_slice(bytes);
                Ok(())
            }
            Payload::Disk { path, len } => {
                let mut f = OpenOptions::new().write(true).open(path)?;
                f.seek(SeekFrom::Start(offset))?;
                f.write_all(bytes)?;
                *len = (*len).max(offset + bytes.len() as u64);
                Ok(())
            }
        }
    }

    pub fn read_all(&self) -> std::io::Result<Vec<u8>> {
        self.read_range(0, self.len())
    }

    pub fn read_range(&self, offset: u64, length: u64) -> std::io::Result<Vec<u8>> {
        match self {
            Payload::Memory(data) => {
                let start = offset.min(data.len() as u64) as usize;
                let end = (offset + length).min(data.len() as u64) as usize;
                Ok(data[start..end].to_vec())
            }
            Payload::Disk { path, len } => {
                let mut f = File::open(path)?;
                f.seek(SeekFrom::Start(offset))?;
                let to_read = length.min(len.saturating_sub(offset));
                let mut buf = vec![0u8; to_read as usize];
                f.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }

    pub fn set(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Payload::Memory(data) => {
                data.clear();
                data.extend_from_slice(bytes);
                Ok(())
            }
            Payload::Disk { path, len } => {
                std::fs::write(path, bytes)?;
                *len = bytes.len() as u64;
                Ok(())
            }
        }
    }

    /// Remove the backing file, if any. Called when the bundle record
    /// is deleted from the store.
    pub fn remove_backing(&self) -> std::io::Result<()> {
        if let Payload::Disk { path, .. } = self {
            match std::fs::remove_file(path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }
}

/// A bundle as this agent knows it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,

    pub source: EndpointId,
    pub dest: EndpointId,
    pub replyto: EndpointId,
    /// `dtn:none` unless some node holds custody.
    pub custodian: EndpointId,
    /// EID of the node this bundle most recently arrived from, when
    /// the sender included a previous-hop block.
    pub prevhop: Option<EndpointId>,

    pub creation_ts: CreationTimestamp,
    /// Lifetime in seconds relative to creation.
    pub expiration: u64,

    pub is_fragment: bool,
    pub is_admin: bool,
    pub do_not_fragment: bool,
    pub custody_requested: bool,
    pub singleton_dest: bool,
    pub app_ack_requested: bool,

    pub priority: Priority,

    pub receive_rcpt: bool,
    pub custody_rcpt: bool,
    pub forward_rcpt: bool,
    pub delivery_rcpt: bool,
    pub deletion_rcpt: bool,

    /// Zero unless `is_fragment`.
    pub frag_offset: u64,
    /// Length of the original application data unit; zero unless
    /// `is_fragment`.
    pub orig_length: u64,

    pub payload: Payload,

    /// Blocks exactly as they arrived, primary first. Empty for
    /// locally sourced bundles.
    pub recv_blocks: Vec<BlockInfo>,

    pub fwd_log: ForwardingLog,

    /// This node has accepted custody.
    pub local_custody: bool,
}

impl Bundle {
    pub fn new(source: EndpointId, dest: EndpointId, expiration: u64) -> Self {
        Self {
            id: next_bundle_id(),
            source,
            dest,
            replyto: EndpointId::null(),
            custodian: EndpointId::null(),
            prevhop: None,
            creation_ts: CreationTimestamp::now(),
            expiration,
            is_fragment: false,
            is_admin: false,
            do_not_fragment: false,
            custody_requested: false,
            singleton_dest: true,
            app_ack_requested: false,
            priority: Priority::Normal,
            receive_rcpt: false,
            custody_rcpt: false,
            forward_rcpt: false,
            delivery_rcpt: false,
            deletion_rcpt: false,
            frag_offset: 0,
            orig_length: 0,
            payload: Payload::default(),
            recv_blocks: Vec::new(),
            fwd_log: ForwardingLog::new(),
            local_custody: false,
        }
    }

    /// Fresh record for the receive path; fields are filled in by the
    /// primary block parser.
    pub fn empty() -> Self {
        Self::new(EndpointId::null(), EndpointId::null(), 0)
    }

    /// (source, creation timestamp) — globally unique per RFC 5050,
    /// shared by all fragments of one original bundle.
    pub fn gbof_key(&self) -> (String, CreationTimestamp) {
        (self.source.uri(), self.creation_ts)
    }

    /// Seconds-since-DTN-epoch moment at which this bundle expires.
    pub fn expiration_time(&self) -> u64 {
        self.creation_ts.secs + self.expiration
    }

    pub fn is_expired(&self, dtn_now: u64) -> bool {
        dtn_now >= self.expiration_time()
    }

    /// Copy the routing-relevant metadata onto a fragment or a
    /// reassembled bundle. Block lists, payload and log stay behind.
    pub fn copy_metadata(&self, to: &mut Bundle) {
        to.source = self.source.clone();
        to.dest = self.dest.clone();
        to.replyto = self.replyto.clone();
        to.custodian = self.custodian.clone();
        to.creation_ts = self.creation_ts;
        to.expiration = self.expiration;
        to.is_admin = self.is_admin;
        to.do_not_fragment = self.do_not_fragment;
        to.custody_requested = self.custody_requested;
        to.singleton_dest = self.singleton_dest;
        to.app_ack_requested = self.app_ack_requested;
        to.priority = self.priority;
        to.receive_rcpt = self.receive_rcpt;
        to.custody_rcpt = self.custody_rcpt;
        to.forward_rcpt = self.forward_rcpt;
        to.delivery_rcpt = self.delivery_rcpt;
        to.deletion_rcpt = self.deletion_rcpt;
    }
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "bundle-{} [{} -> {} ts {}{}]",
            self.id,
            self.source,
            self.dest,
            self.creation_ts,
            if self.is_fragment {
                format!(" frag {}+{}/{}", self.frag_offset, self.payload.len(), self.orig_length)
            } else {
                String::new()
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_write_at_grows() {
        let mut p = Payload::default();
        p.write_at(4, b"tail").unwrap();
        p.write_at(0, b"head").unwrap();
        assert_eq!(p.read_all().unwrap(), b"headtail");
    }

    #[test]
    fn payload_read_range() {
        let p = Payload::in_memory(b"0123456789".to_vec());
        assert_eq!(p.read_range(2, 3).unwrap(), b"234");
        assert_eq!(p.read_range(8, 10).unwrap(), b"89");
    }

    #[test]
    fn fragment_invariant_defaults() {
        let b = Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse("dtn://b.dtn/app").unwrap(),
            60,
        );
        assert!(!b.is_fragment);
        assert_eq!(b.frag_offset, 0);
        assert_eq!(b.orig_length, 0);
        assert!(b.custodian.is_null());
    }

    #[test]
    fn expiry() {
        let mut b = Bundle::new(
            EndpointId::parse("dtn://a.dtn/app").unwrap(),
            EndpointId::parse("dtn://b.dtn/app").unwrap(),
            100,
        );
        b.creation_ts = CreationTimestamp::new(1000, 0);
        assert!(!b.is_expired(1099));
        assert!(b.is_expired(1100));
    }
}
