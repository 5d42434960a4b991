//! Shared types: bundle ids, DTN timestamps, priorities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Locally assigned bundle identifier. Monotonically increasing,
/// never reused within one agent lifetime.
pub type BundleId = u32;

/// Seconds between the Unix epoch and the DTN epoch (2000-01-01T00:00:00Z).
pub const DTN_EPOCH_OFFSET: u64 = 946_684_800;

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current time in seconds since the DTN epoch.
pub fn dtn_now() -> u64 {
    now().saturating_sub(DTN_EPOCH_OFFSET)
}

static LAST_TS_SECS: AtomicU64 = AtomicU64::new(0);
static TS_SEQNO: AtomicU32 = AtomicU32::new(0);
static NEXT_BUNDLE_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate the next local bundle id.
pub fn next_bundle_id() -> BundleId {
    NEXT_BUNDLE_ID.fetch_add(1, Ordering::SeqCst)
}

/// Creation timestamp: seconds since the DTN epoch plus a sequence
/// number that disambiguates bundles created within the same second.
///
/// (secs, seqno) pairs are unique per source node. Seqno resets when
/// the clock advances to a new second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CreationTimestamp {
    pub secs: u64,
    pub seqno: u64,
}

impl CreationTimestamp {
    pub fn new(secs: u64, seqno: u64) -> Self {
        Self { secs, seqno }
    }

    /// Stamp a freshly created bundle. Monotonic across calls even if
    /// the wall clock stalls within one second.
    pub fn now() -> Self {
        let secs = dtn_now();
        let prev = LAST_TS_SECS.swap(secs, Ordering::SeqCst);
        let seqno = if prev == secs {
            TS_SEQNO.fetch_add(1, Ordering::SeqCst) as u64 + 1
        } else {
            TS_SEQNO.store(0, Ordering::SeqCst);
            0
        };
        Self { secs, seqno }
    }
}

impl fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.secs, self.seqno)
    }
}

/// Class-of-service priority carried in the primary block flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Bulk = 0,
    Normal = 1,
    Expedited = 2,
}

impl Priority {
    pub fn from_bits(bits: u64) -> Self {
        match bits & 0x3 {
            0 => Priority::Bulk,
            2 => Priority::Expedited,
            _ => Priority::Normal,
        }
    }

    pub fn bits(self) -> u64 {
        self as u64
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}
