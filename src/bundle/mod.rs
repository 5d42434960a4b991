//! Bundle model, RFC 5050 wire format, fragmentation

pub mod block;
#[allow(clippy::module_inception)]
pub mod bundle;
pub mod extension;
pub mod fragment;
pub mod fwdlog;
pub mod payload;
pub mod primary;
pub mod processor;
pub mod protocol;
pub mod status;

pub use block::{BlockFlags, BlockInfo, PAYLOAD_BLOCK, PREVIOUS_HOP_BLOCK, PRIMARY_BLOCK};
pub use bundle::{Bundle, Payload};
pub use fragment::{FragmentManager, ReassemblyKey};
pub use fwdlog::{ForwardAction, ForwardingLog};
pub use processor::{BlockProcessor, BlockProcessorRegistry, ValidationResult, XmitContext};
pub use protocol::{format_bundle, BundleParser, ParsedBundle};
pub use status::{CustodyReason, CustodySignal, StatusReason, StatusReport};

use crate::sdnv::SdnvError;
use thiserror::Error;

/// Wire-format errors on the receive and transmit paths.
#[derive(Debug, Error)]
pub enum CodecError {
    /// More bytes are needed; never fatal, the caller re-enters.
    #[error("need more data")]
    Incomplete,
    /// Bytes are present but not a valid bundle. The bundle is
    /// dropped with reason block-unintelligible.
    #[error("malformed: {0}")]
    Malformed(String),
}

impl From<SdnvError> for CodecError {
    fn from(e: SdnvError) -> Self {
        match e {
            SdnvError::Incomplete => CodecError::Incomplete,
            SdnvError::Overflow => CodecError::Malformed("SDNV overflows 64 bits".into()),
            SdnvError::NoSpace => CodecError::Malformed("output buffer too small".into()),
        }
    }
}
