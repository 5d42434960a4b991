//! Convergence layers: adapters between bundles and transports

pub mod tcp;

pub use tcp::{ContactHeader, SessionHandle, TcpConvergenceLayer, MAGIC, TCPCL_VERSION};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClError {
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("peer sent magic {0:#010x}")]
    BadMagic(u32),
    #[error("peer speaks version {0}, we require {1}")]
    VersionMismatch(u8, u8),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("keepalive timeout")]
    Timeout,
}
