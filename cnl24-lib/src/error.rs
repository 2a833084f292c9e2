use std::io;
use thiserror::Error;

/// The primary error type for the `cnl24` library.
#[derive(Error, Debug)]
pub enum CnlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timeout waiting for {0}")]
    TransportTimeout(&'static str),

    #[error("checksum mismatch in {context}: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        context: &'static str,
        expected: u16,
        actual: u16,
    },

    #[error("unexpected message type {actual:#06x}, expected one of {expected:?}")]
    UnexpectedMessageType { expected: Vec<u16>, actual: u16 },

    #[error("pump connection lost: {0}")]
    ConnectionLost(&'static str),

    #[error("multipacket transfer failed: {0}")]
    MultipacketIntegrity(String),

    #[error("invalid history blob: {0}")]
    InvalidHistoryBlob(String),

    #[error("no radio channel accepted by the pump")]
    NegotiationFailed,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("pairing data missing for stick {0}")]
    MissingPairing(String),

    #[error("protocol state error: {0}")]
    State(&'static str),
}

impl CnlError {
    /// Outer-envelope checksum failures are noise on the lossy radio link and
    /// may be dropped by read loops; every other error is not.
    pub fn is_outer_checksum(&self) -> bool {
        matches!(
            self,
            CnlError::ChecksumMismatch {
                context: "outer envelope",
                ..
            }
        )
    }
}
