//! Error types for peerlink.

use thiserror::Error;

/// Main error type for all peerlink operations.
#[derive(Debug, Error)]
pub enum PeerlinkError {
    /// Opening the underlying transport failed. Surfaced to the caller
    /// as-is; no retry is attempted internally.
    #[error("transport open failed: {0}")]
    TransportOpen(#[source] std::io::Error),

    /// The handshake peer responded negatively to identification.
    #[error("peer failed hardware identification")]
    InvalidHardware,

    /// `connect` was called without a registered sink or an open transport.
    /// Programmer error; fails fast with no partial state mutation.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),

    /// I/O error on an established link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport ended while the handshake was still in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// A delimited frame grew past the configured maximum without a
    /// delimiter showing up.
    #[error("frame exceeds maximum size of {max} bytes")]
    FrameOverflow {
        /// The configured limit that was exceeded.
        max: usize,
    },
}

/// Result type alias using PeerlinkError.
pub type Result<T> = std::result::Result<T, PeerlinkError>;
