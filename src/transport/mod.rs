//! Transport contracts.
//!
//! The physical driver (serial port, TCP socket, USB CDC bridge) lives
//! outside this crate; these traits are the seam it plugs into:
//!
//! - [`TransportDriver`] opens a link from an address and resolved line
//!   settings.
//! - [`Transport`] is the opened duplex link, split once into a read half
//!   and a write half.
//! - [`TransportWrite`] is the write half, carrying the open flag and the
//!   optional reset control line alongside the byte stream.
//!
//! [`MemoryTransport`] is an in-memory implementation over
//! [`tokio::io::duplex`] for tests and examples.

mod mem;

pub use mem::{MemoryDriver, MemoryHandle, MemoryTransport};

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::LineSettings;

/// Write half of an opened link.
///
/// `drain` in the transport contract maps to [`AsyncWrite::poll_flush`];
/// `close` maps to [`AsyncWrite::poll_shutdown`].
pub trait TransportWrite: AsyncWrite + Unpin + Send + 'static {
    /// Whether the underlying device still reports itself open.
    fn is_open(&self) -> bool {
        true
    }

    /// Drive the reset control line, if the device has one. Default no-op.
    fn set_reset(&mut self, _asserted: bool) {}
}

/// An opened duplex byte-stream link.
///
/// Data arrival is a read yielding bytes, disconnect is EOF, transport
/// failure is a read error.
pub trait Transport: Send + 'static {
    /// Read half type.
    type Read: AsyncRead + Unpin + Send + 'static;
    /// Write half type.
    type Write: TransportWrite;

    /// Split the link into its read and write halves. Called exactly once,
    /// right after open.
    fn into_split(self) -> (Self::Read, Self::Write);
}

/// Opens transport links on behalf of the connection manager.
pub trait TransportDriver: Send {
    /// The link type this driver produces.
    type Link: Transport;

    /// Open the device at `address` with the given line settings.
    fn open(
        &mut self,
        address: &str,
        settings: &LineSettings,
    ) -> impl Future<Output = io::Result<Self::Link>> + Send;
}
