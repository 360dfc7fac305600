//! In-memory transport over [`tokio::io::duplex`].
//!
//! The local end implements [`Transport`]; the peer end is a plain
//! [`DuplexStream`] a test scripts directly. [`MemoryHandle`] observes the
//! open flag and reset-line activity from outside.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{duplex, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

use super::{Transport, TransportDriver, TransportWrite};
use crate::config::LineSettings;

/// In-memory duplex link for tests and examples.
#[derive(Debug)]
pub struct MemoryTransport {
    io: DuplexStream,
    open: Arc<AtomicBool>,
    resets: Arc<Mutex<Vec<bool>>>,
}

impl MemoryTransport {
    /// Create a linked pair: the transport and the peer end.
    pub fn pair(capacity: usize) -> (Self, DuplexStream) {
        let (local, peer) = duplex(capacity);
        let transport = Self {
            io: local,
            open: Arc::new(AtomicBool::new(true)),
            resets: Arc::new(Mutex::new(Vec::new())),
        };
        (transport, peer)
    }

    /// Observation handle valid after the transport is split.
    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            open: self.open.clone(),
            resets: self.resets.clone(),
        }
    }
}

/// External view on a [`MemoryTransport`]'s state.
#[derive(Clone)]
pub struct MemoryHandle {
    open: Arc<AtomicBool>,
    resets: Arc<Mutex<Vec<bool>>>,
}

impl MemoryHandle {
    /// Whether the write half still reports open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Every level driven onto the reset line so far.
    pub fn reset_levels(&self) -> Vec<bool> {
        self.resets.lock().expect("reset log mutex poisoned").clone()
    }
}

impl Transport for MemoryTransport {
    type Read = ReadHalf<DuplexStream>;
    type Write = MemoryWrite;

    fn into_split(self) -> (Self::Read, Self::Write) {
        let (read, write) = tokio::io::split(self.io);
        (
            read,
            MemoryWrite {
                inner: write,
                open: self.open,
                resets: self.resets,
            },
        )
    }
}

/// Write half of a [`MemoryTransport`].
pub struct MemoryWrite {
    inner: WriteHalf<DuplexStream>,
    open: Arc<AtomicBool>,
    resets: Arc<Mutex<Vec<bool>>>,
}

impl AsyncWrite for MemoryWrite {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_shutdown(cx);
        if matches!(result, Poll::Ready(Ok(()))) {
            self.open.store(false, Ordering::Release);
        }
        result
    }
}

impl TransportWrite for MemoryWrite {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn set_reset(&mut self, asserted: bool) {
        self.resets
            .lock()
            .expect("reset log mutex poisoned")
            .push(asserted);
    }
}

/// Driver handing out pre-built [`MemoryTransport`]s and recording every
/// open call it sees.
#[derive(Default)]
pub struct MemoryDriver {
    links: VecDeque<MemoryTransport>,
    opened: Vec<(String, LineSettings)>,
}

impl MemoryDriver {
    /// Create an empty driver. With no queued link, `open` fails — handy
    /// for exercising the open-failure path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport to be handed out by the next `open`.
    pub fn push(&mut self, link: MemoryTransport) {
        self.links.push_back(link);
    }

    /// Addresses and resolved settings seen so far, in call order.
    pub fn opened(&self) -> &[(String, LineSettings)] {
        &self.opened
    }
}

impl TransportDriver for MemoryDriver {
    type Link = MemoryTransport;

    async fn open(&mut self, address: &str, settings: &LineSettings) -> io::Result<MemoryTransport> {
        self.opened.push((address.to_string(), settings.clone()));
        self.links.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no device at {address}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_pair_is_duplex() {
        let (transport, mut peer) = MemoryTransport::pair(64);
        let (mut read, mut write) = transport.into_split();

        write.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_shutdown_clears_open_flag() {
        let (transport, _peer) = MemoryTransport::pair(64);
        let handle = transport.handle();
        let (_read, mut write) = transport.into_split();

        assert!(handle.is_open());
        write.shutdown().await.unwrap();
        assert!(!handle.is_open());
        assert!(!write.is_open());
    }

    #[tokio::test]
    async fn test_reset_levels_are_recorded() {
        let (transport, _peer) = MemoryTransport::pair(64);
        let handle = transport.handle();
        let (_read, mut write) = transport.into_split();

        write.set_reset(true);
        write.set_reset(false);
        assert_eq!(handle.reset_levels(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_driver_records_open_calls() {
        let mut driver = MemoryDriver::new();
        let (transport, _peer) = MemoryTransport::pair(64);
        driver.push(transport);

        let settings = ConnectionConfig::default().resolve_line();
        driver.open("/dev/ttyUSB0", &settings).await.unwrap();

        assert_eq!(driver.opened().len(), 1);
        assert_eq!(driver.opened()[0].0, "/dev/ttyUSB0");
        assert_eq!(driver.opened()[0].1, settings);
    }

    #[tokio::test]
    async fn test_empty_driver_fails_open() {
        let mut driver = MemoryDriver::new();
        let settings = ConnectionConfig::default().resolve_line();

        let err = driver.open("/dev/ttyUSB0", &settings).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
