//! Send gate — serialized outbound writes with an in-flight latch.
//!
//! All outbound traffic funnels through a dedicated writer task that owns
//! the transport write half:
//!
//! ```text
//! behavior  ─┐
//! poll tick ─┼─► SendGate ─► writer task ─► write + drain ─► transport
//! host      ─┘
//! ```
//!
//! The gate admits one payload at a time: the in-flight flag is set before
//! the write starts and cleared only after the explicit drain (flush)
//! completes. A send attempted while the flag is set is dropped, silently —
//! at-most-once delivery, never a queue. Callers that need the drain
//! completion use [`SendGate::send_notified`].
//!
//! The writer task also services the reset control line and the final
//! shutdown of the write half, so the connection manager never touches the
//! transport write side directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::PayloadEncoding;
use crate::transport::TransportWrite;

/// Command channel depth. The in-flight latch admits one data payload at a
/// time; the extra slots are for control commands.
const COMMAND_CAPACITY: usize = 4;

enum Command {
    Send {
        payload: Bytes,
        done: Option<oneshot::Sender<()>>,
    },
    Reset {
        settle: Duration,
        done: oneshot::Sender<()>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle for submitting payloads to the writer task.
///
/// Cheaply cloneable; every clone shares the same in-flight latch.
#[derive(Clone)]
pub struct SendGate {
    tx: mpsc::Sender<Command>,
    in_flight: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    encoding: PayloadEncoding,
}

impl SendGate {
    /// Submit a payload for write + drain.
    ///
    /// Silently a no-op unless the transport is open, the payload is
    /// non-empty, and no send is currently in flight.
    pub fn send(&self, payload: impl Into<Bytes>) {
        let _ = self.submit(payload.into(), None);
    }

    /// Like [`SendGate::send`], but returns a receiver resolved when the
    /// drain completes. `None` means the payload was dropped.
    pub fn send_notified(&self, payload: impl Into<Bytes>) -> Option<oneshot::Receiver<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(payload.into(), Some(done_tx)).then_some(done_rx)
    }

    fn submit(&self, payload: Bytes, done: Option<oneshot::Sender<()>>) -> bool {
        if payload.is_empty() {
            return false;
        }
        if !self.open.load(Ordering::Acquire) {
            tracing::trace!("send dropped: transport not open");
            return false;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(len = payload.len(), "send dropped: write in flight");
            return false;
        }

        let payload = encode_payload(payload, self.encoding);
        if self
            .tx
            .try_send(Command::Send { payload, done })
            .is_err()
        {
            // Writer task is gone; release the latch so later sends fail on
            // the open flag instead of wedging.
            self.in_flight.store(false, Ordering::Release);
            self.open.store(false, Ordering::Release);
            return false;
        }
        true
    }

    /// Whether a write + drain is currently in flight.
    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the transport write half still reports open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Toggle the reset control line and wait out the settle delay.
    pub(crate) async fn reset_line(&self, settle: Duration) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Reset {
                settle,
                done: done_tx,
            })
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    /// Shut the write half down and stop the writer task. Idempotent.
    pub(crate) async fn close(&self) {
        let was_open = self.open.swap(false, Ordering::AcqRel);
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Close { done: done_tx }).await.is_ok() {
            let _ = done_rx.await;
        } else if was_open {
            tracing::debug!("writer task already stopped before close");
        }
    }
}

/// Spawn the writer task and return a gate handle for it.
pub(crate) fn spawn_gate<W>(writer: W, encoding: PayloadEncoding) -> (SendGate, JoinHandle<()>)
where
    W: TransportWrite,
{
    let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
    let in_flight = Arc::new(AtomicBool::new(false));
    let open = Arc::new(AtomicBool::new(true));

    let gate = SendGate {
        tx,
        in_flight: in_flight.clone(),
        open: open.clone(),
        encoding,
    };
    let task = tokio::spawn(writer_loop(rx, writer, in_flight, open));

    (gate, task)
}

/// Writer loop: one write + drain at a time, then release the latch.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Command>,
    mut writer: W,
    in_flight: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) where
    W: TransportWrite,
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Send { payload, done } => {
                let result = write_and_drain(&mut writer, &payload).await;
                in_flight.store(false, Ordering::Release);
                match result {
                    Ok(()) => {
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                    }
                    Err(e) => {
                        tracing::error!("write failed: {e}");
                        open.store(false, Ordering::Release);
                        break;
                    }
                }
            }
            Command::Reset { settle, done } => {
                writer.set_reset(true);
                writer.set_reset(false);
                tokio::time::sleep(settle).await;
                let _ = done.send(());
            }
            Command::Close { done } => {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!("transport shutdown: {e}");
                }
                open.store(false, Ordering::Release);
                let _ = done.send(());
                return;
            }
        }
    }

    // Channel closed or write failure: best-effort shutdown.
    open.store(false, Ordering::Release);
    in_flight.store(false, Ordering::Release);
    let _ = writer.shutdown().await;
}

async fn write_and_drain<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: TransportWrite,
{
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Apply the configured payload encoding.
///
/// Text links carry the text byte representation: valid UTF-8 passes
/// through untouched, anything else is sanitized through lossy conversion.
fn encode_payload(payload: Bytes, encoding: PayloadEncoding) -> Bytes {
    match encoding {
        PayloadEncoding::Binary => payload,
        PayloadEncoding::Text => match String::from_utf8_lossy(&payload) {
            std::borrow::Cow::Borrowed(_) => payload,
            std::borrow::Cow::Owned(sanitized) => Bytes::from(sanitized),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, Transport};
    use tokio::io::AsyncReadExt;

    fn gate_over_memory(
        capacity: usize,
        encoding: PayloadEncoding,
    ) -> (SendGate, JoinHandle<()>, tokio::io::DuplexStream, crate::transport::MemoryHandle) {
        let (transport, peer) = MemoryTransport::pair(capacity);
        let handle = transport.handle();
        let (_read, write) = transport.into_split();
        let (gate, task) = spawn_gate(write, encoding);
        (gate, task, peer, handle)
    }

    #[tokio::test]
    async fn test_send_writes_and_drains() {
        let (gate, _task, mut peer, _) = gate_over_memory(256, PayloadEncoding::Binary);

        let done = gate.send_notified(&b"hello"[..]).unwrap();
        done.await.unwrap();
        assert!(!gate.is_sending());

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_empty_payload_is_dropped() {
        let (gate, _task, _peer, _) = gate_over_memory(256, PayloadEncoding::Binary);
        assert!(gate.send_notified(Bytes::new()).is_none());
    }

    #[tokio::test]
    async fn test_second_send_while_in_flight_is_dropped() {
        // Capacity smaller than the payload: the first write blocks until
        // the peer reads, keeping the in-flight latch set.
        let (gate, _task, mut peer, _) = gate_over_memory(4, PayloadEncoding::Binary);

        let first = gate.send_notified(&b"0123456789abcdef"[..]).unwrap();
        tokio::task::yield_now().await;
        assert!(gate.is_sending());

        // Dropped while the first write is still draining.
        assert!(gate.send_notified(&b"second"[..]).is_none());

        // Let the first write complete.
        let mut buf = vec![0u8; 16];
        peer.read_exact(&mut buf).await.unwrap();
        first.await.unwrap();
        assert_eq!(&buf, b"0123456789abcdef");

        // A third send now succeeds.
        let third = gate.send_notified(&b"third"[..]).unwrap();
        let mut buf = vec![0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        third.await.unwrap();
        assert_eq!(&buf, b"third");
    }

    #[tokio::test]
    async fn test_close_shuts_down_write_half() {
        let (gate, task, mut peer, handle) = gate_over_memory(256, PayloadEncoding::Binary);

        gate.close().await;
        assert!(!gate.is_open());
        assert!(!handle.is_open());

        // Peer observes EOF.
        let mut buf = Vec::new();
        peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        // Sends after close are silent no-ops.
        assert!(gate.send_notified(&b"late"[..]).is_none());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_twice_is_idempotent() {
        let (gate, _task, _peer, _) = gate_over_memory(256, PayloadEncoding::Binary);
        gate.close().await;
        gate.close().await;
        assert!(!gate.is_open());
    }

    #[tokio::test]
    async fn test_reset_line_toggles_and_settles() {
        let (gate, _task, _peer, handle) = gate_over_memory(256, PayloadEncoding::Binary);

        gate.reset_line(Duration::from_millis(10)).await;
        assert_eq!(handle.reset_levels(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_text_encoding_passes_valid_utf8() {
        let (gate, _task, mut peer, _) = gate_over_memory(256, PayloadEncoding::Text);

        gate.send_notified(&b"plain text"[..]).unwrap().await.unwrap();
        let mut buf = vec![0u8; 10];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"plain text");
    }

    #[tokio::test]
    async fn test_text_encoding_sanitizes_invalid_utf8() {
        let (gate, _task, mut peer, _) = gate_over_memory(256, PayloadEncoding::Text);

        gate.send_notified(&[0x68, 0x69, 0xFF][..]).unwrap().await.unwrap();
        let mut buf = vec![0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        // Invalid byte replaced with U+FFFD (3 bytes in UTF-8).
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(&buf[2..], "\u{FFFD}".as_bytes());
    }

    #[test]
    fn test_encode_payload_binary_is_identity() {
        let raw = Bytes::from_static(&[0x00, 0xFF, 0x7E]);
        assert_eq!(encode_payload(raw.clone(), PayloadEncoding::Binary), raw);
    }
}
