//! Message sink contract.
//!
//! The sink is the host-supplied collaborator that receives lifecycle
//! events and decoded data and forwards them toward the remote side. A
//! typical implementation wraps a channel sender or an upload queue;
//! methods are fire-and-forget so the connection task never blocks on the
//! sink.

use bytes::Bytes;

/// Lifecycle events emitted over the life of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connection attempt started (steady state entered, no frame yet).
    Connect,
    /// The first frame was accepted; the link is live.
    Connected,
    /// The loss window elapsed with no frame.
    Lost,
    /// The transport disconnected and the connection was torn down.
    Disconnected,
}

impl LinkEvent {
    /// Stable wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkEvent::Connect => "connect",
            LinkEvent::Connected => "connected",
            LinkEvent::Lost => "lost",
            LinkEvent::Disconnected => "disconnected",
        }
    }
}

/// Destination for lifecycle events and decoded frames.
pub trait Sink: Send + Sync + 'static {
    /// Record a lifecycle event.
    fn emit_state(&self, event: LinkEvent);

    /// Stage freshly decoded data and forward it toward the remote side.
    fn stage_and_forward(&self, data: Bytes);

    /// Re-forward the last staged data (advertise/heartbeat path). Called
    /// on the advertise cadence, independent of new inbound frames.
    fn forward_staged(&self);
}

impl<S: Sink> Sink for std::sync::Arc<S> {
    fn emit_state(&self, event: LinkEvent) {
        (**self).emit_state(event);
    }

    fn stage_and_forward(&self, data: Bytes) {
        (**self).stage_and_forward(data);
    }

    fn forward_staged(&self) {
        (**self).forward_staged();
    }
}
