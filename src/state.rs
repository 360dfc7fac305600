//! Connection state machine.
//!
//! All mutable connection flags live behind [`LinkState`] and change only
//! through its transition methods. The steady-state task, the keepalive
//! check, and a delegated loss controller all share the same handle; the
//! guard is never held across an await.

use std::sync::{Arc, Mutex};

/// The lifecycle of a single connection.
///
/// Exactly one state is active at any time:
/// `Idle → Opening → Handshaking → Connected ⇄ Lost → Closed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport open yet.
    #[default]
    Idle,
    /// Transport open in progress or completed, handshake not started.
    Opening,
    /// Handshake in progress, or resolved and awaiting the first
    /// steady-state frame.
    Handshaking,
    /// At least one frame accepted; the link is live.
    Connected,
    /// The loss window elapsed with no accepted frame.
    Lost,
    /// Torn down; the transport reference is discarded.
    Closed,
}

/// Outcome of one keepalive window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    /// A frame arrived during the window; the flag was cleared for the next
    /// one.
    Alive,
    /// No frame arrived; the state transitioned to [`ConnectionState::Lost`].
    Lost,
    /// The link is not connected; nothing was checked.
    NotConnected,
}

#[derive(Debug, Default)]
struct Flags {
    state: ConnectionState,
    received: bool,
}

/// Shared, mutex-guarded connection flags.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct LinkState {
    inner: Arc<Mutex<Flags>>,
}

impl LinkState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Mark that a frame arrived during the current loss window.
    ///
    /// Exposed so a delegated loss controller can feed its own liveness
    /// signal.
    pub fn mark_received(&self) {
        self.lock().received = true;
    }

    /// Transition `Connected → Lost`.
    ///
    /// Returns true if the transition happened, false if the link was not
    /// connected. Exposed for delegated loss controllers; the caller emits
    /// the lifecycle event on true.
    pub fn mark_lost(&self) -> bool {
        let mut flags = self.lock();
        if flags.state == ConnectionState::Connected {
            flags.state = ConnectionState::Lost;
            true
        } else {
            false
        }
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.lock().state = state;
    }

    /// Record an accepted steady-state frame.
    ///
    /// Sets the received flag and, when the link was not already connected
    /// (first frame, or recovery from `Lost`), transitions to `Connected`.
    /// Returns true exactly when that transition happened.
    pub(crate) fn frame_accepted(&self) -> bool {
        let mut flags = self.lock();
        flags.received = true;
        if flags.state == ConnectionState::Connected {
            false
        } else {
            flags.state = ConnectionState::Connected;
            true
        }
    }

    /// Evaluate one keepalive window: while connected, either consume the
    /// received flag or declare the link lost.
    pub(crate) fn keepalive_tick(&self) -> Liveness {
        let mut flags = self.lock();
        if flags.state != ConnectionState::Connected {
            return Liveness::NotConnected;
        }
        if flags.received {
            flags.received = false;
            Liveness::Alive
        } else {
            flags.state = ConnectionState::Lost;
            Liveness::Lost
        }
    }

    /// Reset the per-connection flags without touching a `Closed` marker.
    pub(crate) fn reset(&self) {
        let mut flags = self.lock();
        flags.received = false;
        if flags.state != ConnectionState::Closed {
            flags.state = ConnectionState::Idle;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Flags> {
        self.inner.lock().expect("link state mutex poisoned")
    }
}
