//! Peer-specific behavior module contract.
//!
//! A [`Behavior`] adapts the connection skeleton to one concrete hardware
//! peer: how to recognize it during the handshake, how to validate and
//! decode its frames, and what to send on the poll cadence. Every hook is
//! optional — a module advertises the hooks it implements through
//! [`Capabilities`], and an absent capability disables the corresponding
//! feature rather than erroring.
//!
//! # Example
//!
//! ```
//! use peerlink::behavior::{Behavior, Capabilities, Verdict};
//! use peerlink::config::ConnectionConfig;
//! use bytes::Bytes;
//!
//! struct Thermometer;
//!
//! impl Behavior for Thermometer {
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities {
//!             check_initial_data: true,
//!             request_initial_data: true,
//!             ..Capabilities::default()
//!         }
//!     }
//!
//!     fn check_initial_data(&mut self, frame: &[u8], _: &ConnectionConfig) -> Verdict {
//!         match frame {
//!             b"ID:THERMO" => Verdict::Accept,
//!             f if f.starts_with(b"ID:") => Verdict::Reject,
//!             _ => Verdict::Pending,
//!         }
//!     }
//!
//!     fn request_initial_data(&mut self) -> Option<Bytes> {
//!         Some(Bytes::from_static(b"WHO?"))
//!     }
//! }
//! ```

use std::sync::Arc;

use bytes::Bytes;

use crate::config::ConnectionConfig;
use crate::gate::SendGate;
use crate::sink::LinkEvent;
use crate::state::LinkState;

/// Outcome of inspecting one handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Still negotiating: prompt the peer again and keep waiting.
    Pending,
    /// The peer is the expected hardware; resolve the handshake.
    Accept,
    /// The peer is not the expected hardware; fail the handshake.
    Reject,
}

/// Handle a behavior module can use to push lifecycle events to the sink.
pub type EventEmitter = Arc<dyn Fn(LinkEvent) + Send + Sync>;

/// Which optional hooks a behavior module implements.
///
/// Defaults to all-absent; a hook is only invoked when its flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Inspects handshake frames ([`Behavior::check_initial_data`]).
    pub check_initial_data: bool,
    /// Produces the handshake prompt ([`Behavior::request_initial_data`]).
    pub request_initial_data: bool,
    /// Filters steady-state frames ([`Behavior::validate_local_data`]).
    pub validate_local_data: bool,
    /// Decodes accepted frames ([`Behavior::handle_local_data`]).
    pub handle_local_data: bool,
    /// Produces the steady-state data request ([`Behavior::request_local_data`]).
    pub request_local_data: bool,
    /// Produces the property query ([`Behavior::get_property`]).
    pub get_property: bool,
    /// Produces the one-shot property reset ([`Behavior::reset_property`]).
    pub reset_property: bool,
    /// Wants a send handle after the handshake ([`Behavior::set_transport`]).
    pub set_transport: bool,
    /// Wants the connect notification ([`Behavior::on_connect`]).
    pub on_connect: bool,
    /// Wants the post-connect emitter ([`Behavior::after_connect`]).
    pub after_connect: bool,
    /// Takes over loss detection entirely ([`Behavior::lost_controller`]).
    pub lost_controller: bool,
    /// Observes lifecycle events ([`Behavior::on_event`]).
    pub on_event: bool,
}

impl Capabilities {
    /// Whether a handshake is required at all. With neither the frame check
    /// nor the prompt implemented, `initialize` resolves immediately.
    pub fn handshake_required(&self) -> bool {
        self.check_initial_data || self.request_initial_data
    }
}

/// Peer-specific hooks plugged into the connection skeleton.
///
/// Default method bodies are inert; they are never reached unless the
/// module advertises the hook in [`Behavior::capabilities`] (with the
/// exception of [`Behavior::validate_local_data`], whose absence means
/// every frame is accepted — the same effect as the default body).
pub trait Behavior: Send + 'static {
    /// Advertise which hooks this module implements.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Inspect one handshake frame and decide whether the peer is the
    /// expected hardware.
    fn check_initial_data(&mut self, _frame: &[u8], _config: &ConnectionConfig) -> Verdict {
        Verdict::Pending
    }

    /// Payload sent to prompt the peer for identification.
    fn request_initial_data(&mut self) -> Option<Bytes> {
        None
    }

    /// Accept or drop a steady-state frame before it reaches the sink.
    fn validate_local_data(&mut self, _frame: &[u8]) -> bool {
        true
    }

    /// Decode an accepted frame. The returned bytes are staged and
    /// forwarded through the sink; returning `None` stages the raw frame.
    fn handle_local_data(&mut self, _frame: &[u8]) -> Option<Bytes> {
        None
    }

    /// Payload requesting fresh data from the peer. Sent per inbound frame
    /// in master role, on the poll cadence otherwise.
    fn request_local_data(&mut self) -> Option<Bytes> {
        None
    }

    /// Payload querying a device property, sent on the poll cadence.
    fn get_property(&mut self) -> Option<Bytes> {
        None
    }

    /// Payload resetting a device property, sent once when a slave
    /// handshake resolves.
    fn reset_property(&mut self) -> Option<Bytes> {
        None
    }

    /// Receive a send handle once the handshake has resolved.
    fn set_transport(&mut self, _gate: SendGate) {}

    /// Called when steady state is entered, before any frame arrives.
    fn on_connect(&mut self) {}

    /// Called after the connect sequence with an emitter the module can use
    /// to push lifecycle events to the sink directly.
    fn after_connect(&mut self, _events: EventEmitter) {}

    /// Take over loss detection. When advertised, the built-in keepalive
    /// monitor is not armed; the module receives the state handle and an
    /// event emitter and owns the liveness policy.
    fn lost_controller(&mut self, _state: LinkState, _events: EventEmitter) {}

    /// Observe a lifecycle event.
    fn on_event(&mut self, _event: LinkEvent) {}
}
