//! Handshake protocol.
//!
//! Runs once per connection, after the transport opens and before steady
//! state. The handshake exclusively owns the frame source while it runs;
//! ownership only moves to the steady-state task afterwards, so a frame
//! can never be processed on both sides of the boundary.
//!
//! Resolution is a race between three events — an inbound frame deciding
//! the verdict, the slave poll prompting the peer, and the firmware-flash
//! deadline — and whichever fires first wins by construction of the
//! `select!` loop: the function returns and the competing timers are
//! dropped with it.

use std::sync::Mutex;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::time::{interval_at, sleep, Instant};

use crate::behavior::{Behavior, Capabilities, Verdict};
use crate::config::{ConnectionConfig, Role};
use crate::error::{PeerlinkError, Result};
use crate::framing::FrameSource;
use crate::gate::SendGate;

/// Fixed deadline for the firmware-flash escape hatch.
pub const FIRMWARE_FLASH_DEADLINE: Duration = Duration::from_millis(3000);

/// How the handshake resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandshakeOutcome {
    /// The firmware deadline fired before any other resolution; the host
    /// should switch to a firmware-flash flow instead of normal operation.
    pub firmware_flash_requested: bool,
}

/// Run the handshake decision tree to resolution.
pub(crate) async fn run<R, B>(
    source: &mut FrameSource<R>,
    behavior: &Mutex<B>,
    gate: &SendGate,
    config: &ConnectionConfig,
) -> Result<HandshakeOutcome>
where
    R: AsyncRead + Unpin,
    B: Behavior,
{
    let caps = lock(behavior).capabilities();

    // No identification hooks at all: nothing to negotiate.
    if !caps.handshake_required() {
        return Ok(HandshakeOutcome {
            firmware_flash_requested: false,
        });
    }

    let slave_poll = config.role == Role::Slave && config.poll_interval.is_some();
    let poll_every = config
        .poll_interval
        .unwrap_or(crate::config::DEFAULT_POLL_INTERVAL);
    let mut poll = interval_at(Instant::now() + poll_every, poll_every);

    let deadline = sleep(FIRMWARE_FLASH_DEADLINE);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            frame = source.next_frame() => {
                let frame = frame?.ok_or(PeerlinkError::ConnectionClosed)?;
                let verdict = if caps.check_initial_data {
                    lock(behavior).check_initial_data(&frame, config)
                } else {
                    Verdict::Pending
                };
                match verdict {
                    Verdict::Pending => prompt_peer(behavior, &caps, gate),
                    Verdict::Accept => {
                        tracing::debug!("handshake accepted by peer check");
                        accept(behavior, &caps, gate, config);
                        return Ok(HandshakeOutcome {
                            firmware_flash_requested: false,
                        });
                    }
                    Verdict::Reject => {
                        tracing::debug!("handshake rejected by peer check");
                        return Err(PeerlinkError::InvalidHardware);
                    }
                }
            }
            _ = poll.tick(), if slave_poll => prompt_peer(behavior, &caps, gate),
            _ = &mut deadline, if config.firmware_check => {
                tracing::debug!("handshake deadline elapsed, requesting firmware flash");
                return Ok(HandshakeOutcome {
                    firmware_flash_requested: true,
                });
            }
        }
    }
}

/// Send the identification prompt, if the module produces one.
fn prompt_peer<B: Behavior>(behavior: &Mutex<B>, caps: &Capabilities, gate: &SendGate) {
    if caps.request_initial_data {
        if let Some(prompt) = lock(behavior).request_initial_data() {
            gate.send(prompt);
        }
    }
}

/// Success path: hand over the send handle and, for a slave, send the
/// one-shot property reset.
fn accept<B: Behavior>(
    behavior: &Mutex<B>,
    caps: &Capabilities,
    gate: &SendGate,
    config: &ConnectionConfig,
) {
    if caps.set_transport {
        lock(behavior).set_transport(gate.clone());
    }
    if config.role == Role::Slave && caps.reset_property {
        if let Some(payload) = lock(behavior).reset_property() {
            gate.send(payload);
        }
    }
}

fn lock<B>(behavior: &Mutex<B>) -> std::sync::MutexGuard<'_, B> {
    behavior.lock().expect("behavior mutex poisoned")
}
