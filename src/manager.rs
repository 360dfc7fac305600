//! Connection manager — the top-level orchestrator.
//!
//! [`ConnectionManager`] owns one connection's lifecycle:
//! 1. `open` — resolve line settings, open the transport, split it, start
//!    the writer task, wrap the read half in a frame source
//! 2. `initialize` — run the handshake to resolution
//! 3. `connect` — enter steady state: spawn the read task carrying the
//!    loss-detection, poll, and advertise timers
//! 4. `clear`/`close` — tear everything down, idempotently
//!
//! All steady-state transitions happen inside the single spawned read
//! task, so concurrent timer and I/O callbacks never race on connection
//! state. The handshake/steady boundary is an ownership transfer of the
//! frame source: a frame cannot be seen by both.
//!
//! # Example
//!
//! ```ignore
//! use peerlink::{ConnectionConfig, ConnectionManager};
//!
//! let mut manager = ConnectionManager::builder(driver, behavior)
//!     .config(ConnectionConfig::default())
//!     .sink(sink)
//!     .build();
//!
//! manager.open("/dev/ttyUSB0").await?;
//! manager.initialize().await?;
//! if manager.firmware_flash_requested() {
//!     // switch to the firmware-flash flow
//! } else {
//!     manager.connect().await?;
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::behavior::{Behavior, Capabilities, EventEmitter};
use crate::config::{ConnectionConfig, Role, DEFAULT_POLL_INTERVAL};
use crate::error::{PeerlinkError, Result};
use crate::framing::FrameSource;
use crate::gate::{spawn_gate, SendGate};
use crate::handshake;
use crate::keepalive::KeepAliveMonitor;
use crate::sink::{LinkEvent, Sink};
use crate::state::{ConnectionState, LinkState, Liveness};
use crate::transport::{Transport, TransportDriver};

/// Settle delay after toggling the reset line during `connect`.
pub const RESET_SETTLE: Duration = Duration::from_millis(1000);

/// Placeholder period for intervals whose select branch is disabled.
const DISABLED_PERIOD: Duration = Duration::from_secs(3600);

type ReadOf<D> = <<D as TransportDriver>::Link as Transport>::Read;

/// Scheduled tasks owned by the manager. Every slot is cancelled and
/// reset to absent on `clear`, idempotently.
#[derive(Default)]
struct TimerSet {
    /// Steady-state read task; carries the loss-detection, poll, and
    /// advertise timers.
    steady: Option<JoinHandle<()>>,
}

impl TimerSet {
    fn cancel_all(&mut self) {
        if let Some(task) = self.steady.take() {
            task.abort();
        }
    }

    fn is_empty(&self) -> bool {
        self.steady.is_none()
    }
}

/// Builder for a [`ConnectionManager`].
pub struct ConnectionManagerBuilder<D, B> {
    driver: D,
    behavior: B,
    config: ConnectionConfig,
    sink: Option<Arc<dyn Sink>>,
}

impl<D: TransportDriver, B: Behavior> ConnectionManagerBuilder<D, B> {
    /// Set the connection configuration (defaults otherwise).
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the message sink.
    pub fn sink(mut self, sink: impl Sink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Build the manager.
    pub fn build(self) -> ConnectionManager<D, B> {
        let loss_window = self.config.loss_window;
        ConnectionManager {
            driver: self.driver,
            config: self.config,
            behavior: Arc::new(Mutex::new(self.behavior)),
            sink: self.sink,
            state: LinkState::new(),
            source: None,
            gate: None,
            timers: TimerSet::default(),
            writer_task: None,
            loss_window,
            firmware_flash_requested: false,
        }
    }
}

/// Manages the lifecycle of a single connection to a hardware peer.
///
/// One instance per link; instances share nothing.
pub struct ConnectionManager<D: TransportDriver, B: Behavior> {
    driver: D,
    config: ConnectionConfig,
    behavior: Arc<Mutex<B>>,
    sink: Option<Arc<dyn Sink>>,
    state: LinkState,
    source: Option<FrameSource<ReadOf<D>>>,
    gate: Option<SendGate>,
    timers: TimerSet,
    writer_task: Option<JoinHandle<()>>,
    loss_window: Duration,
    firmware_flash_requested: bool,
}

impl<D: TransportDriver, B: Behavior> ConnectionManager<D, B> {
    /// Create a manager with the given collaborators and configuration.
    pub fn new(driver: D, behavior: B, config: ConnectionConfig) -> Self {
        Self::builder(driver, behavior).config(config).build()
    }

    /// Start building a manager.
    pub fn builder(driver: D, behavior: B) -> ConnectionManagerBuilder<D, B> {
        ConnectionManagerBuilder {
            driver,
            behavior,
            config: ConnectionConfig::default(),
            sink: None,
        }
    }

    /// Register the message sink. Required before `connect`.
    pub fn set_sink(&mut self, sink: impl Sink) {
        self.sink = Some(Arc::new(sink));
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Whether the handshake resolved by requesting a firmware flash.
    pub fn firmware_flash_requested(&self) -> bool {
        self.firmware_flash_requested
    }

    /// Whether the transport is open.
    pub fn is_open(&self) -> bool {
        self.gate.as_ref().is_some_and(|gate| gate.is_open())
    }

    /// Open the transport at `address`.
    ///
    /// Line defaults (9600 baud, 8 data bits, 1 stop bit, no parity) are
    /// layered under the configured overrides and handed to the driver.
    /// Fails with [`PeerlinkError::TransportOpen`] if the driver fails;
    /// nothing is retried internally.
    pub async fn open(&mut self, address: &str) -> Result<()> {
        if self.gate.is_some() {
            return Err(PeerlinkError::Precondition("transport already open"));
        }

        self.state.set(ConnectionState::Opening);
        self.loss_window = self.config.loss_window;

        let settings = self.config.resolve_line();
        tracing::debug!(
            address,
            baud = settings.baud_rate,
            "opening transport"
        );
        let link = match self.driver.open(address, &settings).await {
            Ok(link) => link,
            Err(e) => {
                self.state.set(ConnectionState::Idle);
                return Err(PeerlinkError::TransportOpen(e));
            }
        };

        let (read, write) = link.into_split();
        let (gate, writer_task) = spawn_gate(write, self.config.payload_encoding);
        self.source = Some(FrameSource::new(read, &self.config));
        self.gate = Some(gate);
        self.writer_task = Some(writer_task);
        self.firmware_flash_requested = false;
        Ok(())
    }

    /// Run the handshake to resolution. See the `handshake` module for the
    /// decision tree.
    ///
    /// After an Ok resolution, check [`ConnectionManager::firmware_flash_requested`]:
    /// when set, the host should switch to its firmware-flash flow instead
    /// of calling `connect`.
    pub async fn initialize(&mut self) -> Result<()> {
        let (Some(source), Some(gate)) = (self.source.as_mut(), self.gate.as_ref()) else {
            return Err(PeerlinkError::Precondition("transport not open"));
        };

        self.state.set(ConnectionState::Handshaking);
        let outcome = handshake::run(source, &self.behavior, gate, &self.config).await?;

        if outcome.firmware_flash_requested {
            self.firmware_flash_requested = true;
            // Stop consuming frames; the flash flow owns the device next.
            self.source = None;
        }
        Ok(())
    }

    /// Enter steady state.
    ///
    /// Fails fast with [`PeerlinkError::Precondition`] — and mutates
    /// nothing — unless a sink is registered and the transport is open.
    pub async fn connect(&mut self) -> Result<()> {
        let Some(sink) = self.sink.clone() else {
            return Err(PeerlinkError::Precondition("no sink registered"));
        };
        let gate = match self.gate.as_ref() {
            Some(gate) if gate.is_open() && self.source.is_some() => gate.clone(),
            _ => return Err(PeerlinkError::Precondition("transport not open")),
        };

        // Grace window: loss detection cannot fire before the first
        // keepalive window has fully elapsed.
        self.state.mark_received();

        let caps = self.lock_behavior().capabilities();
        if caps.on_connect {
            self.lock_behavior().on_connect();
        }
        emit_event(&sink, &self.behavior, caps, LinkEvent::Connect);

        if self.config.software_reset {
            gate.reset_line(RESET_SETTLE).await;
        }

        let emitter: EventEmitter = {
            let sink = sink.clone();
            Arc::new(move |event| sink.emit_state(event))
        };
        if caps.after_connect {
            self.lock_behavior().after_connect(emitter.clone());
        }

        // Loss detection is either delegated wholesale or built-in, never
        // both.
        let builtin_loss = !caps.lost_controller;
        if caps.lost_controller {
            self.lock_behavior().lost_controller(self.state.clone(), emitter);
        }

        let source = self
            .source
            .take()
            .expect("source presence checked with the gate");
        let ctx = SteadyContext {
            behavior: self.behavior.clone(),
            sink,
            gate,
            state: self.state.clone(),
            caps,
            role: self.config.role,
            poll_interval: self.config.poll_interval,
            advertise_interval: self.config.advertise_interval,
            loss_window: self.loss_window,
            builtin_loss,
        };
        self.timers.steady = Some(tokio::spawn(steady_loop(source, ctx)));
        Ok(())
    }

    /// Submit a payload through the send gate.
    ///
    /// Silently a no-op unless the transport is open, the payload is
    /// non-empty, and no send is in flight (at-most-once delivery).
    pub fn send(&self, payload: impl Into<Bytes>) {
        match &self.gate {
            Some(gate) => gate.send(payload),
            None => tracing::trace!("send dropped: transport not open"),
        }
    }

    /// Cancel every scheduled task, detach the steady-state listener, and
    /// reset the connection flags. Idempotent; does not close the
    /// transport.
    pub fn clear(&mut self) {
        self.timers.cancel_all();
        self.source = None;
        self.state.reset();
    }

    /// `clear`, then close the transport if it still reports open and
    /// discard the reference. Safe to call multiple times, from any state.
    pub async fn close(&mut self) {
        self.clear();
        if let Some(gate) = self.gate.take() {
            if gate.is_open() {
                gate.close().await;
            }
        }
        if let Some(task) = self.writer_task.take() {
            // The writer exits on its own after close; abort is then a
            // no-op.
            task.abort();
        }
        self.state.set(ConnectionState::Closed);
    }

    fn lock_behavior(&self) -> MutexGuard<'_, B> {
        self.behavior.lock().expect("behavior mutex poisoned")
    }
}

/// Everything the steady-state task needs, captured at `connect`.
struct SteadyContext<B> {
    behavior: Arc<Mutex<B>>,
    sink: Arc<dyn Sink>,
    gate: SendGate,
    state: LinkState,
    caps: Capabilities,
    role: Role,
    poll_interval: Option<Duration>,
    advertise_interval: Option<Duration>,
    loss_window: Duration,
    builtin_loss: bool,
}

/// Steady-state loop: frames, keepalive windows, poll ticks, and the
/// advertise heartbeat, serialized through one `select!`.
async fn steady_loop<R, B>(mut source: FrameSource<R>, ctx: SteadyContext<B>)
where
    R: AsyncRead + Unpin + Send + 'static,
    B: Behavior,
{
    let mut keepalive = KeepAliveMonitor::new(ctx.loss_window, ctx.state.clone());

    let do_poll = ctx.role != Role::Master && ctx.poll_interval.is_some();
    let poll_every = ctx.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
    let mut poll = interval_at(Instant::now() + poll_every, poll_every);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let do_advertise = ctx.advertise_interval.is_some();
    let advertise_every = ctx.advertise_interval.unwrap_or(DISABLED_PERIOD);
    let mut advertise = interval_at(Instant::now() + advertise_every, advertise_every);
    advertise.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = source.next_frame() => match frame {
                Ok(Some(frame)) => handle_frame(&ctx, frame),
                Ok(None) => {
                    tracing::debug!("peer disconnected");
                    teardown(&ctx).await;
                    return;
                }
                Err(e) => {
                    tracing::error!("read failed: {e}");
                    teardown(&ctx).await;
                    return;
                }
            },
            liveness = keepalive.check(), if ctx.builtin_loss => {
                if liveness == Liveness::Lost {
                    tracing::debug!("loss window elapsed with no frame");
                    emit_event(&ctx.sink, &ctx.behavior, ctx.caps, LinkEvent::Lost);
                }
            }
            _ = poll.tick(), if do_poll => {
                let (data, property) = {
                    let mut behavior = lock(&ctx.behavior);
                    let data = if ctx.caps.request_local_data {
                        behavior.request_local_data()
                    } else {
                        None
                    };
                    let property = if ctx.caps.get_property {
                        behavior.get_property()
                    } else {
                        None
                    };
                    (data, property)
                };
                if let Some(data) = data {
                    // Let the first payload drain so the second is not
                    // swallowed by the in-flight latch.
                    if let Some(done) = ctx.gate.send_notified(data) {
                        let _ = done.await;
                    }
                }
                if let Some(property) = property {
                    ctx.gate.send(property);
                }
            }
            _ = advertise.tick(), if do_advertise => ctx.sink.forward_staged(),
        }
    }
}

/// One accepted frame: state transition, decode, stage, and the master
/// request-on-receipt reply.
fn handle_frame<B: Behavior>(ctx: &SteadyContext<B>, frame: Bytes) {
    let accepted =
        !ctx.caps.validate_local_data || lock(&ctx.behavior).validate_local_data(&frame);
    if !accepted {
        tracing::trace!(len = frame.len(), "frame rejected by validator");
        return;
    }

    if ctx.state.frame_accepted() {
        emit_event(&ctx.sink, &ctx.behavior, ctx.caps, LinkEvent::Connected);
    }

    let decoded = if ctx.caps.handle_local_data {
        lock(&ctx.behavior).handle_local_data(&frame)
    } else {
        None
    };
    ctx.sink.stage_and_forward(decoded.unwrap_or(frame));

    // Master replies ride the inbound cadence instead of a poll timer.
    if ctx.role == Role::Master && ctx.caps.request_local_data {
        if let Some(reply) = lock(&ctx.behavior).request_local_data() {
            ctx.gate.send(reply);
        }
    }
}

/// Transport-level disconnect: close, then announce.
async fn teardown<B: Behavior>(ctx: &SteadyContext<B>) {
    ctx.gate.close().await;
    ctx.state.set(ConnectionState::Closed);
    emit_event(&ctx.sink, &ctx.behavior, ctx.caps, LinkEvent::Disconnected);
}

fn emit_event<B: Behavior>(
    sink: &Arc<dyn Sink>,
    behavior: &Mutex<B>,
    caps: Capabilities,
    event: LinkEvent,
) {
    sink.emit_state(event);
    if caps.on_event {
        lock(behavior).on_event(event);
    }
}

fn lock<B>(behavior: &Mutex<B>) -> MutexGuard<'_, B> {
    behavior.lock().expect("behavior mutex poisoned")
}
