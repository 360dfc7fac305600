//! # peerlink
//!
//! Connection-management skeleton for a single point-to-point byte-stream
//! link to an external hardware peer.
//!
//! A host application plugs in a peer-specific [`Behavior`] module, a
//! message [`Sink`], and a transport driver; peerlink supplies the part
//! common to all peers:
//!
//! - **Open** — line-setting defaults layered under caller overrides,
//!   handed to the driver
//! - **Handshake** — master/slave peer identification with a
//!   firmware-flash escape hatch
//! - **Steady state** — framed reads, decode-and-forward, poll and
//!   advertise cadences
//! - **Loss detection** — sliding-window keepalive, or fully delegated to
//!   the behavior module
//! - **Teardown** — idempotent `clear`/`close` from any state
//!
//! ## Architecture
//!
//! ```text
//! transport bytes ─► FrameSource ─► handshake ──► steady-state task ─► Behavior ─► Sink
//!                                  (until resolved)   │
//! Behavior / host ─► SendGate ─► writer task ─────────┴─► transport
//! ```
//!
//! Each connection is one [`ConnectionManager`]; instances share nothing.
//! All steady-state transitions run inside a single spawned task, so timer
//! and I/O events never race on connection state.
//!
//! ## Example
//!
//! ```ignore
//! use peerlink::{ConnectionConfig, ConnectionManager};
//!
//! #[tokio::main]
//! async fn main() -> peerlink::Result<()> {
//!     let mut manager = ConnectionManager::builder(driver, behavior)
//!         .config(ConnectionConfig::default())
//!         .sink(sink)
//!         .build();
//!
//!     manager.open("/dev/ttyUSB0").await?;
//!     manager.initialize().await?;
//!     manager.connect().await?;
//!     Ok(())
//! }
//! ```

pub mod behavior;
pub mod config;
pub mod error;
pub mod framing;
pub mod gate;
pub mod sink;
pub mod state;
pub mod transport;

mod handshake;
mod keepalive;
mod manager;

pub use behavior::{Behavior, Capabilities, EventEmitter, Verdict};
pub use config::ConnectionConfig;
pub use error::{PeerlinkError, Result};
pub use gate::SendGate;
pub use handshake::FIRMWARE_FLASH_DEADLINE;
pub use manager::{ConnectionManager, ConnectionManagerBuilder, RESET_SETTLE};
pub use sink::{LinkEvent, Sink};
pub use state::{ConnectionState, LinkState};
