//! Connection configuration.
//!
//! [`ConnectionConfig`] is resolved once at construction and treated as
//! read-only for the connection's lifetime. Line-level options layer
//! caller-supplied overrides on top of the classic serial defaults
//! (9600 baud, 8 data bits, 1 stop bit, no parity); the resolved
//! [`LineSettings`] are what the transport driver receives.
//!
//! # Example
//!
//! ```
//! use peerlink::config::{ConnectionConfig, FlowControl, LineOptions};
//!
//! let config = ConnectionConfig {
//!     flow_control: FlowControl::Hardware,
//!     line: LineOptions {
//!         baud_rate: Some(19_200),
//!         ..LineOptions::default()
//!     },
//!     ..ConnectionConfig::default()
//! };
//!
//! let settings = config.resolve_line();
//! assert_eq!(settings.baud_rate, 19_200);
//! assert!(settings.rts_cts);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default baud rate applied when the caller supplies none.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default number of data bits.
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default number of stop bits.
pub const DEFAULT_STOP_BITS: u8 = 1;

/// Default steady-state poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default silence window tolerated before the link is declared lost.
pub const DEFAULT_LOSS_WINDOW: Duration = Duration::from_millis(1000);

/// Which side of the exchange this endpoint plays.
///
/// A master replies to inbound frames immediately and drives no independent
/// poll timer; a slave actively polls the peer on a fixed interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Replies ride the inbound cadence.
    Master,
    /// Prompts the peer on a poll timer.
    #[default]
    Slave,
}

/// Flow control discipline, translated into low-level line flags by
/// [`ConnectionConfig::resolve_line`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// RTS/CTS hardware flow control.
    Hardware,
    /// XON/XOFF software flow control.
    Software,
}

/// Parity bit configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// How outbound payloads are interpreted by the send gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Payload bytes go out verbatim.
    #[default]
    Binary,
    /// Payloads are converted to their text byte representation before the
    /// write (non-UTF-8 input is sanitized).
    Text,
}

/// Frame delimiting applied to the inbound byte stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode")]
pub enum Framing {
    /// No framing: every read chunk is emitted as-is.
    #[default]
    None,
    /// Frames end at a text delimiter.
    Text {
        /// The delimiter string (e.g. `"\r\n"`).
        delimiter: String,
        /// Keep the delimiter in the emitted frame.
        retain: bool,
    },
    /// Frames end at an arbitrary byte sequence.
    Bytes {
        /// The delimiter bytes.
        delimiter: Vec<u8>,
        /// Keep the delimiter in the emitted frame.
        retain: bool,
    },
}

/// Per-field line overrides. Unset fields fall back to the defaults when the
/// configuration is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineOptions {
    /// Baud rate override (default 9600).
    pub baud_rate: Option<u32>,
    /// Data bits override (default 8).
    pub data_bits: Option<u8>,
    /// Stop bits override (default 1).
    pub stop_bits: Option<u8>,
    /// Parity override (default none).
    pub parity: Option<Parity>,
}

/// Fully resolved line settings handed to the transport driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    /// Baud rate.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: u8,
    /// Stop bits per character.
    pub stop_bits: u8,
    /// Parity discipline.
    pub parity: Parity,
    /// RTS/CTS hardware flow control enabled.
    pub rts_cts: bool,
    /// XON/XOFF software flow control enabled.
    pub xon_xoff: bool,
}

/// Immutable configuration for one connection, resolved at open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Endpoint role (default slave).
    pub role: Role,
    /// Steady-state poll interval for non-master endpoints, and the slave
    /// handshake prompt cadence. `None` disables polling.
    pub poll_interval: Option<Duration>,
    /// Maximum silence tolerated while connected before declaring the link
    /// lost.
    pub loss_window: Duration,
    /// Arm the firmware-flash deadline during the handshake.
    pub firmware_check: bool,
    /// Re-forward the last staged data on this cadence, independent of
    /// inbound frames. `None` disables the heartbeat.
    pub advertise_interval: Option<Duration>,
    /// Toggle the transport reset line when entering steady state.
    pub software_reset: bool,
    /// Inbound frame delimiting.
    pub framing: Framing,
    /// Flow control discipline.
    pub flow_control: FlowControl,
    /// Outbound payload interpretation.
    pub payload_encoding: PayloadEncoding,
    /// Line-level overrides.
    pub line: LineOptions,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            role: Role::Slave,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
            loss_window: DEFAULT_LOSS_WINDOW,
            firmware_check: false,
            advertise_interval: None,
            software_reset: false,
            framing: Framing::None,
            flow_control: FlowControl::None,
            payload_encoding: PayloadEncoding::Binary,
            line: LineOptions::default(),
        }
    }
}

impl ConnectionConfig {
    /// Layer the line defaults under the caller-supplied overrides and
    /// translate the flow-control discipline into line flags.
    ///
    /// Any explicitly supplied option wins over its default.
    pub fn resolve_line(&self) -> LineSettings {
        LineSettings {
            baud_rate: self.line.baud_rate.unwrap_or(DEFAULT_BAUD_RATE),
            data_bits: self.line.data_bits.unwrap_or(DEFAULT_DATA_BITS),
            stop_bits: self.line.stop_bits.unwrap_or(DEFAULT_STOP_BITS),
            parity: self.line.parity.unwrap_or_default(),
            rts_cts: self.flow_control == FlowControl::Hardware,
            xon_xoff: self.flow_control == FlowControl::Software,
        }
    }

    /// Delimiter bytes for the configured framing, if any.
    pub(crate) fn delimiter(&self) -> Option<(Vec<u8>, bool)> {
        match &self.framing {
            Framing::None => None,
            Framing::Text { delimiter, retain } => {
                Some((delimiter.as_bytes().to_vec(), *retain))
            }
            Framing::Bytes { delimiter, retain } => Some((delimiter.clone(), *retain)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_all_defaults() {
        let settings = ConnectionConfig::default().resolve_line();

        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.stop_bits, 1);
        assert_eq!(settings.parity, Parity::None);
        assert!(!settings.rts_cts);
        assert!(!settings.xon_xoff);
    }

    #[test]
    fn test_explicit_option_wins_over_default() {
        let config = ConnectionConfig {
            line: LineOptions {
                baud_rate: Some(19_200),
                ..LineOptions::default()
            },
            ..ConnectionConfig::default()
        };

        assert_eq!(config.resolve_line().baud_rate, 19_200);
    }

    #[test]
    fn test_partial_overrides_keep_remaining_defaults() {
        let config = ConnectionConfig {
            line: LineOptions {
                data_bits: Some(7),
                parity: Some(Parity::Even),
                ..LineOptions::default()
            },
            ..ConnectionConfig::default()
        };

        let settings = config.resolve_line();
        assert_eq!(settings.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(settings.data_bits, 7);
        assert_eq!(settings.stop_bits, 1);
        assert_eq!(settings.parity, Parity::Even);
    }

    #[test]
    fn test_flow_control_translates_to_line_flags() {
        let hardware = ConnectionConfig {
            flow_control: FlowControl::Hardware,
            ..ConnectionConfig::default()
        };
        assert!(hardware.resolve_line().rts_cts);
        assert!(!hardware.resolve_line().xon_xoff);

        let software = ConnectionConfig {
            flow_control: FlowControl::Software,
            ..ConnectionConfig::default()
        };
        assert!(!software.resolve_line().rts_cts);
        assert!(software.resolve_line().xon_xoff);
    }

    #[test]
    fn test_text_delimiter_as_bytes() {
        let config = ConnectionConfig {
            framing: Framing::Text {
                delimiter: "\r\n".into(),
                retain: false,
            },
            ..ConnectionConfig::default()
        };

        let (needle, retain) = config.delimiter().unwrap();
        assert_eq!(needle, b"\r\n");
        assert!(!retain);
    }

    #[test]
    fn test_no_framing_has_no_delimiter() {
        assert!(ConnectionConfig::default().delimiter().is_none());
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = ConnectionConfig {
            role: Role::Master,
            poll_interval: None,
            firmware_check: true,
            framing: Framing::Bytes {
                delimiter: vec![0x7E],
                retain: true,
            },
            ..ConnectionConfig::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let back: ConnectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
