//! Relay board access
//!
//! Everything that talks to a physical board or interprets what it reports:
//!
//! 1. [`relay_client`] - HTTP access to the XML status page and the CGI toggle
//! 2. [`reconciler`] - raw hardware bits to user-facing [`RelayState`]s
//!
//! # Architecture
//!
//! ```text
//! status.xml ──► RelayClient ──► RawStates ──► reconcile() ──► RelayStates
//!                    ▲                          (inversion,
//!   set_relay() ─────┘                           trigger rest)
//! ```
//!
//! The board API has no atomic multi-relay write, so every command is a
//! single best-effort request. Failures are scoped to one board and never
//! escape as panics.

pub mod reconciler;
pub mod relay_client;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use crate::config::BoardConfig;

pub use reconciler::{changed, reconcile, RelayStates};
pub use relay_client::RelayClient;

/// Raw hardware bits as read from the status document, `true` meaning `1`.
pub type RawStates = BTreeMap<usize, bool>;

/// Logical relay value as seen by the user, after inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            RelayState::On
        } else {
            RelayState::Off
        }
    }

    pub fn is_on(self) -> bool {
        self == RelayState::On
    }

    pub fn inverted(self) -> Self {
        match self {
            RelayState::On => RelayState::Off,
            RelayState::Off => RelayState::On,
        }
    }

    /// Payload string used on the bus.
    pub fn as_payload(self) -> &'static str {
        match self {
            RelayState::On => "ON",
            RelayState::Off => "OFF",
        }
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_payload())
    }
}

impl RelayState {
    /// Decodes a raw command payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParsePayloadError> {
        std::str::from_utf8(payload)
            .map_err(|_| ParsePayloadError::NotUtf8)?
            .parse()
    }
}

impl FromStr for RelayState {
    type Err = ParsePayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("on") {
            Ok(RelayState::On)
        } else if trimmed.eq_ignore_ascii_case("off") {
            Ok(RelayState::Off)
        } else {
            Err(ParsePayloadError::Unsupported(trimmed.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePayloadError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("unsupported relay payload '{0}'")]
    Unsupported(String),
}

/// Per-board failure while talking to a relay controller.
///
/// None of these are fatal: a failed fetch skips the cycle for that board,
/// a failed toggle drops the command.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("board {board}: request failed: {source}")]
    Network {
        board: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("board {board}: no response within {timeout:?}")]
    Timeout { board: String, timeout: Duration },

    #[error("board {board}: unexpected HTTP status {status}")]
    Status {
        board: String,
        status: reqwest::StatusCode,
    },

    #[error("board {board}: malformed status document: {reason}")]
    Parse { board: String, reason: String },
}

impl RelayError {
    pub fn board(&self) -> &str {
        match self {
            RelayError::Network { board, .. }
            | RelayError::Timeout { board, .. }
            | RelayError::Status { board, .. }
            | RelayError::Parse { board, .. } => board,
        }
    }
}

/// Seam between the bridge logic and the hardware.
///
/// `RelayClient` is the HTTP implementation; tests plug in recording doubles.
/// `state` passed to [`RelayControl::set_relay`] is always hardware-facing,
/// inversion has already been applied by the caller.
pub trait RelayControl: Send + Sync + 'static {
    fn fetch_states(
        &self,
        board: &BoardConfig,
    ) -> impl Future<Output = Result<RawStates, RelayError>> + Send;

    fn set_relay(
        &self,
        board: &BoardConfig,
        index: usize,
        state: RelayState,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parsing_ignores_case_and_whitespace() {
        assert_eq!("on".parse::<RelayState>(), Ok(RelayState::On));
        assert_eq!(" Off\n".parse::<RelayState>(), Ok(RelayState::Off));
        assert_eq!("ON".parse::<RelayState>(), Ok(RelayState::On));
        assert_eq!(
            "toggle".parse::<RelayState>(),
            Err(ParsePayloadError::Unsupported("toggle".into()))
        );
        assert!("".parse::<RelayState>().is_err());
    }

    #[test]
    fn raw_payloads_must_be_utf8() {
        assert_eq!(RelayState::from_payload(b" on "), Ok(RelayState::On));
        assert_eq!(
            RelayState::from_payload(&[0xff, 0xfe]),
            Err(ParsePayloadError::NotUtf8)
        );
    }

    #[test]
    fn inversion_flips_both_ways() {
        assert_eq!(RelayState::On.inverted(), RelayState::Off);
        assert_eq!(RelayState::Off.inverted(), RelayState::On);
        assert_eq!(RelayState::from_bit(true).to_string(), "ON");
        assert_eq!(RelayState::from_bit(false).to_string(), "OFF");
    }
}
