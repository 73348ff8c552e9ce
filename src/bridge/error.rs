//! Error definitions for the bridge module

use std::time::Duration;
use thiserror::Error;

use crate::mqtt::topics::TopicError;
use crate::mqtt::BusError;
use crate::relay::{ParsePayloadError, RelayError};

/// Why a single inbound command was dropped. Never fatal.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    MalformedTopic(#[from] TopicError),

    #[error("unknown board '{0}'")]
    UnknownBoard(String),

    #[error("board '{0}' is disabled")]
    BoardDisabled(String),

    #[error("board '{board}' has no relay {index} (relay_count {relay_count})")]
    IndexOutOfRange {
        board: String,
        index: usize,
        relay_count: usize,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParsePayloadError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("{board} relay {index} may be stuck on, ending the pulse failed: {source}")]
    PulseIncomplete {
        board: String,
        index: usize,
        #[source]
        source: RelayError,
    },

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Failures of the coordinator lifecycle itself.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no connection to MQTT broker {broker} within {timeout:?}")]
    BusConnection { broker: String, timeout: Duration },

    #[error("MQTT event loop ended before the bridge connected")]
    BusClosed,

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}
