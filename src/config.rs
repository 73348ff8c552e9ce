//! Typed, validated bridge configuration.
//!
//! Built once at startup by [`crate::persistence`] and shared read-only
//! (`Arc<BridgeConfig>`) between the poll loop and the command listener.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::mqtt::config::MqttConfig;
use crate::relay::RelayState;

pub const DEFAULT_PULSE_TIME: Duration = Duration::from_millis(200);
pub const MIN_PULSE_TIME: Duration = Duration::from_millis(50);
pub const MAX_PULSE_TIME: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no configuration file found (looked in: {0})")]
    NotFound(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("{context}: missing required field '{field}'")]
    MissingField {
        context: String,
        field: &'static str,
    },

    #[error("{context}: invalid value for '{field}': {reason}")]
    InvalidValue {
        context: String,
        field: &'static str,
        reason: String,
    },

    #[error("duplicate device_id '{0}'")]
    DuplicateDeviceId(String),

    #[error("no boards configured")]
    NoBoards,
}

/// Static description of one relay board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    pub device_id: String,
    pub friendly_name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub relay_count: usize,
    pub inverted_relays: BTreeSet<usize>,
    pub trigger_relays: BTreeSet<usize>,
    pub enabled: bool,
    /// Read the status page before toggling and skip the toggle when the
    /// relay is already in the requested state.
    pub skip_redundant_toggle: bool,
}

impl BoardConfig {
    pub fn relay_indices(&self) -> Range<usize> {
        0..self.relay_count
    }

    pub fn has_relay(&self, index: usize) -> bool {
        index < self.relay_count
    }

    pub fn is_inverted(&self, index: usize) -> bool {
        self.inverted_relays.contains(&index)
    }

    pub fn is_trigger(&self, index: usize) -> bool {
        self.trigger_relays.contains(&index)
    }

    /// Maps a logical value to what the hardware has to be driven to.
    /// Inversion is symmetric, so this also maps hardware back to logical.
    pub fn to_hardware(&self, index: usize, logical: RelayState) -> RelayState {
        if self.is_inverted(index) {
            logical.inverted()
        } else {
            logical
        }
    }

    pub fn status_url(&self) -> String {
        format!("http://{}:{}/protect/status.xml", self.host, self.port)
    }

    pub fn toggle_url(&self, index: usize) -> String {
        format!(
            "http://{}:{}/protect/leds.cgi?led={}",
            self.host, self.port, index
        )
    }
}

/// Raw `trigger_pulse_time` as written in the file. Accepts numbers and
/// numeric strings, anything else falls back to the default.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PulseSetting {
    Seconds(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseConfig {
    pub trigger_pulse_time: Duration,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            trigger_pulse_time: DEFAULT_PULSE_TIME,
        }
    }
}

impl PulseConfig {
    pub fn from_setting(setting: Option<&PulseSetting>) -> Self {
        let seconds = match setting {
            None => return Self::default(),
            Some(PulseSetting::Seconds(value)) => Some(*value),
            Some(PulseSetting::Text(text)) => text.trim().parse::<f64>().ok(),
        };

        let Some(seconds) = seconds.filter(|s| s.is_finite()) else {
            warn!(
                "trigger_pulse_time {:?} is not a number, using default {:?}",
                setting, DEFAULT_PULSE_TIME
            );
            return Self::default();
        };

        if seconds < MIN_PULSE_TIME.as_secs_f64() || seconds > MAX_PULSE_TIME.as_secs_f64() {
            warn!(
                "trigger_pulse_time {}s outside [{:?}, {:?}], using default {:?}",
                seconds, MIN_PULSE_TIME, MAX_PULSE_TIME, DEFAULT_PULSE_TIME
            );
            return Self::default();
        }

        Self {
            trigger_pulse_time: Duration::from_secs_f64(seconds),
        }
    }
}

/// Complete, validated configuration. Immutable after load.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt: MqttConfig,
    pub poll_interval: Duration,
    pub pulse: PulseConfig,
    pub boards: Vec<Arc<BoardConfig>>,
}

impl BridgeConfig {
    /// Looks up a board by id, including disabled ones.
    pub fn board(&self, device_id: &str) -> Option<&Arc<BoardConfig>> {
        self.boards.iter().find(|b| b.device_id == device_id)
    }

    pub fn enabled_boards(&self) -> impl Iterator<Item = &Arc<BoardConfig>> {
        self.boards.iter().filter(|b| b.enabled)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn board(device_id: &str, relay_count: usize) -> BoardConfig {
        BoardConfig {
            device_id: device_id.to_string(),
            friendly_name: format!("Board {}", device_id),
            host: "127.0.0.1".to_string(),
            port: 80,
            username: "admin".to_string(),
            password: "secret".to_string(),
            relay_count,
            inverted_relays: BTreeSet::new(),
            trigger_relays: BTreeSet::new(),
            enabled: true,
            skip_redundant_toggle: false,
        }
    }

    pub fn bridge(boards: Vec<BoardConfig>) -> BridgeConfig {
        BridgeConfig {
            mqtt: MqttConfig::for_broker("localhost"),
            poll_interval: Duration::from_secs(2),
            pulse: PulseConfig::default(),
            boards: boards.into_iter().map(Arc::new).collect(),
        }
    }
}
