//! On-disk configuration schema and its validation into [`BridgeConfig`].
//!
//! Two layouts are accepted. The board list:
//!
//! ```toml
//! poll_interval = 2
//! trigger_pulse_time = 0.2
//!
//! [mqtt]
//! host = "192.168.1.10"
//!
//! [[boards]]
//! device_id = "socket_giant_1"
//! host = "192.168.1.50"
//! username = "admin"
//! password = "admin"
//! inverted_relays = [0, 1]
//! trigger_relays = [5]
//! ```
//!
//! and the flat single-board add-on options (`relay_ip`, `relay_login`,
//! `mqtt_broker`, ...), which are turned into a one-element board list.

use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{BoardConfig, BridgeConfig, ConfigError, PulseConfig, PulseSetting};
use crate::mqtt::config::{
    MqttConfig, MqttCredentials, DEFAULT_BASE_TOPIC, DEFAULT_CLIENT_ID, DEFAULT_DISCOVERY_PREFIX,
    DEFAULT_PORT,
};

const DEFAULT_POLL_INTERVAL: f64 = 2.0;
const DEFAULT_BOARD_PORT: u16 = 80;
const DEFAULT_RELAY_COUNT: usize = 16;
const LEGACY_DEVICE_ID: &str = "socket_giant_1";
const LEGACY_FRIENDLY_NAME: &str = "Socket Giant 1";

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct RawConfig {
    #[serde(alias = "relay_poll_interval")]
    pub poll_interval: Option<f64>,
    pub trigger_pulse_time: Option<PulseSetting>,
    pub mqtt: Option<RawMqtt>,
    pub boards: Vec<RawBoard>,

    // Flat single-board layout.
    pub relay_ip: Option<String>,
    pub relay_port: Option<u16>,
    pub relay_login: Option<String>,
    pub relay_password: Option<String>,
    pub relay_count: Option<usize>,
    pub inverted_relays: Option<Vec<usize>>,
    pub trigger_relays: Option<Vec<usize>>,
    pub device_id: Option<String>,
    pub friendly_name: Option<String>,
    pub mqtt_broker: Option<String>,
    pub mqtt_port: Option<u16>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct RawMqtt {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub keep_alive: Option<u64>,
    pub discovery_prefix: Option<String>,
    pub base_topic: Option<String>,
    pub connect_timeout: Option<u64>,
    pub reconnect_delay: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct RawBoard {
    pub device_id: Option<String>,
    pub friendly_name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub relay_count: Option<usize>,
    pub inverted_relays: Option<Vec<usize>>,
    pub trigger_relays: Option<Vec<usize>>,
    pub enabled: Option<bool>,
    pub skip_redundant_toggle: Option<bool>,
}

impl RawConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Board list to validate. Falls back to the flat layout when no
    /// `[[boards]]` are given. There, every relay is inverted unless
    /// `inverted_relays` says otherwise, matching how the add-on has always
    /// treated these boards.
    fn raw_boards(&self) -> Vec<RawBoard> {
        if !self.boards.is_empty() || self.relay_ip.is_none() {
            return self.boards.clone();
        }

        info!("No [[boards]] configured, using single-board options");
        let relay_count = self.relay_count.unwrap_or(DEFAULT_RELAY_COUNT);
        vec![RawBoard {
            device_id: Some(
                self.device_id
                    .clone()
                    .unwrap_or_else(|| LEGACY_DEVICE_ID.to_string()),
            ),
            friendly_name: Some(
                self.friendly_name
                    .clone()
                    .unwrap_or_else(|| LEGACY_FRIENDLY_NAME.to_string()),
            ),
            host: self.relay_ip.clone(),
            port: self.relay_port,
            username: self.relay_login.clone(),
            password: self.relay_password.clone(),
            relay_count: Some(relay_count),
            inverted_relays: Some(
                self.inverted_relays
                    .clone()
                    .unwrap_or_else(|| (0..relay_count).collect()),
            ),
            trigger_relays: self.trigger_relays.clone(),
            enabled: Some(true),
            skip_redundant_toggle: None,
        }]
    }

    fn raw_mqtt(&self) -> RawMqtt {
        let mut mqtt = self.mqtt.clone().unwrap_or_default();
        mqtt.host = mqtt.host.or_else(|| self.mqtt_broker.clone());
        mqtt.port = mqtt.port.or(self.mqtt_port);
        mqtt.username = mqtt.username.or_else(|| self.mqtt_username.clone());
        mqtt.password = mqtt.password.or_else(|| self.mqtt_password.clone());
        mqtt
    }

    pub fn validate(self) -> Result<BridgeConfig, ConfigError> {
        let poll_seconds = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if !poll_seconds.is_finite() || poll_seconds <= 0.0 {
            return Err(ConfigError::InvalidValue {
                context: "bridge".into(),
                field: "poll_interval",
                reason: format!("{} is not a positive number of seconds", poll_seconds),
            });
        }
        let poll_interval =
            Duration::try_from_secs_f64(poll_seconds).map_err(|e| ConfigError::InvalidValue {
                context: "bridge".into(),
                field: "poll_interval",
                reason: format!("{} seconds: {}", poll_seconds, e),
            })?;

        let mqtt = validate_mqtt(self.raw_mqtt())?;
        let pulse = PulseConfig::from_setting(self.trigger_pulse_time.as_ref());

        let raw_boards = self.raw_boards();
        if raw_boards.is_empty() {
            return Err(ConfigError::NoBoards);
        }

        let mut seen = HashSet::new();
        let mut boards = Vec::with_capacity(raw_boards.len());
        for (position, raw) in raw_boards.into_iter().enumerate() {
            let board = validate_board(position, raw)?;
            if !seen.insert(board.device_id.clone()) {
                return Err(ConfigError::DuplicateDeviceId(board.device_id));
            }
            boards.push(Arc::new(board));
        }

        if boards.iter().all(|b| !b.enabled) {
            warn!("All {} configured boards are disabled", boards.len());
        }

        Ok(BridgeConfig {
            mqtt,
            poll_interval,
            pulse,
            boards,
        })
    }
}

fn validate_mqtt(raw: RawMqtt) -> Result<MqttConfig, ConfigError> {
    let context = || "mqtt".to_string();

    let host = non_empty(raw.host).ok_or_else(|| ConfigError::MissingField {
        context: context(),
        field: "host",
    })?;

    let credentials = match (non_empty(raw.username), raw.password) {
        (Some(username), Some(password)) => Some(MqttCredentials { username, password }),
        (None, None) => None,
        _ => {
            warn!("MQTT username and password must both be set, connecting without credentials");
            None
        }
    };

    let base_topic = raw
        .base_topic
        .unwrap_or_else(|| DEFAULT_BASE_TOPIC.to_string());
    if base_topic.trim_matches('/').is_empty() || base_topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidValue {
            context: context(),
            field: "base_topic",
            reason: format!("'{}' is not a usable topic prefix", base_topic),
        });
    }

    let mut mqtt = MqttConfig::for_broker(&host);
    mqtt.port = raw.port.unwrap_or(DEFAULT_PORT);
    mqtt.credentials = credentials;
    mqtt.client_id = raw
        .client_id
        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
    mqtt.discovery_prefix = raw
        .discovery_prefix
        .unwrap_or_else(|| DEFAULT_DISCOVERY_PREFIX.to_string());
    mqtt.base_topic = base_topic;
    if let Some(secs) = raw.keep_alive {
        mqtt.keep_alive = Duration::from_secs(secs.max(5));
    }
    if let Some(secs) = raw.connect_timeout {
        mqtt.connect_timeout = Duration::from_secs(secs.max(1));
    }
    if let Some(secs) = raw.reconnect_delay {
        mqtt.reconnect_delay = Duration::from_secs(secs);
    }
    Ok(mqtt)
}

fn validate_board(position: usize, raw: RawBoard) -> Result<BoardConfig, ConfigError> {
    let unnamed = format!("boards[{}]", position);
    let device_id = non_empty(raw.device_id).ok_or_else(|| ConfigError::MissingField {
        context: unnamed.clone(),
        field: "device_id",
    })?;
    let context = format!("board '{}'", device_id);

    if device_id
        .chars()
        .any(|c| c == '/' || c == '+' || c == '#' || c.is_whitespace())
    {
        return Err(ConfigError::InvalidValue {
            context,
            field: "device_id",
            reason: "must not contain '/', '+', '#' or whitespace".into(),
        });
    }

    let missing = |field: &'static str| ConfigError::MissingField {
        context: context.clone(),
        field,
    };
    let host = non_empty(raw.host).ok_or_else(|| missing("host"))?;
    let username = raw.username.ok_or_else(|| missing("username"))?;
    let password = raw.password.ok_or_else(|| missing("password"))?;

    let relay_count = raw.relay_count.unwrap_or(DEFAULT_RELAY_COUNT);
    if relay_count == 0 {
        return Err(ConfigError::InvalidValue {
            context,
            field: "relay_count",
            reason: "must be at least 1".into(),
        });
    }

    let inverted_relays =
        relay_set(&context, "inverted_relays", raw.inverted_relays, relay_count)?;
    let trigger_relays = relay_set(&context, "trigger_relays", raw.trigger_relays, relay_count)?;

    Ok(BoardConfig {
        friendly_name: non_empty(raw.friendly_name).unwrap_or_else(|| device_id.clone()),
        device_id,
        host,
        port: raw.port.unwrap_or(DEFAULT_BOARD_PORT),
        username,
        password,
        relay_count,
        inverted_relays,
        trigger_relays,
        enabled: raw.enabled.unwrap_or(true),
        skip_redundant_toggle: raw.skip_redundant_toggle.unwrap_or(false),
    })
}

fn relay_set(
    context: &str,
    field: &'static str,
    indices: Option<Vec<usize>>,
    relay_count: usize,
) -> Result<BTreeSet<usize>, ConfigError> {
    let indices = indices.unwrap_or_default();
    if let Some(bad) = indices.iter().find(|&&i| i >= relay_count) {
        return Err(ConfigError::InvalidValue {
            context: context.to_string(),
            field,
            reason: format!("relay {} is outside 0..{}", bad, relay_count),
        });
    }
    Ok(indices.into_iter().collect())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
