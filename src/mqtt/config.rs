use rumqttc::{LastWill, MqttOptions, QoS};
use std::time::Duration;

use super::topics::{TopicScheme, OFFLINE};

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "socket-giant-bridge";
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_BASE_TOPIC: &str = "homeassistant/socket_giant";

#[derive(Debug, Clone, PartialEq)]
pub struct MqttCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Option<MqttCredentials>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub discovery_prefix: String,
    pub base_topic: String,
    /// How long to wait for the first ConnAck before giving up.
    pub connect_timeout: Duration,
    /// Pause between event loop errors, rumqttc reconnects on the next poll.
    pub reconnect_delay: Duration,
}

impl MqttConfig {
    pub fn for_broker(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: DEFAULT_PORT,
            credentials: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            keep_alive: Duration::from_secs(60),
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            connect_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn topics(&self) -> TopicScheme {
        TopicScheme::new(&self.base_topic, &self.discovery_prefix)
    }

    /// Client options including the retained "offline" last will on the
    /// bridge status topic.
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_last_will(LastWill::new(
            self.topics().bridge_status(),
            OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        ));
        if let Some(credentials) = &self.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }
        options
    }
}
