//! Topic layout on the bus.
//!
//! ```text
//! <base>/bridge/status                          online | offline (retained, last will)
//! <base>/<device_id>/config                     board discovery record
//! <discovery>/switch/<device_id>/relay<i>/config  switch discovery record
//! <base>/<device_id>/relay<i>/state             ON | OFF
//! <base>/<device_id>/relay<i>/set               inbound commands
//! <base>/<device_id>/relay<i>/availability      online | offline
//! ```

pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("topic '{0}' is outside the bridge base topic")]
    ForeignPrefix(String),

    #[error("topic '{0}' is not a relay command topic")]
    NotACommand(String),

    #[error("topic '{0}' has an invalid relay segment")]
    InvalidRelay(String),
}

/// A parsed `<base>/<device_id>/relay<i>/set` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTarget {
    pub device_id: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    base: String,
    discovery_prefix: String,
}

impl TopicScheme {
    pub fn new(base: &str, discovery_prefix: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            discovery_prefix: discovery_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn bridge_status(&self) -> String {
        format!("{}/bridge/status", self.base)
    }

    pub fn board_config(&self, device_id: &str) -> String {
        format!("{}/{}/config", self.base, device_id)
    }

    pub fn relay_config(&self, device_id: &str, index: usize) -> String {
        format!(
            "{}/switch/{}/relay{}/config",
            self.discovery_prefix, device_id, index
        )
    }

    pub fn relay_state(&self, device_id: &str, index: usize) -> String {
        format!("{}/{}/relay{}/state", self.base, device_id, index)
    }

    pub fn relay_command(&self, device_id: &str, index: usize) -> String {
        format!("{}/{}/relay{}/set", self.base, device_id, index)
    }

    pub fn relay_availability(&self, device_id: &str, index: usize) -> String {
        format!("{}/{}/relay{}/availability", self.base, device_id, index)
    }

    pub fn parse_command(&self, topic: &str) -> Result<CommandTarget, TopicError> {
        let rest = topic
            .strip_prefix(self.base.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| TopicError::ForeignPrefix(topic.to_string()))?;

        let segments: Vec<&str> = rest.split('/').collect();
        let [device_id, relay, "set"] = segments.as_slice() else {
            return Err(TopicError::NotACommand(topic.to_string()));
        };
        if device_id.is_empty() {
            return Err(TopicError::NotACommand(topic.to_string()));
        }

        let index = relay
            .strip_prefix("relay")
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or_else(|| TopicError::InvalidRelay(topic.to_string()))?;

        Ok(CommandTarget {
            device_id: device_id.to_string(),
            index,
        })
    }
}
