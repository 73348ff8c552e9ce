//! Home Assistant MQTT discovery records and the announcement sequence.
//!
//! One record per board, one switch record per relay, all retained so Home
//! Assistant picks them up whenever it (re)connects to the broker.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{BoardConfig, BridgeConfig};
use crate::mqtt::topics::{TopicScheme, ONLINE};
use crate::mqtt::{BusError, BusPublisher};
use crate::relay::RelayState;

pub const MODEL: &str = "Socket Giant";
pub const MANUFACTURER: &str = "VKModules";
const TRIGGER_ICON: &str = "mdi:flash";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
    pub manufacturer: &'static str,
}

impl DeviceInfo {
    pub fn for_board(board: &BoardConfig) -> Self {
        Self {
            identifiers: vec![board.device_id.clone()],
            name: board.friendly_name.clone(),
            model: MODEL,
            manufacturer: MANUFACTURER,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BoardDiscovery {
    pub name: String,
    pub unique_id: String,
    pub device: DeviceInfo,
}

impl BoardDiscovery {
    pub fn for_board(board: &BoardConfig) -> Self {
        Self {
            name: board.friendly_name.clone(),
            unique_id: board.device_id.clone(),
            device: DeviceInfo::for_board(board),
        }
    }
}

/// Switch entity for one relay. Trigger relays are momentary: Home
/// Assistant must not retain their commands and shows them optimistically.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SwitchDiscovery {
    pub name: String,
    pub state_topic: String,
    pub command_topic: String,
    pub payload_on: &'static str,
    pub payload_off: &'static str,
    pub availability_topic: String,
    pub unique_id: String,
    pub device: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'static str>,
}

impl SwitchDiscovery {
    pub fn for_relay(board: &BoardConfig, topics: &TopicScheme, index: usize) -> Self {
        let id = board.device_id.as_str();
        let trigger = board.is_trigger(index);
        Self {
            name: format!("RL-{}", index + 1),
            state_topic: topics.relay_state(id, index),
            command_topic: topics.relay_command(id, index),
            payload_on: RelayState::On.as_payload(),
            payload_off: RelayState::Off.as_payload(),
            availability_topic: topics.relay_availability(id, index),
            unique_id: format!("{}_rl_{}", id, index + 1),
            device: DeviceInfo::for_board(board),
            retain: trigger.then_some(false),
            optimistic: trigger.then_some(true),
            icon: trigger.then_some(TRIGGER_ICON),
        }
    }
}

/// Announces one board: discovery records, command subscriptions, initial
/// OFF state and availability for every relay.
pub async fn announce_board<P: BusPublisher>(
    board: &BoardConfig,
    topics: &TopicScheme,
    publisher: &P,
) -> Result<(), BusError> {
    let id = board.device_id.as_str();
    let record = serde_json::to_string(&BoardDiscovery::for_board(board))?;
    publisher
        .publish_str(topics.board_config(id), record, true)
        .await?;
    info!("Announced board {} as {}", id, board.friendly_name);

    for index in board.relay_indices() {
        let switch = SwitchDiscovery::for_relay(board, topics, index);
        let command_topic = switch.command_topic.clone();
        let state_topic = switch.state_topic.clone();
        let availability_topic = switch.availability_topic.clone();

        publisher
            .publish_str(
                topics.relay_config(id, index),
                serde_json::to_string(&switch)?,
                true,
            )
            .await?;
        publisher.subscribe_to(command_topic).await?;
        publisher
            .publish_str(state_topic, RelayState::Off.as_payload().to_string(), true)
            .await?;
        publisher
            .publish_str(availability_topic, ONLINE.to_string(), true)
            .await?;
        debug!("Announced relay {} of {}", index, id);
    }
    Ok(())
}

/// Full announcement for every enabled board, followed by the bridge
/// status going online. Returns how many boards were announced.
pub async fn announce<P: BusPublisher>(
    config: &BridgeConfig,
    topics: &TopicScheme,
    publisher: &P,
) -> Result<usize, BusError> {
    let mut announced = 0;
    for board in &config.boards {
        if !board.enabled {
            info!("Board {} is disabled, not announcing", board.device_id);
            continue;
        }
        announce_board(board, topics, publisher).await?;
        announced += 1;
    }

    publisher
        .publish_str(topics.bridge_status(), ONLINE.to_string(), true)
        .await?;
    Ok(announced)
}
