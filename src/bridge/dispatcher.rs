//! Inbound command handling.
//!
//! Each message on a `.../relay<i>/set` topic becomes at most one toggle
//! (plain relays) or one ON/OFF pulse (trigger relays). Commands run as
//! independent tasks, so a pulse in progress never holds up another relay.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bridge::error::CommandError;
use crate::config::{BoardConfig, BridgeConfig};
use crate::mqtt::topics::TopicScheme;
use crate::mqtt::BusPublisher;
use crate::relay::{RelayControl, RelayState};

/// What a successfully dispatched command did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Plain relay driven to `hardware`. The state topic follows on the next poll.
    Switched {
        device_id: String,
        index: usize,
        hardware: RelayState,
    },
    /// Trigger relay pulsed and reported back OFF, whatever the payload.
    Pulsed { device_id: String, index: usize },
}

pub struct CommandDispatcher<R: RelayControl, P: BusPublisher> {
    config: Arc<BridgeConfig>,
    topics: TopicScheme,
    relay: Arc<R>,
    publisher: P,
}

impl<R: RelayControl, P: BusPublisher> CommandDispatcher<R, P> {
    pub fn new(config: Arc<BridgeConfig>, relay: Arc<R>, publisher: P) -> Self {
        let topics = config.mqtt.topics();
        Self {
            config,
            topics,
            relay,
            publisher,
        }
    }

    /// Entry point for the bus listener. Failures are logged and dropped.
    pub async fn handle_command(&self, topic: &str, payload: &[u8]) {
        match self.dispatch(topic, payload).await {
            Ok(outcome) => debug!("Command on {} done: {:?}", topic, outcome),
            Err(e @ (CommandError::Relay(_) | CommandError::PulseIncomplete { .. })) => {
                error!("Command on {} failed: {}", topic, e)
            }
            Err(e) => warn!("Ignoring command on {}: {}", topic, e),
        }
    }

    pub async fn dispatch(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<CommandOutcome, CommandError> {
        let target = self.topics.parse_command(topic)?;

        let board = self
            .config
            .board(&target.device_id)
            .ok_or_else(|| CommandError::UnknownBoard(target.device_id.clone()))?;
        if !board.enabled {
            return Err(CommandError::BoardDisabled(board.device_id.clone()));
        }
        if !board.has_relay(target.index) {
            return Err(CommandError::IndexOutOfRange {
                board: board.device_id.clone(),
                index: target.index,
                relay_count: board.relay_count,
            });
        }

        let requested = RelayState::from_payload(payload)?;

        if board.is_trigger(target.index) {
            debug!(
                "{} relay {} is a trigger, pulsing on {}",
                board.device_id, target.index, requested
            );
            self.trigger(board, target.index).await
        } else {
            self.switch(board, target.index, requested).await
        }
    }

    async fn switch(
        &self,
        board: &BoardConfig,
        index: usize,
        requested: RelayState,
    ) -> Result<CommandOutcome, CommandError> {
        let hardware = board.to_hardware(index, requested);
        info!(
            "Switching {} relay {} {} (hardware {})",
            board.device_id, index, requested, hardware
        );
        self.relay.set_relay(board, index, hardware).await?;
        Ok(CommandOutcome::Switched {
            device_id: board.device_id.clone(),
            index,
            hardware,
        })
    }

    /// ON, wait, OFF, then report the rest state. A failed start aborts the
    /// pulse; a failed end leaves the relay on and publishes nothing.
    async fn trigger(
        &self,
        board: &BoardConfig,
        index: usize,
    ) -> Result<CommandOutcome, CommandError> {
        let pulse = self.config.pulse.trigger_pulse_time;
        info!("Pulsing {} relay {} for {:?}", board.device_id, index, pulse);

        self.relay
            .set_relay(board, index, board.to_hardware(index, RelayState::On))
            .await?;
        tokio::time::sleep(pulse).await;
        self.relay
            .set_relay(board, index, board.to_hardware(index, RelayState::Off))
            .await
            .map_err(|source| CommandError::PulseIncomplete {
                board: board.device_id.clone(),
                index,
                source,
            })?;

        self.publisher
            .publish_str(
                self.topics.relay_state(&board.device_id, index),
                RelayState::Off.as_payload().to_string(),
                false,
            )
            .await?;
        Ok(CommandOutcome::Pulsed {
            device_id: board.device_id.clone(),
            index,
        })
    }
}
