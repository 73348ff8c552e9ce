use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::{BusEvent, BusMessage};

/// Capacity of the request queue between `AsyncClient` and the event loop.
const REQUEST_CAPACITY: usize = 100;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub connects: usize,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Drives the rumqttc event loop and forwards what happens on it.
///
/// Runs in its own task for the whole process lifetime. ConnAcks and
/// inbound publishes go to the coordinator through one channel so their
/// relative order is preserved. Exits after the outgoing Disconnect or once
/// the coordinator has dropped its receiver.
pub struct MqttHandler {
    status: MqttStatus,
    eventloop: EventLoop,
    events: mpsc::Sender<BusEvent>,
    reconnect_delay: Duration,
}

impl MqttHandler {
    pub fn new(config: &MqttConfig, events: mpsc::Sender<BusEvent>) -> (AsyncClient, Self) {
        info!(
            "Creating MQTT client '{}' for {}:{}",
            config.client_id, config.host, config.port
        );
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);

        let handler = MqttHandler {
            status: MqttStatus::default(),
            eventloop,
            events,
            reconnect_delay: config.reconnect_delay,
        };
        (client, handler)
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.status.connection_state != state {
            debug!(
                "MQTT connection state {:?} -> {:?}",
                self.status.connection_state, state
            );
            self.status.connection_state = state;
        }
    }

    async fn forward(&mut self, event: BusEvent) -> bool {
        if self.events.send(event).await.is_err() {
            warn!("Bus event receiver dropped, stopping MQTT event loop");
            return false;
        }
        true
    }

    pub async fn run(mut self) -> MqttStatus {
        info!("Starting MQTT event loop");
        self.set_state(ConnectionState::Connecting);

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    info!("MQTT connected ({:?})", connack.code);
                    self.set_state(ConnectionState::Connected);
                    self.status.connects += 1;
                    self.status.last_activity = Some(Local::now());
                    if !self.forward(BusEvent::Connected).await {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.status.messages_received += 1;
                    self.status.last_activity = Some(Local::now());
                    let message = BusMessage::from_topic(publish.topic, publish.payload.to_vec());
                    debug!("Received {}", message);
                    if !self.forward(BusEvent::Message(message)).await {
                        break;
                    }
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                    self.status.messages_sent += 1;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("MQTT disconnect sent, event loop finished");
                    self.set_state(ConnectionState::Disconnected);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let was_connected = self.status.connection_state == ConnectionState::Connected;
                    self.set_state(ConnectionState::Reconnecting);
                    error!("MQTT connection error: {}", e);

                    if was_connected && !self.forward(BusEvent::Disconnected(e.to_string())).await
                    {
                        break;
                    }
                    if self.events.is_closed() {
                        break;
                    }
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }

        info!(
            "MQTT event loop stopped after {} connects, {} received, {} sent",
            self.status.connects, self.status.messages_received, self.status.messages_sent
        );
        self.status
    }
}
