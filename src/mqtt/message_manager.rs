use chrono::{DateTime, Local};
use std::fmt;

/// An inbound publish as handed to the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} = {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload_text()
        )
    }
}

impl BusMessage {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        BusMessage {
            topic,
            payload,
            received_at: Local::now(),
        }
    }

    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// What the event loop pump reports, in arrival order.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// ConnAck received, first connect or reconnect.
    Connected,
    /// The connection dropped, rumqttc will retry.
    Disconnected(String),
    Message(BusMessage),
}
