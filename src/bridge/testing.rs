//! In-memory stand-ins for the bus and the boards.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::BoardConfig;
use crate::mqtt::{BusError, BusPublisher};
use crate::relay::relay_client::STATUS_TIMEOUT;
use crate::relay::{RawStates, RelayControl, RelayError, RelayState};

/// Orders bus publishes and relay calls against each other, which paused
/// time cannot.
static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

fn next_seq() -> usize {
    SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
    pub seq: usize,
}

#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<Published>>>,
    subscribed: Arc<Mutex<Vec<String>>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .collect()
    }

    pub fn subscribed(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }
}

impl BusPublisher for RecordingPublisher {
    async fn publish_str(&self, topic: String, payload: String, retain: bool) -> Result<(), BusError> {
        self.published.lock().unwrap().push(Published {
            topic,
            payload,
            retain,
            seq: next_seq(),
        });
        Ok(())
    }

    async fn subscribe_to(&self, topic: String) -> Result<(), BusError> {
        self.subscribed.lock().unwrap().push(topic);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCall {
    pub device_id: String,
    pub index: usize,
    pub state: RelayState,
    pub at: Instant,
    pub seq: usize,
}

/// Boards answering from a table. Unknown boards fail to parse, boards
/// marked failing time out on reads and reject toggles.
#[derive(Default)]
pub struct MockRelay {
    states: Mutex<HashMap<String, RawStates>>,
    failing: Mutex<HashSet<String>>,
    fetches: Mutex<Vec<String>>,
    calls: Mutex<Vec<RelayCall>>,
    fetch_delay: Option<Duration>,
}

impl MockRelay {
    pub fn with_states(self, device_id: &str, bits: &[bool]) -> Self {
        let raw = bits.iter().copied().enumerate().collect();
        self.states.lock().unwrap().insert(device_id.to_string(), raw);
        self
    }

    /// Every read takes `delay` before answering.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn failing(self, device_id: &str) -> Self {
        self.set_failing(device_id, true);
        self
    }

    pub fn set_failing(&self, device_id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(device_id.to_string());
        } else {
            set.remove(device_id);
        }
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<RelayCall> {
        self.calls.lock().unwrap().clone()
    }

    fn is_failing(&self, device_id: &str) -> bool {
        self.failing.lock().unwrap().contains(device_id)
    }
}

impl RelayControl for MockRelay {
    async fn fetch_states(&self, board: &BoardConfig) -> Result<RawStates, RelayError> {
        self.fetches.lock().unwrap().push(board.device_id.clone());
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_failing(&board.device_id) {
            return Err(RelayError::Timeout {
                board: board.device_id.clone(),
                timeout: STATUS_TIMEOUT,
            });
        }
        let states = self.states.lock().unwrap().get(&board.device_id).cloned();
        states.ok_or_else(|| RelayError::Parse {
            board: board.device_id.clone(),
            reason: "no canned status".into(),
        })
    }

    async fn set_relay(
        &self,
        board: &BoardConfig,
        index: usize,
        state: RelayState,
    ) -> Result<(), RelayError> {
        self.calls.lock().unwrap().push(RelayCall {
            device_id: board.device_id.clone(),
            index,
            state,
            at: Instant::now(),
            seq: next_seq(),
        });
        if self.is_failing(&board.device_id) {
            return Err(RelayError::Status {
                board: board.device_id.clone(),
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        Ok(())
    }
}

pub fn shared(relay: MockRelay) -> Arc<MockRelay> {
    Arc::new(relay)
}
