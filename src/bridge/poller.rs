//! Periodic status polling.
//!
//! Every cycle reads all enabled boards concurrently and publishes each
//! board's reconciled states as soon as its read completes. A board that
//! fails is skipped for that cycle; the others are unaffected.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BoardConfig, BridgeConfig};
use crate::mqtt::topics::{TopicScheme, OFFLINE, ONLINE};
use crate::mqtt::{BusError, BusPublisher};
use crate::relay::{changed, reconcile, RawStates, RelayControl, RelayError, RelayStates};

/// What the poller last saw of one board.
#[derive(Debug, Default)]
struct BoardSnapshot {
    states: RelayStates,
    available: Option<bool>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct RelayPoller<R: RelayControl, P: BusPublisher> {
    config: Arc<BridgeConfig>,
    topics: TopicScheme,
    relay: Arc<R>,
    publisher: P,
    snapshots: HashMap<String, BoardSnapshot>,
}

impl<R: RelayControl, P: BusPublisher> RelayPoller<R, P> {
    pub fn new(config: Arc<BridgeConfig>, relay: Arc<R>, publisher: P) -> Self {
        let topics = config.mqtt.topics();
        Self {
            config,
            topics,
            relay,
            publisher,
            snapshots: HashMap::new(),
        }
    }

    /// Forgets everything seen so far. Called after a (re)announcement,
    /// which resets every state and availability topic on the bus.
    pub fn reset(&mut self) {
        self.snapshots.clear();
    }

    pub async fn poll_cycle(&mut self) -> CycleReport {
        let mut reads = JoinSet::new();
        for board in self.config.enabled_boards() {
            let board = Arc::clone(board);
            let relay = Arc::clone(&self.relay);
            reads.spawn(async move {
                let fetched = relay.fetch_states(&board).await;
                (board, fetched)
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = reads.join_next().await {
            let (board, fetched) = match joined {
                Ok(read) => read,
                Err(e) => {
                    warn!("Status read task failed: {}", e);
                    continue;
                }
            };
            let device_id = board.device_id.clone();
            let outcome = self.apply(&board, fetched).await;
            match outcome {
                Ok(true) => report.refreshed.push(device_id),
                Ok(false) => report.failed.push(device_id),
                Err(e) => {
                    warn!("Publishing states of {} failed: {}", device_id, e);
                    report.failed.push(device_id);
                }
            }
        }
        report
    }

    /// Publishes one board's read result. `Ok(false)` means the read failed.
    async fn apply(
        &mut self,
        board: &BoardConfig,
        fetched: Result<RawStates, RelayError>,
    ) -> Result<bool, BusError> {
        let available = fetched.is_ok();
        if let Err(e) = &fetched {
            warn!("Skipping {} this cycle: {}", board.device_id, e);
        }
        let states = reconcile(board, &fetched);

        let snapshot = self.snapshots.entry(board.device_id.clone()).or_default();
        let availability_change = match (snapshot.available, available) {
            (None, false) => Some(false),
            (Some(was), now) if was != now => Some(now),
            _ => None,
        };
        snapshot.available = Some(available);

        let changes = if available {
            let changes = changed(&snapshot.states, &states);
            let first = snapshot.states.is_empty();
            snapshot.states = states.clone();
            if first {
                Vec::new()
            } else {
                changes
            }
        } else {
            Vec::new()
        };

        if let Some(now) = availability_change {
            if now {
                info!("Board {} is reachable again", board.device_id);
            } else {
                warn!("Board {} is unreachable", board.device_id);
            }
            self.publish_availability(board, now).await?;
        }

        for (index, state) in changes {
            info!("{} relay {} is now {}", board.device_id, index, state);
        }

        for (&index, &state) in &states {
            let retain = !board.is_trigger(index);
            self.publisher
                .publish_str(
                    self.topics.relay_state(&board.device_id, index),
                    state.as_payload().to_string(),
                    retain,
                )
                .await?;
        }
        Ok(available)
    }

    async fn publish_availability(&self, board: &BoardConfig, online: bool) -> Result<(), BusError> {
        let payload = if online { ONLINE } else { OFFLINE };
        for index in board.relay_indices() {
            self.publisher
                .publish_str(
                    self.topics.relay_availability(&board.device_id, index),
                    payload.to_string(),
                    true,
                )
                .await?;
        }
        Ok(())
    }

    /// Polls until `shutdown` fires. A change on `announced` means the bus
    /// was re-announced and cached states no longer reflect what it holds.
    pub async fn run(mut self, mut announced: watch::Receiver<u64>, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Polling every {:?}", self.config.poll_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                epoch = announced.changed() => {
                    if epoch.is_err() {
                        break;
                    }
                    debug!("Bus re-announced, resetting snapshots");
                    self.reset();
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        report = self.poll_cycle() => {
                            if !report.failed.is_empty() {
                                debug!("Cycle finished, unreachable: {:?}", report.failed);
                            }
                        }
                    }
                }
            }
        }
        info!("Poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::{shared, MockRelay, RecordingPublisher};
    use crate::config::fixtures;
    use std::time::Duration;

    const BASE: &str = "homeassistant/socket_giant";

    fn poller(
        boards: Vec<BoardConfig>,
        relay: Arc<MockRelay>,
    ) -> (RelayPoller<MockRelay, RecordingPublisher>, RecordingPublisher) {
        let publisher = RecordingPublisher::default();
        let config = Arc::new(fixtures::bridge(boards));
        (RelayPoller::new(config, relay, publisher.clone()), publisher)
    }

    fn state_topic(device_id: &str, index: usize) -> String {
        format!("{}/{}/relay{}/state", BASE, device_id, index)
    }

    fn availability_topic(device_id: &str, index: usize) -> String {
        format!("{}/{}/relay{}/availability", BASE, device_id, index)
    }

    #[tokio::test]
    async fn publishes_reconciled_states() {
        let mut board = fixtures::board("giant_1", 3);
        board.inverted_relays.insert(1);
        let relay = shared(MockRelay::default().with_states("giant_1", &[true, true, false]));
        let (mut poller, publisher) = poller(vec![board], relay);

        let report = poller.poll_cycle().await;
        assert_eq!(report.refreshed, vec!["giant_1".to_string()]);

        let payloads: Vec<_> = (0..3)
            .map(|i| publisher.on_topic(&state_topic("giant_1", i))[0].payload.clone())
            .collect();
        assert_eq!(payloads, vec!["ON", "OFF", "OFF"]);
        assert!(publisher.published().iter().all(|p| p.retain));
    }

    #[tokio::test]
    async fn failing_board_does_not_affect_others() {
        let relay = shared(
            MockRelay::default()
                .failing("giant_a")
                .with_states("giant_b", &[true, false]),
        );
        let (mut poller, publisher) = poller(
            vec![fixtures::board("giant_a", 2), fixtures::board("giant_b", 2)],
            relay,
        );

        let report = poller.poll_cycle().await;
        assert_eq!(report.refreshed, vec!["giant_b".to_string()]);
        assert_eq!(report.failed, vec!["giant_a".to_string()]);

        assert_eq!(publisher.on_topic(&state_topic("giant_b", 0))[0].payload, "ON");
        assert!(publisher.on_topic(&state_topic("giant_a", 0)).is_empty());
    }

    #[tokio::test]
    async fn disabled_board_is_never_read() {
        let mut disabled = fixtures::board("giant_2", 2);
        disabled.enabled = false;
        let relay = shared(MockRelay::default().with_states("giant_1", &[false]));
        let (mut poller, publisher) =
            poller(vec![fixtures::board("giant_1", 1), disabled], relay.clone());

        poller.poll_cycle().await;
        poller.poll_cycle().await;

        assert_eq!(relay.fetches(), vec!["giant_1".to_string(), "giant_1".to_string()]);
        assert!(publisher.published().iter().all(|p| !p.topic.contains("giant_2")));
    }

    #[tokio::test]
    async fn trigger_state_is_rest_and_not_retained() {
        let mut board = fixtures::board("giant_1", 2);
        board.trigger_relays.insert(0);
        let relay = shared(MockRelay::default().with_states("giant_1", &[true, true]));
        let (mut poller, publisher) = poller(vec![board], relay);

        poller.poll_cycle().await;

        let trigger = &publisher.on_topic(&state_topic("giant_1", 0))[0];
        assert_eq!(trigger.payload, "OFF");
        assert!(!trigger.retain);
        let plain = &publisher.on_topic(&state_topic("giant_1", 1))[0];
        assert_eq!(plain.payload, "ON");
        assert!(plain.retain);
    }

    #[tokio::test]
    async fn availability_follows_transitions() {
        let relay = shared(MockRelay::default().failing("giant_1").with_states("giant_1", &[true]));
        let (mut poller, publisher) = poller(vec![fixtures::board("giant_1", 1)], relay.clone());
        let availability = availability_topic("giant_1", 0);

        poller.poll_cycle().await;
        poller.poll_cycle().await;
        let published = publisher.on_topic(&availability);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, "offline");
        assert!(published[0].retain);

        relay.set_failing("giant_1", false);
        poller.poll_cycle().await;
        poller.poll_cycle().await;
        let published = publisher.on_topic(&availability);
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].payload, "online");
    }

    #[tokio::test]
    async fn reset_forgets_availability() {
        let relay = shared(MockRelay::default().failing("giant_1"));
        let (mut poller, publisher) = poller(vec![fixtures::board("giant_1", 1)], relay);

        poller.poll_cycle().await;
        poller.reset();
        poller.poll_cycle().await;
        assert_eq!(publisher.on_topic(&availability_topic("giant_1", 0)).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_until_cancelled() {
        let relay = shared(MockRelay::default().with_states("giant_1", &[false]));
        let (poller, _) = poller(vec![fixtures::board("giant_1", 1)], relay.clone());
        let (_announced, epochs) = watch::channel(0u64);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(poller.run(epochs, shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(4500)).await;
        shutdown.cancel();
        task.await.unwrap();

        // ticks at 0s, 2s and 4s
        assert_eq!(relay.fetches().len(), 3);
    }
}
