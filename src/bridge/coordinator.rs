//! Bridge lifecycle with statum state machine
//!
//! Owns the broker connection, the poll loop and every in-flight command.
//!
//! # State Machine
//!
//! ```text
//! Connecting ──► Announcing ──► Running ──► Shutdown
//!                                  │  ▲
//!                                  └──┘
//!                            (reconnect: announce again)
//! ```
//!
//! Bus events reach the coordinator in arrival order through one channel,
//! so an announcement triggered by a ConnAck is complete before any command
//! received after it is dispatched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rumqttc::AsyncClient;
use statum::{machine, state};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bridge::discovery;
use crate::bridge::dispatcher::CommandDispatcher;
use crate::bridge::error::BridgeError;
use crate::bridge::poller::RelayPoller;
use crate::config::BridgeConfig;
use crate::mqtt::mqtt_handler::MqttStatus;
use crate::mqtt::topics::{TopicScheme, OFFLINE};
use crate::mqtt::{BusError, BusEvent, BusPublisher, MqttHandler};
use crate::relay::{RelayClient, RelayControl};

const BUS_EVENT_CAPACITY: usize = 256;
/// Longest a pulse can take plus one toggle request.
const COMMAND_DRAIN_TIMEOUT: Duration = Duration::from_secs(12);
const BUS_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything that happens on the bus between the first ConnAck and
/// shutdown: announcing, polling and serving commands.
pub struct BridgeSession<R: RelayControl, P: BusPublisher> {
    config: Arc<BridgeConfig>,
    topics: TopicScheme,
    relay: Arc<R>,
    publisher: P,
    announced: watch::Sender<u64>,
    commands: TaskTracker,
    shutdown: CancellationToken,
}

impl<R: RelayControl, P: BusPublisher> BridgeSession<R, P> {
    pub fn new(config: Arc<BridgeConfig>, relay: Arc<R>, publisher: P) -> Self {
        let topics = config.mqtt.topics();
        let (announced, _) = watch::channel(0);
        Self {
            config,
            topics,
            relay,
            publisher,
            announced,
            commands: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publishes the full announcement and tells the poller to start over.
    pub async fn announce(&self) -> Result<(), BusError> {
        let boards = discovery::announce(&self.config, &self.topics, &self.publisher).await?;
        self.announced.send_modify(|epoch| *epoch += 1);
        info!("Announced {} boards", boards);
        Ok(())
    }

    /// Polls and serves commands until `signal` completes or `events` is
    /// closed. Events are handled one at a time, so a re-announcement is on
    /// the bus before any command queued behind its ConnAck is dispatched.
    pub async fn serve(
        &self,
        events: &mut mpsc::Receiver<BusEvent>,
        signal: impl Future<Output = ()>,
    ) {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&self.config),
            Arc::clone(&self.relay),
            self.publisher.clone(),
        ));
        let poller = RelayPoller::new(
            Arc::clone(&self.config),
            Arc::clone(&self.relay),
            self.publisher.clone(),
        );
        let poll_task = tokio::spawn(poller.run(
            self.announced.subscribe(),
            self.shutdown.child_token(),
        ));

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => match event {
                    Some(BusEvent::Connected) => {
                        info!("Reconnected to MQTT broker, announcing again");
                        if let Err(e) = self.announce().await {
                            error!("Re-announcement failed: {}", e);
                        }
                    }
                    Some(BusEvent::Disconnected(reason)) => {
                        warn!("Lost MQTT connection: {}", reason);
                    }
                    Some(BusEvent::Message(message)) => {
                        debug!("Command {}", message);
                        let dispatcher = Arc::clone(&dispatcher);
                        self.commands.spawn(async move {
                            dispatcher
                                .handle_command(&message.topic, &message.payload)
                                .await;
                        });
                    }
                    None => {
                        error!("MQTT event loop ended unexpectedly");
                        break;
                    }
                },
            }
        }

        self.shutdown.cancel();
        if let Err(e) = poll_task.await {
            warn!("Poll task ended abnormally: {}", e);
        }
    }

    /// Lets in-flight commands finish and marks the bridge offline. Consumes
    /// the session, so the offline status goes out at most once.
    pub async fn retire(self) -> Result<(), BusError> {
        self.commands.close();
        if !self.commands.is_empty() {
            info!("Waiting for {} commands to finish", self.commands.len());
        }
        if timeout(COMMAND_DRAIN_TIMEOUT, self.commands.wait())
            .await
            .is_err()
        {
            warn!("Commands still running after {:?}, abandoning them", COMMAND_DRAIN_TIMEOUT);
        }

        self.publisher
            .publish_str(self.topics.bridge_status(), OFFLINE.to_string(), true)
            .await
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Connecting, // Event loop started, waiting for the first ConnAck
    Announcing, // Connected, discovery not yet published
    Running,    // Polling and dispatching commands
    Shutdown,   // Signal received, poller stopped
}

#[machine]
pub struct BridgeCoordinator<S: BridgeState> {
    config: Arc<BridgeConfig>,
    client: AsyncClient,
    bus_events: mpsc::Receiver<BusEvent>,
    bus_task: JoinHandle<MqttStatus>,
    session: BridgeSession<RelayClient, AsyncClient>,
}

impl BridgeCoordinator<Connecting> {
    /// Builds the HTTP client and starts the MQTT event loop task.
    pub fn create(config: BridgeConfig) -> Result<Self, BridgeError> {
        let relay = Arc::new(RelayClient::new()?);
        let config = Arc::new(config);

        let (events, bus_events) = mpsc::channel(BUS_EVENT_CAPACITY);
        let (client, handler) = MqttHandler::new(&config.mqtt, events);
        let bus_task = tokio::spawn(handler.run());
        let session = BridgeSession::new(Arc::clone(&config), relay, client.clone());

        Ok(Self::new(config, client, bus_events, bus_task, session))
    }

    /// Waits for the first ConnAck, bounded by the configured connect timeout.
    pub async fn connect(mut self) -> Result<BridgeCoordinator<Announcing>, BridgeError> {
        let broker = format!("{}:{}", self.config.mqtt.host, self.config.mqtt.port);
        let limit = self.config.mqtt.connect_timeout;
        info!("Connecting to MQTT broker {}", broker);

        let events = &mut self.bus_events;
        let connected = timeout(limit, async {
            loop {
                match events.recv().await {
                    Some(BusEvent::Connected) => return Ok(()),
                    Some(other) => debug!("Ignoring {:?} before first connect", other),
                    None => return Err(BridgeError::BusClosed),
                }
            }
        })
        .await;

        match connected {
            Ok(Ok(())) => {
                info!("Connected to MQTT broker {}", broker);
                Ok(self.transition())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.bus_task.abort();
                Err(BridgeError::BusConnection {
                    broker,
                    timeout: limit,
                })
            }
        }
    }
}

impl BridgeCoordinator<Announcing> {
    pub async fn announce(self) -> Result<BridgeCoordinator<Running>, BridgeError> {
        self.session.announce().await?;
        Ok(self.transition())
    }
}

impl BridgeCoordinator<Running> {
    /// Polls and serves commands until `signal` completes or the event loop
    /// goes away. Reconnects are answered with a fresh announcement.
    pub async fn run_until_shutdown(
        mut self,
        signal: impl Future<Output = ()>,
    ) -> BridgeCoordinator<Shutdown> {
        self.session.serve(&mut self.bus_events, signal).await;
        self.transition()
    }
}

impl BridgeCoordinator<Shutdown> {
    /// Marks the bridge offline and closes the connection. Consumes the
    /// coordinator, so it runs at most once.
    pub async fn finish(self) -> Result<(), BridgeError> {
        self.session.retire().await?;
        self.client.disconnect().await.map_err(BusError::from)?;

        // The event loop has to keep running until the offline status and
        // the disconnect are on the wire.
        let mut bus_task = self.bus_task;
        let mut events = self.bus_events;
        let drained = timeout(BUS_DRAIN_TIMEOUT, async {
            loop {
                tokio::select! {
                    biased;
                    status = &mut bus_task => break status,
                    event = events.recv() => {
                        if event.is_none() {
                            break (&mut bus_task).await;
                        }
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(Ok(status)) => info!(
                "Bridge stopped ({} connects, {} messages received, {} sent)",
                status.connects, status.messages_received, status.messages_sent
            ),
            Ok(Err(e)) => warn!("MQTT task ended abnormally: {}", e),
            Err(_) => warn!("MQTT event loop did not stop within {:?}", BUS_DRAIN_TIMEOUT),
        }
        Ok(())
    }
}
