//! # MQTT Integration Module
//!
//! Bus side of the bridge. Connects to the broker, keeps the connection
//! alive, and gives the rest of the bridge two narrow interfaces:
//!
//! - [`publisher::BusPublisher`] for publishing and subscribing
//! - a channel of [`message_manager::BusEvent`]s for everything inbound
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings, client options, last will
//! ├── topics.rs           - Topic layout, command topic parsing
//! ├── publisher.rs        - BusPublisher trait over rumqttc::AsyncClient
//! ├── message_manager.rs  - Inbound message and event types
//! └── mqtt_handler.rs     - Event loop pump and connection state tracking
//! ```
//!
//! ## Connection Lifecycle
//!
//! rumqttc reconnects on its own whenever the event loop is polled after an
//! error. The handler only waits `reconnect_delay` between attempts and
//! reports every ConnAck, so the coordinator can re-announce discovery
//! records and re-subscribe (clean sessions drop subscriptions).
//!
//! The bridge status topic carries a retained "offline" last will, which
//! makes a lost connection visible to Home Assistant without any action
//! from the bridge.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod publisher;
pub mod topics;

pub use message_manager::{BusEvent, BusMessage};
pub use mqtt_handler::MqttHandler;
pub use publisher::{BusError, BusPublisher};
pub use topics::TopicScheme;
