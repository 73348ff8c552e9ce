//! The bridge proper: announcing boards, polling them and acting on commands.
//!
//! [`coordinator::BridgeCoordinator`] owns the lifecycle and wires the
//! pieces together. [`poller::RelayPoller`] and
//! [`dispatcher::CommandDispatcher`] only see the [`crate::relay::RelayControl`]
//! and [`crate::mqtt::BusPublisher`] seams, so both run against in-memory
//! doubles in tests.

pub mod coordinator;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod poller;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use coordinator::{BridgeCoordinator, BridgeState, Connecting};
pub use dispatcher::{CommandDispatcher, CommandOutcome};
pub use error::{BridgeError, CommandError};
pub use poller::{CycleReport, RelayPoller};
