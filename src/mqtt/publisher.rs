use rumqttc::{AsyncClient, ClientError, QoS};
use std::future::Future;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("MQTT request failed: {0}")]
    Client(#[from] ClientError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish/subscribe side of the bus, as used by the bridge.
///
/// Implemented for [`rumqttc::AsyncClient`]; every request goes out with
/// QoS 1. The methods are named apart from the client's own `publish` and
/// `subscribe` so calls on a concrete client stay unambiguous.
pub trait BusPublisher: Clone + Send + Sync + 'static {
    fn publish_str(
        &self,
        topic: String,
        payload: String,
        retain: bool,
    ) -> impl Future<Output = Result<(), BusError>> + Send;

    fn subscribe_to(&self, topic: String) -> impl Future<Output = Result<(), BusError>> + Send;
}

impl BusPublisher for AsyncClient {
    async fn publish_str(&self, topic: String, payload: String, retain: bool) -> Result<(), BusError> {
        debug!("Publishing {} = {} (retain: {})", topic, payload, retain);
        self.publish(topic, QoS::AtLeastOnce, retain, payload.into_bytes())
            .await?;
        Ok(())
    }

    async fn subscribe_to(&self, topic: String) -> Result<(), BusError> {
        debug!("Subscribing to {}", topic);
        self.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }
}
