/*
   This module specifies the API by which the relay core talks to the outside world:
   the publish/subscribe bus it subscribes on and the downstream targets it forwards to.
*/

use crate::domain::events::InboundEnvelope;
use async_trait::async_trait;
use bayeux_client::Extension;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Error type for bus client operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to create bus client: {0}")]
    Configuration(String),

    #[error("Bus connection error: {0}")]
    Connection(String),

    #[error("Bus rejected the request: {0}")]
    Rejected(String),

    #[error("Bus client is closed")]
    Closed,
}

/// Why a bus client's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusClosed {
    /// Torn down on request.
    Disconnected,
    /// Ended by an unrecoverable bus error.
    Failed(String),
}

/// Receives the body of every message published on a subscribed channel.
pub type BusMessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// One connection to the publish/subscribe bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Subscribe and resolve once the bus acknowledges the subscription.
    async fn subscribe(&self, channel: &str, handler: BusMessageHandler) -> Result<(), BusError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;

    async fn disconnect(&self) -> Result<(), BusError>;

    /// Resolves when the session ends.
    async fn closed(&self) -> BusClosed;
}

/// Builds bus clients bound to the configured endpoint.
pub trait BusClientFactory: Send + Sync {
    fn create_client(&self, extension: Arc<dyn Extension>)
    -> Result<Arc<dyn BusClient>, BusError>;
}

/// Error type for forwarding to a downstream target
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response error: status={status}, body={body}")]
    ResponseError { status: u16, body: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A downstream consumer of relayed events.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Where events go, for logging.
    fn target(&self) -> &str;

    async fn forward(&self, envelope: &InboundEnvelope) -> Result<(), ForwardError>;
}
