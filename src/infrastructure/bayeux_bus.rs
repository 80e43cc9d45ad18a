use crate::domain::ports::{BusClient, BusClientFactory, BusClosed, BusError, BusMessageHandler};
use async_trait::async_trait;
use bayeux_client::{BayeuxError, Client, ClientOptions, CloseReason, Extension, Message};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BayeuxBusConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub retry: Duration,
}

impl Default for BayeuxBusConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://push.podio.com/faye".to_string(),
            timeout: Duration::from_secs(60),
            retry: Duration::from_secs(5),
        }
    }
}

/// Opens one Bayeux session per subscription against the configured endpoint.
pub struct BayeuxClientFactory {
    config: BayeuxBusConfig,
}

impl BayeuxClientFactory {
    pub fn new(config: BayeuxBusConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> ClientOptions {
        ClientOptions {
            timeout: self.config.timeout,
            retry: self.config.retry,
        }
    }
}

impl BusClientFactory for BayeuxClientFactory {
    fn create_client(
        &self,
        extension: Arc<dyn Extension>,
    ) -> Result<Arc<dyn BusClient>, BusError> {
        let client = Client::new(self.config.endpoint.clone(), self.options())
            .map_err(|e| BusError::Configuration(e.to_string()))?;
        client
            .add_extension(extension)
            .map_err(|e| BusError::Configuration(e.to_string()))?;

        debug!(endpoint = %self.config.endpoint, "Created Bayeux client");
        Ok(Arc::new(BayeuxBusClient::new(client)))
    }
}

/// [`BusClient`] backed by a [`bayeux_client::Client`].
pub struct BayeuxBusClient {
    client: Client,
}

impl BayeuxBusClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// A published message's payload is its `data`; without one, the whole message.
fn message_body(message: Message) -> Value {
    match message.data {
        Some(data) => data,
        None => serde_json::to_value(&message).unwrap_or(Value::Null),
    }
}

fn map_error(err: BayeuxError) -> BusError {
    match err {
        BayeuxError::SubscribeRejected { reason, .. }
        | BayeuxError::UnsubscribeRejected { reason, .. }
        | BayeuxError::HandshakeRejected(reason) => BusError::Rejected(reason),
        BayeuxError::Disconnected => BusError::Closed,
        BayeuxError::ExtensionAlreadySet => BusError::Configuration(err.to_string()),
        other => BusError::Connection(other.to_string()),
    }
}

#[async_trait]
impl BusClient for BayeuxBusClient {
    async fn subscribe(&self, channel: &str, handler: BusMessageHandler) -> Result<(), BusError> {
        let callback = Arc::new(move |message: Message| handler(message_body(message)));
        self.client
            .subscribe(channel, callback)
            .await
            .map_err(map_error)
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.client.unsubscribe(channel).await.map_err(map_error)
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.client.disconnect().await.map_err(map_error)
    }

    async fn closed(&self) -> BusClosed {
        match self.client.closed().await {
            CloseReason::Disconnected => BusClosed::Disconnected,
            CloseReason::Failed(reason) => BusClosed::Failed(reason),
        }
    }
}
