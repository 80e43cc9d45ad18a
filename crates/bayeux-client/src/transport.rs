use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::debug;

use crate::error::BayeuxError;
use crate::message::Message;

/// Carries batches of Bayeux messages to the server and returns its replies.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        messages: Vec<Message>,
        timeout: Duration,
    ) -> Result<Vec<Message>, BayeuxError>;
}

/// HTTP long-polling transport: every batch is one JSON `POST` to the endpoint.
pub struct LongPollingTransport {
    endpoint: String,
    client: HttpClient,
}

impl LongPollingTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BayeuxError> {
        let client = HttpClient::builder()
            .user_agent(format!("bayeux-client/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BayeuxError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for LongPollingTransport {
    async fn send(
        &self,
        messages: Vec<Message>,
        timeout: Duration,
    ) -> Result<Vec<Message>, BayeuxError> {
        debug!(
            endpoint = %self.endpoint,
            count = messages.len(),
            channel = %messages.first().map(|m| m.channel.as_str()).unwrap_or_default(),
            "Sending Bayeux batch"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&messages)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BayeuxError::Timeout(timeout)
                } else {
                    BayeuxError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BayeuxError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice::<Vec<Message>>(&bytes)
            .map_err(|e| BayeuxError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_keeps_endpoint() -> Result<(), BayeuxError> {
        let transport = LongPollingTransport::new("https://push.podio.com/faye")?;
        assert_eq!(transport.endpoint(), "https://push.podio.com/faye");
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() -> Result<(), BayeuxError> {
        let transport = LongPollingTransport::new("http://127.0.0.1:9")?;
        let result = transport
            .send(vec![Message::handshake()], Duration::from_secs(2))
            .await;

        assert!(matches!(
            result,
            Err(BayeuxError::Transport(_)) | Err(BayeuxError::Timeout(_))
        ));
        Ok(())
    }
}
