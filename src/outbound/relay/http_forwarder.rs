use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::domain::events::InboundEnvelope;
use crate::domain::ports::{ForwardError, Forwarder};

/// Limit on how much of an error response body is kept for logging
const MAX_ERROR_BODY: usize = 4 * 1024;

/// Builds the HTTP client shared by every forward target
pub fn build_client(timeout: Duration) -> Result<Client, ForwardError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(format!("podio-relay/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ForwardError::RequestFailed(e.to_string()))
}

/// Forwards envelopes as JSON `POST` requests to one fixed URL
pub struct HttpForwarder {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpForwarder {
    /// Create a forwarder reusing an existing client
    pub fn with_client(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    fn map_error(&self, err: reqwest::Error) -> ForwardError {
        if err.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else if err.is_connect() {
            ForwardError::NetworkError(err.to_string())
        } else {
            ForwardError::RequestFailed(err.to_string())
        }
    }

    async fn read_error_body(response: Response) -> String {
        match response.bytes().await {
            Ok(bytes) => {
                String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_ERROR_BODY)]).to_string()
            }
            Err(e) => format!("<unreadable body: {e}>"),
        }
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    fn target(&self) -> &str {
        &self.url
    }

    async fn forward(&self, envelope: &InboundEnvelope) -> Result<(), ForwardError> {
        let body = envelope
            .to_json()
            .map_err(|e| ForwardError::SerializationError(e.to_string()))?;

        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        debug!(
            url = %self.url,
            status = status.as_u16(),
            response_time_ms = start.elapsed().as_millis() as u64,
            "Forward target responded"
        );

        if !status.is_success() {
            return Err(ForwardError::ResponseError {
                status: status.as_u16(),
                body: Self::read_error_body(response).await,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn forwarder(url: &str, timeout: Duration) -> Result<HttpForwarder, ForwardError> {
        Ok(HttpForwarder::with_client(build_client(timeout)?, url, timeout))
    }

    #[test]
    fn test_forwarder_creation() -> Result<(), ForwardError> {
        let forwarder = forwarder("http://localhost:9000/events", Duration::from_secs(3))?;
        assert_eq!(forwarder.target(), "http://localhost:9000/events");
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_target_is_an_error() -> Result<(), ForwardError> {
        // Nothing listens on the discard port
        let forwarder = forwarder("http://127.0.0.1:9", Duration::from_secs(2))?;
        let envelope = InboundEnvelope::from_webhook(json!({"type": "item.create"}));

        let result = forwarder.forward(&envelope).await;
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_forward_error_display() {
        let err = ForwardError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Request timeout after 30s");

        let err = ForwardError::NetworkError("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = ForwardError::ResponseError {
            status: 503,
            body: "Service unavailable".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("503"));
        assert!(message.contains("Service unavailable"));
    }
}
