use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BayeuxError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: status={status}, body={body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Subscription to {channel} rejected: {reason}")]
    SubscribeRejected { channel: String, reason: String },

    #[error("Unsubscribe from {channel} rejected: {reason}")]
    UnsubscribeRejected { channel: String, reason: String },

    #[error("An extension is already attached to this client")]
    ExtensionAlreadySet,

    #[error("Client is disconnected")]
    Disconnected,
}

impl From<reqwest::Error> for BayeuxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BayeuxError::Malformed(err.to_string())
        } else {
            BayeuxError::Transport(err.to_string())
        }
    }
}
