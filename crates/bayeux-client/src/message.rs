use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
pub const META_DISCONNECT: &str = "/meta/disconnect";

pub const BAYEUX_VERSION: &str = "1.0";
pub const LONG_POLLING: &str = "long-polling";

/// A single Bayeux protocol message.
///
/// Only the fields this client reads or writes are modelled; anything else the
/// server sends is kept in `extra` so extensions see the full message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    pub fn handshake() -> Self {
        Self {
            version: Some(BAYEUX_VERSION.to_string()),
            supported_connection_types: Some(vec![LONG_POLLING.to_string()]),
            ..Self::new(META_HANDSHAKE)
        }
    }

    pub fn connect(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            connection_type: Some(LONG_POLLING.to_string()),
            ..Self::new(META_CONNECT)
        }
    }

    pub fn subscribe(client_id: &str, subscription: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::new(META_SUBSCRIBE)
        }
    }

    pub fn unsubscribe(client_id: &str, subscription: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::new(META_UNSUBSCRIBE)
        }
    }

    pub fn disconnect(client_id: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            ..Self::new(META_DISCONNECT)
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = Some(id);
        self
    }

    /// `/meta/*` channels carry protocol control messages.
    pub fn is_meta(&self) -> bool {
        self.channel.starts_with("/meta/")
    }

    pub fn is_successful(&self) -> bool {
        self.successful.unwrap_or(false)
    }
}

/// Reconnect advice sent by the server on handshake and connect replies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Advice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,

    /// Milliseconds to wait before the next connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Milliseconds the server may hold a long-poll open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Advice {
    /// Fold newer advice into the current one, keeping fields the server omitted.
    pub fn merge(&mut self, newer: &Advice) {
        if newer.reconnect.is_some() {
            self.reconnect = newer.reconnect;
        }
        if newer.interval.is_some() {
            self.interval = newer.interval;
        }
        if newer.timeout.is_some() {
            self.timeout = newer.timeout;
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    Retry,
    Handshake,
    None,
}
