use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Ingestion path an event arrived on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Pushed by the platform to the signed webhook endpoint.
    Webhook,
    /// Published on a Bayeux channel this service subscribed to.
    Bayeux,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Webhook => "webhook",
            EventSource::Bayeux => "bayeux",
        }
    }
}

/// Metadata attached to every forwarded event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMeta {
    /// Originating channel; absent for webhook deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,

    pub source: EventSource,
}

/// Normalized wrapper around any received message, whichever path it came in on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEnvelope {
    pub meta: EnvelopeMeta,

    pub event: Value,
}

impl InboundEnvelope {
    /// Wrap a verified webhook body.
    pub fn from_webhook(event: Value) -> Self {
        Self {
            meta: EnvelopeMeta {
                channel: None,
                received_at: OffsetDateTime::now_utc(),
                source: EventSource::Webhook,
            },
            event,
        }
    }

    /// Wrap a message published on a subscribed channel.
    pub fn from_channel(channel: impl Into<String>, event: Value) -> Self {
        Self {
            meta: EnvelopeMeta {
                channel: Some(channel.into()),
                received_at: OffsetDateTime::now_utc(),
                source: EventSource::Bayeux,
            },
            event,
        }
    }

    pub fn channel(&self) -> Option<&str> {
        self.meta.channel.as_deref()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
