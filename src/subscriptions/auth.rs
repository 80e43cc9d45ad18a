use bayeux_client::message::META_SUBSCRIBE;
use bayeux_client::{Extension, Message};
use serde_json::Value;

/// `ext` field carrying the subscription signature issued by the platform
pub const SIGNATURE_FIELD: &str = "private_pub_signature";

/// `ext` field carrying the timestamp the signature was issued for
pub const TIMESTAMP_FIELD: &str = "private_pub_timestamp";

/// True when `message` is the subscribe control message for `channel`.
pub fn is_subscribe_for(message: &Message, channel: &str) -> bool {
    message.channel == META_SUBSCRIBE && message.subscription.as_deref() == Some(channel)
}

/// Presents a channel's signature on that channel's subscribe message only.
///
/// Every other message, including subscribes for other channels that share the
/// same connection, passes through untouched.
#[derive(Clone)]
pub struct AuthExtension {
    channel: String,
    signature: String,
    timestamp: String,
}

impl AuthExtension {
    pub fn new(
        channel: impl Into<String>,
        signature: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            signature: signature.into(),
            timestamp: timestamp.into(),
        }
    }

    pub fn applies_to(&self, message: &Message) -> bool {
        is_subscribe_for(message, &self.channel)
    }
}

impl Extension for AuthExtension {
    fn outgoing(&self, mut message: Message) -> Message {
        if !self.applies_to(&message) {
            return message;
        }

        let ext = message.ext.get_or_insert_with(Default::default);
        ext.insert(
            SIGNATURE_FIELD.to_string(),
            Value::String(self.signature.clone()),
        );
        ext.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(self.timestamp.clone()),
        );
        message
    }
}

impl std::fmt::Debug for AuthExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthExtension")
            .field("channel", &self.channel)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
