use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle state of a registry entry. Failed and cancelled subscriptions
/// are removed rather than kept in a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Subscribe sent, acknowledgment not yet received.
    Pending,
    Confirmed,
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub channel: String,

    pub state: SubscriptionState,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Advisory expiry supplied by the caller; never enforced.
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeStatus {
    /// A pending or confirmed subscription already existed.
    Exists,
    Subscribed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeOutcome {
    pub status: SubscribeStatus,
    pub channel: String,
    /// Expiry hint stored with the entry, which for `Exists` is the original one.
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeStatus {
    NotFound,
    Unsubscribed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    pub status: UnsubscribeStatus,
    pub channel: String,
}
