use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::events::InboundEnvelope;
use crate::domain::ports::{BusClient, BusClientFactory, BusClosed, BusError, BusMessageHandler};
use crate::domain::subscription::{
    SubscribeOutcome, SubscribeStatus, SubscriptionInfo, SubscriptionState, UnsubscribeOutcome,
    UnsubscribeStatus,
};
use crate::outbound::relay::EventRelay;
use crate::subscriptions::auth::AuthExtension;

/// Default ceiling on the wait for a subscribe acknowledgment.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Subscription to {channel} was not confirmed within {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("Subscription to {channel} rejected: {reason}")]
    Rejected { channel: String, reason: String },

    #[error("Bus unavailable while subscribing to {channel}: {reason}")]
    Bus { channel: String, reason: String },

    #[error("Subscription to {channel} was cancelled before it was confirmed")]
    Cancelled { channel: String },
}

/// Everything needed to open one authenticated channel subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub channel: String,
    pub signature: String,
    pub timestamp: String,
    pub expires_in: Option<u64>,
}

struct Entry {
    /// Distinguishes this entry from a later one for the same channel.
    generation: Uuid,
    client: Arc<dyn BusClient>,
    state: SubscriptionState,
    created_at: OffsetDateTime,
    expires_in: Option<u64>,
}

type Registry = Arc<RwLock<HashMap<String, Entry>>>;

/// Owns the channel → subscription registry.
///
/// Check-then-insert for a channel happens under one write lock, so
/// concurrent subscribes for the same channel produce exactly one live
/// subscription. Network calls are made outside the lock. Whoever removes an
/// entry from the registry is responsible for tearing its client down; nothing
/// else touches that client afterwards.
pub struct SubscriptionManager {
    registry: Registry,
    factory: Arc<dyn BusClientFactory>,
    relay: Arc<EventRelay>,
    confirm_timeout: Duration,
}

impl SubscriptionManager {
    pub fn with_confirm_timeout(
        factory: Arc<dyn BusClientFactory>,
        relay: Arc<EventRelay>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            factory,
            relay,
            confirm_timeout,
        }
    }

    pub async fn subscribe(
        &self,
        request: SubscribeRequest,
    ) -> Result<SubscribeOutcome, SubscriptionError> {
        let SubscribeRequest {
            channel,
            signature,
            timestamp,
            expires_in,
        } = request;

        let (generation, client) = {
            let mut registry = self.registry.write().await;
            if let Some(existing) = registry.get(&channel) {
                debug!(channel = %channel, "Subscription already exists");
                return Ok(SubscribeOutcome {
                    status: SubscribeStatus::Exists,
                    expires_in: existing.expires_in,
                    channel,
                });
            }

            let extension = Arc::new(AuthExtension::new(channel.clone(), signature, timestamp));
            let client =
                self.factory
                    .create_client(extension)
                    .map_err(|e| SubscriptionError::Bus {
                        channel: channel.clone(),
                        reason: e.to_string(),
                    })?;

            let generation = Uuid::new_v4();
            registry.insert(
                channel.clone(),
                Entry {
                    generation,
                    client: Arc::clone(&client),
                    state: SubscriptionState::Pending,
                    created_at: OffsetDateTime::now_utc(),
                    expires_in,
                },
            );
            (generation, client)
        };

        info!(channel = %channel, "Subscribing to channel");

        // The confirm-or-clean-up sequence runs on its own task so that dropping
        // the caller's future cannot strand a pending entry.
        let confirmation = tokio::spawn(confirm(
            Arc::clone(&self.registry),
            channel.clone(),
            generation,
            client,
            self.message_handler(&channel),
            self.confirm_timeout,
        ));

        match confirmation.await {
            Ok(result) => result,
            Err(e) => Err(SubscriptionError::Bus {
                channel,
                reason: e.to_string(),
            }),
        }
    }

    pub async fn unsubscribe(&self, channel: &str) -> UnsubscribeOutcome {
        let entry = self.registry.write().await.remove(channel);

        let Some(entry) = entry else {
            debug!(channel = %channel, "Unsubscribe for unknown channel");
            return UnsubscribeOutcome {
                status: UnsubscribeStatus::NotFound,
                channel: channel.to_string(),
            };
        };

        teardown(channel, entry.client.as_ref()).await;
        info!(channel = %channel, "Unsubscribed from channel");

        UnsubscribeOutcome {
            status: UnsubscribeStatus::Unsubscribed,
            channel: channel.to_string(),
        }
    }

    /// Channels with a pending or confirmed subscription.
    pub async fn list_active(&self) -> BTreeSet<String> {
        self.registry.read().await.keys().cloned().collect()
    }

    /// Detailed view of every entry, ordered by channel.
    pub async fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let registry = self.registry.read().await;
        let mut infos: Vec<SubscriptionInfo> = registry
            .iter()
            .map(|(channel, entry)| SubscriptionInfo {
                channel: channel.clone(),
                state: entry.state,
                created_at: entry.created_at,
                expires_in: entry.expires_in,
            })
            .collect();
        infos.sort_by(|a, b| a.channel.cmp(&b.channel));
        infos
    }

    /// Remove every subscription and tear the clients down concurrently.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Entry)> = self.registry.write().await.drain().collect();
        if entries.is_empty() {
            return;
        }

        info!(count = entries.len(), "Tearing down subscriptions");
        futures::future::join_all(
            entries
                .iter()
                .map(|(channel, entry)| teardown(channel, entry.client.as_ref())),
        )
        .await;
    }

    /// Wrap each published message in an envelope and hand it to the relay.
    fn message_handler(&self, channel: &str) -> BusMessageHandler {
        let relay = Arc::clone(&self.relay);
        let channel = channel.to_string();

        Arc::new(move |body: Value| {
            debug!(channel = %channel, "Message received on channel");
            relay.relay(InboundEnvelope::from_channel(channel.clone(), body));
        })
    }
}

/// Remove `channel` only if it still holds the entry created as `generation`.
async fn remove_generation(registry: &Registry, channel: &str, generation: Uuid) -> Option<Entry> {
    let mut registry = registry.write().await;
    match registry.get(channel) {
        Some(entry) if entry.generation == generation => registry.remove(channel),
        _ => None,
    }
}

/// Wait for the bus to acknowledge `channel`, then mark the entry confirmed.
///
/// Any failure removes the entry created as `generation`. When that entry is
/// already gone, an unsubscribe took it while pending and the result is
/// `Cancelled` whatever the bus reported.
async fn confirm(
    registry: Registry,
    channel: String,
    generation: Uuid,
    client: Arc<dyn BusClient>,
    handler: BusMessageHandler,
    timeout: Duration,
) -> Result<SubscribeOutcome, SubscriptionError> {
    let confirmation = tokio::time::timeout(timeout, client.subscribe(&channel, handler)).await;

    let failure = match confirmation {
        Ok(Ok(())) => None,
        Ok(Err(BusError::Rejected(reason))) => Some(SubscriptionError::Rejected {
            channel: channel.clone(),
            reason,
        }),
        Ok(Err(e)) => Some(SubscriptionError::Bus {
            channel: channel.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Some(SubscriptionError::Timeout {
            channel: channel.clone(),
            timeout,
        }),
    };

    if let Some(err) = failure {
        let Some(entry) = remove_generation(&registry, &channel, generation).await else {
            warn!(channel = %channel, error = %err, "Subscription cancelled before confirmation");
            return Err(SubscriptionError::Cancelled { channel });
        };

        warn!(channel = %channel, error = %err, "Subscription failed");
        if let Err(e) = entry.client.disconnect().await {
            debug!(channel = %channel, error = %e, "Disconnect after failed subscribe");
        }
        return Err(err);
    }

    let expires_in = {
        let mut registry = registry.write().await;
        match registry.get_mut(&channel) {
            Some(entry) if entry.generation == generation => {
                entry.state = SubscriptionState::Confirmed;
                Some(entry.expires_in)
            }
            _ => None,
        }
    };

    let Some(expires_in) = expires_in else {
        // Unsubscribed while pending; that path already tore the client down.
        warn!(channel = %channel, "Subscription cancelled before confirmation");
        return Err(SubscriptionError::Cancelled { channel });
    };

    watch_for_close(registry, channel.clone(), generation, client);
    info!(channel = %channel, "Subscription confirmed");

    Ok(SubscribeOutcome {
        status: SubscribeStatus::Subscribed,
        channel,
        expires_in,
    })
}

/// Drop the entry if its client dies from an unrecoverable bus error.
fn watch_for_close(
    registry: Registry,
    channel: String,
    generation: Uuid,
    client: Arc<dyn BusClient>,
) {
    tokio::spawn(async move {
        let BusClosed::Failed(reason) = client.closed().await else {
            return;
        };

        if let Some(entry) = remove_generation(&registry, &channel, generation).await {
            warn!(channel = %channel, reason = %reason, "Subscription lost; removed from registry");
            if let Err(e) = entry.client.disconnect().await {
                debug!(channel = %channel, error = %e, "Disconnect after bus failure");
            }
        }
    });
}

/// Best-effort unsubscribe and disconnect; errors are logged and dropped.
async fn teardown(channel: &str, client: &dyn BusClient) {
    if let Err(e) = client.unsubscribe(channel).await {
        warn!(channel = %channel, error = %e, "Bus unsubscribe failed");
    }
    if let Err(e) = client.disconnect().await {
        warn!(channel = %channel, error = %e, "Bus disconnect failed");
    }
}
