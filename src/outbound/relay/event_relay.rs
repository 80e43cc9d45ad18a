use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::events::InboundEnvelope;
use crate::domain::ports::{ForwardError, Forwarder};
use crate::outbound::relay::http_forwarder::{HttpForwarder, build_client};

/// Fans inbound envelopes out to every configured forward target.
///
/// Each target is served by its own worker task reading from an unbounded
/// queue, so:
/// 1. [`EventRelay::relay`] never waits on delivery;
/// 2. one target's failures or slowness never hold up another target;
/// 3. a single target sees envelopes in the order the relay received them.
///
/// Failures are logged and dropped. Workers stop when the relay is dropped.
pub struct EventRelay {
    workers: Vec<TargetWorker>,
}

struct TargetWorker {
    target: String,
    queue: mpsc::UnboundedSender<Arc<InboundEnvelope>>,
}

impl EventRelay {
    /// Start one worker per forwarder. Must be called inside a Tokio runtime.
    pub fn new(forwarders: Vec<Arc<dyn Forwarder>>) -> Self {
        let workers = forwarders
            .into_iter()
            .map(|forwarder| {
                let (queue, rx) = mpsc::unbounded_channel();
                let target = forwarder.target().to_string();
                tokio::spawn(run_worker(forwarder, rx));
                TargetWorker { target, queue }
            })
            .collect::<Vec<_>>();

        info!(targets = workers.len(), "Event relay started");
        Self { workers }
    }

    /// Build HTTP forwarders for `urls`, sharing one client.
    pub fn from_urls(urls: &[String], timeout: Duration) -> Result<Self, ForwardError> {
        let client = build_client(timeout)?;
        let forwarders = urls
            .iter()
            .map(|url| {
                Arc::new(HttpForwarder::with_client(client.clone(), url.clone(), timeout))
                    as Arc<dyn Forwarder>
            })
            .collect();

        Ok(Self::new(forwarders))
    }

    /// Hand `envelope` to every target. Returns immediately.
    pub fn relay(&self, envelope: InboundEnvelope) {
        if self.workers.is_empty() {
            debug!(
                source = envelope.meta.source.as_str(),
                "No forward targets configured; dropping event"
            );
            return;
        }

        let envelope = Arc::new(envelope);
        for worker in &self.workers {
            if worker.queue.send(Arc::clone(&envelope)).is_err() {
                warn!(forward_target = %worker.target, "Forward worker has stopped; event not queued");
            }
        }
    }

    pub fn targets(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.target.as_str()).collect()
    }
}

async fn run_worker(
    forwarder: Arc<dyn Forwarder>,
    mut queue: mpsc::UnboundedReceiver<Arc<InboundEnvelope>>,
) {
    let target = forwarder.target().to_string();
    debug!(forward_target = %target, "Forward worker started");

    while let Some(envelope) = queue.recv().await {
        match forwarder.forward(&envelope).await {
            Ok(()) => debug!(
                forward_target = %target,
                source = envelope.meta.source.as_str(),
                channel = envelope.channel().unwrap_or("-"),
                "Event forwarded"
            ),
            Err(e) => warn!(
                forward_target = %target,
                source = envelope.meta.source.as_str(),
                channel = envelope.channel().unwrap_or("-"),
                error = %e,
                "Failed to forward event"
            ),
        }
    }

    debug!(forward_target = %target, "Forward worker exiting");
}
