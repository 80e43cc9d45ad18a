use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::BayeuxError;
use crate::extension::Extension;
use crate::message::{
    Advice, META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_UNSUBSCRIBE, Message, Reconnect,
};
use crate::transport::{LongPollingTransport, Transport};

/// Callback invoked for every data message published on a subscribed channel.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Timing parameters for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Upper bound for handshake and control requests, added on top of the
    /// server's long-poll timeout for connect requests.
    pub timeout: Duration,

    /// Pause before trying again after a transient connection failure.
    pub retry: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionState {
    /// No handshake performed yet.
    Idle,
    Connected,
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect` was called.
    Disconnected,
    /// The server refused to let the session continue.
    Failed(String),
}

/// Bayeux client bound to one endpoint.
///
/// The handshake happens lazily on the first subscribe. From then on a
/// background task keeps a long-poll `/meta/connect` open and routes published
/// messages to the callback registered for their channel. Cloning the client
/// yields another handle to the same session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
    extension: OnceLock<Arc<dyn Extension>>,
    /// Current `clientId`; the lock also serialises handshakes.
    session: Mutex<Option<String>>,
    advice: Mutex<Advice>,
    channels: RwLock<HashMap<String, MessageCallback>>,
    /// Control requests waiting for their reply, keyed by message id.
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    next_id: AtomicU64,
    state: watch::Sender<ConnectionState>,
    connect_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client speaking long-polling HTTP to `endpoint`.
    pub fn new(endpoint: impl Into<String>, options: ClientOptions) -> Result<Self, BayeuxError> {
        let transport = LongPollingTransport::new(endpoint)?;
        Ok(Self::with_transport(Arc::new(transport), options))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);

        Self {
            inner: Arc::new(Inner {
                transport,
                options,
                extension: OnceLock::new(),
                session: Mutex::new(None),
                advice: Mutex::new(Advice::default()),
                channels: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                state,
                connect_task: Mutex::new(None),
            }),
        }
    }

    /// Attach the client's extension. Only one may ever be attached.
    pub fn add_extension(&self, extension: Arc<dyn Extension>) -> Result<(), BayeuxError> {
        self.inner
            .extension
            .set(extension)
            .map_err(|_| BayeuxError::ExtensionAlreadySet)
    }

    /// Resolves once the session has ended, with the reason it ended.
    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.inner.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let ConnectionState::Closed(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                return CloseReason::Disconnected;
            }
        }
    }

    /// Subscribe to `channel`, resolving once the server acknowledges it.
    ///
    /// No deadline is applied here; callers bound the wait themselves.
    pub async fn subscribe(
        &self,
        channel: &str,
        callback: MessageCallback,
    ) -> Result<(), BayeuxError> {
        let client_id = self.inner.ensure_connected().await?;

        self.inner
            .channels
            .write()
            .await
            .insert(channel.to_string(), callback);

        let result = self.inner.request_subscribe(&client_id, channel).await;
        if result.is_err() {
            self.inner.channels.write().await.remove(channel);
        }
        result
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<(), BayeuxError> {
        self.inner.channels.write().await.remove(channel);

        let Some(client_id) = self.inner.session.lock().await.clone() else {
            return Ok(());
        };

        let message = Message::unsubscribe(&client_id, channel).with_id(self.inner.next_id());
        let replies = self
            .inner
            .send(vec![message], self.inner.options.timeout)
            .await?;

        let mut outcome = Ok(());
        for reply in replies {
            if reply.channel == META_UNSUBSCRIBE {
                if !reply.is_successful() {
                    outcome = Err(BayeuxError::UnsubscribeRejected {
                        channel: channel.to_string(),
                        reason: reply.error.unwrap_or_else(|| "unknown error".to_string()),
                    });
                }
            } else {
                self.inner.dispatch(reply).await;
            }
        }
        outcome
    }

    /// End the session: stop polling, drop all callbacks, tell the server.
    pub async fn disconnect(&self) -> Result<(), BayeuxError> {
        // Holding the session lock means no handshake is midway through
        // spawning the connect loop.
        let client_id = {
            let mut session = self.inner.session.lock().await;
            if let Some(handle) = self.inner.connect_task.lock().await.take() {
                handle.abort();
            }
            self.inner
                .state
                .send_replace(ConnectionState::Closed(CloseReason::Disconnected));
            session.take()
        };
        self.inner.pending.lock().await.clear();
        self.inner.channels.write().await.clear();

        let Some(client_id) = client_id else {
            return Ok(());
        };

        debug!(client_id = %client_id, "Disconnecting Bayeux session");
        let message = Message::disconnect(&client_id).with_id(self.inner.next_id());
        let replies = self
            .inner
            .send(vec![message], self.inner.options.timeout)
            .await?;

        match replies.iter().find(|r| r.channel == META_DISCONNECT) {
            Some(reply) if !reply.is_successful() => Err(BayeuxError::Transport(
                reply
                    .error
                    .clone()
                    .unwrap_or_else(|| "disconnect refused".to_string()),
            )),
            _ => Ok(()),
        }
    }
}

impl Inner {
    fn next_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Run the extension over outbound messages, send them, and run it over
    /// the replies.
    async fn send(
        &self,
        messages: Vec<Message>,
        timeout: Duration,
    ) -> Result<Vec<Message>, BayeuxError> {
        let extension = self.extension.get();

        let messages = match extension {
            Some(ext) => messages.into_iter().map(|m| ext.outgoing(m)).collect(),
            None => messages,
        };

        let replies = self.transport.send(messages, timeout).await?;

        Ok(match extension {
            Some(ext) => replies.into_iter().map(|m| ext.incoming(m)).collect(),
            None => replies,
        })
    }

    async fn ensure_connected(self: &Arc<Self>) -> Result<String, BayeuxError> {
        if matches!(*self.state.borrow(), ConnectionState::Closed(_)) {
            return Err(BayeuxError::Disconnected);
        }

        let mut session = self.session.lock().await;
        if let Some(client_id) = session.as_ref() {
            return Ok(client_id.clone());
        }
        if matches!(*self.state.borrow(), ConnectionState::Closed(_)) {
            return Err(BayeuxError::Disconnected);
        }

        let client_id = self.handshake().await?;
        info!(client_id = %client_id, "Bayeux handshake completed");
        *session = Some(client_id.clone());
        self.state.send_replace(ConnectionState::Connected);

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.connect_loop().await });
        *self.connect_task.lock().await = Some(handle);

        Ok(client_id)
    }

    async fn handshake(&self) -> Result<String, BayeuxError> {
        let message = Message::handshake().with_id(self.next_id());
        let replies = self.send(vec![message], self.options.timeout).await?;

        let reply = replies
            .into_iter()
            .find(|m| m.channel == META_HANDSHAKE)
            .ok_or_else(|| BayeuxError::Malformed("no handshake reply".to_string()))?;

        if let Some(advice) = &reply.advice {
            self.advice.lock().await.merge(advice);
        }

        if !reply.is_successful() {
            return Err(BayeuxError::HandshakeRejected(
                reply.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        reply
            .client_id
            .ok_or_else(|| BayeuxError::Malformed("handshake reply without clientId".to_string()))
    }

    async fn request_subscribe(&self, client_id: &str, channel: &str) -> Result<(), BayeuxError> {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let message = Message::subscribe(client_id, channel).with_id(id.clone());
        match self.send(vec![message], self.options.timeout).await {
            Ok(replies) => {
                for reply in replies {
                    self.dispatch(reply).await;
                }
            }
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        }

        // The acknowledgment normally rides on the same response, but a server
        // may deliver it on the next connect reply instead.
        let reply = rx.await.map_err(|_| BayeuxError::Disconnected)?;
        if reply.is_successful() {
            debug!(channel = %channel, "Subscription acknowledged");
            Ok(())
        } else {
            Err(BayeuxError::SubscribeRejected {
                channel: channel.to_string(),
                reason: reply.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }

    /// Route one inbound message to a waiting request or a channel callback.
    async fn dispatch(&self, message: Message) {
        if message.is_meta() {
            if let Some(id) = message.id.as_deref() {
                if let Some(tx) = self.pending.lock().await.remove(id) {
                    let _ = tx.send(message);
                    return;
                }
            }
            debug!(channel = %message.channel, "Unmatched meta reply");
            return;
        }

        let callback = self.channels.read().await.get(&message.channel).cloned();
        match callback {
            Some(callback) => callback(message),
            None => debug!(channel = %message.channel, "No callback for channel; dropping message"),
        }
    }

    async fn poll_timeout(&self) -> Duration {
        let server_hold = self.advice.lock().await.timeout.unwrap_or(0);
        Duration::from_millis(server_hold) + self.options.timeout
    }

    async fn connect_loop(self: Arc<Self>) {
        let mut needs_handshake = false;

        loop {
            if needs_handshake {
                match self.rehandshake().await {
                    Ok(()) => needs_handshake = false,
                    Err(BayeuxError::Disconnected) => return,
                    Err(e) => {
                        if self.advice.lock().await.reconnect == Some(Reconnect::None) {
                            self.fail(e.to_string()).await;
                            return;
                        }
                        warn!(error = %e, "Re-handshake failed; retrying");
                        tokio::time::sleep(self.options.retry).await;
                        continue;
                    }
                }
            }

            let Some(client_id) = self.session.lock().await.clone() else {
                return;
            };

            let message = Message::connect(&client_id).with_id(self.next_id());
            let timeout = self.poll_timeout().await;
            let replies = match self.send(vec![message], timeout).await {
                Ok(replies) => replies,
                Err(e) => {
                    warn!(error = %e, retry = ?self.options.retry, "Connect failed; retrying");
                    tokio::time::sleep(self.options.retry).await;
                    continue;
                }
            };

            let mut connect_reply = None;
            for reply in replies {
                if reply.channel == META_CONNECT {
                    connect_reply = Some(reply);
                } else {
                    self.dispatch(reply).await;
                }
            }

            let Some(reply) = connect_reply else {
                warn!("Connect response carried no connect reply; retrying");
                tokio::time::sleep(self.options.retry).await;
                continue;
            };

            if let Some(advice) = &reply.advice {
                self.advice.lock().await.merge(advice);
            }
            let advised = reply.advice.as_ref().and_then(|a| a.reconnect);

            if advised == Some(Reconnect::None) {
                let reason = reply
                    .error
                    .unwrap_or_else(|| "server advised against reconnecting".to_string());
                self.fail(reason).await;
                return;
            }

            if reply.is_successful() {
                let interval = self.advice.lock().await.interval.unwrap_or(0);
                if interval > 0 {
                    tokio::time::sleep(Duration::from_millis(interval)).await;
                }
                continue;
            }

            warn!(
                error = reply.error.as_deref().unwrap_or("unknown error"),
                "Connect rejected"
            );
            match advised.unwrap_or(Reconnect::Handshake) {
                Reconnect::Retry => tokio::time::sleep(self.options.retry).await,
                Reconnect::Handshake | Reconnect::None => needs_handshake = true,
            }
        }
    }

    /// Obtain a fresh `clientId` and replay every registered subscription.
    async fn rehandshake(&self) -> Result<(), BayeuxError> {
        let mut session = self.session.lock().await;
        if session.is_none() {
            return Err(BayeuxError::Disconnected);
        }

        let client_id = self.handshake().await?;
        info!(client_id = %client_id, "Bayeux session re-established");
        *session = Some(client_id.clone());
        drop(session);

        let channels: Vec<String> = self.channels.read().await.keys().cloned().collect();
        for channel in channels {
            // Replies that miss the subscribe response would only arrive on a
            // connect poll, which this task is responsible for, so bound the wait.
            let resubscribe = tokio::time::timeout(
                self.options.timeout,
                self.request_subscribe(&client_id, &channel),
            )
            .await;

            match resubscribe {
                Ok(Ok(())) => debug!(channel = %channel, "Resubscribed after re-handshake"),
                Ok(Err(e)) => warn!(channel = %channel, error = %e, "Resubscribe failed"),
                Err(_) => warn!(channel = %channel, "Resubscribe not acknowledged in time"),
            }
        }

        Ok(())
    }

    async fn fail(&self, reason: String) {
        error!(reason = %reason, "Bayeux session closed by server");
        self.session.lock().await.take();
        self.pending.lock().await.clear();
        self.state
            .send_replace(ConnectionState::Closed(CloseReason::Failed(reason)));
    }
}
