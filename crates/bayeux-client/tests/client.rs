use async_trait::async_trait;
use bayeux_client::message::{META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE};
use bayeux_client::{
    Advice, BayeuxError, Client, ClientOptions, CloseReason, Extension, Message, Reconnect,
    Transport,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    Healthy,
    RefuseForever,
    /// First connect is refused with `reconnect: handshake`, then healthy.
    HandshakeOnce,
    /// First connect fails at the transport level, then healthy.
    DropOnce,
}

/// In-memory Bayeux server answering each batch from a small script.
struct ScriptedTransport {
    sent: Mutex<Vec<Message>>,
    outbox: Mutex<VecDeque<Message>>,
    acknowledge_subscribe: bool,
    accept_subscribe: bool,
    connect_mode: ConnectMode,
    handshakes: AtomicUsize,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            outbox: Mutex::new(VecDeque::new()),
            acknowledge_subscribe: true,
            accept_subscribe: true,
            connect_mode: ConnectMode::Healthy,
            handshakes: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        }
    }

    fn with_connect_mode(connect_mode: ConnectMode) -> Self {
        Self {
            connect_mode,
            ..Self::new()
        }
    }

    fn publish(&self, channel: &str, data: Value) {
        let mut message = Message::new(channel);
        message.data = Some(data);
        self.outbox.lock().unwrap().push_back(message);
    }

    fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        messages: Vec<Message>,
        _timeout: Duration,
    ) -> Result<Vec<Message>, BayeuxError> {
        self.sent.lock().unwrap().extend(messages.iter().cloned());

        let first_connect = messages.iter().any(|m| m.channel == META_CONNECT)
            && self.connects.fetch_add(1, Ordering::SeqCst) == 0;
        if first_connect && self.connect_mode == ConnectMode::DropOnce {
            return Err(BayeuxError::Transport("connection reset".to_string()));
        }

        let mut replies = Vec::new();
        for message in messages {
            let mut reply = Message::new(message.channel.clone());
            reply.id = message.id.clone();

            match message.channel.as_str() {
                META_HANDSHAKE => {
                    let n = self.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
                    reply.successful = Some(true);
                    reply.client_id = Some(format!("client-{n}"));
                    reply.advice = Some(Advice {
                        reconnect: Some(Reconnect::Retry),
                        interval: Some(0),
                        timeout: Some(100),
                    });
                }
                META_SUBSCRIBE => {
                    if !self.acknowledge_subscribe {
                        continue;
                    }
                    reply.subscription = message.subscription.clone();
                    reply.successful = Some(self.accept_subscribe);
                    if !self.accept_subscribe {
                        reply.error = Some("403::Forbidden".to_string());
                    }
                }
                META_CONNECT => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    match self.connect_mode {
                        ConnectMode::HandshakeOnce if first_connect => {
                            reply.successful = Some(false);
                            reply.error = Some("402::Unknown client".to_string());
                            reply.advice = Some(Advice {
                                reconnect: Some(Reconnect::Handshake),
                                ..Default::default()
                            });
                        }
                        ConnectMode::Healthy
                        | ConnectMode::HandshakeOnce
                        | ConnectMode::DropOnce => {
                            replies.extend(self.outbox.lock().unwrap().drain(..));
                            reply.successful = Some(true);
                        }
                        ConnectMode::RefuseForever => {
                            reply.successful = Some(false);
                            reply.error = Some("401::Unknown client".to_string());
                            reply.advice = Some(Advice {
                                reconnect: Some(Reconnect::None),
                                ..Default::default()
                            });
                        }
                    }
                }
                _ => reply.successful = Some(true),
            }
            replies.push(reply);
        }
        Ok(replies)
    }
}

struct TagSubscribes;

impl Extension for TagSubscribes {
    fn outgoing(&self, mut message: Message) -> Message {
        if message.channel == META_SUBSCRIBE {
            message
                .ext
                .get_or_insert_with(Default::default)
                .insert("tag".to_string(), json!("seen"));
        }
        message
    }
}

fn options() -> ClientOptions {
    ClientOptions {
        timeout: Duration::from_secs(1),
        retry: Duration::from_millis(10),
    }
}

fn forwarding_callback() -> (bayeux_client::MessageCallback, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: bayeux_client::MessageCallback = Arc::new(move |message: Message| {
        let _ = tx.send(message);
    });
    (callback, rx)
}

#[tokio::test]
async fn test_subscribe_is_acknowledged_and_delivers_messages() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.publish("/task/1", json!({"type": "task.update", "id": 1}));
    let client = Client::with_transport(transport.clone(), options());

    let (callback, mut rx) = forwarding_callback();
    client
        .subscribe("/task/1", callback)
        .await
        .expect("subscribe should be acknowledged");

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("callback channel closed");

    assert_eq!(received.channel, "/task/1");
    assert_eq!(received.data, Some(json!({"type": "task.update", "id": 1})));

    let handshakes = transport.sent_on(META_HANDSHAKE);
    assert_eq!(handshakes.len(), 1);
    assert_eq!(
        handshakes[0].supported_connection_types,
        Some(vec!["long-polling".to_string()])
    );

    client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_extension_rewrites_outbound_subscribe() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = Client::with_transport(transport.clone(), options());
    client
        .add_extension(Arc::new(TagSubscribes))
        .expect("first extension is accepted");

    let (callback, _rx) = forwarding_callback();
    client.subscribe("/task/1", callback).await.expect("subscribe");

    let subscribes = transport.sent_on(META_SUBSCRIBE);
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0].ext.as_ref().unwrap()["tag"], "seen");

    let handshakes = transport.sent_on(META_HANDSHAKE);
    assert!(handshakes[0].ext.is_none());

    client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_second_extension_is_refused() {
    let client = Client::with_transport(Arc::new(ScriptedTransport::new()), options());

    client.add_extension(Arc::new(TagSubscribes)).unwrap();
    let second = client.add_extension(Arc::new(TagSubscribes));

    assert!(matches!(second, Err(BayeuxError::ExtensionAlreadySet)));
}

#[tokio::test]
async fn test_rejected_subscribe_reports_server_error() {
    let mut transport = ScriptedTransport::new();
    transport.accept_subscribe = false;
    let client = Client::with_transport(Arc::new(transport), options());

    let (callback, _rx) = forwarding_callback();
    let result = client.subscribe("/task/1", callback).await;

    match result {
        Err(BayeuxError::SubscribeRejected { channel, reason }) => {
            assert_eq!(channel, "/task/1");
            assert_eq!(reason, "403::Forbidden");
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_unacknowledged_subscribe_stays_pending() {
    let mut transport = ScriptedTransport::new();
    transport.acknowledge_subscribe = false;
    let client = Client::with_transport(Arc::new(transport), options());

    let (callback, _rx) = forwarding_callback();
    let result =
        tokio::time::timeout(Duration::from_millis(200), client.subscribe("/task/1", callback))
            .await;

    assert!(result.is_err(), "subscribe should still be waiting");
    client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_no_reconnect_advice_closes_client() {
    let mut transport = ScriptedTransport::new();
    transport.connect_mode = ConnectMode::RefuseForever;
    let client = Client::with_transport(Arc::new(transport), options());

    let (callback, _rx) = forwarding_callback();
    client.subscribe("/task/1", callback).await.expect("subscribe");

    let reason = tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .expect("client should close");

    assert_eq!(
        reason,
        CloseReason::Failed("401::Unknown client".to_string())
    );
}

#[tokio::test]
async fn test_disconnect_notifies_server_and_closes() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = Client::with_transport(transport.clone(), options());

    let (callback, _rx) = forwarding_callback();
    client.subscribe("/task/1", callback).await.expect("subscribe");
    client.disconnect().await.expect("disconnect");

    let reason = tokio::time::timeout(Duration::from_secs(1), client.closed())
        .await
        .expect("client should report closed");
    assert_eq!(reason, CloseReason::Disconnected);
    assert_eq!(transport.sent_on(META_DISCONNECT).len(), 1);

    let (callback, _rx) = forwarding_callback();
    let again = client.subscribe("/task/2", callback).await;
    assert!(matches!(again, Err(BayeuxError::Disconnected)));
}

#[tokio::test]
async fn test_disconnect_before_handshake_is_a_no_op() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = Client::with_transport(transport.clone(), options());

    client.disconnect().await.expect("disconnect");

    assert!(transport.sent.lock().unwrap().is_empty());
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_handshake_advice_resubscribes_with_extension() {
    let transport = Arc::new(ScriptedTransport::with_connect_mode(ConnectMode::HandshakeOnce));
    let client = Client::with_transport(transport.clone(), options());
    client.add_extension(Arc::new(TagSubscribes)).unwrap();

    let (callback, mut rx) = forwarding_callback();
    client.subscribe("/task/1", callback).await.expect("subscribe");

    wait_until(|| transport.sent_on(META_SUBSCRIBE).len() == 2).await;

    let subscribes = transport.sent_on(META_SUBSCRIBE);
    assert_eq!(subscribes[0].client_id.as_deref(), Some("client-1"));
    assert_eq!(subscribes[1].client_id.as_deref(), Some("client-2"));
    assert_eq!(subscribes[1].subscription.as_deref(), Some("/task/1"));
    assert_eq!(subscribes[1].ext.as_ref().unwrap()["tag"], "seen");
    assert_eq!(transport.sent_on(META_HANDSHAKE).len(), 2);

    // The new session keeps delivering
    transport.publish("/task/1", json!({"after": "rehandshake"}));
    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("callback channel closed");
    assert_eq!(received.data, Some(json!({"after": "rehandshake"})));

    client.disconnect().await.expect("disconnect");
}

#[tokio::test]
async fn test_connect_loop_recovers_from_transport_error() {
    let transport = Arc::new(ScriptedTransport::with_connect_mode(ConnectMode::DropOnce));
    transport.publish("/task/1", json!({"n": 1}));
    let client = Client::with_transport(transport.clone(), options());

    let (callback, mut rx) = forwarding_callback();
    client.subscribe("/task/1", callback).await.expect("subscribe");

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("loop should recover and deliver")
        .expect("callback channel closed");

    assert_eq!(received.data, Some(json!({"n": 1})));
    assert!(transport.connects.load(Ordering::SeqCst) >= 2);
    assert_eq!(transport.sent_on(META_HANDSHAKE).len(), 1);

    client.disconnect().await.expect("disconnect");
}

/// Marks a long-poll as open for as long as it is alive.
struct OpenPoll(Arc<AtomicUsize>);

impl OpenPoll {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenPoll {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Slow handshake, connects that are held open until dropped.
struct SlowHandshakeTransport {
    open_polls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for SlowHandshakeTransport {
    async fn send(
        &self,
        messages: Vec<Message>,
        _timeout: Duration,
    ) -> Result<Vec<Message>, BayeuxError> {
        let mut replies = Vec::new();
        for message in messages {
            let mut reply = Message::new(message.channel.clone());
            reply.id = message.id.clone();
            reply.successful = Some(true);
            match message.channel.as_str() {
                META_HANDSHAKE => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    reply.client_id = Some("client-1".to_string());
                }
                META_CONNECT => {
                    let _open = OpenPoll::enter(&self.open_polls);
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                META_SUBSCRIBE => reply.subscription = message.subscription.clone(),
                _ => {}
            }
            replies.push(reply);
        }
        Ok(replies)
    }
}

#[tokio::test]
async fn test_disconnect_during_handshake_stops_connect_loop() {
    let open_polls = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(SlowHandshakeTransport {
        open_polls: Arc::clone(&open_polls),
    });
    let client = Client::with_transport(transport, options());

    let subscribing = {
        let client = client.clone();
        tokio::spawn(async move {
            let (callback, _rx) = forwarding_callback();
            client.subscribe("/task/1", callback).await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.disconnect().await.expect("disconnect");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(open_polls.load(Ordering::SeqCst), 0);
    subscribing.abort();
}
