#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::{Json, Router, routing::post};
use bayeux_client::{Extension, Message};
use podio_relay::domain::ports::{
    BusClient, BusClientFactory, BusClosed, BusError, BusMessageHandler,
};
use podio_relay::{config::Config, server::Server};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const PUSH_SECRET: &str = "test-secret";

/// How the fake bus answers subscribe requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    Ack,
    Never,
    Reject,
}

#[derive(Default)]
struct BusShared {
    mode: Mutex<Option<AckMode>>,
    handlers: Mutex<HashMap<String, BusMessageHandler>>,
    subscribes: Mutex<Vec<Message>>,
    clients: AtomicUsize,
    disconnects: AtomicUsize,
}

/// In-memory stand-in for the push service.
#[derive(Clone, Default)]
pub struct FakeBus {
    shared: Arc<BusShared>,
}

impl FakeBus {
    pub fn set_mode(&self, mode: AckMode) {
        *self.shared.mode.lock().unwrap() = Some(mode);
    }

    /// Every subscribe message, as rewritten by the client's extension.
    pub fn subscribes(&self) -> Vec<Message> {
        self.shared.subscribes.lock().unwrap().clone()
    }

    pub fn clients_created(&self) -> usize {
        self.shared.clients.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    /// Deliver `body` on `channel`; false when nothing is subscribed.
    pub fn publish(&self, channel: &str, body: Value) -> bool {
        let handler = self.shared.handlers.lock().unwrap().get(channel).cloned();
        match handler {
            Some(handler) => {
                handler(body);
                true
            }
            None => false,
        }
    }
}

impl BusClientFactory for FakeBus {
    fn create_client(
        &self,
        extension: Arc<dyn Extension>,
    ) -> Result<Arc<dyn BusClient>, BusError> {
        self.shared.clients.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeBusClient {
            shared: Arc::clone(&self.shared),
            extension,
        }))
    }
}

struct FakeBusClient {
    shared: Arc<BusShared>,
    extension: Arc<dyn Extension>,
}

#[async_trait]
impl BusClient for FakeBusClient {
    async fn subscribe(&self, channel: &str, handler: BusMessageHandler) -> Result<(), BusError> {
        let message = self
            .extension
            .outgoing(Message::subscribe("fake-client", channel));
        self.shared.subscribes.lock().unwrap().push(message);

        let mode = self.shared.mode.lock().unwrap().unwrap_or(AckMode::Ack);
        match mode {
            AckMode::Ack => {
                self.shared
                    .handlers
                    .lock()
                    .unwrap()
                    .insert(channel.to_string(), handler);
                Ok(())
            }
            AckMode::Never => std::future::pending().await,
            AckMode::Reject => Err(BusError::Rejected("403::Invalid signature".to_string())),
        }
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.shared.handlers.lock().unwrap().remove(channel);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        self.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn closed(&self) -> BusClosed {
        std::future::pending().await
    }
}

/// Local HTTP endpoint standing in for a forward target.
pub struct Receiver {
    pub url: String,
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Receiver {
    pub async fn spawn() -> Self {
        async fn record(State(tx): State<mpsc::UnboundedSender<Value>>, Json(body): Json<Value>) {
            let _ = tx.send(body);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let router = Router::new().route("/events", post(record)).with_state(tx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, router).await });

        Self {
            url: format!("http://127.0.0.1:{port}/events"),
            rx,
        }
    }

    /// Next envelope delivered to this target.
    pub async fn next(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a forwarded event")
            .expect("receiver closed")
    }

    /// Assert nothing arrives within `wait`.
    pub async fn assert_empty(&mut self, wait: Duration) {
        let received = tokio::time::timeout(wait, self.rx.recv()).await;
        assert!(received.is_err(), "unexpected forwarded event: {received:?}");
    }
}

pub struct TestApp {
    pub address: String,
    pub bus: FakeBus,
    pub receivers: Vec<Receiver>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.address))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

/// Start the relay with a fake bus and `targets` local receivers.
pub async fn spawn_app_with(targets: usize, confirm_timeout_secs: u64) -> TestApp {
    let mut receivers = Vec::new();
    for _ in 0..targets {
        receivers.push(Receiver::spawn().await);
    }
    let urls: Vec<&str> = receivers.iter().map(|r| r.url.as_str()).collect();

    let config = {
        let mut vars = HashMap::new();
        vars.insert("server.host".to_string(), "localhost".to_string());
        vars.insert("server.port".to_string(), "0".to_string());
        vars.insert("push.secret".to_string(), PUSH_SECRET.to_string());
        vars.insert("relay.targets".to_string(), urls.join(","));
        vars.insert("relay.timeout_secs".to_string(), "2".to_string());
        vars.insert(
            "subscriptions.confirm_timeout_secs".to_string(),
            confirm_timeout_secs.to_string(),
        );
        Config::load_with_sources(Some(vars)).unwrap()
    };

    let bus = FakeBus::default();
    let server = Server::with_bus_factory(&config, Arc::new(bus.clone()))
        .await
        .unwrap();

    let port = server.port();
    tokio::spawn(server.run());

    TestApp {
        address: format!("http://{}:{}", config.server.host, port),
        bus,
        receivers,
        client: reqwest::Client::new(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(1, 15).await
}

pub async fn spawn_server() -> String {
    spawn_app_with(0, 15).await.address
}
