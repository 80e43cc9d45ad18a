mod handlers;
mod responses;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::inbound::SignatureVerifier;
use crate::domain::ports::BusClientFactory;
use crate::infrastructure::{BayeuxBusConfig, BayeuxClientFactory};
use crate::outbound::relay::EventRelay;
use crate::server::handlers::health::health_check;
use crate::server::handlers::push::podio_push;
use crate::server::handlers::root::home;
use crate::server::handlers::subscriptions::{list_subscriptions, subscribe, unsubscribe};
use crate::subscriptions::SubscriptionManager;
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result, eyre};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use responses::ApiError;

#[derive(Clone)]
/// The global application state shared between all request handlers.
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    pub relay: Arc<EventRelay>,
    pub verifier: Arc<SignatureVerifier>,
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
    manager: Arc<SubscriptionManager>,
}

impl Server {
    /// Creates a server whose subscriptions go to the configured Bayeux endpoint.
    pub async fn new(config: &Config) -> Result<Self> {
        let factory = BayeuxClientFactory::new(BayeuxBusConfig {
            endpoint: config.bayeux.endpoint.clone(),
            timeout: config.bayeux.timeout(),
            retry: config.bayeux.retry(),
        });

        Self::with_bus_factory(config, Arc::new(factory)).await
    }

    /// Creates a server with a caller-supplied bus client factory.
    pub async fn with_bus_factory(
        config: &Config,
        factory: Arc<dyn BusClientFactory>,
    ) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

        let relay = EventRelay::from_urls(&config.relay.targets, config.relay.timeout())
            .map_err(|e| eyre!("Failed to build forward targets: {e}"))?;
        let relay = Arc::new(relay);

        let manager = Arc::new(SubscriptionManager::with_confirm_timeout(
            factory,
            Arc::clone(&relay),
            config.subscriptions.confirm_timeout(),
        ));

        let verifier = SignatureVerifier::new(config.push.secret.clone());
        if !verifier.has_secret() {
            tracing::warn!("No push secret configured; every webhook will be rejected");
        }

        let state = AppState {
            manager: Arc::clone(&manager),
            relay,
            verifier: Arc::new(verifier),
        };

        let router = Router::new()
            .route("/", get(home))
            .route("/health", get(health_check))
            .route("/subscriptions", get(list_subscriptions))
            .route("/subscribe", post(subscribe))
            .route("/unsubscribe", post(unsubscribe))
            .route("/podio/push", post(podio_push))
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to read bound address")?;

        Ok(Self {
            router,
            listener,
            local_addr,
            manager,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Runs the server until a shutdown signal, then tears down every subscription.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.local_addr);
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server stopped; closing subscriptions");
        self.manager.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::warn!("Shutdown signal received");
}
