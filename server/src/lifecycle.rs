//! Startup and graceful shutdown.
//!
//! [`Application::build`] wires every component from [`Config`]; nothing is
//! global. [`Application::run`] serves HTTP until a shutdown signal, then:
//!
//! 1. HTTP server stops accepting new connections
//! 2. Occupancy projector is signalled and awaited (bounded by `SHUTDOWN_TIMEOUT`)
//! 3. `PostgreSQL` pool is closed

use crate::config::Config;
use anyhow::Context;
use gatekeeper_core::event_bus::EventBus;
use gatekeeper_core::event_store::EventStore;
use gatekeeper_core::token::TokenVerifier;
use gatekeeper_postgres::PostgresEventStore;
use gatekeeper_redis::RedisEventBus;
use gatekeeper_runtime::metrics::MetricsExporter;
use gatekeeper_runtime::{
    AccessGateway, GatewayConfig, OccupancyProjector, ProjectorConfig, ProjectorHandle, ScannerChannel,
};
use gatekeeper_web::AppState;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

/// Fully wired service, ready to serve.
pub struct Application {
    listener: TcpListener,
    router: axum::Router,
    store: PostgresEventStore,
    projector: ProjectorHandle,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("listener", &self.listener.local_addr().ok())
            .field("projector", &self.projector)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Connect to every dependency and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The metrics recorder cannot be installed
    /// - `PostgreSQL` is unreachable or migrations fail
    /// - Redis is unreachable
    /// - The listen address cannot be bound
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let mut metrics = MetricsExporter::new();
        if config.metrics.enabled {
            metrics.install().context("Failed to install metrics recorder")?;
        }

        info!("Connecting to event store database...");
        let store = PostgresEventStore::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            Duration::from_secs(config.postgres.connect_timeout),
        )
        .await
        .context("Failed to connect to PostgreSQL")?;
        store.migrate().await.context("Failed to run migrations")?;
        info!("Event store connected");

        info!("Connecting to Redis event bus...");
        let bus = RedisEventBus::builder()
            .url(&config.redis.url)
            .channel(&config.redis.channel)
            .buffer_size(config.redis.subscriber_buffer)
            .timeout(config.access.bus_timeout())
            .build()
            .await
            .context("Failed to connect to Redis")?;
        info!("Event bus connected");

        let event_store: Arc<dyn EventStore> = Arc::new(store.clone());
        let event_bus: Arc<dyn EventBus> = Arc::new(bus);

        let verifier = TokenVerifier::new(config.access.qr_secret.clone()).with_leeway(config.access.leeway());
        let gateway = AccessGateway::new(verifier, Arc::clone(&event_store), Arc::clone(&event_bus)).with_config(
            GatewayConfig {
                store_timeout: config.access.store_timeout(),
                bus_timeout: config.access.bus_timeout(),
            },
        );

        let projector = OccupancyProjector::spawn(
            Arc::clone(&event_store),
            Arc::clone(&event_bus),
            ProjectorConfig {
                window: config.access.recent_window,
                store_timeout: config.access.store_timeout(),
                ..ProjectorConfig::default()
            },
        );

        let scanners = ScannerChannel::from_keys(config.access.device_key_values());
        info!(requires_key = scanners.requires_key(), "Scanner channel configured");

        let state = AppState::new(
            Arc::new(gateway),
            scanners,
            event_store,
            event_bus,
            projector.snapshots(),
        )
        .with_metrics(metrics);
        let router = gatekeeper_web::router(state);

        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind {address}"))?;

        Ok(Self {
            listener,
            router,
            store,
            projector,
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns the socket error if the address cannot be read.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until Ctrl+C or SIGTERM, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `signal` resolves, then shut down gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run_until(self, signal: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let Self {
            listener,
            router,
            store,
            projector,
            shutdown_timeout,
        } = self;

        info!(address = ?listener.local_addr().ok(), "HTTP server listening for requests");
        let served = axum::serve(listener, router).with_graceful_shutdown(signal).await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        projector.shutdown(shutdown_timeout).await;
        store.close().await;
        info!("Graceful shutdown complete");

        served.context("HTTP server failed")
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
