//! Gatekeeper access-event service.
//!
//! Validates QR tokens and fingerprint reports, logs every accepted credential to
//! `PostgreSQL`, fans events out over Redis, and serves the dashboard API.

use gatekeeper_server::{Application, Config, DEFAULT_LOG_FILTER};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    info!("Starting Gatekeeper");

    let config = Config::from_env()?;
    config.validate()?;
    info!(
        environment = ?config.environment,
        address = %config.bind_address(),
        channel = %config.redis.channel,
        window = config.access.recent_window,
        metrics = config.metrics.enabled,
        "Configuration loaded"
    );

    let app = Application::build(&config).await?;
    app.run().await?;

    info!("Gatekeeper stopped");
    Ok(())
}
