//! # Gatekeeper Server
//!
//! Configuration and process lifecycle for the `gatekeeper` binary.
//!
//! - [`config`]: environment-driven [`Config`](config::Config) and its validation
//! - [`lifecycle`]: [`Application`](lifecycle::Application) startup and graceful shutdown

pub mod config;
pub mod lifecycle;

pub use config::{Config, ConfigError, Environment};
pub use lifecycle::Application;

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,gatekeeper=debug,sqlx=warn";
