//! # Gatekeeper Runtime
//!
//! The moving parts of the access-event pipeline, built on the traits in
//! `gatekeeper-core`.
//!
//! ## Core Components
//!
//! - **Gateway**: [`AccessGateway`] verifies a credential, commits the event, then publishes it
//! - **Scanner channel**: [`ScannerChannel`] mints the [`TrustedScanner`] capability
//!   that fingerprint reports require
//! - **Projector**: [`OccupancyProjector`] keeps live occupancy from the store and the bus
//! - **Health**: readiness of the event store
//! - **Metrics**: Prometheus counters, histograms and gauges
//!
//! ## Example
//!
//! ```
//! use gatekeeper_runtime::{AccessGateway, OccupancyProjector, ProjectorConfig};
//! use gatekeeper_core::token::TokenVerifier;
//! use gatekeeper_testing::{tokens, InMemoryEventBus, InMemoryEventStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryEventStore::new());
//! let bus = Arc::new(InMemoryEventBus::new());
//!
//! let gateway = AccessGateway::new(TokenVerifier::new(tokens::test_secret()), store.clone(), bus.clone());
//! let projector = OccupancyProjector::spawn(store, bus, ProjectorConfig::default());
//!
//! gateway.validate_qr(&tokens::valid_token("u1", chrono::Utc::now())).await?;
//!
//! let mut snapshots = projector.snapshots();
//! snapshots.wait_for(|s| s.inside == 1).await?;
//!
//! projector.shutdown(Duration::from_secs(1)).await;
//! # Ok(())
//! # }
//! ```

/// Credential verification, event commit and publish
pub mod gateway;

/// Readiness checks
pub mod health;

/// Prometheus metrics for observability
pub mod metrics;

/// Live occupancy projection
pub mod projector;

/// Fingerprint scanner capability
pub mod scanner;

pub use gateway::{AccessGateway, FingerprintAccepted, GatewayConfig, GatewayError, QrAccepted};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use projector::{OccupancyProjector, ProjectorConfig, ProjectorHandle, poll_occupancy};
pub use scanner::{ScannerAuthError, ScannerChannel, TrustedScanner};
