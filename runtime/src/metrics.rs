//! Prometheus metrics for the access-event pipeline.
//!
//! This module provides metric collection for:
//! - Credential decisions at the gateway
//! - Event store appends
//! - Event bus publishes and subscriber lag
//! - Live occupancy
//!
//! The exporter does not bind its own port; the web crate renders it on
//! `GET /metrics`.
//!
//! # Example
//!
//! ```rust
//! use gatekeeper_runtime::metrics::MetricsExporter;
//!
//! let mut exporter = MetricsExporter::new();
//! exporter.install().unwrap();
//!
//! // Text exposition for the `/metrics` route
//! let _body = exporter.render();
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Process-wide Prometheus recorder plus the handle used to render it.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle; [`render`](Self::render) then
    /// returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Gateway Metrics
    describe_counter!(
        "gateway_qr_accepted_total",
        "QR tokens accepted and logged"
    );
    describe_counter!(
        "gateway_qr_rejected_total",
        "QR tokens rejected by verification"
    );
    describe_counter!(
        "gateway_fingerprint_accepted_total",
        "Fingerprint verifications logged"
    );
    describe_counter!(
        "gateway_store_failures_total",
        "Credential checks that failed because the event store was unavailable"
    );
    describe_counter!(
        "gateway_publish_failures_total",
        "Committed events that could not be published"
    );

    // Event Store Metrics
    describe_histogram!(
        "event_store_append_duration_seconds",
        "Time taken to append an event"
    );

    // Event Bus Metrics
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Time taken to publish an event"
    );
    describe_counter!(
        "event_bus_lagged_events_total",
        "Events dropped from slow subscriber buffers"
    );

    // Occupancy Metrics
    describe_gauge!(
        "occupancy_inside",
        "Distinct subjects inside according to the live projection"
    );
}

/// Gateway decision metrics recorder.
pub struct GatewayMetrics;

impl GatewayMetrics {
    /// Record an accepted QR token.
    pub fn record_qr_accepted() {
        counter!("gateway_qr_accepted_total").increment(1);
    }

    /// Record a rejected QR token.
    pub fn record_qr_rejected() {
        counter!("gateway_qr_rejected_total").increment(1);
    }

    /// Record a logged fingerprint verification.
    pub fn record_fingerprint_accepted() {
        counter!("gateway_fingerprint_accepted_total").increment(1);
    }

    /// Record a store failure during a credential check.
    pub fn record_store_failure() {
        counter!("gateway_store_failures_total").increment(1);
    }

    /// Record a publish failure after commit.
    pub fn record_publish_failure() {
        counter!("gateway_publish_failures_total").increment(1);
    }
}

/// Event store metrics recorder.
pub struct EventStoreMetrics;

impl EventStoreMetrics {
    /// Record an event append operation.
    pub fn record_append(duration: Duration) {
        histogram!("event_store_append_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a message publish.
    pub fn record_publish(duration: Duration) {
        histogram!("event_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record events dropped from a subscriber buffer.
    pub fn record_lagged(skipped: u64) {
        counter!("event_bus_lagged_events_total").increment(skipped);
    }
}

/// Occupancy metrics recorder.
pub struct OccupancyMetrics;

impl OccupancyMetrics {
    /// Record the current occupancy.
    #[allow(clippy::cast_precision_loss)] // Occupancy is far below 2^52
    pub fn record_inside(inside: usize) {
        gauge!("occupancy_inside").set(inside as f64);
    }
}
