//! Application state for Axum handlers.

use gatekeeper_core::event_bus::EventBus;
use gatekeeper_core::event_store::EventStore;
use gatekeeper_core::occupancy::OccupancySnapshot;
use gatekeeper_runtime::metrics::MetricsExporter;
use gatekeeper_runtime::{AccessGateway, ScannerChannel};
use std::sync::Arc;
use tokio::sync::watch;

/// Application state shared across all HTTP handlers.
///
/// Every field is a cheap handle; cloning the state per request is expected.
#[derive(Clone)]
pub struct AppState {
    /// Credential validation and event logging.
    pub gateway: Arc<AccessGateway>,
    /// Trust channel for fingerprint scanners.
    pub scanners: Arc<ScannerChannel>,
    /// Durable log, for `/recent`.
    pub store: Arc<dyn EventStore>,
    /// Live fan-out, for `/events/ws`.
    pub bus: Arc<dyn EventBus>,
    /// Live occupancy from the projector.
    pub occupancy: watch::Receiver<OccupancySnapshot>,
    /// Prometheus exporter, if installed.
    pub metrics: Arc<MetricsExporter>,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub fn new(
        gateway: Arc<AccessGateway>,
        scanners: ScannerChannel,
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus>,
        occupancy: watch::Receiver<OccupancySnapshot>,
    ) -> Self {
        Self {
            gateway,
            scanners: Arc::new(scanners),
            store,
            bus,
            occupancy,
            metrics: Arc::new(MetricsExporter::new()),
        }
    }

    /// Serve `/metrics` from this exporter.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsExporter) -> Self {
        self.metrics = Arc::new(metrics);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("scanners", &self.scanners)
            .field("occupancy", &*self.occupancy.borrow())
            .finish_non_exhaustive()
    }
}
