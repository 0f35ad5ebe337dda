//! Gateway metrics against a real Prometheus recorder.
//!
//! Kept in its own test binary: it installs the process-wide recorder and
//! asserts exact sample counts.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use gatekeeper_core::environment::Clock;
use gatekeeper_core::token::TokenVerifier;
use gatekeeper_runtime::metrics::MetricsExporter;
use gatekeeper_runtime::{AccessGateway, GatewayError};
use gatekeeper_testing::{InMemoryEventBus, InMemoryEventStore, init_test_tracing, test_clock, tokens};
use std::sync::Arc;

#[tokio::test]
async fn failed_append_is_timed_and_counted() {
    init_test_tracing();
    let mut exporter = MetricsExporter::new();
    exporter.install().unwrap();

    let store = InMemoryEventStore::new();
    store.fail_appends(true);
    let gateway = AccessGateway::new(
        TokenVerifier::new(tokens::test_secret()),
        Arc::new(store.clone()),
        Arc::new(InMemoryEventBus::new()),
    )
    .with_clock(Arc::new(test_clock()));

    let result = gateway
        .validate_qr(&tokens::valid_token("u1", test_clock().now()))
        .await;
    assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));

    let rendered = exporter.render().expect("recorder installed by this test");
    assert!(rendered.contains("event_store_append_duration_seconds_count 1"));
    assert!(rendered.contains("gateway_store_failures_total 1"));
    assert!(!rendered.contains("event_bus_publish_duration_seconds_count"));
}
