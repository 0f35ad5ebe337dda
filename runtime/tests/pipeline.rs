//! End-to-end tests of the access-event pipeline over the in-memory adapters.
//!
//! Covers the ordering and delivery guarantees that span more than one
//! component: commit before publish, live-only delivery, and agreement between
//! the live and polled occupancy.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use futures::StreamExt;
use gatekeeper_core::environment::Clock;
use gatekeeper_core::event_bus::EventBus;
use gatekeeper_core::event_store::EventStore;
use gatekeeper_core::token::TokenVerifier;
use gatekeeper_runtime::{
    AccessGateway, GatewayError, OccupancyProjector, ProjectorConfig, ScannerChannel, poll_occupancy,
};
use gatekeeper_testing::{InMemoryEventBus, InMemoryEventStore, init_test_tracing, test_clock, tokens};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Pipeline {
    gateway: Arc<AccessGateway>,
    store: InMemoryEventStore,
    bus: InMemoryEventBus,
}

fn pipeline() -> Pipeline {
    init_test_tracing();
    let store = InMemoryEventStore::new();
    let bus = InMemoryEventBus::new();
    let gateway = AccessGateway::new(
        TokenVerifier::new(tokens::test_secret()),
        Arc::new(store.clone()),
        Arc::new(bus.clone()),
    )
    .with_clock(Arc::new(test_clock()));

    Pipeline {
        gateway: Arc::new(gateway),
        store,
        bus,
    }
}

fn token(user: &str) -> String {
    tokens::valid_token(user, test_clock().now())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn subscriber_sees_only_committed_events() {
    let p = pipeline();
    let store = p.store.clone();
    let mut stream = p.bus.subscribe().await.unwrap();

    p.gateway.validate_qr(&token("u1")).await.unwrap();

    let delivered = stream.next().await.unwrap().unwrap();
    let recent = store.recent(1).await.unwrap();
    assert_eq!(recent, vec![delivered]);
}

#[tokio::test]
async fn token_expires_once_the_clock_passes_leeway() {
    init_test_tracing();
    let clock = Arc::new(test_clock());
    let store = InMemoryEventStore::new();
    let gateway = AccessGateway::new(
        TokenVerifier::new(tokens::test_secret()),
        Arc::new(store.clone()),
        Arc::new(InMemoryEventBus::new()),
    )
    .with_clock(clock.clone());
    let token = token("u1");

    gateway.validate_qr(&token).await.unwrap();

    // Five minute token plus 60s leeway.
    clock.set(clock.now() + chrono::Duration::minutes(7));
    let result = gateway.validate_qr(&token).await;

    assert!(matches!(result, Err(GatewayError::InvalidCredential(_))));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn late_subscriber_misses_earlier_events() {
    let p = pipeline();
    p.gateway.validate_qr(&token("u1")).await.unwrap();

    let mut stream = p.bus.subscribe().await.unwrap();
    p.gateway.validate_qr(&token("u2")).await.unwrap();

    let delivered = stream.next().await.unwrap().unwrap();
    assert_eq!(delivered.user_id.as_deref(), Some("u2"));
}

#[tokio::test]
async fn concurrent_requests_get_unique_ids_and_single_delivery() {
    let p = pipeline();
    let mut stream = p.bus.subscribe().await.unwrap();
    let scanner_channel = ScannerChannel::NetworkRestricted;

    let mut handles = Vec::new();
    for i in 0..50 {
        let gateway = Arc::clone(&p.gateway);
        handles.push(tokio::spawn(async move {
            gateway.validate_qr(&token(&format!("q{i}"))).await.map(|a| a.event.id)
        }));
    }
    for i in 0..50 {
        let gateway = Arc::clone(&p.gateway);
        let scanner = scanner_channel.authorize(None).unwrap();
        handles.push(tokio::spawn(async move {
            gateway
                .verify_fingerprint(&scanner, &format!("f{i}"), Some("fp-1"))
                .await
                .map(|a| a.event.id)
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.expect("task panicked").unwrap());
    }
    assert_eq!(ids.len(), 100);

    let mut delivered = HashSet::new();
    for _ in 0..100 {
        let event = stream.next().await.unwrap().unwrap();
        assert!(delivered.insert(event.id), "event {} delivered twice", event.id);
    }
    assert_eq!(delivered, ids);

    let recent: HashSet<_> = p.store.recent(100).await.unwrap().iter().map(|e| e.id).collect();
    assert_eq!(recent, ids);
}

#[tokio::test]
async fn live_and_polled_occupancy_agree() {
    let p = pipeline();
    let config = ProjectorConfig {
        window: 5,
        retry_delay: Duration::from_millis(10),
        ..ProjectorConfig::default()
    };
    let projector = OccupancyProjector::spawn(Arc::new(p.store.clone()), Arc::new(p.bus.clone()), config);
    let mut snapshots = projector.snapshots();
    snapshots.wait_for(|s| s.window_len == 0).await.unwrap();

    while p.bus.subscriber_count() == 0 {
        tokio::task::yield_now().await;
    }

    for user in ["a", "a", "b", "c", "d", "e", "e"] {
        p.gateway.validate_qr(&token(user)).await.unwrap();
    }
    let last = p.store.events().last().map(|e| e.id);

    let live = *tokio::time::timeout(
        Duration::from_secs(2),
        snapshots.wait_for(|s| s.last_event_id == last),
    )
    .await
    .expect("projector did not catch up")
    .unwrap();

    let polled = poll_occupancy(&p.store, 5).await.unwrap();
    assert_eq!(live, polled);
    // Window of 5 holds b, c, d, e, e.
    assert_eq!(live.inside, 4);

    projector.shutdown(Duration::from_secs(1)).await;
}
