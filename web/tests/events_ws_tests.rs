//! Live feed tests against a real listener.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use futures::StreamExt;
use gatekeeper_core::environment::Clock;
use gatekeeper_core::event::EventId;
use gatekeeper_core::occupancy::OccupancySnapshot;
use gatekeeper_core::token::TokenVerifier;
use gatekeeper_runtime::{AccessGateway, ScannerChannel};
use gatekeeper_testing::{InMemoryEventBus, InMemoryEventStore, init_test_tracing, test_clock, tokens};
use gatekeeper_web::{AppState, router};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

struct Server {
    url: String,
    gateway: Arc<AccessGateway>,
    occupancy: watch::Sender<OccupancySnapshot>,
}

async fn serve() -> Server {
    init_test_tracing();
    let store = InMemoryEventStore::new();
    let bus = InMemoryEventBus::new();
    let gateway = Arc::new(
        AccessGateway::new(
            TokenVerifier::new(tokens::test_secret()),
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
        )
        .with_clock(Arc::new(test_clock())),
    );
    let (occupancy, snapshots) = watch::channel(OccupancySnapshot {
        inside: 1,
        window_len: 1,
        last_event_id: Some(EventId::new(1)),
    });
    let state = AppState::new(
        Arc::clone(&gateway),
        ScannerChannel::NetworkRestricted,
        Arc::new(store),
        Arc::new(bus),
        snapshots,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    Server {
        url: format!("ws://{addr}/events/ws"),
        gateway,
        occupancy,
    }
}

async fn next_frame<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("no frame in time")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn feed_sends_occupancy_then_events() {
    let server = serve().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(server.url.as_str()).await.unwrap();

    assert_eq!(next_frame(&mut socket).await, json!({ "type": "occupancy", "inside": 1 }));

    let token = tokens::valid_token("u1", test_clock().now());
    let accepted = server.gateway.validate_qr(&token).await.unwrap();

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["event"]["id"], accepted.event.id.value());
    assert_eq!(frame["event"]["user_id"], "u1");
    assert_eq!(frame["event"]["camera_id"], "qr");
}

#[tokio::test]
async fn feed_reports_occupancy_changes_only() {
    let server = serve().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(server.url.as_str()).await.unwrap();
    assert_eq!(next_frame(&mut socket).await["inside"], 1);

    // Same count, new window: no frame.
    server.occupancy.send_replace(OccupancySnapshot {
        inside: 1,
        window_len: 2,
        last_event_id: Some(EventId::new(2)),
    });
    server.occupancy.send_replace(OccupancySnapshot {
        inside: 2,
        window_len: 3,
        last_event_id: Some(EventId::new(3)),
    });

    assert_eq!(next_frame(&mut socket).await, json!({ "type": "occupancy", "inside": 2 }));
}
