//! Live event feed for dashboards.
//!
//! `GET /events/ws` upgrades to a WebSocket that streams:
//!
//! ```json
//! {"type":"occupancy","inside":3}
//! {"type":"event","event":{"id":42,"ts":"...","user_id":"u1","name":"Ada","camera_id":"qr","matched":true,"score":0.0}}
//! ```
//!
//! An `occupancy` frame is sent on connect and then whenever the count changes.
//! The feed is live only; history comes from `GET /recent`.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use gatekeeper_core::event::RecognitionEvent;
use gatekeeper_core::event_bus::{BusError, EventStream};
use gatekeeper_core::occupancy::OccupancySnapshot;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Frame sent to dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsFrame {
    /// A committed recognition event.
    Event {
        /// The record, in the `/recent` shape.
        event: RecognitionEvent,
    },
    /// The live occupancy changed.
    Occupancy {
        /// Distinct matched users in the window.
        inside: usize,
    },
}

/// Upgrade to the live feed.
///
/// The bus subscription is opened before the upgrade so that a bus outage is
/// reported as a plain 503.
///
/// # Errors
///
/// 503 when the bus subscription cannot be opened.
pub async fn events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Result<Response, AppError> {
    let events = state.bus.subscribe().await?;
    let occupancy = state.occupancy.clone();

    info!("Dashboard feed connection requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, events, occupancy)))
}

async fn send_frame(sender: &mut SplitSink<WebSocket, Message>, frame: &WsFrame) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "Failed to serialize feed frame");
            Ok(())
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    mut events: EventStream,
    mut occupancy: watch::Receiver<OccupancySnapshot>,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let mut last_inside = occupancy.borrow_and_update().inside;
        if send_frame(&mut sender, &WsFrame::Occupancy { inside: last_inside })
            .await
            .is_err()
        {
            return;
        }

        loop {
            let frame = tokio::select! {
                item = events.next() => match item {
                    Some(Ok(event)) => WsFrame::Event { event },
                    Some(Err(BusError::Lagged { skipped })) => {
                        warn!(skipped, "Dashboard feed lagged");
                        continue;
                    }
                    Some(Err(error)) => {
                        debug!(error = %error, "Skipping bus error on dashboard feed");
                        continue;
                    }
                    None => {
                        debug!("Event stream ended");
                        break;
                    }
                },
                changed = occupancy.changed() => {
                    if changed.is_err() {
                        debug!("Occupancy projector stopped");
                        break;
                    }
                    let inside = occupancy.borrow_and_update().inside;
                    if inside == last_inside {
                        continue;
                    }
                    last_inside = inside;
                    WsFrame::Occupancy { inside }
                }
            };

            if send_frame(&mut sender, &frame).await.is_err() {
                break;
            }
        }

        debug!("Feed send task terminated");
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }

        debug!("Feed receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("Dashboard feed connection closed");
}
