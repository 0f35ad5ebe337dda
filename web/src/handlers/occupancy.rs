//! Live occupancy.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use gatekeeper_core::event::EventId;
use gatekeeper_core::occupancy::OccupancySnapshot;
use serde::Serialize;

/// Response of `GET /occupancy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancyResponse {
    /// Distinct matched users in the window.
    pub inside: usize,
    /// Number of events the count was taken over.
    pub window: usize,
    /// Newest event in the window.
    pub last_event_id: Option<EventId>,
}

impl From<OccupancySnapshot> for OccupancyResponse {
    fn from(snapshot: OccupancySnapshot) -> Self {
        Self {
            inside: snapshot.inside,
            window: snapshot.window_len,
            last_event_id: snapshot.last_event_id,
        }
    }
}

/// `GET /occupancy`: the projector's latest snapshot. Never touches the store.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn occupancy(State(state): State<AppState>) -> Json<OccupancyResponse> {
    let snapshot = *state.occupancy.borrow();
    Json(snapshot.into())
}
