//! Route table.

use crate::handlers::{access, events, health, metrics, occupancy, recent};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// | method | path                  | handler                                   |
/// |--------|-----------------------|-------------------------------------------|
/// | POST   | `/qr/validate`        | [`access::validate_qr`]                   |
/// | POST   | `/fingerprint/verify` | [`access::verify_fingerprint`]            |
/// | GET    | `/recent`             | [`recent::recent`]                        |
/// | GET    | `/occupancy`          | [`occupancy::occupancy`]                  |
/// | GET    | `/events/ws`          | [`events::events_ws`]                     |
/// | GET    | `/health`             | [`health::health_check`]                  |
/// | GET    | `/ready`              | [`health::ready`]                         |
/// | GET    | `/metrics`            | [`metrics::metrics`]                      |
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/qr/validate", post(access::validate_qr))
        .route("/fingerprint/verify", post(access::verify_fingerprint))
        .route("/recent", get(recent::recent))
        .route("/occupancy", get(occupancy::occupancy))
        .route("/events/ws", get(events::events_ws))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
