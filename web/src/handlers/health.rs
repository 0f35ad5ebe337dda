//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use gatekeeper_runtime::HealthStatus;
use gatekeeper_runtime::health::{STORE_COMPONENT, readiness};
use serde::Serialize;

/// Liveness body.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `true` while the process serves requests.
    pub ok: bool,
}

/// Readiness body.
#[derive(Debug, Serialize)]
pub struct Readiness {
    /// Whether the service can accept credentials.
    pub ready: bool,
    /// Whether the event store answered.
    pub store: bool,
}

/// Liveness probe. Checks nothing.
///
/// ```text
/// GET /health → 200 {"ok":true}
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> Json<Liveness> {
    Json(Liveness { ok: true })
}

/// Readiness probe: the event store must answer `count()` in time.
///
/// ```text
/// GET /ready → 200 {"ready":true,"store":true}
///            → 503 {"ready":false,"store":false}
/// ```
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let report = readiness(&state.gateway).await;
    let store = report.component(STORE_COMPONENT) == Some(HealthStatus::Healthy);

    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(Readiness {
            ready: report.is_healthy(),
            store,
        }),
    )
}
