//! Prometheus exposition.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// `GET /metrics`.
///
/// # Errors
///
/// 404 when metrics are disabled.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let body = state
        .metrics
        .render()
        .ok_or_else(|| AppError::not_found("Metrics are disabled"))?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body))
}
