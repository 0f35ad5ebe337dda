//! Recent-log query.

use crate::state::AppState;
use crate::{AppError, WebResult};
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use gatekeeper_core::event::RecognitionEvent;
use gatekeeper_core::event_store::StoreError;
use serde::Deserialize;

/// Limit used when the query has none.
pub const DEFAULT_LIMIT: usize = 50;

/// Largest accepted limit.
pub const MAX_LIMIT: usize = 500;

/// Query string of `GET /recent`.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    /// Requested number of events; clamped to `1..=500`.
    pub limit: Option<i64>,
}

impl RecentQuery {
    /// The limit actually applied.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.map_or(DEFAULT_LIMIT, |limit| {
            usize::try_from(limit.max(1)).unwrap_or(MAX_LIMIT).min(MAX_LIMIT)
        })
    }
}

/// `GET /recent?limit=N`: newest first.
///
/// # Errors
///
/// - 400 for a non-numeric limit
/// - 503 when the store fails or times out
pub async fn recent(
    State(state): State<AppState>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> WebResult<Json<Vec<RecognitionEvent>>> {
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let limit = query.effective_limit();

    let timeout = state.gateway.config().store_timeout;
    let events = tokio::time::timeout(timeout, state.store.recent(limit))
        .await
        .map_err(|_| StoreError::Timeout(timeout))??;

    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(value: Option<i64>) -> usize {
        RecentQuery { limit: value }.effective_limit()
    }

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(limit(None), 50);
        assert_eq!(limit(Some(10)), 10);
        assert_eq!(limit(Some(0)), 1);
        assert_eq!(limit(Some(-3)), 1);
        assert_eq!(limit(Some(10_000)), 500);
    }
}
