//! Error types for web handlers.
//!
//! [`AppError`] maps library errors to HTTP responses. Most errors use the
//! `{code, message}` body. The two credential rejections keep the bare
//! `{error}` body that gate hardware already parses, and never say why.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gatekeeper_core::event_bus::BusError;
use gatekeeper_core::event_store::StoreError;
use gatekeeper_runtime::{GatewayError, ScannerAuthError};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(State(state): State<AppState>) -> Result<Json<Data>, AppError> {
///     let events = state.store.recent(10).await?;
///     Ok(Json(events))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Replaces the body with `{"error": tag}` when set
    tag: Option<&'static str>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            tag: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// 401 for a credential that failed verification: `{"error":"invalid"}`.
    #[must_use]
    pub fn invalid_credential() -> Self {
        Self {
            tag: Some("invalid"),
            ..Self::new(
                StatusCode::UNAUTHORIZED,
                "Invalid credential".to_string(),
                "UNAUTHORIZED".to_string(),
            )
        }
    }

    /// 401 for a scanner the channel refused: `{"error":"unauthorized"}`.
    #[must_use]
    pub fn unauthorized_device() -> Self {
        Self {
            tag: Some("unauthorized"),
            ..Self::new(
                StatusCode::UNAUTHORIZED,
                "Unauthorized device".to_string(),
                "UNAUTHORIZED".to_string(),
            )
        }
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message.into(), "NOT_FOUND".to_string())
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

#[derive(Debug, Serialize)]
struct TaggedResponse {
    error: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        if let Some(error) = self.tag {
            return (self.status, Json(TaggedResponse { error })).into_response();
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidCredential(_) => Self::invalid_credential(),
            GatewayError::InvalidRequest(message) => Self::bad_request(message),
            GatewayError::StoreUnavailable(source) => source.into(),
        }
    }
}

impl From<ScannerAuthError> for AppError {
    fn from(err: ScannerAuthError) -> Self {
        tracing::info!(reason = %err, "Scanner request refused");
        Self::unauthorized_device()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::unavailable("Event store unavailable").with_source(err.into())
    }
}

impl From<BusError> for AppError {
    fn from(err: BusError) -> Self {
        Self::unavailable("Event bus unavailable").with_source(err.into())
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "An internal error occurred".to_string(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
        .with_source(err)
    }
}
