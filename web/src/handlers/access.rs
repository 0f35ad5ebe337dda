//! Credential endpoints.
//!
//! ```text
//! POST /qr/validate          {token}                → {ok, user_id}
//! POST /fingerprint/verify   {user_id, scanner_id?} → {ok}
//! ```

use crate::error::AppError;
use crate::extractors::{CorrelationId, DeviceKey};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};

/// Body of `POST /qr/validate`.
#[derive(Debug, Deserialize)]
pub struct QrValidateRequest {
    /// Signed access token. A missing token is treated as invalid.
    #[serde(default)]
    pub token: String,
}

/// Response of an accepted QR token.
#[derive(Debug, Serialize)]
pub struct QrValidateResponse {
    /// Always `true`.
    pub ok: bool,
    /// Subject named by the token.
    pub user_id: String,
}

/// Body of `POST /fingerprint/verify`.
#[derive(Debug, Deserialize)]
pub struct FingerprintVerifyRequest {
    /// Subject the scanner matched.
    #[serde(default)]
    pub user_id: String,
    /// Reporting scanner; the event's source defaults to `"fp"`.
    pub scanner_id: Option<String>,
}

/// Response of a logged fingerprint verification.
#[derive(Debug, Serialize)]
pub struct FingerprintVerifyResponse {
    /// Always `true`.
    pub ok: bool,
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// Validate a QR access token and log the entry.
///
/// # Errors
///
/// - 401 `{"error":"invalid"}` when the token fails verification
/// - 503 when the event could not be committed
pub async fn validate_qr(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    body: Result<Json<QrValidateRequest>, JsonRejection>,
) -> Result<Json<QrValidateResponse>, AppError> {
    let request = json_body(body)?;
    let accepted = state.gateway.validate_qr(&request.token).await?;

    tracing::debug!(correlation_id = %correlation_id.0, event_id = %accepted.event.id, "QR entry logged");

    Ok(Json(QrValidateResponse {
        ok: true,
        user_id: accepted.user_id,
    }))
}

/// Log a fingerprint match from a trusted scanner.
///
/// # Errors
///
/// - 401 `{"error":"unauthorized"}` when the scanner channel refuses the caller
/// - 400 when `user_id` is blank or has surrounding whitespace
/// - 503 when the event could not be committed
pub async fn verify_fingerprint(
    State(state): State<AppState>,
    device_key: DeviceKey,
    body: Result<Json<FingerprintVerifyRequest>, JsonRejection>,
) -> Result<Json<FingerprintVerifyResponse>, AppError> {
    let scanner = state.scanners.authorize(device_key.as_deref())?;
    let request = json_body(body)?;

    state
        .gateway
        .verify_fingerprint(&scanner, &request.user_id, request.scanner_id.as_deref())
        .await?;

    Ok(Json(FingerprintVerifyResponse { ok: true }))
}
