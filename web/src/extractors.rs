//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation id
//! - [`DeviceKey`]: the scanner key presented in `X-Device-Key`

use crate::middleware::{CORRELATION_ID_HEADER, parse_correlation_id};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::fmt;
use uuid::Uuid;

/// Header carrying a fingerprint scanner's device key.
pub const DEVICE_KEY_HEADER: &str = "X-Device-Key";

/// Correlation ID for request tracing.
///
/// Set by [`correlation_id_layer`](crate::middleware::correlation_id_layer).
/// Without the layer it falls back to the `X-Correlation-ID` header, or a new
/// UUID v4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Self>() {
            return Ok(*id);
        }

        let id = parse_correlation_id(parts.headers.get(CORRELATION_ID_HEADER)).unwrap_or_else(Uuid::new_v4);
        Ok(Self(id))
    }
}

/// Device key presented by a fingerprint scanner, if any.
///
/// Extraction never fails; whether a key is required is up to the
/// [`ScannerChannel`](gatekeeper_runtime::ScannerChannel).
#[derive(Clone, Default)]
pub struct DeviceKey(pub Option<String>);

impl DeviceKey {
    /// The presented key.
    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.is_some() { "[REDACTED]" } else { "None" };
        f.debug_tuple("DeviceKey").field(&shown).finish()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for DeviceKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get(DEVICE_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let stored = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        parts.extensions.insert(CorrelationId(stored));
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, stored);
    }

    #[tokio::test]
    async fn test_device_key_from_header() {
        let req = Request::builder()
            .header(DEVICE_KEY_HEADER, "k-1")
            .body(())
            .expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let key = DeviceKey::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(key.as_deref(), Some("k-1"));
        assert!(!format!("{key:?}").contains("k-1"));
    }

    #[tokio::test]
    async fn test_device_key_missing() {
        let req = Request::builder().body(()).expect("Valid request");

        let (mut parts, _) = req.into_parts();
        let key = DeviceKey::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(key.as_deref(), None);
    }
}
