//! Request tracking middleware.
//!
//! Every request gets a correlation id and runs inside an `http_request` span:
//!
//! 1. **Extract** the id from `X-Correlation-ID` if it is a valid UUID, otherwise generate one
//! 2. **Store** it in request extensions (see [`CorrelationId`](crate::extractors::CorrelationId))
//! 3. **Run** the handler inside the span
//! 4. **Echo** the id in the response `X-Correlation-ID` header and log the outcome

use crate::extractors::CorrelationId;
use axum::{extract::Request, http::HeaderValue, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create the correlation layer.
///
/// ```ignore
/// let app = Router::new()
///     .route("/recent", get(recent))
///     .layer(correlation_id_layer());
/// ```
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Copy, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

/// Read a caller-supplied correlation id, if it is a UUID.
pub(crate) fn parse_correlation_id(value: Option<&HeaderValue>) -> Option<Uuid> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id =
            parse_correlation_id(req.headers().get(CORRELATION_ID_HEADER)).unwrap_or_else(Uuid::new_v4);
        req.extensions_mut().insert(CorrelationId(correlation_id));

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let started = Instant::now();
        let fut = self.inner.call(req).instrument(span.clone());

        Box::pin(async move {
            let mut response = fut.await?;

            let _guard = span.enter();
            tracing::debug!(
                status = response.status().as_u16(),
                latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Request completed"
            );

            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, header_value);
            }

            Ok(response)
        })
    }
}
