//! HTTP and WebSocket surface of the Gatekeeper pipeline.
//!
//! Handlers are thin: they parse the request, call the
//! [`AccessGateway`](gatekeeper_runtime::AccessGateway) or read the store and the
//! occupancy projection, and map errors through [`AppError`].
//!
//! # Request Flow
//!
//! 1. **Correlation** id attached and `http_request` span opened ([`middleware`])
//! 2. **Extract** body, query and device key ([`extractors`])
//! 3. **Call** the gateway, the store, or the projection
//! 4. **Map** the result to JSON, or the error to [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use gatekeeper_web::{AppState, router};
//!
//! let state = AppState::new(gateway, scanners, store, bus, projector.snapshots());
//! let app = router(state);
//! axum::serve(listener, app).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, DEVICE_KEY_HEADER, DeviceKey};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
