//! The access gateway: credential in, logged and broadcast event out.
//!
//! Every accepted credential goes through the same two steps:
//!
//! 1. **Append** the event to the store. This is the commit point; if it fails the
//!    caller gets [`GatewayError::StoreUnavailable`] and nothing is published.
//! 2. **Publish** the committed event on the bus. Failures here are logged and
//!    counted but never undo step 1.
//!
//! Rejected credentials short-circuit before step 1: no event, no publish.

use crate::metrics::{EventBusMetrics, EventStoreMetrics, GatewayMetrics};
use crate::scanner::TrustedScanner;
use gatekeeper_core::environment::{Clock, SystemClock};
use gatekeeper_core::event::{FINGERPRINT_SOURCE, QR_SOURCE, RecognitionEvent, RecognitionEventDraft};
use gatekeeper_core::event_bus::{BusError, EventBus};
use gatekeeper_core::event_store::{EventStore, StoreError};
use gatekeeper_core::token::{TokenVerifier, VerificationError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default bound on a store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a bus publish.
pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors returned by [`AccessGateway`].
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// The credential failed verification. The source is for logs only.
    #[error("Invalid credential")]
    InvalidCredential(#[source] VerificationError),

    /// The request is well-formed but unusable (for example an empty `user_id`).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The event could not be committed. Retrying is safe; each retry is a new append.
    #[error("Event store unavailable")]
    StoreUnavailable(#[source] StoreError),
}

/// Result of an accepted QR token.
#[derive(Debug, Clone, PartialEq)]
pub struct QrAccepted {
    /// Subject named by the token.
    pub user_id: String,
    /// The committed event.
    pub event: RecognitionEvent,
}

/// Result of a logged fingerprint verification.
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintAccepted {
    /// The committed event.
    pub event: RecognitionEvent,
}

/// Timeouts applied to adapter calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Bound on each store call.
    pub store_timeout: Duration,
    /// Bound on each bus publish.
    pub bus_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            bus_timeout: DEFAULT_BUS_TIMEOUT,
        }
    }
}

/// Orchestrates verification, logging and fan-out of credential checks.
///
/// Cheap to share: hold it in an `Arc` and call it from any number of request
/// tasks at once. It keeps no mutable state of its own.
///
/// # Example
///
/// ```
/// use gatekeeper_runtime::gateway::AccessGateway;
/// use gatekeeper_core::token::TokenVerifier;
/// use gatekeeper_testing::{tokens, InMemoryEventBus, InMemoryEventStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gateway = AccessGateway::new(
///     TokenVerifier::new(tokens::test_secret()),
///     Arc::new(InMemoryEventStore::new()),
///     Arc::new(InMemoryEventBus::new()),
/// );
///
/// let token = tokens::valid_token("u1", chrono::Utc::now());
/// let accepted = gateway.validate_qr(&token).await?;
/// assert_eq!(accepted.user_id, "u1");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AccessGateway {
    verifier: TokenVerifier,
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: GatewayConfig,
}

impl std::fmt::Debug for AccessGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGateway")
            .field("verifier", &self.verifier)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AccessGateway {
    /// Create a gateway with the system clock and default timeouts.
    #[must_use]
    pub fn new(verifier: TokenVerifier, store: Arc<dyn EventStore>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            verifier,
            store,
            bus,
            clock: Arc::new(SystemClock),
            config: GatewayConfig::default(),
        }
    }

    /// Use `clock` for token expiry checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the adapter timeouts.
    #[must_use]
    pub const fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Active timeouts.
    #[must_use]
    pub const fn config(&self) -> GatewayConfig {
        self.config
    }

    /// Verify a QR token and log the entry.
    ///
    /// The event's source is the token's `camera_id`, or `"qr"` when absent.
    ///
    /// # Errors
    ///
    /// - `InvalidCredential`: the token failed verification; nothing was logged
    /// - `StoreUnavailable`: the event could not be committed
    pub async fn validate_qr(&self, token: &str) -> Result<QrAccepted, GatewayError> {
        let claims = match self.verifier.verify(token, self.clock.now()) {
            Ok(claims) => claims,
            Err(error) => {
                GatewayMetrics::record_qr_rejected();
                tracing::info!(reason = %error, "QR token rejected");
                return Err(GatewayError::InvalidCredential(error));
            }
        };

        let source_id = claims.camera_id.unwrap_or_else(|| QR_SOURCE.to_string());
        let draft = RecognitionEventDraft::accepted(claims.user_id.clone(), claims.name, source_id);
        let event = self.commit_and_publish(draft).await?;

        GatewayMetrics::record_qr_accepted();
        tracing::info!(
            event_id = %event.id,
            user_id = %claims.user_id,
            camera_id = %event.source_id,
            "QR token accepted"
        );

        Ok(QrAccepted {
            user_id: claims.user_id,
            event,
        })
    }

    /// Log a fingerprint match reported by a trusted scanner.
    ///
    /// The match itself is not verified; the [`TrustedScanner`] is the only
    /// precondition. The event's source is `scanner_id`, or `"fp"` when absent.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: `user_id` is blank or has surrounding whitespace
    /// - `StoreUnavailable`: the event could not be committed
    pub async fn verify_fingerprint(
        &self,
        _scanner: &TrustedScanner,
        user_id: &str,
        scanner_id: Option<&str>,
    ) -> Result<FingerprintAccepted, GatewayError> {
        if user_id.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("user_id is required".to_string()));
        }
        if user_id.trim() != user_id {
            return Err(GatewayError::InvalidRequest(
                "user_id must not have surrounding whitespace".to_string(),
            ));
        }

        let source_id = scanner_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(FINGERPRINT_SOURCE);
        let draft = RecognitionEventDraft::accepted(user_id, None, source_id);
        let event = self.commit_and_publish(draft).await?;

        GatewayMetrics::record_fingerprint_accepted();
        tracing::info!(
            event_id = %event.id,
            user_id,
            scanner_id = %event.source_id,
            "Fingerprint verification logged"
        );

        Ok(FingerprintAccepted { event })
    }

    /// Check that the store answers within the store timeout.
    ///
    /// # Errors
    ///
    /// Returns the store error, or `StoreError::Timeout`.
    pub async fn store_ready(&self) -> Result<u64, StoreError> {
        let timeout = self.config.store_timeout;
        tokio::time::timeout(timeout, self.store.count())
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }

    async fn commit_and_publish(&self, draft: RecognitionEventDraft) -> Result<RecognitionEvent, GatewayError> {
        let timeout = self.config.store_timeout;
        let started = Instant::now();

        let appended = tokio::time::timeout(timeout, self.store.append(draft))
            .await
            .unwrap_or(Err(StoreError::Timeout(timeout)));
        EventStoreMetrics::record_append(started.elapsed());

        let event = match appended {
            Ok(event) => event,
            Err(error) => {
                GatewayMetrics::record_store_failure();
                tracing::error!(error = %error, "Failed to append recognition event");
                return Err(GatewayError::StoreUnavailable(error));
            }
        };

        self.publish(&event).await;
        Ok(event)
    }

    async fn publish(&self, event: &RecognitionEvent) {
        let timeout = self.config.bus_timeout;
        let started = Instant::now();

        let published = tokio::time::timeout(timeout, self.bus.publish(event))
            .await
            .unwrap_or(Err(BusError::Timeout(timeout)));
        EventBusMetrics::record_publish(started.elapsed());

        match published {
            Ok(()) => {
                tracing::debug!(event_id = %event.id, "Recognition event published");
            }
            Err(error) => {
                GatewayMetrics::record_publish_failure();
                tracing::warn!(
                    event_id = %event.id,
                    error = %error,
                    "Recognition event committed but not published"
                );
            }
        }
    }
}
