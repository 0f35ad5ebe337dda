//! # Gatekeeper Core
//!
//! Domain types and core abstractions for the Gatekeeper access-event pipeline.
//!
//! A gate produces *recognition events* whenever a credential (QR token, fingerprint,
//! face match) is checked. This crate defines:
//!
//! - **Events**: [`RecognitionEvent`](event::RecognitionEvent) and its draft form
//! - **Event store**: the append-only durable log ([`event_store::EventStore`])
//! - **Event bus**: live fan-out to subscribers ([`event_bus::EventBus`])
//! - **Token verification**: signed QR access tokens ([`token::TokenVerifier`])
//! - **Occupancy**: the naive "who is inside" projection ([`occupancy`])
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! ## Pipeline
//!
//! ```text
//! credential ──► TokenVerifier ──► EventStore.append ──► EventBus.publish
//!                                        │                     │
//!                                        ▼                     ▼
//!                                 recent(limit)           subscribe()
//!                                        └──────► occupancy ◄──┘
//! ```
//!
//! The store is the source of truth: an event is always committed before it is
//! published, so a subscriber never sees an event that is missing from the log.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

pub mod event;
pub mod event_bus;
pub mod event_store;
pub mod occupancy;
pub mod token;

/// Environment module - Dependency injection traits
///
/// All external dependencies of the pipeline that are not I/O adapters are
/// abstracted here so tests can substitute deterministic implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Token expiry checks read the current time through this trait.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatekeeper_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use event::{EventId, RecognitionEvent, RecognitionEventDraft};
pub use event_bus::{BusError, EventBus, EventStream};
pub use event_store::{EventStore, StoreError};
pub use occupancy::{OccupancyProjection, OccupancySnapshot, current_occupancy};
pub use token::{AccessClaims, TokenSigner, TokenVerifier, VerificationError};
