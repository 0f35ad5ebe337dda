//! Event bus abstraction for live fan-out of recognition events.
//!
//! Events flow from the event store (source of truth) through the event bus to
//! live consumers: the dashboard, the gate controller, and the occupancy projector.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  AccessGateway  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  1. Append to   │
//! │   event store   │◄─── Source of truth
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ 2. Publish to   │
//! │    event bus    │◄─── At-most-once, best effort
//! └────────┬────────┘
//!          │
//!     ┌────┴─────┐
//!     │          │
//!     ▼          ▼
//! ┌───────┐ ┌───────────┐
//! │ Gate  │ │ Occupancy │
//! └───────┘ └───────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Store first**: events are persisted before they are published
//! - **At-most-once**: each live subscriber receives an event at most once
//! - **No replay**: subscribers only see events published after they subscribed;
//!   history comes from [`EventStore::recent`](crate::event_store::EventStore::recent)
//! - **Isolated subscribers**: a slow subscriber loses messages from its own buffer
//!   and is told so via [`BusError::Lagged`]; it never blocks the publisher
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (in `gatekeeper-testing`) - For testing (tokio broadcast)
//! - `RedisEventBus` (in `gatekeeper-redis`) - For production (Redis pub/sub)

use crate::event::RecognitionEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum BusError {
    /// Failed to connect to the transport
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe
    #[error("Subscription failed for channel '{channel}': {reason}")]
    SubscriptionFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// The publish did not complete in time
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// The subscriber fell behind and messages were dropped from its buffer
    #[error("Subscriber lagged, {skipped} events dropped")]
    Lagged {
        /// Number of events that were dropped
        skipped: u64,
    },

    /// A message on the channel could not be decoded
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
}

/// Stream of events from a subscription.
///
/// Unbounded and not restartable: it ends when the subscriber drops it or the bus
/// is torn down. Errors are reported in-band and do not end the stream.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RecognitionEvent, BusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; publishers and subscribers run
/// concurrently from independent request tasks.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Broadcast an event to every currently connected subscriber.
    ///
    /// Subscribers that connect later never receive it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the transport rejects the message.
    fn publish(
        &self,
        event: &RecognitionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Open a subscription.
    ///
    /// The returned stream is live once this future resolves: any event published
    /// after that point is delivered.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(&self) -> Pin<Box<dyn Future<Output = Result<EventStream, BusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagged_error_display() {
        let error = BusError::Lagged { skipped: 3 };
        assert_eq!(error.to_string(), "Subscriber lagged, 3 events dropped");
    }

    #[test]
    fn publish_failed_names_channel() {
        let error = BusError::PublishFailed {
            channel: "events".to_string(),
            reason: "broken pipe".to_string(),
        };
        assert!(error.to_string().contains("'events'"));
    }
}
