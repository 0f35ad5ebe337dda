//! Event store trait for the durable recognition log.
//!
//! The event store is the single owner of the recognition sequence. It is
//! append-only: events are never updated or deleted through this interface.
//!
//! # Ordering
//!
//! - `id` is assigned by the store and strictly increases with insertion order,
//!   also under concurrent appends.
//! - `timestamp` comes from the store's clock at insert and never decreases
//!   within one store instance.
//! - [`EventStore::recent`] returns events **newest first** (descending `id`).
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `gatekeeper-postgres` crate): Production implementation
//! - `InMemoryEventStore` (in `gatekeeper-testing` crate): Fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use gatekeeper_core::event::RecognitionEventDraft;
//! use gatekeeper_core::event_store::{EventStore, StoreError};
//!
//! async fn example<S: EventStore>(store: &S) -> Result<(), StoreError> {
//!     let draft = RecognitionEventDraft::accepted("u1", None, "qr");
//!
//!     // Returns once the write is committed
//!     let event = store.append(draft).await?;
//!
//!     // Read-after-write: the newest event is the one just appended
//!     let latest = store.recent(1).await?;
//!     assert_eq!(latest[0].id, event.id);
//!
//!     Ok(())
//! }
//! ```

use crate::event::{RecognitionEvent, RecognitionEventDraft};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during event store operations.
///
/// Any error from [`EventStore::append`] means the caller must not assume the
/// event was recorded.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Database connection or query error (connection loss, constraint violation).
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// The store did not answer in time.
    #[error("Event store timed out after {0:?}")]
    Timeout(Duration),

    /// A stored row could not be turned into a [`RecognitionEvent`].
    #[error("Decode error: {0}")]
    DecodeError(String),
}

/// Append-only durable log of recognition events.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every request
/// handler and by the occupancy projector.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventStore>`.
pub trait EventStore: Send + Sync {
    /// Persist a draft and return the full record.
    ///
    /// The store assigns `id` and `timestamp`. The future resolves only after the
    /// write is durable; the return value is the commit point.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the write failed (connection loss, constraint violation)
    /// - `Timeout`: the store did not acknowledge the write in time
    fn append(
        &self,
        draft: RecognitionEventDraft,
    ) -> Pin<Box<dyn Future<Output = Result<RecognitionEvent, StoreError>> + Send + '_>>;

    /// Load up to `limit` most recent events, newest first.
    ///
    /// This is a single snapshot read, not a stream. A `limit` of 0 returns an
    /// empty vector.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the query failed
    /// - `DecodeError`: a stored row is malformed
    fn recent(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecognitionEvent>, StoreError>> + Send + '_>>;

    /// Total number of stored events.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the query failed
    fn count(&self) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>>;
}
