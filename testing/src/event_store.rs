//! In-memory event store for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use chrono::{DateTime, Utc};
use gatekeeper_core::environment::{Clock, SystemClock};
use gatekeeper_core::event::{EventId, RecognitionEvent, RecognitionEventDraft};
use gatekeeper_core::event_store::{EventStore, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Log {
    // Ascending by id.
    events: Vec<RecognitionEvent>,
    next_id: i64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// `Mutex<Vec<_>>`-backed [`EventStore`].
///
/// Ids start at 1 and are assigned under the lock, so concurrent appends get
/// unique, strictly increasing ids. Timestamps come from the injected clock and
/// are clamped so they never go backwards.
///
/// Failure injection:
/// - [`fail_appends`](Self::fail_appends) / [`fail_reads`](Self::fail_reads) make
///   calls return [`StoreError::DatabaseError`]
/// - [`stall`](Self::stall) delays every call, for timeout tests
///
/// # Example
///
/// ```
/// use gatekeeper_testing::InMemoryEventStore;
/// use gatekeeper_core::event::RecognitionEventDraft;
/// use gatekeeper_core::event_store::EventStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let event = store.append(RecognitionEventDraft::accepted("u1", None, "qr")).await?;
///
/// assert_eq!(store.recent(1).await?, vec![event]);
/// assert_eq!(store.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventStore {
    log: Arc<Mutex<Log>>,
    clock: Arc<dyn Clock>,
    fail_appends: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    stall: Arc<Mutex<Option<Duration>>>,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryEventStore {
    /// Create an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that timestamps events with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log {
                next_id: 1,
                ..Log::default()
            })),
            clock,
            fail_appends: Arc::new(AtomicBool::new(false)),
            fail_reads: Arc::new(AtomicBool::new(false)),
            stall: Arc::new(Mutex::new(None)),
        }
    }

    /// Make subsequent appends fail (or succeed again).
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `recent` and `count` calls fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `delay`; `None` removes the delay.
    pub fn stall(&self, delay: Option<Duration>) {
        *self.stall.lock().unwrap() = delay;
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().unwrap().events.len()
    }

    /// Whether the store holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<RecognitionEvent> {
        self.log.lock().unwrap().events.clone()
    }

    async fn maybe_stall(&self) {
        let delay = *self.stall.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn injected(flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::DatabaseError(format!(
                "injected {operation} failure"
            )));
        }
        Ok(())
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        draft: RecognitionEventDraft,
    ) -> Pin<Box<dyn Future<Output = Result<RecognitionEvent, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.maybe_stall().await;
            Self::injected(&self.fail_appends, "append")?;

            let mut log = self.log.lock().unwrap();
            let id = EventId::new(log.next_id);
            log.next_id += 1;

            let now = self.clock.now();
            let timestamp = log.last_timestamp.map_or(now, |last| last.max(now));
            log.last_timestamp = Some(timestamp);

            let event = draft.into_event(id, timestamp);
            log.events.push(event.clone());
            drop(log);

            Ok(event)
        })
    }

    fn recent(
        &self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecognitionEvent>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.maybe_stall().await;
            Self::injected(&self.fail_reads, "read")?;

            let log = self.log.lock().unwrap();
            Ok(log.events.iter().rev().take(limit).cloned().collect())
        })
    }

    fn count(&self) -> Pin<Box<dyn Future<Output = Result<u64, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.maybe_stall().await;
            Self::injected(&self.fail_reads, "read")?;

            Ok(self.log.lock().unwrap().events.len() as u64)
        })
    }
}
