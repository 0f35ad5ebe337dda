//! In-memory event bus backed by a tokio broadcast channel.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use gatekeeper_core::event::RecognitionEvent;
use gatekeeper_core::event_bus::{BusError, EventBus, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Default per-subscriber buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

/// [`EventBus`] for tests.
///
/// Same delivery contract as the Redis bus: live subscribers only, no replay, and
/// a subscriber that falls more than `capacity` events behind gets
/// [`BusError::Lagged`] instead of blocking the publisher.
///
/// Every successful publish is also recorded so tests can assert on it with
/// [`published`](Self::published).
///
/// # Example
///
/// ```
/// use gatekeeper_testing::{InMemoryEventBus, InMemoryEventStore};
/// use gatekeeper_core::event::RecognitionEventDraft;
/// use gatekeeper_core::event_bus::EventBus;
/// use gatekeeper_core::event_store::EventStore;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe().await?;
///
/// let store = InMemoryEventStore::new();
/// let event = store.append(RecognitionEventDraft::accepted("u1", None, "qr")).await?;
/// bus.publish(&event).await?;
///
/// assert_eq!(stream.next().await.unwrap()?, event);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<RecognitionEvent>,
    published: Arc<Mutex<Vec<RecognitionEvent>>>,
    fail_publishes: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Create a bus with the default per-subscriber capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus where each subscriber buffers at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(Mutex::new(Vec::new())),
            fail_publishes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Events published so far, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<RecognitionEvent> {
        self.published.lock().unwrap().clone()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        event: &RecognitionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(BusError::PublishFailed {
                    channel: "in-memory".to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }

            self.published.lock().unwrap().push(event.clone());
            // No receivers is not an error: the event simply reaches nobody.
            let _ = self.sender.send(event);
            Ok(())
        })
    }

    fn subscribe(&self) -> Pin<Box<dyn Future<Output = Result<EventStream, BusError>> + Send + '_>> {
        Box::pin(async move {
            let mut receiver = self.sender.subscribe();

            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield Ok(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "In-memory subscriber lagged");
                            yield Err(BusError::Lagged { skipped });
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}
