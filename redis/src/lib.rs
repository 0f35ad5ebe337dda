//! Redis pub/sub event bus for Gatekeeper.
//!
//! This crate provides the production [`EventBus`]. Recognition events are
//! published as JSON on a single Redis channel (`events` by default) so that
//! non-Rust consumers such as the face-recognition service and the gate
//! controller can share it.
//!
//! # Delivery Semantics
//!
//! **At-most-once, live only**:
//! - Redis pub/sub has no history; a subscriber sees only messages published
//!   after its `SUBSCRIBE` was acknowledged
//! - Each subscription owns a dedicated connection and a bounded buffer
//! - When the buffer is full, messages are dropped for that subscriber only
//!   and a [`BusError::Lagged`] marker is queued in their place
//! - Messages that are not stored recognition records (for example the face
//!   service's `"unrecognized"` notices) are skipped
//!
//! # Example
//!
//! ```no_run
//! use gatekeeper_redis::RedisEventBus;
//! use gatekeeper_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedisEventBus::builder()
//!     .url("redis://localhost:6379")
//!     .channel("events")
//!     .buffer_size(1024)
//!     .build()
//!     .await?;
//!
//! let mut stream = bus.subscribe().await?;
//! while let Some(event) = stream.next().await {
//!     println!("{:?}", event?);
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use gatekeeper_core::event::{RecognitionEvent, decode_bus_message, encode_bus_message};
use gatekeeper_core::event_bus::{BusError, EventBus, EventStream};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default pub/sub channel.
pub const DEFAULT_CHANNEL: &str = "events";

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default timeout for publishing and for setting up a subscription.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

type BusItem = Result<RecognitionEvent, BusError>;

/// Redis-backed [`EventBus`].
///
/// Publishing goes through a shared, auto-reconnecting [`ConnectionManager`].
/// Every [`subscribe`](EventBus::subscribe) call opens its own pub/sub connection.
#[derive(Clone)]
pub struct RedisEventBus {
    client: redis::Client,
    publisher: ConnectionManager,
    channel: String,
    buffer_size: usize,
    timeout: Duration,
}

impl fmt::Debug for RedisEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisEventBus")
            .field("channel", &self.channel)
            .field("buffer_size", &self.buffer_size)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisEventBus {
    /// Connect with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the URL is invalid or the server
    /// is unreachable.
    pub async fn new(url: &str) -> Result<Self, BusError> {
        Self::builder().url(url).build().await
    }

    /// Create a builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedisEventBusBuilder {
        RedisEventBusBuilder::default()
    }

    /// Channel this bus publishes to and subscribes on.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Per-subscriber buffer size.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

/// Builder for [`RedisEventBus`].
#[derive(Debug, Default)]
pub struct RedisEventBusBuilder {
    url: Option<String>,
    channel: Option<String>,
    buffer_size: Option<usize>,
    timeout: Option<Duration>,
}

impl RedisEventBusBuilder {
    /// Set the Redis URL (e.g., "<redis://localhost:6379>").
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the pub/sub channel (default: "events").
    #[must_use]
    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Set the per-subscriber buffer (default: 1024, minimum 1).
    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Set the publish and subscribe timeout (default: 2s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Connect and build the event bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if no URL was set, the URL is
    /// invalid, or the server is unreachable.
    pub async fn build(self) -> Result<RedisEventBus, BusError> {
        let url = self
            .url
            .ok_or_else(|| BusError::ConnectionFailed("Redis URL not configured".to_string()))?;
        let channel = self.channel.unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE).max(1);
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);

        let client = redis::Client::open(url.as_str())
            .map_err(|e| BusError::ConnectionFailed(format!("Invalid Redis URL: {e}")))?;

        let publisher = tokio::time::timeout(timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BusError::ConnectionFailed(format!("Connect timed out after {timeout:?}")))?
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to connect to Redis: {e}")))?;

        tracing::info!(
            channel = %channel,
            buffer_size,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Redis event bus created"
        );

        Ok(RedisEventBus {
            client,
            publisher,
            channel,
            buffer_size,
            timeout,
        })
    }
}

/// Turn a raw pub/sub payload into a stream item.
///
/// `None` means the message belongs to some other producer and is skipped.
fn classify(payload: redis::RedisResult<String>) -> Option<BusItem> {
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => return Some(Err(BusError::DecodeFailed(format!("Non-text payload: {e}")))),
    };

    match decode_bus_message(&payload) {
        Ok(Some(event)) => Some(Ok(event)),
        Ok(None) => {
            tracing::trace!("Skipping foreign message on event channel");
            None
        }
        Err(e) => Some(Err(BusError::DecodeFailed(e.to_string()))),
    }
}

/// Pushes items into a subscriber's buffer without ever waiting on it.
struct Forwarder {
    tx: mpsc::Sender<BusItem>,
    skipped: u64,
}

impl Forwarder {
    const fn new(tx: mpsc::Sender<BusItem>) -> Self {
        Self { tx, skipped: 0 }
    }

    /// Offer one item. Returns `false` once the subscriber is gone.
    fn offer(&mut self, item: BusItem) -> bool {
        if self.skipped > 0 {
            match self.tx.try_send(Err(BusError::Lagged {
                skipped: self.skipped,
            })) {
                Ok(()) => self.skipped = 0,
                Err(TrySendError::Full(_)) => {
                    self.skipped += 1;
                    return true;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.skipped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl EventBus for RedisEventBus {
    fn publish(
        &self,
        event: &RecognitionEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let payload = encode_bus_message(event);
        let event_id = event.id;

        Box::pin(async move {
            let payload = payload.map_err(|e| BusError::PublishFailed {
                channel: self.channel.clone(),
                reason: format!("Failed to encode event: {e}"),
            })?;

            let mut conn = self.publisher.clone();
            let receivers: i64 = tokio::time::timeout(self.timeout, conn.publish::<_, _, i64>(&self.channel, payload))
                .await
                .map_err(|_| BusError::Timeout(self.timeout))?
                .map_err(|e| {
                    tracing::error!(channel = %self.channel, error = %e, "Failed to publish event");
                    BusError::PublishFailed {
                        channel: self.channel.clone(),
                        reason: e.to_string(),
                    }
                })?;

            tracing::debug!(%event_id, channel = %self.channel, receivers, "Event published");
            Ok(())
        })
    }

    fn subscribe(&self) -> Pin<Box<dyn Future<Output = Result<EventStream, BusError>> + Send + '_>> {
        Box::pin(async move {
            let subscription_failed = |reason: String| BusError::SubscriptionFailed {
                channel: self.channel.clone(),
                reason,
            };

            let setup = async {
                let mut pubsub = self.client.get_async_pubsub().await?;
                pubsub.subscribe(&self.channel).await?;
                Ok::<_, redis::RedisError>(pubsub)
            };
            let pubsub = tokio::time::timeout(self.timeout, setup)
                .await
                .map_err(|_| subscription_failed(format!("Timed out after {:?}", self.timeout)))?
                .map_err(|e| subscription_failed(e.to_string()))?;

            let (tx, rx) = mpsc::channel(self.buffer_size);
            let watchdog = tx.clone();
            let channel = self.channel.clone();

            tracing::info!(channel = %channel, buffer_size = self.buffer_size, "Subscribed to event channel");

            tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                let mut forwarder = Forwarder::new(tx);

                loop {
                    tokio::select! {
                        () = watchdog.closed() => {
                            tracing::debug!(channel = %channel, "Subscriber dropped, closing Redis subscription");
                            break;
                        }
                        message = messages.next() => {
                            let Some(message) = message else {
                                tracing::warn!(channel = %channel, "Redis subscription ended");
                                break;
                            };
                            let Some(item) = classify(message.get_payload::<String>()) else {
                                continue;
                            };
                            if let Err(error) = &item {
                                tracing::warn!(channel = %channel, error = %error, "Undecodable message on event channel");
                            }
                            if !forwarder.offer(item) {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!(channel = %channel, "Subscription task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/panic
mod tests {
    use super::*;
    use gatekeeper_core::event::{EventId, RecognitionEventDraft};
    use gatekeeper_core::{DateTime, Utc};

    fn event(id: i64) -> RecognitionEvent {
        RecognitionEventDraft::accepted(format!("u{id}"), None, "qr")
            .into_event(EventId::new(id), DateTime::<Utc>::UNIX_EPOCH)
    }

    fn id_of(item: BusItem) -> i64 {
        match item {
            Ok(event) => event.id.value(),
            Err(e) => panic!("expected event, got {e}"),
        }
    }

    #[test]
    fn redis_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedisEventBus>();
        assert_sync::<RedisEventBus>();
    }

    #[test]
    fn builder_default_works() {
        let builder = RedisEventBus::builder();
        assert!(builder.url.is_none());
        assert!(builder.channel.is_none());
    }

    #[tokio::test]
    async fn build_without_url_fails() {
        let result = RedisEventBus::builder().channel("events").build().await;
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn build_with_invalid_url_fails() {
        let result = RedisEventBus::builder().url("not-a-url").build().await;
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }

    #[test]
    fn classify_decodes_stored_records() {
        let payload = encode_bus_message(&event(3)).unwrap();
        assert_eq!(id_of(classify(Ok(payload)).unwrap()), 3);
    }

    #[test]
    fn classify_skips_foreign_messages() {
        let unrecognized = r#"{"event":"unrecognized","camera_id":"cam-1"}"#.to_string();
        assert!(classify(Ok(unrecognized)).is_none());
    }

    #[test]
    fn classify_reports_garbage() {
        let item = classify(Ok("{".to_string())).unwrap();
        assert!(matches!(item, Err(BusError::DecodeFailed(_))));
    }

    #[test]
    fn forwarder_marks_the_gap_when_buffer_overflows() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut forwarder = Forwarder::new(tx);

        assert!(forwarder.offer(Ok(event(1))));
        assert!(forwarder.offer(Ok(event(2))));
        assert!(forwarder.offer(Ok(event(3))));
        assert!(forwarder.offer(Ok(event(4))));

        assert_eq!(id_of(rx.try_recv().unwrap()), 1);
        assert_eq!(id_of(rx.try_recv().unwrap()), 2);
        assert!(rx.try_recv().is_err());

        assert!(forwarder.offer(Ok(event(5))));
        assert!(matches!(rx.try_recv().unwrap(), Err(BusError::Lagged { skipped: 2 })));
        assert_eq!(id_of(rx.try_recv().unwrap()), 5);
    }

    #[test]
    fn forwarder_stops_when_subscriber_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let mut forwarder = Forwarder::new(tx);
        drop(rx);

        assert!(!forwarder.offer(Ok(event(1))));
    }
}
