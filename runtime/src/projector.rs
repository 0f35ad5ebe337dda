//! Live occupancy projection.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   subscribe()   ┌───────────────────┐  watch   ┌───────────┐
//! │  Event Bus  │────────────────►│ OccupancyProjector│─────────►│ /occupancy│
//! └─────────────┘                 └─────────▲─────────┘          │ /events/ws│
//! ┌─────────────┐  recent(window)           │                    └───────────┘
//! │ Event Store │───────────────────────────┘
//! └─────────────┘    seed, and re-seed after lag
//! ```
//!
//! The projector subscribes first and seeds second, so an event committed
//! between the two is seen at least once; the window deduplicates by id.
//! A subscriber that lags, or whose subscription ends, re-seeds from the store.

use crate::metrics::{EventBusMetrics, OccupancyMetrics};
use futures::StreamExt;
use gatekeeper_core::event_bus::{BusError, EventBus, EventStream};
use gatekeeper_core::event_store::{EventStore, StoreError};
use gatekeeper_core::occupancy::{DEFAULT_WINDOW, OccupancyProjection, OccupancySnapshot, current_occupancy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Settings for the live projector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// Number of most recent events the occupancy is computed over.
    pub window: usize,
    /// Bound on each store read.
    pub store_timeout: Duration,
    /// Pause before re-subscribing or re-seeding after a failure.
    pub retry_delay: Duration,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            store_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Compute occupancy from a single `recent(window)` read.
///
/// This is the polling path; it gives the same answer as the live projection
/// once the projection has caught up.
///
/// # Errors
///
/// Returns the store error if the read fails.
pub async fn poll_occupancy(store: &dyn EventStore, window: usize) -> Result<OccupancySnapshot, StoreError> {
    let events = store.recent(window).await?;
    Ok(OccupancySnapshot {
        inside: current_occupancy(&events),
        window_len: events.len(),
        last_event_id: events.iter().map(|event| event.id).max(),
    })
}

/// Keeps an [`OccupancyProjection`] current from the store and the bus.
pub struct OccupancyProjector {
    store: Arc<dyn EventStore>,
    bus: Arc<dyn EventBus>,
    config: ProjectorConfig,
    projection: OccupancyProjection,
    snapshots: watch::Sender<OccupancySnapshot>,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for OccupancyProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OccupancyProjector")
            .field("config", &self.config)
            .field("snapshot", &self.projection.snapshot())
            .finish_non_exhaustive()
    }
}

/// Running projector task.
#[derive(Debug)]
pub struct ProjectorHandle {
    snapshots: watch::Receiver<OccupancySnapshot>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProjectorHandle {
    /// A receiver for occupancy snapshots. Clone freely.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<OccupancySnapshot> {
        self.snapshots.clone()
    }

    /// Latest snapshot.
    #[must_use]
    pub fn current(&self) -> OccupancySnapshot {
        *self.snapshots.borrow()
    }

    /// Signal the task to stop and wait up to `timeout` for it.
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown.send(true).ok();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => tracing::info!("Occupancy projector stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Occupancy projector task failed"),
            Err(_) => tracing::warn!(?timeout, "Occupancy projector did not stop in time"),
        }
    }
}

enum Exit {
    Shutdown,
    Resubscribe,
}

impl OccupancyProjector {
    /// Create a projector.
    ///
    /// Returns the projector and a shutdown sender. Send `true` to stop it.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus>,
        config: ProjectorConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (snapshots, _) = watch::channel(OccupancySnapshot::default());

        let projector = Self {
            store,
            bus,
            projection: OccupancyProjection::new(config.window),
            config,
            snapshots,
            shutdown: shutdown_rx,
        };

        (projector, shutdown_tx)
    }

    /// A receiver for occupancy snapshots.
    #[must_use]
    pub fn snapshots(&self) -> watch::Receiver<OccupancySnapshot> {
        self.snapshots.subscribe()
    }

    /// Start the projector on the current tokio runtime.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn EventStore>,
        bus: Arc<dyn EventBus>,
        config: ProjectorConfig,
    ) -> ProjectorHandle {
        let (projector, shutdown) = Self::new(store, bus, config);
        let snapshots = projector.snapshots();
        let task = tokio::spawn(projector.run());

        ProjectorHandle {
            snapshots,
            shutdown,
            task,
        }
    }

    /// Run until a shutdown signal is received.
    ///
    /// Subscription and seed failures are logged and retried after
    /// `retry_delay` with a fresh subscription; they never end the loop.
    pub async fn run(mut self) {
        tracing::info!(window = self.config.window, "Starting occupancy projector");

        loop {
            if self.is_shutdown() {
                break;
            }

            let stream = match self.bus.subscribe().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Occupancy projector could not subscribe");
                    if self.pause().await {
                        break;
                    }
                    continue;
                }
            };

            if self.seed().await.is_err() {
                if self.pause().await {
                    break;
                }
                continue;
            }

            match self.consume(stream).await {
                Exit::Shutdown => break,
                Exit::Resubscribe => {
                    if self.pause().await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Occupancy projector shut down");
    }

    async fn consume(&mut self, mut stream: EventStream) -> Exit {
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let event_id = event.id;
                        if self.projection.apply(event) {
                            tracing::debug!(%event_id, "Occupancy projection updated");
                            self.publish();
                        }
                    }
                    Some(Err(BusError::Lagged { skipped })) => {
                        EventBusMetrics::record_lagged(skipped);
                        tracing::warn!(skipped, "Occupancy projector lagged, re-seeding from store");
                        if self.seed().await.is_err() {
                            return Exit::Resubscribe;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Skipping undeliverable bus message");
                    }
                    None => {
                        tracing::warn!("Occupancy subscription ended, re-subscribing");
                        return Exit::Resubscribe;
                    }
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        tracing::info!("Shutdown signal received");
                        return Exit::Shutdown;
                    }
                }
            }
        }
    }

    async fn seed(&mut self) -> Result<(), StoreError> {
        let timeout = self.config.store_timeout;
        let recent = tokio::time::timeout(timeout, self.store.recent(self.config.window))
            .await
            .unwrap_or(Err(StoreError::Timeout(timeout)));

        match recent {
            Ok(events) => {
                self.projection.seed(events);
                tracing::debug!(
                    window_len = self.projection.snapshot().window_len,
                    "Occupancy projection seeded"
                );
                self.publish();
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to seed occupancy projection");
                Err(e)
            }
        }
    }

    fn publish(&self) {
        let snapshot = self.projection.snapshot();
        OccupancyMetrics::record_inside(snapshot.inside);
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait `retry_delay`; returns `true` if shutdown was requested meanwhile.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.config.retry_delay) => self.is_shutdown(),
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use gatekeeper_core::event::{EventId, RecognitionEvent, RecognitionEventDraft};
    use gatekeeper_testing::{InMemoryEventBus, InMemoryEventStore};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    type Script = mpsc::UnboundedSender<Result<RecognitionEvent, BusError>>;

    /// Bus whose first subscription is fed by the test; later ones never yield.
    struct ScriptedBus {
        stream: Mutex<Option<mpsc::UnboundedReceiver<Result<RecognitionEvent, BusError>>>>,
    }

    impl ScriptedBus {
        fn new() -> (Self, Script) {
            let (tx, rx) = mpsc::unbounded();
            (
                Self {
                    stream: Mutex::new(Some(rx)),
                },
                tx,
            )
        }
    }

    impl EventBus for ScriptedBus {
        fn publish(
            &self,
            _event: &RecognitionEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(&self) -> Pin<Box<dyn Future<Output = Result<EventStream, BusError>> + Send + '_>> {
            Box::pin(async move {
                let stream: EventStream = match self.stream.lock().unwrap().take() {
                    Some(rx) => Box::pin(rx),
                    None => Box::pin(futures::stream::pending()),
                };
                Ok(stream)
            })
        }
    }

    fn config() -> ProjectorConfig {
        ProjectorConfig {
            window: 50,
            store_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(10),
        }
    }

    async fn append(store: &InMemoryEventStore, user: &str) -> RecognitionEvent {
        store
            .append(RecognitionEventDraft::accepted(user, None, "qr"))
            .await
            .unwrap()
    }

    async fn wait_until(
        rx: &mut watch::Receiver<OccupancySnapshot>,
        predicate: impl FnMut(&OccupancySnapshot) -> bool,
    ) -> OccupancySnapshot {
        *tokio::time::timeout(Duration::from_secs(2), rx.wait_for(predicate))
            .await
            .expect("projector did not reach the expected state")
            .unwrap()
    }

    #[tokio::test]
    async fn poll_matches_recent_window() {
        let store = InMemoryEventStore::new();
        append(&store, "a").await;
        append(&store, "a").await;
        let last = append(&store, "b").await;

        let snapshot = poll_occupancy(&store, 50).await.unwrap();

        assert_eq!(snapshot.inside, 2);
        assert_eq!(snapshot.window_len, 3);
        assert_eq!(snapshot.last_event_id, Some(last.id));
    }

    #[tokio::test]
    async fn seeds_from_store_then_follows_bus() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::new();
        append(&store, "a").await;

        let handle = OccupancyProjector::spawn(Arc::new(store.clone()), Arc::new(bus.clone()), config());
        let mut rx = handle.snapshots();
        wait_until(&mut rx, |s| s.inside == 1).await;

        assert_eq!(bus.subscriber_count(), 1);
        let event = append(&store, "b").await;
        bus.publish(&event).await.unwrap();

        let snapshot = wait_until(&mut rx, |s| s.inside == 2).await;
        assert_eq!(snapshot.last_event_id, Some(event.id));
        assert_eq!(snapshot, poll_occupancy(&store, 50).await.unwrap());

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn event_in_seed_and_bus_is_counted_once() {
        let store = InMemoryEventStore::new();
        let (bus, script) = ScriptedBus::new();
        let seeded = append(&store, "a").await;

        let handle = OccupancyProjector::spawn(Arc::new(store.clone()), Arc::new(bus), config());
        let mut rx = handle.snapshots();
        wait_until(&mut rx, |s| s.window_len == 1).await;

        script.unbounded_send(Ok(seeded)).unwrap();
        let newer = append(&store, "b").await;
        script.unbounded_send(Ok(newer.clone())).unwrap();

        let snapshot = wait_until(&mut rx, |s| s.last_event_id == Some(newer.id)).await;
        assert_eq!(snapshot.window_len, 2);
        assert_eq!(snapshot.inside, 2);

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn lag_triggers_reseed() {
        let store = InMemoryEventStore::new();
        let (bus, script) = ScriptedBus::new();

        let handle = OccupancyProjector::spawn(Arc::new(store.clone()), Arc::new(bus), config());
        let mut rx = handle.snapshots();

        // Committed but never delivered live.
        append(&store, "a").await;
        append(&store, "b").await;
        script.unbounded_send(Err(BusError::Lagged { skipped: 2 })).unwrap();

        let snapshot = wait_until(&mut rx, |s| s.inside == 2).await;
        assert_eq!(snapshot.window_len, 2);

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn undecodable_messages_are_skipped() {
        let store = InMemoryEventStore::new();
        let (bus, script) = ScriptedBus::new();

        let handle = OccupancyProjector::spawn(Arc::new(store.clone()), Arc::new(bus), config());
        let mut rx = handle.snapshots();

        script
            .unbounded_send(Err(BusError::DecodeFailed("bad json".to_string())))
            .unwrap();
        let event = RecognitionEventDraft::accepted("c", None, "qr")
            .into_event(EventId::new(99), chrono::Utc::now());
        script.unbounded_send(Ok(event)).unwrap();

        let snapshot = wait_until(&mut rx, |s| s.inside == 1).await;
        assert_eq!(snapshot.last_event_id, Some(EventId::new(99)));

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn store_outage_is_retried() {
        let store = InMemoryEventStore::new();
        let bus = InMemoryEventBus::new();
        append(&store, "a").await;
        store.fail_reads(true);

        let handle = OccupancyProjector::spawn(Arc::new(store.clone()), Arc::new(bus), config());
        let mut rx = handle.snapshots();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handle.current().inside, 0);

        store.fail_reads(false);
        wait_until(&mut rx, |s| s.inside == 1).await;

        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let (projector, shutdown) = OccupancyProjector::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            config(),
        );
        let task = tokio::spawn(projector.run());

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("projector did not stop")
            .unwrap();
    }
}
