//! Occupancy: how many distinct people are currently inside.
//!
//! The presence model is deliberately naive: every subject with at least one
//! accepted event in the window counts as inside. There is no exit event and no
//! expiry, so the value only falls when old events leave the window.
//!
//! Two ways to compute it share one definition, [`current_occupancy`]:
//!
//! - **Polling**: call [`current_occupancy`] on `store.recent(window)`.
//! - **Push**: keep an [`OccupancyProjection`] seeded from the store and fed from
//!   the event bus; it maintains the same window incrementally.

use crate::event::{EventId, RecognitionEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// Default window size, matching the dashboard's `/recent` view.
pub const DEFAULT_WINDOW: usize = 50;

/// Count distinct `user_id`s among matched events.
///
/// Unmatched events and events without a `user_id` are ignored. Order and
/// duplicates have no effect on the result.
///
/// # Example
///
/// ```
/// use gatekeeper_core::event::{EventId, RecognitionEventDraft};
/// use gatekeeper_core::occupancy::current_occupancy;
/// use chrono::Utc;
///
/// let events: Vec<_> = ["a", "a", "b"]
///     .iter()
///     .enumerate()
///     .map(|(i, user)| {
///         RecognitionEventDraft::accepted(*user, None, "qr")
///             .into_event(EventId::new(i as i64 + 1), Utc::now())
///     })
///     .collect();
///
/// assert_eq!(current_occupancy(&events), 2);
/// ```
#[must_use]
pub fn current_occupancy(events: &[RecognitionEvent]) -> usize {
    distinct_inside(events.iter())
}

fn distinct_inside<'a>(events: impl Iterator<Item = &'a RecognitionEvent>) -> usize {
    events
        .filter(|event| event.matched)
        .filter_map(|event| event.user_id.as_deref())
        .collect::<HashSet<_>>()
        .len()
}

/// Point-in-time view of the live projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OccupancySnapshot {
    /// Distinct subjects inside.
    pub inside: usize,
    /// Number of events currently in the window.
    pub window_len: usize,
    /// Newest event id in the window.
    pub last_event_id: Option<EventId>,
}

/// The last `window` events by id, maintained incrementally.
///
/// After any sequence of [`seed`](Self::seed) and [`apply`](Self::apply) calls the
/// window holds the `window` highest-id events seen since the last seed, each
/// exactly once. That is the set `store.recent(window)` would return once every
/// applied event is committed, so both paths agree on occupancy.
#[derive(Debug, Clone)]
pub struct OccupancyProjection {
    window: usize,
    // Ascending by id; front is the oldest.
    events: VecDeque<RecognitionEvent>,
}

impl OccupancyProjection {
    /// Create an empty projection holding at most `window` events.
    ///
    /// A window of 0 is treated as 1.
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            events: VecDeque::with_capacity(window),
        }
    }

    /// Configured window size.
    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Replace the window with a store snapshot.
    ///
    /// `events` may be in any order (`recent` returns newest first).
    pub fn seed(&mut self, events: impl IntoIterator<Item = RecognitionEvent>) {
        self.events.clear();
        for event in events {
            self.apply(event);
        }
    }

    /// Add one live event.
    ///
    /// Returns `false` if the event was already in the window or is older than
    /// everything in a full window; the projection is unchanged in that case.
    pub fn apply(&mut self, event: RecognitionEvent) -> bool {
        let position = match self.events.binary_search_by_key(&event.id, |e| e.id) {
            Ok(_) => return false,
            Err(position) => position,
        };

        if position == 0 && self.events.len() >= self.window {
            return false;
        }

        self.events.insert(position, event);
        while self.events.len() > self.window {
            self.events.pop_front();
        }
        true
    }

    /// Distinct subjects inside, per [`current_occupancy`].
    #[must_use]
    pub fn occupancy(&self) -> usize {
        distinct_inside(self.events.iter())
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> OccupancySnapshot {
        OccupancySnapshot {
            inside: self.occupancy(),
            window_len: self.events.len(),
            last_event_id: self.events.back().map(|event| event.id),
        }
    }
}

impl Default for OccupancyProjection {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::event::RecognitionEventDraft;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn event(id: i64, user: Option<&str>, matched: bool) -> RecognitionEvent {
        let draft = RecognitionEventDraft {
            user_id: user.map(str::to_string),
            display_name: None,
            source_id: "cam-1".to_string(),
            matched,
            score: 0.0,
        };
        draft.into_event(
            EventId::new(id),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn counts_distinct_matched_users() {
        let events = vec![
            event(1, Some("A"), true),
            event(2, Some("A"), true),
            event(3, Some("B"), true),
            event(4, Some("C"), false),
        ];
        assert_eq!(current_occupancy(&events), 2);
    }

    #[test]
    fn ignores_events_without_user() {
        let events = vec![event(1, None, true), event(2, Some("A"), true)];
        assert_eq!(current_occupancy(&events), 1);
    }

    #[test]
    fn empty_window_is_zero() {
        assert_eq!(current_occupancy(&[]), 0);
        assert_eq!(OccupancyProjection::default().snapshot(), OccupancySnapshot::default());
    }

    #[test]
    fn projection_deduplicates_by_id() {
        let mut projection = OccupancyProjection::new(10);
        projection.seed(vec![event(2, Some("A"), true), event(1, Some("B"), true)]);

        assert!(!projection.apply(event(2, Some("A"), true)));
        assert!(projection.apply(event(3, Some("C"), true)));

        let snapshot = projection.snapshot();
        assert_eq!(snapshot.inside, 3);
        assert_eq!(snapshot.window_len, 3);
        assert_eq!(snapshot.last_event_id, Some(EventId::new(3)));
    }

    #[test]
    fn old_events_leave_the_window() {
        let mut projection = OccupancyProjection::new(2);
        projection.apply(event(1, Some("A"), true));
        projection.apply(event(2, Some("B"), true));
        projection.apply(event(3, Some("B"), true));

        assert_eq!(projection.occupancy(), 1);
        assert!(!projection.apply(event(1, Some("A"), true)));
    }

    #[test]
    fn out_of_order_delivery_keeps_highest_ids() {
        let mut projection = OccupancyProjection::new(2);
        projection.apply(event(3, Some("C"), true));
        projection.apply(event(1, Some("A"), true));
        projection.apply(event(2, Some("B"), true));

        let snapshot = projection.snapshot();
        assert_eq!(snapshot.window_len, 2);
        assert_eq!(snapshot.last_event_id, Some(EventId::new(3)));
        assert_eq!(projection.occupancy(), 2);
    }

    #[test]
    fn zero_window_is_clamped() {
        let projection = OccupancyProjection::new(0);
        assert_eq!(projection.window(), 1);
    }

    fn arb_events() -> impl Strategy<Value = Vec<RecognitionEvent>> {
        prop::collection::vec(
            (
                1_i64..200,
                prop::option::of(prop::sample::select(vec!["a", "b", "c", "d", "e"])),
                any::<bool>(),
            ),
            0..120,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .map(|(id, user, matched)| event(id, user, matched))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn occupancy_is_order_independent(mut events in arb_events()) {
            let forward = current_occupancy(&events);
            events.reverse();
            prop_assert_eq!(forward, current_occupancy(&events));
        }

        #[test]
        fn occupancy_bounded_by_matched_count(events in arb_events()) {
            let matched = events.iter().filter(|e| e.matched && e.user_id.is_some()).count();
            prop_assert!(current_occupancy(&events) <= matched);
        }

        #[test]
        fn projection_matches_recent_window(events in arb_events(), window in 1_usize..60) {
            let mut projection = OccupancyProjection::new(window);
            for event in events.clone() {
                projection.apply(event);
            }

            // What recent(window) would return: the highest distinct ids.
            let mut unique: Vec<RecognitionEvent> = Vec::new();
            for event in events {
                if !unique.iter().any(|e| e.id == event.id) {
                    unique.push(event);
                }
            }
            unique.sort_by_key(|e| std::cmp::Reverse(e.id));
            unique.truncate(window);

            prop_assert_eq!(projection.occupancy(), current_occupancy(&unique));
            prop_assert_eq!(projection.snapshot().window_len, unique.len());
        }
    }
}
