//! Recognition events and their wire format.
//!
//! A [`RecognitionEvent`] is the logged outcome of one credential check at a gate.
//! Events are immutable once the store has assigned their [`EventId`] and timestamp;
//! everything upstream of the store works with a [`RecognitionEventDraft`].
//!
//! # JSON shape
//!
//! Field names follow the dashboard and gate-controller contract rather than the
//! Rust names:
//!
//! ```json
//! {
//!   "id": 42,
//!   "ts": "2025-01-01T08:30:00Z",
//!   "user_id": "u1",
//!   "name": "Ada",
//!   "camera_id": "qr",
//!   "matched": true,
//!   "score": 0.0
//! }
//! ```
//!
//! On the event bus the same record is wrapped with an `"event": "recognized"` tag
//! (see [`encode_bus_message`] and [`decode_bus_message`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source id recorded for QR validations when the token names no camera.
pub const QR_SOURCE: &str = "qr";

/// Source id recorded for fingerprint verifications when no scanner id is given.
pub const FINGERPRINT_SOURCE: &str = "fp";

/// Bus tag for accepted credential checks.
pub const RECOGNIZED_TAG: &str = "recognized";

/// Store-assigned identifier of a recognition event.
///
/// Ids are unique and strictly increasing in insertion order. They are never
/// supplied by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    /// Wrap a raw store id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw store id.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recognition attempt that has not been persisted yet.
///
/// The draft carries everything the caller knows. The store adds the id and the
/// timestamp on [`append`](crate::event_store::EventStore::append).
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEventDraft {
    /// Matched subject, if any.
    pub user_id: Option<String>,
    /// Human-readable name of the subject, if known.
    pub display_name: Option<String>,
    /// Originating device: camera id, scanner id, or a logical source such as `"qr"`.
    pub source_id: String,
    /// Whether the credential was accepted.
    pub matched: bool,
    /// Match confidence; `0.0` where not applicable.
    pub score: f64,
}

impl RecognitionEventDraft {
    /// Draft for an accepted credential.
    ///
    /// QR and fingerprint checks carry no confidence value, so the score is `0.0`.
    #[must_use]
    pub fn accepted(
        user_id: impl Into<String>,
        display_name: Option<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            display_name,
            source_id: source_id.into(),
            matched: true,
            score: 0.0,
        }
    }

    /// Turn the draft into a full record.
    ///
    /// Only event stores should call this; they own id and timestamp assignment.
    #[must_use]
    pub fn into_event(self, id: EventId, timestamp: DateTime<Utc>) -> RecognitionEvent {
        RecognitionEvent {
            id,
            timestamp,
            user_id: self.user_id,
            display_name: self.display_name,
            source_id: self.source_id,
            matched: self.matched,
            score: self.score,
        }
    }
}

/// A persisted recognition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    /// Store-assigned id.
    pub id: EventId,
    /// Insert time from the store's clock.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    /// Matched subject, if any.
    pub user_id: Option<String>,
    /// Human-readable name of the subject, if known.
    #[serde(rename = "name")]
    pub display_name: Option<String>,
    /// Originating device.
    #[serde(rename = "camera_id")]
    pub source_id: String,
    /// Whether the credential was accepted.
    pub matched: bool,
    /// Match confidence; `0.0` where not applicable.
    pub score: f64,
}

#[derive(Serialize)]
struct Tagged<'a> {
    event: &'static str,
    #[serde(flatten)]
    record: &'a RecognitionEvent,
}

/// Encode an event as a bus message.
///
/// The message is the JSON record plus `"event": "recognized"`, so consumers that
/// only understand `{event, user_id, name, camera_id}` keep working.
///
/// # Errors
///
/// Returns the underlying `serde_json` error if encoding fails.
pub fn encode_bus_message(event: &RecognitionEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Tagged {
        event: RECOGNIZED_TAG,
        record: event,
    })
}

/// Decode a bus message.
///
/// Returns `Ok(None)` for messages that are not recognition records produced by
/// this pipeline: other tags (such as the face service's `"unrecognized"`) and
/// tagged messages without a store id.
///
/// # Errors
///
/// Returns a `serde_json` error if the payload is not JSON, or if it claims to be a
/// stored record but its fields do not match.
pub fn decode_bus_message(payload: &str) -> Result<Option<RecognitionEvent>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(payload)?;

    let is_recognized = value.get("event").and_then(serde_json::Value::as_str) == Some(RECOGNIZED_TAG);
    if !is_recognized || value.get("id").is_none() {
        return Ok(None);
    }

    serde_json::from_value(value).map(Some)
}
