//! The `Event` value type delivered to consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A single finalized Server-Sent Event
///
/// Immutable once constructed. `sequence` is assigned by the client at
/// finalize time and is strictly increasing for the lifetime of the client
/// instance, across reconnects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The `id` field, if any was sent
    pub id: String,

    /// The `event` field (event name), if any was sent
    pub name: String,

    /// The accumulated `data` field, multi-line values joined by `\n`
    pub data: String,

    /// A `retry:` value carried by this specific event, in milliseconds
    pub retry_hint: Option<Duration>,

    /// The original lines that made up this event, joined by `\n`
    pub raw: String,

    /// Unknown field name -> last value seen for that field within this event
    pub headers: HashMap<String, String>,

    /// Wall-clock time the first line of this event was received
    pub timestamp: DateTime<Utc>,

    /// Monotonically increasing counter, per client instance, starting at 1
    pub sequence: u64,
}

impl Event {
    /// True if this event carried a non-empty `id` field
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}
