//! Monotonic client clock for stamping mutations.
//!
//! Wall clocks on field devices jump backwards (manual changes, NTP
//! corrections after long offline periods). Queue order is creation order, so
//! `createdAt` must strictly increase per client regardless of the wall clock.

use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// A clock that never hands out the same or an earlier timestamp twice.
///
/// Each stamp is `max(wall, last + 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientClock {
    /// Highest timestamp handed out or observed so far
    last: Timestamp,
}

impl ClientClock {
    /// Create a new clock starting at zero.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Create a clock resuming from a persisted high-water mark.
    pub fn resume(last: Timestamp) -> Self {
        Self { last }
    }

    /// Produce the next timestamp given the current wall clock reading.
    pub fn stamp(&mut self, wall: Timestamp) -> Timestamp {
        self.last = wall.max(self.last.saturating_add(1));
        self.last
    }

    /// Advance past a timestamp seen elsewhere (e.g. a restored queue).
    pub fn observe(&mut self, seen: Timestamp) {
        self.last = self.last.max(seen);
    }

    /// Highest timestamp handed out or observed.
    pub fn last(&self) -> Timestamp {
        self.last
    }
}
