//! Lamport logical clock.

use crate::types::Timestamp;

/// Per-process logical clock.
///
/// Ticks once before every send and merges every received timestamp,
/// so `a happened-before b` implies `clock(a) < clock(b)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    value: Timestamp,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance for a local send and return the new reading.
    pub fn tick(&mut self) -> Timestamp {
        self.value = self.value.saturating_add(1);
        self.value
    }

    /// Merge a received timestamp: `max(local, remote) + 1`.
    pub fn observe(&mut self, remote: Timestamp) -> Timestamp {
        self.value = self.value.max(remote).saturating_add(1);
        self.value
    }

    pub fn current(&self) -> Timestamp {
        self.value
    }
}
