//! Cache statistics and operation reports

use core_library::{ReciterId, TrackId};
use serde::{Deserialize, Serialize};

/// Snapshot of one reciter's cache directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub reciter_id: ReciterId,

    /// Number of complete cached tracks
    pub entries: usize,

    /// Total bytes used by complete cached tracks
    pub total_bytes: u64,

    /// Configured byte budget
    pub budget_bytes: u64,

    /// Timestamp when stats were calculated (millis since epoch)
    pub calculated_at: i64,
}

impl CacheStats {
    /// Cache usage as a percentage of the budget.
    pub fn usage_percentage(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }

        (self.total_bytes as f64 / self.budget_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Bytes still available before eviction kicks in.
    pub fn remaining_bytes(&self) -> u64 {
        self.budget_bytes.saturating_sub(self.total_bytes)
    }

    /// Returns average bytes per track.
    pub fn average_track_size(&self) -> u64 {
        if self.entries == 0 {
            0
        } else {
            self.total_bytes / self.entries as u64
        }
    }
}

/// Outcome of a budget enforcement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Tracks removed, oldest first
    pub evicted: Vec<TrackId>,
    pub bytes_freed: u64,
    /// Total bytes left in the container afterwards
    pub total_bytes: u64,
    /// Tracks whose files could not be deleted
    pub failed: Vec<TrackId>,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.failed.is_empty()
    }
}

/// Outcome of `clear` / `clear_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub files_removed: u64,
    pub bytes_freed: u64,
}

impl ClearReport {
    pub(crate) fn absorb(&mut self, other: ClearReport) {
        self.files_removed += other.files_removed;
        self.bytes_freed += other.bytes_freed;
    }
}
