//! Download task state and progress accounting

use std::path::PathBuf;

use core_library::TrackId;

use crate::error::DownloadError;

/// Highest fraction reported before the final rename succeeds.
const MAX_PENDING_FRACTION: f32 = 0.99;

/// Lifecycle of one download task.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadState {
    Pending,
    InFlight,
    Done(PathBuf),
    Failed(DownloadError),
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Done(_) | DownloadState::Failed(_))
    }
}

/// Value published to every subscriber of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSnapshot {
    pub state: DownloadState,
    /// Monotonically non-decreasing, in `[0.0, 1.0]`
    pub progress: f32,
}

impl DownloadSnapshot {
    pub(crate) fn pending() -> Self {
        Self {
            state: DownloadState::Pending,
            progress: 0.0,
        }
    }
}

/// Per-track result inside a bulk download.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    AlreadyCached,
    Downloaded,
    Failed(DownloadError),
}

/// Emitted once per track boundary by `ensure_all_available`.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkProgress {
    /// Tracks processed so far, including skipped and failed ones
    pub completed: u32,
    pub total: u32,
    pub track: TrackId,
    pub outcome: BulkOutcome,
}

impl BulkProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.completed as f32 / self.total as f32
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total
    }
}

/// Progress change worth publishing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProgressStep {
    pub fraction: f32,
    /// Set when a new whole percent was reached
    pub percent: Option<u8>,
}

/// Turns received byte counts into a capped, monotonic fraction.
///
/// Survives retries: `restart` resets the byte count but never lowers the
/// reported fraction.
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    expected: Option<u64>,
    received: u64,
    fraction: f32,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn restart(&mut self, expected: Option<u64>) {
        self.expected = expected.filter(|len| *len > 0);
        self.received = 0;
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn record(&mut self, bytes: usize) -> Option<ProgressStep> {
        self.received += bytes as u64;

        let expected = self.expected?;
        let raw = (self.received as f64 / expected as f64) as f32;
        let fraction = raw.min(MAX_PENDING_FRACTION);
        if fraction <= self.fraction {
            return None;
        }
        self.fraction = fraction;

        let percent = (self.received.saturating_mul(100) / expected).min(99) as u8;
        let percent = if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        };

        Some(ProgressStep { fraction, percent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_caps_before_completion() {
        let mut tracker = ProgressTracker::default();
        tracker.restart(Some(100));

        let step = tracker.record(50).unwrap();
        assert_eq!(step.fraction, 0.5);
        assert_eq!(step.percent, Some(50));

        let step = tracker.record(60).unwrap();
        assert_eq!(step.fraction, MAX_PENDING_FRACTION);
        assert_eq!(step.percent, Some(99));

        assert!(tracker.record(10).is_none());
        assert_eq!(tracker.received(), 120);
    }

    #[test]
    fn test_progress_is_monotonic_across_restart() {
        let mut tracker = ProgressTracker::default();
        tracker.restart(Some(1000));
        tracker.record(400);

        tracker.restart(Some(1000));
        assert!(tracker.record(100).is_none());
        assert!(tracker.record(200).is_none());
        let step = tracker.record(200).unwrap();
        assert_eq!(step.fraction, 0.5);
    }

    #[test]
    fn test_progress_without_length_stays_zero() {
        let mut tracker = ProgressTracker::default();
        tracker.restart(None);
        assert!(tracker.record(4096).is_none());
        assert_eq!(tracker.received(), 4096);
    }

    #[test]
    fn test_sub_percent_steps_publish_fraction_only() {
        let mut tracker = ProgressTracker::default();
        tracker.restart(Some(1000));
        let step = tracker.record(5).unwrap();
        assert_eq!(step.percent, None);
        let step = tracker.record(5).unwrap();
        assert_eq!(step.percent, Some(1));
    }

    #[test]
    fn test_bulk_fraction() {
        let progress = BulkProgress {
            completed: 1,
            total: 4,
            track: TrackId(1),
            outcome: BulkOutcome::Downloaded,
        };
        assert_eq!(progress.fraction(), 0.25);
        assert!(!progress.is_finished());
    }
}
