//! Linear volume ramps with cancellation

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::error::BridgeError;
use bridge_traits::playback::{PlaybackAdapter, PlaybackSessionId};
use tokio_util::sync::CancellationToken;

/// Interval between volume updates during a ramp.
pub const DEFAULT_FADE_STEP: Duration = Duration::from_millis(20);

/// Last volume written to a source, shared with the ramp driving it.
///
/// A restarted ramp reads this to continue from wherever the cancelled one
/// stopped.
#[derive(Debug, Clone)]
pub struct VolumeLevel(Arc<AtomicU32>);

impl VolumeLevel {
    pub fn new(level: f32) -> Self {
        Self(Arc::new(AtomicU32::new(level.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.clamp(0.0, 1.0).to_bits(), Ordering::Release);
    }
}

/// Generation stamp plus cancellation for one piece of async work.
#[derive(Debug, Clone)]
pub struct TransitionToken {
    generation: u64,
    cancel: CancellationToken,
}

impl TransitionToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

#[derive(Debug)]
pub enum RampOutcome {
    Completed,
    Cancelled,
    Failed(BridgeError),
}

/// Ramp `level` linearly to `target` over `duration`, writing the volume to
/// the adapter every `step`.
pub async fn ramp(
    adapter: &dyn PlaybackAdapter,
    session: PlaybackSessionId,
    level: &VolumeLevel,
    target: f32,
    duration: Duration,
    step: Duration,
    token: &TransitionToken,
) -> RampOutcome {
    let start = level.get();
    let steps = if step.is_zero() {
        0
    } else {
        (duration.as_secs_f64() / step.as_secs_f64()).ceil() as u32
    };

    if steps == 0 || (start - target).abs() < f32::EPSILON {
        if token.is_cancelled() {
            return RampOutcome::Cancelled;
        }
        return match adapter.set_volume(session, target).await {
            Ok(()) => {
                level.set(target);
                RampOutcome::Completed
            }
            Err(e) => RampOutcome::Failed(e),
        };
    }

    for i in 1..=steps {
        tokio::select! {
            biased;
            _ = token.cancelled() => return RampOutcome::Cancelled,
            _ = tokio::time::sleep(step) => {}
        }

        let volume = start + (target - start) * (i as f32 / steps as f32);
        if let Err(e) = adapter.set_volume(session, volume).await {
            return RampOutcome::Failed(e);
        }
        level.set(volume);
    }

    RampOutcome::Completed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_level_clamps() {
        let level = VolumeLevel::new(0.5);
        assert_eq!(level.get(), 0.5);
        level.set(1.7);
        assert_eq!(level.get(), 1.0);
        level.set(-0.2);
        assert_eq!(level.get(), 0.0);
    }

    #[test]
    fn test_token_cancel() {
        let token = TransitionToken::new(7);
        let clone = token.clone();
        assert_eq!(clone.generation(), 7);
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
