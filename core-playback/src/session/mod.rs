//! # Playback Session
//!
//! The track-switch state machine and the handle used to drive it.
//!
//! ```text
//!   play(B)                fade done              source opened
//!  ────────> FadingOut(B) ──────────> Loading(B) ──────────────> FadingIn(B) ──> Idle
//!               │  play(C): restart       │  play(C): retarget          │
//!               └──────────────           └──────────────               └─ play(C): FadingOut(C)
//! ```
//!
//! A [`PlaybackSession`] bundles everything the machine needs. Handing it to
//! [`TransitionScheduler::spawn`] starts the control loop and returns a
//! [`PlayerHandle`]; all commands go through that handle.

pub mod fader;
pub mod handle;
pub mod persistence;
pub mod scheduler;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::playback::PlaybackAdapter;
use core_library::{Catalog, Reciter};
use core_runtime::events::EventBus;

use crate::download::DownloadCoordinator;

pub use fader::{TransitionToken, VolumeLevel, DEFAULT_FADE_STEP};
pub use handle::PlayerHandle;
pub use persistence::{ResumeState, ResumeStore};
pub use scheduler::TransitionScheduler;
pub use state::{PlaybackSnapshot, TransitionState};

/// Timing of the state machine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Length of every fade (default: 280ms)
    pub fade_duration: Duration,
    /// Interval between volume updates within a fade (default: 20ms)
    pub fade_step: Duration,
    /// Position tick interval (default: 1s)
    pub tick_interval: Duration,
    /// Minimum interval between resume-state writes while playing (default: 1s)
    pub persist_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fade_duration: Duration::from_millis(280),
            fade_step: DEFAULT_FADE_STEP,
            tick_interval: Duration::from_secs(1),
            persist_interval: Duration::from_secs(1),
        }
    }
}

/// Dependencies and initial state of one player.
pub struct PlaybackSession {
    pub(crate) adapter: Arc<dyn PlaybackAdapter>,
    pub(crate) downloads: DownloadCoordinator,
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) resume_store: ResumeStore,
    pub(crate) event_bus: EventBus,
    pub(crate) config: SessionConfig,
    pub(crate) reciter: Option<Reciter>,
    pub(crate) resume: ResumeState,
}

impl PlaybackSession {
    pub fn new(
        adapter: Arc<dyn PlaybackAdapter>,
        downloads: DownloadCoordinator,
        catalog: Arc<Catalog>,
        resume_store: ResumeStore,
        event_bus: EventBus,
    ) -> Self {
        Self {
            adapter,
            downloads,
            catalog,
            resume_store,
            event_bus,
            config: SessionConfig::default(),
            reciter: None,
            resume: ResumeState::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reciter(mut self, reciter: Option<Reciter>) -> Self {
        self.reciter = reciter;
        self
    }

    /// Remember where the previous run stopped. A later toggle resumes there.
    pub fn with_resume(mut self, resume: ResumeState) -> Self {
        self.resume = resume;
        self
    }
}
