//! Observable playback state

use core_library::{ReciterId, Track, TrackId};
use core_runtime::events::TransitionPhase;
use serde::{Deserialize, Serialize};

/// Position of the track-switch state machine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransitionState {
    /// Nothing in flight. A source may be loaded, playing or paused.
    #[default]
    Idle,
    /// The outgoing source is ramping down before `target` loads.
    FadingOut { target: TrackId },
    /// Waiting for `target` to be downloaded and opened.
    Loading { target: TrackId },
    /// `track` started at volume 0 and is ramping up.
    FadingIn { track: TrackId },
    /// A load failed; surfaced once, then the machine returns to `Idle`.
    Error { message: String },
}

impl TransitionState {
    pub fn phase(&self) -> TransitionPhase {
        match self {
            TransitionState::Idle => TransitionPhase::Idle,
            TransitionState::FadingOut { .. } => TransitionPhase::FadingOut,
            TransitionState::Loading { .. } => TransitionPhase::Loading,
            TransitionState::FadingIn { .. } => TransitionPhase::FadingIn,
            TransitionState::Error { .. } => TransitionPhase::Error,
        }
    }

    /// Track a switch in progress is heading for.
    pub fn target(&self) -> Option<TrackId> {
        match self {
            TransitionState::FadingOut { target } | TransitionState::Loading { target } => {
                Some(*target)
            }
            TransitionState::FadingIn { track } => Some(*track),
            TransitionState::Idle | TransitionState::Error { .. } => None,
        }
    }

    /// True between a switch request and the new source being opened.
    pub fn is_switching(&self) -> bool {
        matches!(
            self,
            TransitionState::FadingOut { .. } | TransitionState::Loading { .. }
        )
    }
}

/// Latest published view of the session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub current_track: Option<Track>,
    /// Seconds, within `[0, duration_secs]`
    pub position_secs: f64,
    pub duration_secs: f64,
    pub is_playing: bool,
    pub transition: TransitionState,
    pub reciter: Option<ReciterId>,
    /// Banner text of the most recent failed play request
    pub last_error: Option<String>,
}

impl PlaybackSnapshot {
    pub fn current_track_id(&self) -> Option<TrackId> {
        self.current_track.as_ref().map(|t| t.id)
    }

    /// Playing steadily: not paused and no switch or fade in progress.
    pub fn is_settled_playing(&self) -> bool {
        self.is_playing && self.transition == TransitionState::Idle
    }
}
