//! # Event Bus System
//!
//! Event-driven plumbing for the player core, built on `tokio::sync::broadcast`.
//! Core modules publish typed events here instead of exposing observable
//! fields; hosts (UI, media-center integration, logging) subscribe.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain (playback, downloads, cache)
//! - **EventBus**: central broadcast channel
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐
//! │ TransitionSched. ├────────>│           │
//! └──────────────────┘         │           │   subscribe   ┌──────────────────┐
//! ┌──────────────────┐  emit   │ EventBus  ├──────────────>│ Host UI          │
//! │ DownloadCoord.   ├────────>│ (broadcast│               └──────────────────┘
//! └──────────────────┘         │  channel) │   subscribe   ┌──────────────────┐
//! ┌──────────────────┐  emit   │           ├──────────────>│ Now-playing fwd  │
//! │ CacheStore       ├────────>│           │               └──────────────────┘
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Playback(PlaybackEvent::Started {
//!     track_id: 1,
//!     duration_ms: 42_000,
//! }))
//! .ok();
//!
//! let event = rx.try_recv().unwrap();
//! assert!(matches!(event, CoreEvent::Playback(PlaybackEvent::Started { .. })));
//! ```
//!
//! ## Lagging subscribers
//!
//! Each subscriber has a bounded buffer. A subscriber that falls behind gets
//! `RecvError::Lagged(n)` and continues from the oldest retained event.
//! Position ticks are the highest-volume events; size the buffer with that in
//! mind.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use broadcast::error::{RecvError, SendError};
pub use broadcast::Receiver;

/// Default buffer size for the event bus.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
///
/// Ids are carried as plain integers (track and reciter numbers) and times as
/// milliseconds so events stay `Eq` and serialize compactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Playback(PlaybackEvent),
    Download(DownloadEvent),
    Cache(CacheEvent),
}

// ============================================================================
// Playback Events
// ============================================================================

/// Coarse transition phase, mirrored from the session state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransitionPhase {
    Idle,
    FadingOut,
    Loading,
    FadingIn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// The transition machine changed phase. `target` is the track the
    /// phase is working towards, if any.
    PhaseChanged {
        phase: TransitionPhase,
        target: Option<u32>,
    },
    /// A new source finished loading and started fading in.
    Started {
        track_id: u32,
        duration_ms: u64,
    },
    Paused {
        track_id: u32,
        position_ms: u64,
    },
    Resumed {
        track_id: u32,
        position_ms: u64,
    },
    /// Playback was stopped and the output released.
    Stopped {
        track_id: Option<u32>,
    },
    /// The track reached its natural end.
    Completed {
        track_id: u32,
    },
    PositionChanged {
        track_id: u32,
        position_ms: u64,
        duration_ms: u64,
    },
    Seeked {
        track_id: u32,
        position_ms: u64,
    },
    /// The output device disappeared; playback was paused.
    DeviceLost {
        message: String,
    },
    ReciterChanged {
        reciter_id: u32,
    },
    Error {
        track_id: Option<u32>,
        message: String,
        recoverable: bool,
    },
}

// ============================================================================
// Download Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    Started {
        reciter_id: u32,
        track_id: u32,
    },
    /// Emitted in whole-percent steps while bytes arrive.
    Progress {
        reciter_id: u32,
        track_id: u32,
        percent: u8,
    },
    Completed {
        reciter_id: u32,
        track_id: u32,
        bytes: u64,
    },
    Failed {
        reciter_id: u32,
        track_id: u32,
        message: String,
    },
    /// A bulk "download all" passed a track boundary.
    BulkProgress {
        reciter_id: u32,
        completed: u32,
        total: u32,
    },
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    Evicted {
        reciter_id: u32,
        track_id: u32,
        bytes: u64,
    },
    /// `reciter_id` is `None` when every reciter's cache was cleared.
    Cleared {
        reciter_id: Option<u32>,
        files_removed: u64,
    },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Cloning is cheap; all clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Fails only when nobody is subscribed, which callers
    /// are free to ignore.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver that skips events rejected by a predicate.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
