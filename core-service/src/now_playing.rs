//! Feeds the host's "now playing" surface from playback events.
//!
//! The state machine never talks to [`PlatformIntegration`] itself; this
//! task listens on the event bus and mirrors what it sees.

use std::sync::Arc;

use bridge_traits::platform::{NowPlaying, PlatformIntegration};
use core_library::{Catalog, Reciter, TrackId};
use core_runtime::events::{CoreEvent, EventStream, PlaybackEvent, Receiver};
use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Update {
    Publish(NowPlaying),
    Clear,
}

/// Last state pushed to the platform.
pub(crate) struct NowPlayingState {
    catalog: Arc<Catalog>,
    current: Option<NowPlaying>,
}

impl NowPlayingState {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            current: None,
        }
    }

    /// Fold one event into the state. Returns what the platform should see,
    /// if anything changed that it cares about.
    pub fn apply(&mut self, event: &PlaybackEvent, artist: Option<String>) -> Option<Update> {
        match event {
            PlaybackEvent::Started {
                track_id,
                duration_ms,
            } => {
                let mut entry = self.entry_for(*track_id, artist)?;
                entry.duration_secs = ms_to_secs(*duration_ms);
                entry.position_secs = 0.0;
                entry.is_playing = true;
                self.publish(entry)
            }
            PlaybackEvent::Paused {
                track_id,
                position_ms,
            } => {
                let mut entry = self.entry_for(*track_id, artist)?;
                entry.position_secs = ms_to_secs(*position_ms);
                entry.is_playing = false;
                self.publish(entry)
            }
            PlaybackEvent::Resumed {
                track_id,
                position_ms,
            } => {
                let mut entry = self.entry_for(*track_id, artist)?;
                entry.position_secs = ms_to_secs(*position_ms);
                entry.is_playing = true;
                self.publish(entry)
            }
            PlaybackEvent::Seeked {
                track_id,
                position_ms,
            } => {
                let mut entry = self.entry_for(*track_id, artist)?;
                entry.position_secs = ms_to_secs(*position_ms);
                self.publish(entry)
            }
            PlaybackEvent::PositionChanged {
                track_id,
                position_ms,
                ..
            } => {
                // Platforms extrapolate between updates; just keep the value.
                if let Some(current) = self.current.as_mut() {
                    if current.track_id == *track_id {
                        current.position_secs = ms_to_secs(*position_ms);
                    }
                }
                None
            }
            PlaybackEvent::DeviceLost { .. } => {
                let mut entry = self.current.clone()?;
                entry.is_playing = false;
                self.publish(entry)
            }
            PlaybackEvent::Stopped { .. } | PlaybackEvent::ReciterChanged { .. } => {
                self.current.take().map(|_| Update::Clear)
            }
            PlaybackEvent::PhaseChanged { .. }
            | PlaybackEvent::Completed { .. }
            | PlaybackEvent::Error { .. } => None,
        }
    }

    fn entry_for(&self, track_id: u32, artist: Option<String>) -> Option<NowPlaying> {
        if let Some(current) = self.current.as_ref().filter(|c| c.track_id == track_id) {
            return Some(NowPlaying {
                artist,
                ..current.clone()
            });
        }

        let track = self.catalog.get(TrackId(track_id))?;
        Some(NowPlaying {
            track_id,
            title: track.name.clone(),
            subtitle: track.translated_name.clone(),
            artist,
            duration_secs: track.expected_duration_secs.unwrap_or(0.0),
            position_secs: 0.0,
            is_playing: false,
        })
    }

    fn publish(&mut self, entry: NowPlaying) -> Option<Update> {
        if self.current.as_ref() == Some(&entry) {
            return None;
        }
        self.current = Some(entry.clone());
        Some(Update::Publish(entry))
    }
}

fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

/// Spawn the forwarding task. It ends when the event bus closes.
pub(crate) fn spawn_forwarder(
    events: Receiver<CoreEvent>,
    catalog: Arc<Catalog>,
    reciter: Arc<RwLock<Option<Reciter>>>,
    integration: Arc<dyn PlatformIntegration>,
) -> JoinHandle<()> {
    let mut events =
        EventStream::new(events).filter(|event| matches!(event, CoreEvent::Playback(_)));
    tokio::spawn(async move {
        let mut state = NowPlayingState::new(catalog);
        loop {
            let event = match events.recv().await {
                Ok(CoreEvent::Playback(event)) => event,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Now-playing forwarder lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let artist = reciter.read().as_ref().map(|r| r.name.clone());
            let result = match state.apply(&event, artist) {
                Some(Update::Publish(now_playing)) => {
                    integration.update_now_playing(now_playing).await
                }
                Some(Update::Clear) => integration.clear_now_playing().await,
                None => Ok(()),
            };
            if let Err(e) = result {
                warn!(error = %e, "Platform integration update failed");
            }
        }
        debug!("Now-playing forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::Track;

    fn state() -> NowPlayingState {
        let catalog = Catalog::new(vec![
            Track::new(TrackId(1), "Al-Fatiha").with_translation("The Opening"),
            Track::new(TrackId(2), "Al-Baqara"),
        ])
        .unwrap();
        NowPlayingState::new(Arc::new(catalog))
    }

    fn published(update: Option<Update>) -> NowPlaying {
        match update {
            Some(Update::Publish(now_playing)) => now_playing,
            other => panic!("expected publish, got {:?}", other),
        }
    }

    #[test]
    fn test_started_publishes_track_details() {
        let mut state = state();
        let now_playing = published(state.apply(
            &PlaybackEvent::Started {
                track_id: 1,
                duration_ms: 47_000,
            },
            Some("Test Reciter".to_string()),
        ));

        assert_eq!(now_playing.title, "Al-Fatiha");
        assert_eq!(now_playing.subtitle.as_deref(), Some("The Opening"));
        assert_eq!(now_playing.artist.as_deref(), Some("Test Reciter"));
        assert_eq!(now_playing.duration_secs, 47.0);
        assert!(now_playing.is_playing);
    }

    #[test]
    fn test_pause_and_resume_keep_duration() {
        let mut state = state();
        state.apply(
            &PlaybackEvent::Started {
                track_id: 2,
                duration_ms: 9_000,
            },
            None,
        );

        let paused = published(state.apply(
            &PlaybackEvent::Paused {
                track_id: 2,
                position_ms: 1_500,
            },
            None,
        ));
        assert!(!paused.is_playing);
        assert_eq!(paused.position_secs, 1.5);
        assert_eq!(paused.duration_secs, 9.0);

        let resumed = published(state.apply(
            &PlaybackEvent::Resumed {
                track_id: 2,
                position_ms: 1_500,
            },
            None,
        ));
        assert!(resumed.is_playing);
    }

    #[test]
    fn test_ticks_are_not_forwarded() {
        let mut state = state();
        state.apply(
            &PlaybackEvent::Started {
                track_id: 1,
                duration_ms: 47_000,
            },
            None,
        );
        let update = state.apply(
            &PlaybackEvent::PositionChanged {
                track_id: 1,
                position_ms: 3_000,
                duration_ms: 47_000,
            },
            None,
        );
        assert_eq!(update, None);
    }

    #[test]
    fn test_stop_clears_once() {
        let mut state = state();
        state.apply(
            &PlaybackEvent::Started {
                track_id: 1,
                duration_ms: 47_000,
            },
            None,
        );

        let stop = PlaybackEvent::Stopped { track_id: Some(1) };
        assert_eq!(state.apply(&stop, None), Some(Update::Clear));
        assert_eq!(state.apply(&stop, None), None);
    }

    struct Recording(tokio::sync::mpsc::UnboundedSender<Option<u32>>);

    #[async_trait::async_trait]
    impl PlatformIntegration for Recording {
        async fn update_now_playing(
            &self,
            now_playing: NowPlaying,
        ) -> bridge_traits::error::Result<()> {
            let _ = self.0.send(Some(now_playing.track_id));
            Ok(())
        }

        async fn clear_now_playing(&self) -> bridge_traits::error::Result<()> {
            let _ = self.0.send(None);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_forwarder_only_reacts_to_playback_events() {
        use core_runtime::events::{CacheEvent, EventBus};

        let bus = EventBus::new(16);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let forwarder = spawn_forwarder(
            bus.subscribe(),
            state().catalog,
            Arc::new(RwLock::new(None)),
            Arc::new(Recording(tx)),
        );

        bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
            reciter_id: None,
            files_removed: 3,
        }))
        .unwrap();
        bus.emit(CoreEvent::Playback(PlaybackEvent::Started {
            track_id: 2,
            duration_ms: 1_000,
        }))
        .unwrap();
        bus.emit(CoreEvent::Playback(PlaybackEvent::Stopped { track_id: Some(2) }))
            .unwrap();

        assert_eq!(rx.recv().await, Some(Some(2)));
        assert_eq!(rx.recv().await, Some(None));
        forwarder.abort();
    }

    #[test]
    fn test_unknown_track_is_ignored() {
        let mut state = state();
        let update = state.apply(
            &PlaybackEvent::Started {
                track_id: 99,
                duration_ms: 1_000,
            },
            None,
        );
        assert_eq!(update, None);
    }
}
