//! # Transition Scheduler
//!
//! The control loop that owns all mutable playback state.
//!
//! One tokio task selects over three inputs: user commands, completions of
//! the async work it spawned (fades, loads) and the position tick. Every
//! piece of spawned work carries the generation it was started under, and
//! its completion is applied only if that generation is still current.
//! Superseding a switch bumps the generation and cancels the old token, so a
//! late fade or load result is dropped (and an opened source released)
//! instead of being applied.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::error::BridgeError;
use bridge_traits::playback::{
    PlaybackAdapter, PlaybackMetadata, PlaybackOptions, PlaybackRequest, PlaybackSessionId,
    PlaybackState,
};
use core_library::{Reciter, Track, TrackId};
use core_runtime::events::{CoreEvent, PlaybackEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::fader::{ramp, RampOutcome, TransitionToken, VolumeLevel};
use super::handle::PlayerHandle;
use super::persistence::ResumeWriter;
use super::state::{PlaybackSnapshot, TransitionState};
use super::PlaybackSession;
use crate::download::DownloadCoordinator;
use crate::error::PlaybackError;

#[derive(Debug)]
pub(crate) enum Command {
    Play(TrackId),
    TogglePlayPause,
    Pause,
    Resume,
    Next,
    Previous,
    Seek(f64),
    SelectReciter(Reciter),
    Stop,
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RampPurpose {
    FadeOut,
    FadeIn,
    Pause,
    Resume,
}

struct LoadedSource {
    track: Track,
    session: PlaybackSessionId,
    duration_secs: f64,
    start_secs: f64,
}

enum Internal {
    RampFinished {
        generation: u64,
        purpose: RampPurpose,
        failure: Option<BridgeError>,
    },
    Loaded {
        generation: u64,
        result: Result<LoadedSource, PlaybackError>,
    },
}

/// The audio source currently owned by the loop.
struct ActiveSource {
    track: Track,
    session: PlaybackSessionId,
    duration_secs: f64,
    level: VolumeLevel,
    /// The user wants this source audible.
    wants_playing: bool,
    /// The adapter has been told to pause (or was never started).
    adapter_paused: bool,
}

impl ActiveSource {
    fn is_audible(&self) -> bool {
        !self.adapter_paused && self.level.get() > 0.0
    }
}

struct PendingSwitch {
    track: Track,
    start_secs: f64,
}

/// Spawns the control loop for a [`PlaybackSession`].
pub struct TransitionScheduler;

impl TransitionScheduler {
    pub fn spawn(session: PlaybackSession) -> PlayerHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let remembered = session.resume.last_track.and_then(|id| {
            session
                .catalog
                .get(id)
                .cloned()
                .map(|track| (track, session.resume.position_secs))
        });

        let initial = PlaybackSnapshot {
            current_track: remembered.as_ref().map(|(track, _)| track.clone()),
            position_secs: remembered.as_ref().map_or(0.0, |(_, pos)| *pos),
            duration_secs: remembered
                .as_ref()
                .and_then(|(track, _)| track.expected_duration_secs)
                .unwrap_or(0.0),
            reciter: session.reciter.as_ref().map(|r| r.id),
            ..Default::default()
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let handle = PlayerHandle::new(command_tx, state_rx, session.event_bus.clone());

        let control = ControlLoop {
            writer: ResumeWriter::spawn(session.resume_store.clone()),
            session,
            state_tx,
            internal_tx,
            transition: TransitionState::Idle,
            generation: 0,
            switch_token: None,
            ramp_token: None,
            active: None,
            pending: None,
            remembered,
            pause_after_switch: false,
            position_secs: 0.0,
            last_error: None,
            last_persist: None,
        };
        tokio::spawn(control.run(command_rx, internal_rx));

        handle
    }
}

struct ControlLoop {
    session: PlaybackSession,
    /// Settings writes leave the loop through here.
    writer: ResumeWriter,
    state_tx: watch::Sender<PlaybackSnapshot>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    transition: TransitionState,
    generation: u64,
    switch_token: Option<TransitionToken>,
    ramp_token: Option<TransitionToken>,
    active: Option<ActiveSource>,
    pending: Option<PendingSwitch>,
    /// Track shown and resumable while no source is loaded.
    remembered: Option<(Track, f64)>,
    pause_after_switch: bool,
    position_secs: f64,
    last_error: Option<String>,
    last_persist: Option<Instant>,
}

impl ControlLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut ticker = tokio::time::interval(self.session.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Playback control loop started");
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(ack)) => {
                        self.shutdown().await;
                        let _ = ack.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(message) = internal.recv() => self.handle_internal(message).await,
                _ = ticker.tick() => self.on_tick().await,
            }
        }

        info!("Playback control loop stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, state = ?self.transition, "Handling command");
        match command {
            Command::Play(id) => self.play(id).await,
            Command::TogglePlayPause => self.toggle().await,
            Command::Pause => self.pause_requested().await,
            Command::Resume => self.resume_requested().await,
            Command::Next => self.step(1).await,
            Command::Previous => self.step(-1).await,
            Command::Seek(seconds) => self.seek(seconds).await,
            Command::SelectReciter(reciter) => self.select_reciter(reciter).await,
            Command::Stop => self.stop().await,
            Command::Shutdown(_) => {}
        }
    }

    // ------------------------------------------------------------------
    // Track switching
    // ------------------------------------------------------------------

    async fn play(&mut self, id: TrackId) {
        let Some(track) = self.session.catalog.get(id).cloned() else {
            self.report_rejected(id, PlaybackError::TrackNotFound(id.get()));
            return;
        };
        if self.session.reciter.is_none() {
            self.report_rejected(id, PlaybackError::NoReciterSelected);
            return;
        }

        if self.transition.is_switching() && self.transition.target() == Some(id) {
            debug!(track = %id, "Already switching to track");
            return;
        }

        let settled = matches!(self.transition, TransitionState::Idle)
            || self.transition == TransitionState::FadingIn { track: id };
        let current = self
            .active
            .as_ref()
            .filter(|active| settled && active.track.id == id)
            .map(|active| active.wants_playing);
        match current {
            Some(true) => {
                debug!(track = %id, "Track already playing");
                return;
            }
            Some(false) => {
                self.resume().await;
                return;
            }
            None => {}
        }

        let start_secs = match &self.remembered {
            Some((remembered, position)) if remembered.id == id && self.active.is_none() => {
                *position
            }
            _ => 0.0,
        };
        self.begin_switch(track, start_secs).await;
    }

    async fn begin_switch(&mut self, track: Track, start_secs: f64) {
        self.cancel_work();
        self.persist(true);
        self.pause_after_switch = false;
        self.last_error = None;

        let token = TransitionToken::new(self.generation);
        self.switch_token = Some(token.clone());
        let target = track.id;
        self.pending = Some(PendingSwitch { track, start_secs });

        let audible = self.active.as_ref().map_or(false, ActiveSource::is_audible);
        if audible {
            info!(target = %target, "Fading out for track switch");
            self.set_transition(TransitionState::FadingOut { target });
            self.spawn_ramp(0.0, RampPurpose::FadeOut, token);
            self.publish();
        } else {
            self.release_active().await;
            self.start_loading().await;
        }
    }

    async fn start_loading(&mut self) {
        let (Some(pending), Some(reciter), Some(token)) = (
            self.pending.as_ref(),
            self.session.reciter.clone(),
            self.switch_token.clone(),
        ) else {
            self.set_transition(TransitionState::Idle);
            self.publish();
            return;
        };

        let track = pending.track.clone();
        let start_secs = pending.start_secs;
        info!(track = %track.id, reciter = %reciter.id, "Loading track");
        self.set_transition(TransitionState::Loading { target: track.id });
        self.publish();

        let adapter = self.session.adapter.clone();
        let downloads = self.session.downloads.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let generation = token.generation();
            let Some(result) =
                load_track(adapter.clone(), downloads, reciter, track, start_secs, &token).await
            else {
                debug!(generation, "Load abandoned before a source was prepared");
                return;
            };

            // A superseded source is still reported so the loop can release it.
            if let Err(mpsc::error::SendError(Internal::Loaded {
                result: Ok(orphan), ..
            })) = internal.send(Internal::Loaded { generation, result })
            {
                let _ = adapter.unload(orphan.session).await;
            }
        });
    }

    async fn finish_fade_out(&mut self) {
        self.release_active().await;
        self.start_loading().await;
    }

    async fn on_loaded(&mut self, source: LoadedSource) {
        self.pending = None;
        self.remembered = None;
        self.position_secs = source.start_secs.clamp(0.0, source.duration_secs.max(0.0));

        let mut active = ActiveSource {
            track: source.track,
            session: source.session,
            duration_secs: source.duration_secs,
            level: VolumeLevel::new(0.0),
            wants_playing: !self.pause_after_switch,
            adapter_paused: true,
        };
        let track_id = active.track.id;

        if self.pause_after_switch {
            info!(track = %track_id, "Track loaded, staying paused");
            self.pause_after_switch = false;
            self.active = Some(active);
            self.switch_token = None;
            self.set_transition(TransitionState::Idle);
            self.emit(PlaybackEvent::Paused {
                track_id: track_id.get(),
                position_ms: secs_to_ms(self.position_secs),
            });
            self.publish();
            self.persist(true);
            return;
        }

        if let Err(e) = self.session.adapter.play(active.session).await {
            match e {
                BridgeError::DeviceUnavailable(message) => {
                    self.active = Some(active);
                    self.device_lost(message).await;
                }
                other => {
                    self.release_session(active.session).await;
                    self.fail_request(Some(track_id), other.into());
                }
            }
            return;
        }
        active.adapter_paused = false;
        self.active = Some(active);

        info!(track = %track_id, "Fading in");
        self.set_transition(TransitionState::FadingIn { track: track_id });
        if let Some(token) = self.switch_token.clone() {
            self.spawn_ramp(1.0, RampPurpose::FadeIn, token);
        }
        self.emit(PlaybackEvent::Started {
            track_id: track_id.get(),
            duration_ms: secs_to_ms(self.duration_secs()),
        });
        self.publish();
        self.persist(true);
    }

    fn on_load_failed(&mut self, error: PlaybackError) {
        let target = self.pending.take().map(|p| p.track.id);
        self.fail_request(target, error);
    }

    /// Surface a failed play request, then settle back in `Idle`.
    fn fail_request(&mut self, target: Option<TrackId>, error: PlaybackError) {
        self.pending = None;
        self.switch_token = None;
        self.remembered = None;
        self.pause_after_switch = false;

        let message = error.user_message();
        warn!(track = ?target, error = %error, "Failed to load track");
        self.last_error = Some(message.clone());
        self.set_transition(TransitionState::Error {
            message: message.clone(),
        });
        self.emit(PlaybackEvent::Error {
            track_id: target.map(|t| t.get()),
            message,
            recoverable: error.is_recoverable(),
        });
        self.publish();

        self.set_transition(TransitionState::Idle);
        self.publish();
    }

    // ------------------------------------------------------------------
    // Pause / resume
    // ------------------------------------------------------------------

    async fn toggle(&mut self) {
        if self.transition.is_switching() {
            self.pause_after_switch = !self.pause_after_switch;
            debug!(pause_after_switch = self.pause_after_switch, "Toggle during switch");
            self.publish();
            return;
        }

        match self.active.as_ref().map(|a| a.wants_playing) {
            Some(true) => self.pause().await,
            Some(false) => self.resume().await,
            None => self.resume_remembered().await,
        }
    }

    async fn pause_requested(&mut self) {
        if self.transition.is_switching() {
            self.pause_after_switch = true;
            self.publish();
            return;
        }
        match self.active.as_ref().map(|a| a.wants_playing) {
            Some(true) => self.pause().await,
            _ => debug!("Pause ignored: nothing playing"),
        }
    }

    async fn resume_requested(&mut self) {
        if self.transition.is_switching() {
            self.pause_after_switch = false;
            self.publish();
            return;
        }
        match self.active.as_ref().map(|a| a.wants_playing) {
            Some(false) => self.resume().await,
            Some(true) => debug!("Resume ignored: already playing"),
            None => self.resume_remembered().await,
        }
    }

    async fn pause(&mut self) {
        // A fade-in still running is abandoned; the pause ramp starts from
        // wherever it reached.
        self.cancel_work();
        self.set_transition(TransitionState::Idle);

        let Some(active) = self.active.as_mut() else {
            return;
        };
        active.wants_playing = false;
        let track_id = active.track.id;

        let token = TransitionToken::new(self.generation);
        self.ramp_token = Some(token.clone());
        self.spawn_ramp(0.0, RampPurpose::Pause, token);

        info!(track = %track_id, "Pausing");
        self.emit(PlaybackEvent::Paused {
            track_id: track_id.get(),
            position_ms: secs_to_ms(self.position_secs),
        });
        self.publish();
        self.persist(true);
    }

    async fn resume(&mut self) {
        self.cancel_work();
        self.set_transition(TransitionState::Idle);

        let Some((session, track_id, was_paused)) = self
            .active
            .as_ref()
            .map(|a| (a.session, a.track.id, a.adapter_paused))
        else {
            return;
        };

        if was_paused {
            if let Err(e) = self.session.adapter.play(session).await {
                self.handle_adapter_error(e).await;
                return;
            }
        }
        if let Some(active) = self.active.as_mut() {
            active.wants_playing = true;
            active.adapter_paused = false;
        }

        let token = TransitionToken::new(self.generation);
        self.ramp_token = Some(token.clone());
        self.spawn_ramp(1.0, RampPurpose::Resume, token);

        info!(track = %track_id, "Resuming");
        self.emit(PlaybackEvent::Resumed {
            track_id: track_id.get(),
            position_ms: secs_to_ms(self.position_secs),
        });
        self.publish();
    }

    /// Start the track remembered from a previous run at its saved position.
    async fn resume_remembered(&mut self) {
        match self.remembered.clone() {
            Some((track, position)) if self.session.reciter.is_some() => {
                info!(track = %track.id, position, "Resuming remembered track");
                self.begin_switch(track, position).await;
            }
            _ => debug!("Toggle ignored: nothing to resume"),
        }
    }

    // ------------------------------------------------------------------
    // Navigation and seeking
    // ------------------------------------------------------------------

    async fn step(&mut self, delta: i8) {
        let base = self
            .transition
            .target()
            .or_else(|| self.active.as_ref().map(|a| a.track.id))
            .or_else(|| self.remembered.as_ref().map(|(t, _)| t.id));

        let catalog = self.session.catalog.clone();
        let destination = match base {
            None => catalog.first(),
            Some(id) if delta > 0 => catalog.next_after(id),
            Some(id) => catalog.previous_before(id),
        };

        match destination {
            Some(track) => self.play(track.id).await,
            None => debug!(from = ?base, delta, "No track in that direction"),
        }
    }

    async fn seek(&mut self, seconds: f64) {
        let Some(active) = &self.active else {
            debug!("Seek ignored: no source loaded");
            return;
        };

        let target = clamp_position(seconds, active.duration_secs);
        let session = active.session;
        let track_id = active.track.id;

        let position = Duration::try_from_secs_f64(target).unwrap_or_default();
        if let Err(e) = self.session.adapter.seek(session, position).await {
            self.handle_adapter_error(e).await;
            return;
        }

        self.position_secs = target;
        self.emit(PlaybackEvent::Seeked {
            track_id: track_id.get(),
            position_ms: secs_to_ms(target),
        });
        self.publish();
    }

    // ------------------------------------------------------------------
    // Reciter, stop and shutdown
    // ------------------------------------------------------------------

    async fn select_reciter(&mut self, reciter: Reciter) {
        info!(reciter = %reciter.id, name = %reciter.name, "Selecting reciter");
        self.cancel_work();
        self.pending = None;
        self.pause_after_switch = false;

        let stopped = self.active.as_ref().map(|a| a.track.id);
        self.release_active().await;
        self.remembered = None;
        self.position_secs = 0.0;
        self.last_error = None;
        self.set_transition(TransitionState::Idle);

        let cache = self.session.downloads.cache().clone();
        let scanned = reciter.clone();
        tokio::spawn(async move {
            cache.rescan(&scanned).await;
        });

        self.writer.save_reciter(reciter.id);
        self.writer.clear_position();

        let reciter_id = reciter.id;
        self.session.reciter = Some(reciter);
        if stopped.is_some() {
            self.emit(PlaybackEvent::Stopped {
                track_id: stopped.map(|t| t.get()),
            });
        }
        self.emit(PlaybackEvent::ReciterChanged {
            reciter_id: reciter_id.get(),
        });
        self.publish();
    }

    async fn stop(&mut self) {
        self.cancel_work();
        self.pending = None;
        self.pause_after_switch = false;
        self.persist(true);

        let Some(active) = self.active.as_ref() else {
            self.set_transition(TransitionState::Idle);
            self.publish();
            return;
        };
        let stopped = active.track.clone();
        let position = self.position_secs;
        self.release_active().await;
        self.position_secs = position;
        self.remembered = Some((stopped.clone(), position));
        self.set_transition(TransitionState::Idle);

        info!(track = %stopped.id, "Playback stopped");
        self.emit(PlaybackEvent::Stopped {
            track_id: Some(stopped.id.get()),
        });
        self.publish();
    }

    async fn shutdown(&mut self) {
        self.cancel_work();
        self.pending = None;
        self.persist(true);
        if let Some(track) = self.active.as_ref().map(|a| a.track.clone()) {
            let position = self.position_secs;
            self.release_active().await;
            self.position_secs = position;
            self.remembered = Some((track, position));
        }
        self.set_transition(TransitionState::Idle);
        self.publish();
        self.writer.flush().await;
    }

    // ------------------------------------------------------------------
    // Async completions
    // ------------------------------------------------------------------

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::RampFinished {
                generation,
                purpose,
                failure,
            } => {
                if generation != self.generation {
                    debug!(?purpose, generation, "Discarding stale ramp completion");
                    return;
                }
                if let Some(error) = failure {
                    if matches!(error, BridgeError::DeviceUnavailable(_)) {
                        self.handle_adapter_error(error).await;
                        return;
                    }
                    warn!(?purpose, error = %error, "Volume ramp failed");
                }
                self.on_ramp_finished(purpose).await;
            }
            Internal::Loaded { generation, result } => {
                if generation != self.generation {
                    if let Ok(stale) = result {
                        debug!(track = %stale.track.id, "Releasing superseded source");
                        self.release_session(stale.session).await;
                    }
                    return;
                }
                match result {
                    Ok(source) => self.on_loaded(source).await,
                    Err(error) => self.on_load_failed(error),
                }
            }
        }
    }

    async fn on_ramp_finished(&mut self, purpose: RampPurpose) {
        match purpose {
            RampPurpose::FadeOut => self.finish_fade_out().await,
            RampPurpose::FadeIn => {
                self.switch_token = None;
                self.set_transition(TransitionState::Idle);
                self.publish();
            }
            RampPurpose::Pause => {
                self.ramp_token = None;
                let Some(active) = self.active.as_ref() else {
                    return;
                };
                if active.wants_playing || active.adapter_paused {
                    return;
                }
                let session = active.session;
                match self.session.adapter.pause(session).await {
                    Ok(()) => {
                        if let Some(active) = self.active.as_mut() {
                            active.adapter_paused = true;
                        }
                    }
                    Err(e) => self.handle_adapter_error(e).await,
                }
            }
            RampPurpose::Resume => self.ramp_token = None,
        }
    }

    async fn on_tick(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        if active.adapter_paused || !active.wants_playing {
            return;
        }
        if !matches!(
            self.transition,
            TransitionState::Idle | TransitionState::FadingIn { .. }
        ) {
            return;
        }

        let session = active.session;
        let duration = active.duration_secs;
        let track_id = active.track.id;

        match self.session.adapter.state(session).await {
            Ok(PlaybackState::Completed) => {
                self.on_track_completed().await;
                return;
            }
            Ok(PlaybackState::Error { message }) => {
                warn!(track = %track_id, message = %message, "Audio source failed");
                self.cancel_work();
                self.release_active().await;
                self.fail_request(Some(track_id), PlaybackError::Internal(message));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                self.handle_adapter_error(e).await;
                return;
            }
        }

        match self.session.adapter.get_position(session).await {
            Ok(position) => {
                self.position_secs = clamp_position(position.as_secs_f64(), duration);
            }
            Err(e) => {
                self.handle_adapter_error(e).await;
                return;
            }
        }

        self.emit(PlaybackEvent::PositionChanged {
            track_id: track_id.get(),
            position_ms: secs_to_ms(self.position_secs),
            duration_ms: secs_to_ms(duration),
        });
        self.publish();
        self.persist(false);
    }

    async fn on_track_completed(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let finished = active.track.id;
        self.position_secs = active.duration_secs;
        info!(track = %finished, "Track completed");
        self.emit(PlaybackEvent::Completed {
            track_id: finished.get(),
        });

        let next = self.session.catalog.next_after(finished).cloned();
        self.release_active().await;

        match next {
            Some(track) => self.begin_switch(track, 0.0).await,
            None => {
                info!("Reached the end of the catalog");
                self.cancel_work();
                self.remembered = None;
                self.position_secs = 0.0;
                self.set_transition(TransitionState::Idle);
                self.writer.clear_position();
                self.emit(PlaybackEvent::Stopped {
                    track_id: Some(finished.get()),
                });
                self.publish();
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Invalidate every outstanding async result.
    fn cancel_work(&mut self) {
        self.generation += 1;
        if let Some(token) = self.switch_token.take() {
            token.cancel();
        }
        if let Some(token) = self.ramp_token.take() {
            token.cancel();
        }
    }

    fn spawn_ramp(&self, target: f32, purpose: RampPurpose, token: TransitionToken) {
        let Some(active) = &self.active else {
            return;
        };

        let adapter = self.session.adapter.clone();
        let session = active.session;
        let level = active.level.clone();
        let duration = self.session.config.fade_duration;
        let step = self.session.config.fade_step;
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let outcome = ramp(
                adapter.as_ref(),
                session,
                &level,
                target,
                duration,
                step,
                &token,
            )
            .await;

            let failure = match outcome {
                RampOutcome::Completed => None,
                RampOutcome::Cancelled => return,
                RampOutcome::Failed(e) => Some(e),
            };
            let _ = internal.send(Internal::RampFinished {
                generation: token.generation(),
                purpose,
                failure,
            });
        });
    }

    async fn handle_adapter_error(&mut self, error: BridgeError) {
        match error {
            BridgeError::DeviceUnavailable(message) => self.device_lost(message).await,
            BridgeError::UnknownSource(_) => {
                warn!(error = %error, "Adapter lost the current source");
                let track = self.active.as_ref().map(|a| a.track.id);
                self.cancel_work();
                self.release_active().await;
                self.fail_request(track, PlaybackError::NoSourceLoaded);
            }
            other => warn!(error = %other, "Audio adapter call failed"),
        }
    }

    async fn device_lost(&mut self, message: String) {
        warn!(message = %message, "Audio output device lost, pausing");
        self.cancel_work();
        self.pending = None;
        self.pause_after_switch = false;

        if let Some(active) = self.active.as_mut() {
            active.wants_playing = false;
            let session = active.session;
            if !active.adapter_paused {
                if let Err(e) = self.session.adapter.pause(session).await {
                    debug!(error = %e, "Pause after device loss failed");
                }
                if let Some(active) = self.active.as_mut() {
                    active.adapter_paused = true;
                }
            }
        }

        self.set_transition(TransitionState::Idle);
        self.emit(PlaybackEvent::DeviceLost { message });
        self.publish();
        self.persist(true);
    }

    async fn release_active(&mut self) {
        if let Some(active) = self.active.take() {
            self.position_secs = 0.0;
            self.release_session(active.session).await;
        }
    }

    async fn release_session(&self, session: PlaybackSessionId) {
        let adapter = &self.session.adapter;
        if let Err(e) = adapter.stop(session).await {
            debug!(error = %e, "Stopping source failed");
        }
        if let Err(e) = adapter.unload(session).await {
            debug!(error = %e, "Unloading source failed");
        }
    }

    fn report_rejected(&mut self, id: TrackId, error: PlaybackError) {
        warn!(track = %id, error = %error, "Play request rejected");
        self.last_error = Some(error.user_message());
        self.emit(PlaybackEvent::Error {
            track_id: Some(id.get()),
            message: error.user_message(),
            recoverable: error.is_recoverable(),
        });
        self.publish();
    }

    fn set_transition(&mut self, next: TransitionState) {
        if self.transition == next {
            return;
        }
        let phase_changed = self.transition.phase() != next.phase();
        self.transition = next;
        if phase_changed {
            self.emit(PlaybackEvent::PhaseChanged {
                phase: self.transition.phase(),
                target: self.transition.target().map(|t| t.get()),
            });
        }
    }

    fn duration_secs(&self) -> f64 {
        self.active.as_ref().map_or(0.0, |a| a.duration_secs)
    }

    fn is_playing(&self) -> bool {
        match &self.transition {
            TransitionState::FadingOut { .. } | TransitionState::Loading { .. } => {
                !self.pause_after_switch
            }
            TransitionState::FadingIn { .. } => true,
            TransitionState::Idle => self.active.as_ref().map_or(false, |a| a.wants_playing),
            TransitionState::Error { .. } => false,
        }
    }

    fn publish(&self) {
        let (current_track, position_secs, duration_secs) = if let Some(active) = &self.active {
            (
                Some(active.track.clone()),
                self.position_secs,
                active.duration_secs,
            )
        } else if let (TransitionState::Loading { .. }, Some(pending)) =
            (&self.transition, &self.pending)
        {
            (
                Some(pending.track.clone()),
                0.0,
                pending.track.expected_duration_secs.unwrap_or(0.0),
            )
        } else if let Some((track, position)) = &self.remembered {
            (
                Some(track.clone()),
                *position,
                track.expected_duration_secs.unwrap_or(0.0),
            )
        } else {
            (None, 0.0, 0.0)
        };

        self.state_tx.send_replace(PlaybackSnapshot {
            current_track,
            position_secs,
            duration_secs,
            is_playing: self.is_playing(),
            transition: self.transition.clone(),
            reciter: self.session.reciter.as_ref().map(|r| r.id),
            last_error: self.last_error.clone(),
        });
    }

    /// Save the resume position, at most once per `persist_interval` unless
    /// forced.
    fn persist(&mut self, force: bool) {
        let Some(active) = &self.active else {
            return;
        };
        if !force {
            if let Some(last) = self.last_persist {
                if last.elapsed() < self.session.config.persist_interval {
                    return;
                }
            }
        }

        self.writer.save_position(active.track.id, self.position_secs);
        self.last_persist = Some(Instant::now());
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.session.event_bus.emit(CoreEvent::Playback(event));
    }
}

/// Download (or reuse) the track's file and open it, paused at volume 0.
///
/// A file the adapter rejects as undecodable is deleted and downloaded
/// again exactly once. Only the download waits give way to `token`; once
/// `prepare` has been issued the load runs to completion, so a source the
/// adapter created is always handed back to the caller. `None` means the
/// load was abandoned before any source existed.
async fn load_track(
    adapter: Arc<dyn PlaybackAdapter>,
    downloads: DownloadCoordinator,
    reciter: Reciter,
    track: Track,
    start_secs: f64,
    token: &TransitionToken,
) -> Option<Result<LoadedSource, PlaybackError>> {
    let path = match unless_cancelled(token, downloads.ensure_available(&reciter, track.id)).await? {
        Ok(path) => path,
        Err(e) => return Some(Err(e.into())),
    };

    let prepared = match adapter.prepare(playback_request(&path, &track, &reciter, start_secs)).await {
        Ok(prepared) => prepared,
        Err(BridgeError::Decode(reason)) => {
            warn!(track = %track.id, reason = %reason, "Cached file failed to open");
            let path = match unless_cancelled(token, downloads.redownload(&reciter, track.id)).await? {
                Ok(path) => path,
                Err(e) => return Some(Err(e.into())),
            };
            match adapter
                .prepare(playback_request(&path, &track, &reciter, start_secs))
                .await
            {
                Ok(prepared) => prepared,
                Err(e) => return Some(Err(e.into())),
            }
        }
        Err(e) => return Some(Err(e.into())),
    };

    downloads.cache().touch(&reciter, track.id).await;

    let duration_secs = prepared
        .duration
        .map(|d| d.as_secs_f64())
        .or(track.expected_duration_secs)
        .unwrap_or(0.0);

    Some(Ok(LoadedSource {
        track,
        session: prepared.session,
        duration_secs,
        start_secs,
    }))
}

async fn unless_cancelled<T>(
    token: &TransitionToken,
    work: impl std::future::Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        output = work => Some(output),
    }
}

fn playback_request(
    path: &std::path::Path,
    track: &Track,
    reciter: &Reciter,
    start_secs: f64,
) -> PlaybackRequest {
    PlaybackRequest::new(path)
        .with_options(PlaybackOptions {
            start_position: Duration::try_from_secs_f64(start_secs).unwrap_or_default(),
            initial_volume: 0.0,
        })
        .with_metadata(PlaybackMetadata {
            track_id: Some(track.id.to_string()),
            title: Some(track.display_title()),
            artist: Some(reciter.name.clone()),
            extra: Default::default(),
        })
}

/// Clamp a requested position into `[0, duration]`. NaN maps to 0; an
/// unknown (zero) duration only clamps the lower bound.
fn clamp_position(seconds: f64, duration: f64) -> f64 {
    if seconds.is_nan() {
        return 0.0;
    }
    let upper = if duration > 0.0 { duration } else { f64::MAX };
    seconds.clamp(0.0, upper)
}

fn secs_to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}
