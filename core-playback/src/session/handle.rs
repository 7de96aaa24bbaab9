//! Outbound control surface of the player.

use core_library::{Reciter, TrackId};
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use tokio::sync::{mpsc, oneshot, watch};

use super::scheduler::Command;
use super::state::PlaybackSnapshot;
use crate::error::{PlaybackError, Result};

/// Cloneable handle to a running control loop.
///
/// Every command is queued and applied in order on the loop's task, so the
/// methods never block and may be called from any thread. They only fail
/// once the loop has shut down.
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackSnapshot>,
    events: EventBus,
}

impl PlayerHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<PlaybackSnapshot>,
        events: EventBus,
    ) -> Self {
        Self {
            commands,
            state,
            events,
        }
    }

    /// Switch to `track`, or resume it if it is current and paused.
    pub fn play(&self, track: TrackId) -> Result<()> {
        self.send(Command::Play(track))
    }

    pub fn play_pause(&self) -> Result<()> {
        self.send(Command::TogglePlayPause)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn next(&self) -> Result<()> {
        self.send(Command::Next)
    }

    pub fn previous(&self) -> Result<()> {
        self.send(Command::Previous)
    }

    /// Seek to `seconds`, clamped to the loaded track.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.send(Command::Seek(seconds))
    }

    pub fn select_reciter(&self, reciter: Reciter) -> Result<()> {
        self.send(Command::SelectReciter(reciter))
    }

    /// Release the current source, keeping its position for a later resume.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Stop the loop after persisting the position. Resolves once it exits.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(Command::Shutdown(ack))?;
        done.await.map_err(|_| PlaybackError::ControlLoopClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver of every published snapshot.
    pub fn watch(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.state.clone()
    }

    /// Core event stream (playback, download and cache events).
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&PlaybackSnapshot) -> bool,
    ) -> Result<PlaybackSnapshot> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| PlaybackError::ControlLoopClosed)?;
        Ok(snapshot.clone())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| PlaybackError::ControlLoopClosed)
    }
}
