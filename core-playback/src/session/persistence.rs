//! Resume state persisted through the settings bridge.
//!
//! All values are plain scalars. Read failures fall back to defaults and
//! write failures are logged; neither interrupts playback.

use std::sync::Arc;

use bridge_traits::storage::SettingsStore;
use core_library::{ReciterId, TrackId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub const KEY_LAST_TRACK: &str = "playback.last_track_id";
pub const KEY_LAST_POSITION: &str = "playback.last_position_secs";
pub const KEY_RECITER: &str = "library.reciter_id";
pub const KEY_CACHE_BUDGET: &str = "cache.budget_bytes";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeState {
    pub last_track: Option<TrackId>,
    pub position_secs: f64,
    pub reciter: Option<ReciterId>,
    pub budget_bytes: Option<u64>,
}

#[derive(Clone)]
pub struct ResumeStore {
    settings: Arc<dyn SettingsStore>,
}

impl ResumeStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    pub async fn load(&self) -> ResumeState {
        let last_track = self
            .read_i64(KEY_LAST_TRACK)
            .await
            .and_then(|id| u32::try_from(id).ok())
            .filter(|id| *id > 0)
            .map(TrackId);

        let position_secs = match self.settings.get_f64(KEY_LAST_POSITION).await {
            Ok(Some(secs)) if secs.is_finite() && secs >= 0.0 => secs,
            Ok(_) => 0.0,
            Err(e) => {
                warn!(key = KEY_LAST_POSITION, error = %e, "Failed to read setting");
                0.0
            }
        };

        let reciter = self
            .read_i64(KEY_RECITER)
            .await
            .and_then(|id| u32::try_from(id).ok())
            .map(ReciterId);

        let budget_bytes = self
            .read_i64(KEY_CACHE_BUDGET)
            .await
            .and_then(|bytes| u64::try_from(bytes).ok())
            .filter(|bytes| *bytes > 0);

        let state = ResumeState {
            last_track,
            position_secs,
            reciter,
            budget_bytes,
        };
        debug!(?state, "Resume state loaded");
        state
    }

    pub async fn save_position(&self, track: TrackId, position_secs: f64) {
        self.write_i64(KEY_LAST_TRACK, i64::from(track.get())).await;
        if let Err(e) = self
            .settings
            .set_f64(KEY_LAST_POSITION, position_secs.max(0.0))
            .await
        {
            warn!(key = KEY_LAST_POSITION, error = %e, "Failed to persist setting");
        }
    }

    pub async fn clear_position(&self) {
        for key in [KEY_LAST_TRACK, KEY_LAST_POSITION] {
            if let Err(e) = self.settings.delete(key).await {
                warn!(key, error = %e, "Failed to delete setting");
            }
        }
    }

    pub async fn save_reciter(&self, reciter: ReciterId) {
        self.write_i64(KEY_RECITER, i64::from(reciter.get())).await;
    }

    pub async fn save_budget(&self, bytes: u64) {
        self.write_i64(KEY_CACHE_BUDGET, i64::try_from(bytes).unwrap_or(i64::MAX))
            .await;
    }

    async fn read_i64(&self, key: &str) -> Option<i64> {
        match self.settings.get_i64(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read setting");
                None
            }
        }
    }

    async fn write_i64(&self, key: &str, value: i64) {
        if let Err(e) = self.settings.set_i64(key, value).await {
            warn!(key, error = %e, "Failed to persist setting");
        }
    }
}

enum ResumeWrite {
    Position(TrackId, f64),
    ClearPosition,
    Reciter(ReciterId),
    Flush(oneshot::Sender<()>),
}

/// Applies resume writes on a background task, in the order they were
/// queued, so a slow settings store never stalls the caller.
#[derive(Clone)]
pub(crate) struct ResumeWriter {
    tx: mpsc::UnboundedSender<ResumeWrite>,
}

impl ResumeWriter {
    pub(crate) fn spawn(store: ResumeStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                match write {
                    ResumeWrite::Position(track, secs) => store.save_position(track, secs).await,
                    ResumeWrite::ClearPosition => store.clear_position().await,
                    ResumeWrite::Reciter(id) => store.save_reciter(id).await,
                    ResumeWrite::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    pub(crate) fn save_position(&self, track: TrackId, position_secs: f64) {
        self.queue(ResumeWrite::Position(track, position_secs));
    }

    pub(crate) fn clear_position(&self) {
        self.queue(ResumeWrite::ClearPosition);
    }

    pub(crate) fn save_reciter(&self, reciter: ReciterId) {
        self.queue(ResumeWrite::Reciter(reciter));
    }

    /// Wait until every write queued before this call has been applied.
    pub(crate) async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.queue(ResumeWrite::Flush(ack));
        let _ = done.await;
    }

    fn queue(&self, write: ResumeWrite) {
        if self.tx.send(write).is_err() {
            warn!("Resume writer stopped; dropping write");
        }
    }
}
