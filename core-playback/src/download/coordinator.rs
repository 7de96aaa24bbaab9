//! # Download Coordinator
//!
//! Single-flight fetching of track audio into the cache.
//!
//! Every (reciter, track) key has at most one transfer task. The task is
//! spawned on the runtime and owned by the coordinator, not by whoever asked
//! first; every caller holds a `watch` receiver and observes the same
//! outcome. A task removes itself from the table and publishes its final
//! state under the same lock, so a late caller either joins it or starts a
//! fresh task that re-checks the cache before touching the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::storage::FileSystemAccess;
use core_library::{Reciter, ReciterId, TrackId};
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use core_runtime::logging::display_file;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::config::{DownloadConfig, DOWNLOAD_CHUNK_SIZE};
use super::progress::{
    BulkOutcome, BulkProgress, DownloadSnapshot, DownloadState, ProgressTracker,
};
use crate::cache::{CacheLayout, CacheStore};
use crate::error::DownloadError;

type TaskKey = (ReciterId, TrackId);

struct ActiveTask {
    id: u64,
    receiver: watch::Receiver<DownloadSnapshot>,
}

impl ActiveTask {
    /// The sender is dropped without a final publish only if the task
    /// panicked or the runtime shut down.
    fn is_abandoned(&self) -> bool {
        self.receiver.has_changed().is_err()
    }
}

struct Inner {
    http: Arc<dyn HttpClient>,
    fs: Arc<dyn FileSystemAccess>,
    cache: Arc<CacheStore>,
    config: DownloadConfig,
    event_bus: Option<EventBus>,
    tasks: Mutex<HashMap<TaskKey, ActiveTask>>,
    next_task_id: AtomicU64,
}

/// Cloneable handle to the shared download table.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

impl DownloadCoordinator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        cache: Arc<CacheStore>,
        config: DownloadConfig,
    ) -> Self {
        Self::build(http, fs, cache, config, None)
    }

    pub fn with_event_bus(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        cache: Arc<CacheStore>,
        config: DownloadConfig,
        event_bus: EventBus,
    ) -> Self {
        Self::build(http, fs, cache, config, Some(event_bus))
    }

    fn build(
        http: Arc<dyn HttpClient>,
        fs: Arc<dyn FileSystemAccess>,
        cache: Arc<CacheStore>,
        config: DownloadConfig,
        event_bus: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                fs,
                cache,
                config,
                event_bus,
                tasks: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    /// Path of a complete local copy, downloading it first if needed.
    ///
    /// Concurrent callers for the same key share one transfer and receive
    /// the same result.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id, track = %track))]
    pub async fn ensure_available(
        &self,
        reciter: &Reciter,
        track: TrackId,
    ) -> Result<PathBuf, DownloadError> {
        if let Some(path) = self.inner.cache.path_for(reciter, track).await {
            debug!("Cache hit");
            return Ok(path);
        }

        let receiver = self.join_or_start(reciter, track);
        wait_for_outcome(receiver).await
    }

    /// Delete the cached copy and fetch it again. Used once per play request
    /// when the cached file fails to open.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id, track = %track))]
    pub async fn redownload(
        &self,
        reciter: &Reciter,
        track: TrackId,
    ) -> Result<PathBuf, DownloadError> {
        warn!("Re-downloading corrupt cached file");
        self.inner.cache.invalidate(reciter, track).await;
        self.ensure_available(reciter, track).await
    }

    /// Current progress of an in-flight download, if any.
    pub fn progress(&self, reciter: &Reciter, track: TrackId) -> Option<f32> {
        self.inner
            .tasks
            .lock()
            .get(&(reciter.id, track))
            .map(|task| task.receiver.borrow().progress)
    }

    /// Watch an in-flight download.
    pub fn subscribe(
        &self,
        reciter: &Reciter,
        track: TrackId,
    ) -> Option<watch::Receiver<DownloadSnapshot>> {
        self.inner
            .tasks
            .lock()
            .get(&(reciter.id, track))
            .map(|task| task.receiver.clone())
    }

    pub fn active_downloads(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Ensure every listed track sequentially, one at a time.
    ///
    /// Yields one `BulkProgress` per track. A failed track does not stop the
    /// batch.
    pub fn ensure_all_available(
        &self,
        reciter: Reciter,
        tracks: Vec<TrackId>,
    ) -> BoxStream<'static, BulkProgress> {
        let total = tracks.len() as u32;
        info!(reciter = %reciter.id, total, "Starting bulk download");

        let state = (self.clone(), reciter, tracks.into_iter(), 0u32);
        stream::unfold(state, move |(coordinator, reciter, mut pending, completed)| async move {
            let track = pending.next()?;

            let outcome = if coordinator.inner.cache.has(&reciter, track).await {
                BulkOutcome::AlreadyCached
            } else {
                match coordinator.ensure_available(&reciter, track).await {
                    Ok(_) => BulkOutcome::Downloaded,
                    Err(e) => {
                        warn!(track = %track, error = %e, "Bulk download skipped track");
                        BulkOutcome::Failed(e)
                    }
                }
            };

            let completed = completed + 1;
            coordinator.inner.emit(DownloadEvent::BulkProgress {
                reciter_id: reciter.id.get(),
                completed,
                total,
            });

            let progress = BulkProgress {
                completed,
                total,
                track,
                outcome,
            };
            Some((progress, (coordinator, reciter, pending, completed)))
        })
        .boxed()
    }

    fn join_or_start(
        &self,
        reciter: &Reciter,
        track: TrackId,
    ) -> watch::Receiver<DownloadSnapshot> {
        let key = (reciter.id, track);
        let mut tasks = self.inner.tasks.lock();

        if let Some(task) = tasks.get(&key) {
            if !task.is_abandoned() {
                debug!("Joining in-flight download");
                return task.receiver.clone();
            }
            warn!(reciter = %reciter.id, track = %track, "Replacing abandoned download task");
        }

        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(DownloadSnapshot::pending());
        tasks.insert(
            key,
            ActiveTask {
                id,
                receiver: receiver.clone(),
            },
        );

        let inner = self.inner.clone();
        let reciter = reciter.clone();
        tokio::spawn(async move {
            inner.run_task(id, reciter, track, sender).await;
        });

        receiver
    }
}

async fn wait_for_outcome(
    mut receiver: watch::Receiver<DownloadSnapshot>,
) -> Result<PathBuf, DownloadError> {
    loop {
        match &receiver.borrow_and_update().state {
            DownloadState::Done(path) => return Ok(path.clone()),
            DownloadState::Failed(err) => return Err(err.clone()),
            DownloadState::Pending | DownloadState::InFlight => {}
        }

        if receiver.changed().await.is_err() {
            return match &receiver.borrow().state {
                DownloadState::Done(path) => Ok(path.clone()),
                DownloadState::Failed(err) => Err(err.clone()),
                _ => Err(DownloadError::Interrupted),
            };
        }
    }
}

impl Inner {
    async fn run_task(
        &self,
        id: u64,
        reciter: Reciter,
        track: TrackId,
        sender: watch::Sender<DownloadSnapshot>,
    ) {
        let result = self.transfer(&reciter, track, &sender).await;

        let state = match &result {
            Ok((path, _)) => DownloadState::Done(path.clone()),
            Err(err) => DownloadState::Failed(err.clone()),
        };

        {
            let mut tasks = self.tasks.lock();
            let key = (reciter.id, track);
            if tasks.get(&key).map_or(false, |task| task.id == id) {
                tasks.remove(&key);
            }
            sender.send_modify(|snapshot| {
                if matches!(state, DownloadState::Done(_)) {
                    snapshot.progress = 1.0;
                }
                snapshot.state = state;
            });
        }

        match result {
            Ok((path, bytes)) => {
                info!(
                    reciter = %reciter.id,
                    track = %track,
                    file = %display_file(&path),
                    bytes,
                    "Download completed"
                );
                self.emit(DownloadEvent::Completed {
                    reciter_id: reciter.id.get(),
                    track_id: track.get(),
                    bytes,
                });
            }
            Err(err) => {
                warn!(reciter = %reciter.id, track = %track, error = %err, "Download failed");
                self.emit(DownloadEvent::Failed {
                    reciter_id: reciter.id.get(),
                    track_id: track.get(),
                    message: err.to_string(),
                });
            }
        }
    }

    async fn transfer(
        &self,
        reciter: &Reciter,
        track: TrackId,
        sender: &watch::Sender<DownloadSnapshot>,
    ) -> Result<(PathBuf, u64), DownloadError> {
        let layout = self.cache.layout();
        let final_path = layout.track_path(reciter, track);

        // A previous task may have finished between the caller's cache
        // check and this task's registration.
        if self.cache.has(reciter, track).await {
            let size = self
                .fs
                .metadata(&final_path)
                .await
                .map(|m| m.size)
                .unwrap_or(0);
            return Ok((final_path, size));
        }

        sender.send_modify(|snapshot| snapshot.state = DownloadState::InFlight);
        self.emit(DownloadEvent::Started {
            reciter_id: reciter.id.get(),
            track_id: track.get(),
        });

        let temp_path = CacheLayout::temp_path(&final_path);
        let url = layout.remote_url(reciter, track);
        let mut tracker = ProgressTracker::default();
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(url = %url, attempt, "Requesting audio");

            match self
                .attempt(reciter, track, &url, &final_path, &temp_path, &mut tracker, sender)
                .await
            {
                Ok(bytes) => {
                    if self.cache.record_completion(reciter, track, bytes).await.is_none() {
                        return Err(DownloadError::Storage(format!(
                            "{} was removed before it could be cached",
                            display_file(&final_path)
                        )));
                    }
                    return Ok((final_path, bytes));
                }
                Err(err) => {
                    self.discard_temp(&temp_path).await;

                    if err.is_transient() && attempt < self.config.max_attempts {
                        let delay = self.config.backoff_for(attempt);
                        warn!(
                            track = %track,
                            attempt,
                            error = %err,
                            retry_in_ms = delay.as_millis() as u64,
                            "Transient download failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        reciter: &Reciter,
        track: TrackId,
        url: &str,
        final_path: &Path,
        temp_path: &Path,
        tracker: &mut ProgressTracker,
        sender: &watch::Sender<DownloadSnapshot>,
    ) -> Result<u64, DownloadError> {
        if let Some(dir) = final_path.parent() {
            self.fs
                .create_dir_all(dir)
                .await
                .map_err(DownloadError::from_bridge_storage)?;
        }

        let mut request = HttpRequest::get(url).user_agent(self.config.user_agent.clone());
        if let Some(timeout) = self.config.request_timeout {
            request = request.timeout(timeout);
        }

        let response = self
            .http
            .download_stream(request)
            .await
            .map_err(DownloadError::from_bridge_network)?;
        if !response.is_success() {
            return Err(DownloadError::HttpStatus(response.status));
        }

        tracker.restart(response.content_length);
        let mut body = response.body;
        let mut writer = self
            .fs
            .open_write_stream(temp_path)
            .await
            .map_err(DownloadError::from_bridge_storage)?;

        let mut buffer = vec![0u8; DOWNLOAD_CHUNK_SIZE];
        loop {
            let read = body
                .read(&mut buffer)
                .await
                .map_err(|e| DownloadError::Network(e.to_string()))?;
            if read == 0 {
                break;
            }

            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| DownloadError::Storage(e.to_string()))?;

            if let Some(step) = tracker.record(read) {
                sender.send_modify(|snapshot| {
                    snapshot.progress = snapshot.progress.max(step.fraction);
                });
                if let Some(percent) = step.percent {
                    self.emit(DownloadEvent::Progress {
                        reciter_id: reciter.id.get(),
                        track_id: track.get(),
                        percent,
                    });
                }
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))?;
        writer
            .shutdown()
            .await
            .map_err(|e| DownloadError::Storage(e.to_string()))?;
        drop(writer);

        let bytes = tracker.received();
        if bytes == 0 {
            return Err(DownloadError::Network("empty response body".to_string()));
        }

        self.fs
            .rename(temp_path, final_path)
            .await
            .map_err(DownloadError::from_bridge_storage)?;

        Ok(bytes)
    }

    async fn discard_temp(&self, temp_path: &Path) {
        match self.fs.exists(temp_path).await {
            Ok(true) => {
                if let Err(e) = self.fs.delete_file(temp_path).await {
                    warn!(file = %display_file(temp_path), error = %e, "Failed to discard partial download");
                }
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "Cannot check partial download"),
        }
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Download(event));
        }
    }
}
