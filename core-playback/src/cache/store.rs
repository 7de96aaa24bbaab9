//! # Cache Store
//!
//! In-memory index of complete cached files, one index per reciter, with
//! least-recently-used eviction under a byte budget.
//!
//! Each reciter's index sits behind its own async mutex that is held across
//! the filesystem effects of record, evict, clear and invalidate, so budget
//! enforcement never runs concurrently with itself for one reciter. The index
//! is built lazily by a directory scan the first time a reciter is touched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use core_library::{Reciter, ReciterId, TrackId};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::display_file;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use super::layout::CacheLayout;
use super::stats::{CacheStats, ClearReport, EvictionReport};

/// One complete cached file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub track: TrackId,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Millis since epoch
    pub last_accessed: i64,
    /// Store-wide access counter; 0 for entries rebuilt from a scan.
    pub sequence: u64,
}

impl CacheEntry {
    fn recency_key(&self) -> (i64, u64, TrackId) {
        (self.last_accessed, self.sequence, self.track)
    }
}

#[derive(Debug)]
struct ContainerIndex {
    reciter_id: ReciterId,
    dir: PathBuf,
    entries: HashMap<TrackId, CacheEntry>,
    scanned: bool,
}

impl ContainerIndex {
    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

type SharedIndex = Arc<AsyncMutex<ContainerIndex>>;

pub struct CacheStore {
    fs: Arc<dyn FileSystemAccess>,
    layout: CacheLayout,
    budget_bytes: u64,
    clock: Arc<dyn Clock>,
    event_bus: Option<EventBus>,
    containers: Mutex<HashMap<ReciterId, SharedIndex>>,
    access_seq: AtomicU64,
}

impl CacheStore {
    pub fn new(
        fs: Arc<dyn FileSystemAccess>,
        layout: CacheLayout,
        budget_bytes: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fs,
            layout,
            budget_bytes,
            clock,
            event_bus: None,
            containers: Mutex::new(HashMap::new()),
            access_seq: AtomicU64::new(1),
        }
    }

    /// Publish eviction and clear events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget_bytes
    }

    /// True iff a complete cached file is indexed for this track.
    pub async fn has(&self, reciter: &Reciter, track: TrackId) -> bool {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;
        index.entries.contains_key(&track)
    }

    /// Local path of the cached file, only when `has` would return true.
    pub async fn path_for(&self, reciter: &Reciter, track: TrackId) -> Option<PathBuf> {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;
        index.entries.get(&track).map(|e| e.path.clone())
    }

    /// Index a freshly completed download and enforce the budget.
    ///
    /// The completed track is never evicted by this call. Returns `None`
    /// without indexing anything when the file is no longer on disk, which
    /// happens when a clear ran between the final rename and this call.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id))]
    pub async fn record_completion(
        &self,
        reciter: &Reciter,
        track: TrackId,
        size_bytes: u64,
    ) -> Option<EvictionReport> {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;

        let path = self.layout.track_path(reciter, track);
        match self.fs.metadata(&path).await {
            Ok(metadata) if !metadata.is_directory => {}
            Ok(_) | Err(_) => {
                warn!(file = %display_file(&path), "Completed download vanished before indexing");
                index.entries.remove(&track);
                return None;
            }
        }

        let entry = CacheEntry {
            track,
            path,
            size_bytes,
            last_accessed: self.now_millis(),
            sequence: self.next_sequence(),
        };
        debug!(track = %track, size_bytes, "Recording cached track");
        index.entries.insert(track, entry);

        Some(self.evict_locked(&mut index, Some(track)).await)
    }

    /// Mark a cached track as just played. Returns false if it is not cached.
    pub async fn touch(&self, reciter: &Reciter, track: TrackId) -> bool {
        let now = self.now_millis();
        let sequence = self.next_sequence();

        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;

        match index.entries.get_mut(&track) {
            Some(entry) => {
                entry.last_accessed = now;
                entry.sequence = sequence;
                true
            }
            None => false,
        }
    }

    /// Evict least-recently-used entries until the container fits the budget.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id))]
    pub async fn enforce_budget(
        &self,
        reciter: &Reciter,
        protect: Option<TrackId>,
    ) -> EvictionReport {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;
        self.evict_locked(&mut index, protect).await
    }

    /// Drop one entry and delete its file. Used before re-downloading a
    /// corrupt asset.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id))]
    pub async fn invalidate(&self, reciter: &Reciter, track: TrackId) -> bool {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;

        let existed = index.entries.remove(&track).is_some();
        let path = self.layout.track_path(reciter, track);
        match self.fs.exists(&path).await {
            Ok(true) => {
                if let Err(e) = self.fs.delete_file(&path).await {
                    warn!(file = %display_file(&path), error = %e, "Failed to delete invalidated file");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(file = %display_file(&path), error = %e, "Cannot check invalidated file"),
        }

        info!(track = %track, existed, "Cache entry invalidated");
        existed
    }

    /// Delete every cached file of one reciter.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id))]
    pub async fn clear(&self, reciter: &Reciter) -> ClearReport {
        let index = self.container(reciter);
        let report = {
            let mut index = index.lock().await;
            self.clear_locked(&mut index).await
        };

        info!(files = report.files_removed, bytes = report.bytes_freed, "Reciter cache cleared");
        self.emit(CacheEvent::Cleared {
            reciter_id: Some(reciter.id.get()),
            files_removed: report.files_removed,
        });
        report
    }

    /// Delete every cached file under the cache root, including directories
    /// of reciters this process has not touched yet.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> ClearReport {
        let known: Vec<SharedIndex> = self.containers.lock().values().cloned().collect();

        let mut report = ClearReport::default();
        let mut known_dirs = HashSet::new();
        for index in known {
            let mut index = index.lock().await;
            known_dirs.insert(index.dir.clone());
            report.absorb(self.clear_locked(&mut index).await);
        }

        let root = self.layout.root().to_path_buf();
        if matches!(self.fs.exists(&root).await, Ok(true)) {
            match self.fs.list_directory(&root).await {
                Ok(children) => {
                    for child in children {
                        if known_dirs.contains(&child) {
                            continue;
                        }
                        report.absorb(self.remove_unindexed(&child).await);
                    }
                }
                Err(e) => warn!(error = %e, "Cannot list cache root"),
            }
        }

        info!(files = report.files_removed, bytes = report.bytes_freed, "All caches cleared");
        self.emit(CacheEvent::Cleared {
            reciter_id: None,
            files_removed: report.files_removed,
        });
        report
    }

    /// Rebuild the reciter's index from disk.
    ///
    /// Entries whose file is unchanged keep their recency.
    #[instrument(skip(self, reciter), fields(reciter = %reciter.id))]
    pub async fn rescan(&self, reciter: &Reciter) -> usize {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.scan(&mut index).await;
        index.entries.len()
    }

    /// Refresh the index from disk and summarise it.
    pub async fn stats(&self, reciter: &Reciter) -> CacheStats {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.scan(&mut index).await;

        CacheStats {
            reciter_id: reciter.id,
            entries: index.entries.len(),
            total_bytes: index.total_bytes(),
            budget_bytes: self.budget_bytes,
            calculated_at: self.now_millis(),
        }
    }

    /// Snapshot of the indexed entries, oldest first.
    pub async fn entries(&self, reciter: &Reciter) -> Vec<CacheEntry> {
        let index = self.container(reciter);
        let mut index = index.lock().await;
        self.ensure_scanned(&mut index).await;

        let mut entries: Vec<CacheEntry> = index.entries.values().cloned().collect();
        entries.sort_by_key(CacheEntry::recency_key);
        entries
    }

    fn container(&self, reciter: &Reciter) -> SharedIndex {
        let mut containers = self.containers.lock();
        containers
            .entry(reciter.id)
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(ContainerIndex {
                    reciter_id: reciter.id,
                    dir: self.layout.reciter_dir(reciter),
                    entries: HashMap::new(),
                    scanned: false,
                }))
            })
            .clone()
    }

    async fn ensure_scanned(&self, index: &mut ContainerIndex) {
        if !index.scanned {
            self.scan(index).await;
        }
    }

    async fn scan(&self, index: &mut ContainerIndex) {
        // Temporaries are only swept on the first scan; later scans may run
        // while a transfer is writing one.
        let sweep_temps = !index.scanned;
        index.scanned = true;

        let files = match self.fs.exists(&index.dir).await {
            Ok(true) => match self.fs.list_directory(&index.dir).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(dir = %index.dir.display(), error = %e, "Cannot list cache directory");
                    return;
                }
            },
            Ok(false) => {
                index.entries.clear();
                return;
            }
            Err(e) => {
                warn!(dir = %index.dir.display(), error = %e, "Cannot check cache directory");
                return;
            }
        };

        let previous = std::mem::take(&mut index.entries);
        for path in files {
            if CacheLayout::is_temp_file(&path) {
                if sweep_temps {
                    match self.fs.delete_file(&path).await {
                        Ok(()) => debug!(file = %display_file(&path), "Removed leftover partial download"),
                        Err(e) => warn!(file = %display_file(&path), error = %e, "Failed to remove partial download"),
                    }
                }
                continue;
            }

            let Some(track) = self.layout.parse_track_file(&path) else {
                continue;
            };

            let metadata = match self.fs.metadata(&path).await {
                Ok(m) if !m.is_directory && m.size > 0 => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %display_file(&path), error = %e, "Cannot stat cached file");
                    continue;
                }
            };

            let entry = match previous.get(&track) {
                Some(known) if known.size_bytes == metadata.size => known.clone(),
                _ => CacheEntry {
                    track,
                    path,
                    size_bytes: metadata.size,
                    last_accessed: metadata.modified_at.unwrap_or(0),
                    sequence: 0,
                },
            };
            index.entries.insert(track, entry);
        }

        debug!(
            reciter = %index.reciter_id,
            entries = index.entries.len(),
            "Cache directory scanned"
        );
    }

    async fn evict_locked(
        &self,
        index: &mut ContainerIndex,
        protect: Option<TrackId>,
    ) -> EvictionReport {
        let mut report = EvictionReport {
            total_bytes: index.total_bytes(),
            ..Default::default()
        };
        if report.total_bytes <= self.budget_bytes {
            return report;
        }

        let mut candidates: Vec<CacheEntry> = index
            .entries
            .values()
            .filter(|e| Some(e.track) != protect)
            .cloned()
            .collect();
        candidates.sort_by_key(CacheEntry::recency_key);

        for candidate in candidates {
            if report.total_bytes <= self.budget_bytes {
                break;
            }

            let removed = match self.fs.delete_file(&candidate.path).await {
                Ok(()) => true,
                Err(e) => {
                    // Already gone counts as removed.
                    let gone = matches!(self.fs.exists(&candidate.path).await, Ok(false));
                    if !gone {
                        warn!(
                            file = %display_file(&candidate.path),
                            error = %e,
                            "Failed to evict cached file"
                        );
                    }
                    gone
                }
            };

            if !removed {
                report.failed.push(candidate.track);
                continue;
            }

            index.entries.remove(&candidate.track);
            report.total_bytes = report.total_bytes.saturating_sub(candidate.size_bytes);
            report.bytes_freed += candidate.size_bytes;
            report.evicted.push(candidate.track);

            debug!(track = %candidate.track, bytes = candidate.size_bytes, "Evicted cached track");
            self.emit(CacheEvent::Evicted {
                reciter_id: index.reciter_id.get(),
                track_id: candidate.track.get(),
                bytes: candidate.size_bytes,
            });
        }

        if !report.evicted.is_empty() {
            info!(
                reciter = %index.reciter_id,
                evicted = report.evicted.len(),
                bytes_freed = report.bytes_freed,
                total_bytes = report.total_bytes,
                "Cache budget enforced"
            );
        }
        report
    }

    async fn clear_locked(&self, index: &mut ContainerIndex) -> ClearReport {
        let mut report = ClearReport::default();
        index.scanned = true;

        let files = match self.fs.exists(&index.dir).await {
            Ok(true) => match self.fs.list_directory(&index.dir).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(dir = %index.dir.display(), error = %e, "Cannot list cache directory");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        let mut previous = std::mem::take(&mut index.entries);
        for path in files {
            // In-flight transfers own their temporaries, and anything that is
            // not a track file was not written by the cache.
            if CacheLayout::is_temp_file(&path) || self.layout.parse_track_file(&path).is_none() {
                continue;
            }

            let size = self.fs.metadata(&path).await.map(|m| m.size).unwrap_or(0);
            match self.fs.delete_file(&path).await {
                Ok(()) => {
                    report.files_removed += 1;
                    report.bytes_freed += size;
                }
                Err(e) => {
                    warn!(file = %display_file(&path), error = %e, "Failed to delete cached file");
                    if let Some(track) = self.layout.parse_track_file(&path) {
                        if let Some(entry) = previous.remove(&track) {
                            index.entries.insert(track, entry);
                        }
                    }
                }
            }
        }

        report
    }

    async fn remove_unindexed(&self, path: &Path) -> ClearReport {
        let mut report = ClearReport::default();
        let metadata = match self.fs.metadata(path).await {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat cache entry");
                return report;
            }
        };

        if metadata.is_directory {
            let files = self.fs.list_directory(path).await.unwrap_or_default();
            let bytes = self.fs.directory_size(path).await.unwrap_or(0);
            match self.fs.delete_dir_all(path).await {
                Ok(()) => {
                    report.files_removed = files.len() as u64;
                    report.bytes_freed = bytes;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete cache directory"),
            }
        } else {
            match self.fs.delete_file(path).await {
                Ok(()) => {
                    report.files_removed = 1;
                    report.bytes_freed = metadata.size;
                }
                Err(e) => warn!(file = %display_file(path), error = %e, "Failed to delete cache file"),
            }
        }
        report
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn next_sequence(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            // No subscribers is not an error here.
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}
