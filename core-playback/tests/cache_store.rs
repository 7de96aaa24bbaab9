//! Cache store behaviour against a real directory tree.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bridge_desktop::TokioFileSystem;
use bridge_traits::time::ManualClock;
use chrono::{TimeZone, Utc};
use core_library::{Reciter, ReciterId, TrackId};
use core_playback::cache::{CacheConfig, CacheLayout, CacheStore};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use tempfile::TempDir;

const BASE_URL: &str = "https://audio.test/quran";

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    clock: Arc<ManualClock>,
    store: CacheStore,
    reciter: Reciter,
}

impl Fixture {
    fn new(budget_bytes: u64) -> Self {
        Self::with_bus(budget_bytes, None)
    }

    fn with_bus(budget_bytes: u64, bus: Option<EventBus>) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("audio");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let layout = CacheLayout::new(&CacheConfig::new(&root, BASE_URL));
        let mut store = CacheStore::new(
            Arc::new(TokioFileSystem::new()),
            layout,
            budget_bytes,
            clock.clone(),
        );
        if let Some(bus) = bus {
            store = store.with_event_bus(bus);
        }

        Self {
            _dir: dir,
            root,
            clock,
            store,
            reciter: Reciter::new(ReciterId(7), "Test Reciter", "test_reciter"),
        }
    }

    fn reciter_dir(&self) -> PathBuf {
        self.root.join("test_reciter")
    }

    fn write(&self, name: &str, bytes: usize) -> PathBuf {
        write_file(&self.reciter_dir().join(name), bytes)
    }

    /// Write the file for `track` and index it, one second after the last.
    async fn download(&self, track: u32, bytes: usize) -> core_playback::cache::EvictionReport {
        self.clock.advance_millis(1_000);
        self.write(&format!("{:03}.mp3", track), bytes);
        self.store
            .record_completion(&self.reciter, TrackId(track), bytes as u64)
            .await
            .expect("file was written before recording")
    }

    fn exists(&self, track: u32) -> bool {
        self.reciter_dir().join(format!("{:03}.mp3", track)).exists()
    }
}

fn write_file(path: &Path, bytes: usize) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, vec![0u8; bytes]).unwrap();
    path.to_path_buf()
}

#[tokio::test]
async fn test_evicts_least_recently_used_first() {
    let fx = Fixture::new(250);

    assert!(fx.download(1, 100).await.is_empty());
    assert!(fx.download(2, 100).await.is_empty());

    fx.clock.advance_millis(1_000);
    assert!(fx.store.touch(&fx.reciter, TrackId(1)).await);

    let report = fx.download(3, 100).await;
    assert_eq!(report.evicted, vec![TrackId(2)]);
    assert_eq!(report.bytes_freed, 100);
    assert_eq!(report.total_bytes, 200);

    assert!(fx.exists(1));
    assert!(!fx.exists(2));
    assert!(fx.exists(3));
    assert!(!fx.store.has(&fx.reciter, TrackId(2)).await);

    let order: Vec<TrackId> = fx
        .store
        .entries(&fx.reciter)
        .await
        .into_iter()
        .map(|e| e.track)
        .collect();
    assert_eq!(order, vec![TrackId(1), TrackId(3)]);
}

#[tokio::test]
async fn test_same_timestamp_falls_back_to_access_order() {
    let fx = Fixture::new(250);

    fx.write("001.mp3", 100);
    fx.store.record_completion(&fx.reciter, TrackId(1), 100).await;
    fx.write("002.mp3", 100);
    fx.store.record_completion(&fx.reciter, TrackId(2), 100).await;
    fx.store.touch(&fx.reciter, TrackId(1)).await;
    fx.write("003.mp3", 100);
    let report = fx
        .store
        .record_completion(&fx.reciter, TrackId(3), 100)
        .await
        .unwrap();

    assert_eq!(report.evicted, vec![TrackId(2)]);
}

#[tokio::test]
async fn test_oversized_file_is_kept_alone() {
    let fx = Fixture::new(250);

    fx.download(1, 100).await;
    let report = fx.download(2, 400).await;

    assert_eq!(report.evicted, vec![TrackId(1)]);
    assert_eq!(report.total_bytes, 400);
    assert!(fx.exists(2));
    assert!(fx.store.has(&fx.reciter, TrackId(2)).await);
}

#[tokio::test]
async fn test_touch_unknown_track_is_noop() {
    let fx = Fixture::new(1_000);
    assert!(!fx.store.touch(&fx.reciter, TrackId(9)).await);
}

#[tokio::test]
async fn test_first_scan_indexes_files_and_sweeps_partials() {
    let fx = Fixture::new(10_000);
    fx.write("001.mp3", 64);
    fx.write("002.mp3.part", 32);
    fx.write("003.mp3", 0);
    fx.write("notes.txt", 16);

    assert!(fx.store.has(&fx.reciter, TrackId(1)).await);
    assert!(!fx.store.has(&fx.reciter, TrackId(2)).await);
    assert!(!fx.store.has(&fx.reciter, TrackId(3)).await);

    assert!(!fx.reciter_dir().join("002.mp3.part").exists());
    assert!(fx.reciter_dir().join("notes.txt").exists());

    let path = fx.store.path_for(&fx.reciter, TrackId(1)).await.unwrap();
    assert_eq!(path, fx.reciter_dir().join("001.mp3"));
}

#[tokio::test]
async fn test_later_scans_leave_partials_alone() {
    let fx = Fixture::new(10_000);
    assert_eq!(fx.store.rescan(&fx.reciter).await, 0);

    fx.write("004.mp3.part", 32);
    fx.write("005.mp3", 50);
    assert_eq!(fx.store.rescan(&fx.reciter).await, 1);
    assert!(fx.reciter_dir().join("004.mp3.part").exists());
}

#[tokio::test]
async fn test_invalidate_deletes_file() {
    let fx = Fixture::new(10_000);
    fx.download(4, 10).await;

    assert!(fx.store.invalidate(&fx.reciter, TrackId(4)).await);
    assert!(!fx.exists(4));
    assert!(!fx.store.has(&fx.reciter, TrackId(4)).await);
    assert!(!fx.store.invalidate(&fx.reciter, TrackId(4)).await);
}

#[tokio::test]
async fn test_clear_missing_directory_reports_nothing() {
    let fx = Fixture::new(10_000);
    let report = fx.store.clear(&fx.reciter).await;
    assert_eq!(report.files_removed, 0);
    assert_eq!(report.bytes_freed, 0);
}

#[tokio::test]
async fn test_clear_removes_reciter_files() {
    let fx = Fixture::new(10_000);
    fx.download(1, 10).await;
    fx.download(2, 20).await;

    let report = fx.store.clear(&fx.reciter).await;
    assert_eq!(report.files_removed, 2);
    assert_eq!(report.bytes_freed, 30);
    assert!(fx.store.entries(&fx.reciter).await.is_empty());
    assert!(!fx.exists(1));
}

#[tokio::test]
async fn test_clear_all_includes_untouched_reciters() {
    let fx = Fixture::new(10_000);
    fx.download(1, 10).await;
    write_file(&fx.root.join("another_reciter").join("005.mp3"), 40);

    let report = fx.store.clear_all().await;
    assert_eq!(report.files_removed, 2);
    assert_eq!(report.bytes_freed, 50);
    assert!(!fx.root.join("another_reciter").exists());
    assert!(!fx.store.has(&fx.reciter, TrackId(1)).await);
}

#[tokio::test]
async fn test_stats_reflects_disk() {
    let fx = Fixture::new(1_000);
    fx.download(1, 100).await;
    fx.write("002.mp3", 150);

    let stats = fx.store.stats(&fx.reciter).await;
    assert_eq!(stats.reciter_id, ReciterId(7));
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.total_bytes, 250);
    assert_eq!(stats.remaining_bytes(), 750);
    assert_eq!(stats.average_track_size(), 125);
}

#[tokio::test]
async fn test_eviction_and_clear_events() {
    let bus = EventBus::new(32);
    let mut rx = bus.subscribe();
    let fx = Fixture::with_bus(150, Some(bus));

    fx.download(1, 100).await;
    fx.download(2, 100).await;
    fx.store.clear(&fx.reciter).await;

    match rx.recv().await.unwrap() {
        CoreEvent::Cache(CacheEvent::Evicted {
            reciter_id,
            track_id,
            bytes,
        }) => {
            assert_eq!(reciter_id, 7);
            assert_eq!(track_id, 1);
            assert_eq!(bytes, 100);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match rx.recv().await.unwrap() {
        CoreEvent::Cache(CacheEvent::Cleared {
            reciter_id,
            files_removed,
        }) => {
            assert_eq!(reciter_id, Some(7));
            assert_eq!(files_removed, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_scanned_entries_with_equal_mtime_evict_lower_track_first() {
    let fx = Fixture::new(250);
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    for name in ["002.mp3", "001.mp3"] {
        let path = fx.write(name, 100);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    let report = fx.download(3, 100).await;
    assert_eq!(report.evicted, vec![TrackId(1)]);
    assert!(fx.exists(2));
}

#[tokio::test]
async fn test_clear_keeps_files_the_cache_did_not_write() {
    let fx = Fixture::new(10_000);
    fx.download(1, 10).await;
    fx.write("notes.txt", 16);
    fx.write("cover.jpg", 16);

    let report = fx.store.clear(&fx.reciter).await;
    assert_eq!(report.files_removed, 1);
    assert!(!fx.exists(1));
    assert!(fx.reciter_dir().join("notes.txt").exists());
    assert!(fx.reciter_dir().join("cover.jpg").exists());
}

#[tokio::test]
async fn test_dot_dot_reciter_cannot_reach_outside_cache_root() {
    let fx = Fixture::new(10_000);
    let neighbour = write_file(&fx.root.parent().unwrap().join("settings.db"), 8);
    let outside_track = write_file(&fx.root.parent().unwrap().join("001.mp3"), 8);

    let evil = Reciter::new(ReciterId(9), "Evil", "..");
    assert!(fx.store.layout().reciter_dir(&evil).starts_with(&fx.root));
    assert_ne!(fx.store.layout().reciter_dir(&evil), fx.root.join(".."));

    let report = fx.store.clear(&evil).await;
    assert_eq!(report.files_removed, 0);
    assert!(neighbour.exists());
    assert!(outside_track.exists());
}

#[tokio::test]
async fn test_completion_for_missing_file_is_not_indexed() {
    let fx = Fixture::new(10_000);
    fx.download(1, 10).await;

    // The final file was removed (e.g. by a clear) before it was recorded.
    let report = fx.store.record_completion(&fx.reciter, TrackId(2), 10).await;
    assert!(report.is_none());
    assert!(!fx.store.has(&fx.reciter, TrackId(2)).await);
    assert!(fx.store.has(&fx.reciter, TrackId(1)).await);
}
