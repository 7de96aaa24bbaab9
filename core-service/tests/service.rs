//! Bootstrap and façade tests with mocked network and audio bridges.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, HttpStream};
use bridge_traits::platform::{NowPlaying, PlatformIntegration};
use bridge_traits::playback::{
    PlaybackAdapter, PlaybackRequest, PlaybackSessionId, PlaybackState, PreparedSource,
};
use bridge_traits::storage::SettingsStore;
use bytes::Bytes;
use core_library::LibraryError;
use core_service::{BulkOutcome, CoreConfig, CoreService, ReciterId, ServiceError, TrackId};
use futures::StreamExt;
use mockall::mock;
use tempfile::TempDir;
use tokio::sync::mpsc;

const AUDIO_URL: &str = "https://audio.test/quran";
const RECITERS_URL: &str = "https://audio.test/reciters.json";

mock! {
    Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        async fn download_stream(&self, request: HttpRequest) -> BridgeResult<HttpStream>;
    }
}

mock! {
    Adapter {}

    #[async_trait]
    impl PlaybackAdapter for Adapter {
        async fn prepare(&self, request: PlaybackRequest) -> BridgeResult<PreparedSource>;
        async fn play(&self, session: PlaybackSessionId) -> BridgeResult<()>;
        async fn pause(&self, session: PlaybackSessionId) -> BridgeResult<()>;
        async fn stop(&self, session: PlaybackSessionId) -> BridgeResult<()>;
        async fn seek(&self, session: PlaybackSessionId, position: Duration) -> BridgeResult<()>;
        async fn set_volume(&self, session: PlaybackSessionId, volume: f32) -> BridgeResult<()>;
        async fn get_position(&self, session: PlaybackSessionId) -> BridgeResult<Duration>;
        async fn state(&self, session: PlaybackSessionId) -> BridgeResult<PlaybackState>;
        async fn unload(&self, session: PlaybackSessionId) -> BridgeResult<()>;
    }
}

#[derive(Default)]
struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    fn with(key: &str, value: impl ToString) -> Self {
        let settings = Self::default();
        settings
            .values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        settings
    }

    fn read<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.values.lock().unwrap().get(key).and_then(|v| v.parse().ok())
    }

    fn write(&self, key: &str, value: impl ToString) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.write(key, value);
        Ok(())
    }
    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.read(key))
    }
    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.write(key, value);
        Ok(())
    }
    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.read(key))
    }
    async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()> {
        self.write(key, value);
        Ok(())
    }
    async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>> {
        Ok(self.read(key))
    }
    async fn set_f64(&self, key: &str, value: f64) -> BridgeResult<()> {
        self.write(key, value);
        Ok(())
    }
    async fn get_f64(&self, key: &str) -> BridgeResult<Option<f64>> {
        Ok(self.read(key))
    }
    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }
    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }
    async fn clear_all(&self) -> BridgeResult<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}

/// Forwards every platform update to a channel; `None` marks a clear.
struct RecordingPlatform {
    updates: mpsc::UnboundedSender<Option<NowPlaying>>,
}

#[async_trait]
impl PlatformIntegration for RecordingPlatform {
    async fn update_now_playing(&self, now_playing: NowPlaying) -> BridgeResult<()> {
        let _ = self.updates.send(Some(now_playing));
        Ok(())
    }

    async fn clear_now_playing(&self) -> BridgeResult<()> {
        let _ = self.updates.send(None);
        Ok(())
    }
}

const CATALOG: &str = r#"[
    { "number": 1, "name": "Al-Fatiha", "translation": "The Opening", "duration": 47.0 },
    { "number": 2, "name": "Al-Baqara", "translation": "The Cow" },
    { "number": 3, "name": "Aal-Imran" }
]"#;

const RECITERS: &str = r#"{ "reciters": [
    { "id": 1, "name": "First Reciter", "path": "first" },
    { "id": 2, "name": "Default Reciter", "path": "Default Reciter", "isDefault": true }
] }"#;

fn listing_http(http: &mut MockHttp) {
    http.expect_execute()
        .withf(|req| req.url == RECITERS_URL)
        .returning(|_| {
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: Bytes::from_static(RECITERS.as_bytes()),
            })
        });
}

fn offline_http(http: &mut MockHttp) {
    http.expect_execute()
        .returning(|_| Err(BridgeError::Network("offline".to_string())));
}

fn audio_http(http: &mut MockHttp) {
    http.expect_download_stream()
        .returning(|req| Ok(HttpStream::from_bytes(200, req.url.into_bytes())));
}

fn playing_adapter() -> MockAdapter {
    let mut adapter = MockAdapter::new();
    adapter.expect_prepare().returning(|_| {
        Ok(PreparedSource {
            session: PlaybackSessionId::new(),
            duration: Some(Duration::from_secs(47)),
        })
    });
    adapter.expect_play().returning(|_| Ok(()));
    adapter.expect_pause().returning(|_| Ok(()));
    adapter.expect_stop().returning(|_| Ok(()));
    adapter.expect_seek().returning(|_, _| Ok(()));
    adapter.expect_set_volume().returning(|_, _| Ok(()));
    adapter.expect_get_position().returning(|_| Ok(Duration::ZERO));
    adapter.expect_state().returning(|_| Ok(PlaybackState::Playing));
    adapter.expect_unload().returning(|_| Ok(()));
    adapter
}

struct Setup {
    dir: TempDir,
    settings: Arc<MemorySettings>,
    platform_rx: mpsc::UnboundedReceiver<Option<NowPlaying>>,
    config: CoreConfig,
}

fn setup(http: MockHttp, settings: MemorySettings, catalog: Option<&str>) -> Setup {
    let dir = TempDir::new().unwrap();
    let catalog_path = dir.path().join("surahs.json");
    if let Some(catalog) = catalog {
        std::fs::write(&catalog_path, catalog).unwrap();
    }

    let settings = Arc::new(settings);
    let (tx, platform_rx) = mpsc::unbounded_channel();
    let config = CoreConfig::builder()
        .cache_dir(dir.path().join("cache"))
        .data_dir(dir.path().join("data"))
        .audio_base_url(AUDIO_URL)
        .reciters_url(RECITERS_URL)
        .catalog_path(&catalog_path)
        .fade_duration(Duration::ZERO)
        .tick_interval(Duration::from_millis(100))
        .http_client(Arc::new(http))
        .file_system(Arc::new(TokioFileSystem::new()))
        .settings_store(settings.clone())
        .playback_adapter(Arc::new(playing_adapter()))
        .platform_integration(Arc::new(RecordingPlatform { updates: tx }))
        .build()
        .unwrap();

    Setup {
        dir,
        settings,
        platform_rx,
        config,
    }
}

fn cached_file(dir: &Path, reciter_dir: &str, track: u32) -> std::path::PathBuf {
    dir.join("cache")
        .join(reciter_dir)
        .join(format!("{:03}.mp3", track))
}

#[tokio::test]
async fn test_bootstrap_picks_directory_default() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    let setup = setup(http, MemorySettings::default(), Some(CATALOG));

    let core = CoreService::bootstrap(setup.config).await?;
    assert_eq!(core.catalog().len(), 3);
    assert_eq!(core.reciters().len(), 2);
    assert_eq!(core.current_reciter().map(|r| r.id), Some(ReciterId(2)));
    assert_eq!(core.player().snapshot().reciter, Some(ReciterId(2)));

    core.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_persisted_reciter_wins_over_default() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    let setup = setup(
        http,
        MemorySettings::with("library.reciter_id", 1),
        Some(CATALOG),
    );

    let core = CoreService::bootstrap(setup.config).await?;
    assert_eq!(core.current_reciter().map(|r| r.id), Some(ReciterId(1)));
    Ok(())
}

#[tokio::test]
async fn test_missing_catalog_is_fatal() {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    let setup = setup(http, MemorySettings::default(), None);

    let err = CoreService::bootstrap(setup.config).await.err().unwrap();
    assert!(matches!(err, ServiceError::Library(LibraryError::Catalog(_))));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_offline_directory_without_cache_is_not_fatal() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    offline_http(&mut http);
    let setup = setup(http, MemorySettings::default(), Some(CATALOG));

    let core = CoreService::bootstrap(setup.config).await?;
    assert!(core.reciters().is_empty());
    assert!(core.current_reciter().is_none());
    assert!(matches!(
        core.download_all().err(),
        Some(ServiceError::Playback(core_service::PlaybackError::NoReciterSelected))
    ));
    assert!(core.refresh_reciters().await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_offline_directory_uses_cached_listing() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    offline_http(&mut http);
    let setup = setup(http, MemorySettings::default(), Some(CATALOG));

    let data_dir = setup.dir.path().join("data");
    std::fs::create_dir_all(&data_dir)?;
    std::fs::write(data_dir.join("reciters.json"), RECITERS)?;

    let core = CoreService::bootstrap(setup.config).await?;
    assert_eq!(core.reciters().len(), 2);
    assert_eq!(core.current_reciter().map(|r| r.id), Some(ReciterId(2)));
    Ok(())
}

#[tokio::test]
async fn test_select_reciter_persists_choice() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    let setup = setup(http, MemorySettings::default(), Some(CATALOG));
    let settings = setup.settings.clone();

    let core = CoreService::bootstrap(setup.config).await?;

    let err = core.select_reciter(ReciterId(42)).err().unwrap();
    assert!(matches!(err, ServiceError::UnknownReciter(ReciterId(42))));

    let selected = core.select_reciter(ReciterId(1))?;
    assert_eq!(selected.name, "First Reciter");
    assert_eq!(core.current_reciter().map(|r| r.id), Some(ReciterId(1)));

    let player = core.player();
    tokio::time::timeout(
        Duration::from_secs(5),
        player.wait_until(|s| s.reciter == Some(ReciterId(1))),
    )
    .await??;
    tokio::time::timeout(Duration::from_secs(5), async {
        while settings.read::<i64>("library.reciter_id") != Some(1) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_download_all_then_clear() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    audio_http(&mut http);
    let setup = setup(http, MemorySettings::default(), Some(CATALOG));
    let root = setup.dir.path().to_path_buf();

    let core = CoreService::bootstrap(setup.config).await?;
    let progress: Vec<_> = core.download_all()?.collect().await;

    assert_eq!(progress.len(), 3);
    assert!(progress
        .iter()
        .all(|p| p.outcome == BulkOutcome::Downloaded));
    assert!(cached_file(&root, "default_reciter", 3).exists());

    let stats = core.cache_stats().await?;
    assert_eq!(stats.entries, 3);

    let report = core.clear_all_caches().await;
    assert_eq!(report.files_removed, 3);
    assert!(!cached_file(&root, "default_reciter", 1).exists());
    assert_eq!(core.cache_stats().await?.entries, 0);
    Ok(())
}

#[tokio::test]
async fn test_playback_reaches_platform_integration() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    audio_http(&mut http);
    let mut setup = setup(http, MemorySettings::default(), Some(CATALOG));

    let core = CoreService::bootstrap(setup.config).await?;
    core.player().play(TrackId(1))?;

    let update = tokio::time::timeout(Duration::from_secs(5), setup.platform_rx.recv())
        .await?
        .flatten()
        .expect("now playing update");
    assert_eq!(update.track_id, 1);
    assert_eq!(update.title, "Al-Fatiha");
    assert_eq!(update.subtitle.as_deref(), Some("The Opening"));
    assert_eq!(update.artist.as_deref(), Some("Default Reciter"));
    assert!(update.is_playing);

    core.shutdown().await?;
    let cleared = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(update) = setup.platform_rx.recv().await {
            if update.is_none() {
                return true;
            }
        }
        false
    })
    .await?;
    assert!(cleared);
    assert!(core.player().play(TrackId(1)).is_err());
    Ok(())
}

#[tokio::test]
async fn test_cache_budget_is_persisted() -> anyhow::Result<()> {
    let mut http = MockHttp::new();
    listing_http(&mut http);
    let setup = setup(http, MemorySettings::default(), Some(CATALOG));
    let settings = setup.settings.clone();

    let core = CoreService::bootstrap(setup.config).await?;
    assert!(core.set_cache_budget(0).await.is_err());

    core.set_cache_budget(64 * 1024 * 1024).await?;
    assert_eq!(
        settings.read::<i64>("cache.budget_bytes"),
        Some(64 * 1024 * 1024)
    );
    Ok(())
}
