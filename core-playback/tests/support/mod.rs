//! In-memory bridges for driving the cache, downloads and the control loop
//! without a disk, a network or a sound card.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, HttpStream};
use bridge_traits::playback::{
    PlaybackAdapter, PlaybackRequest, PlaybackSessionId, PlaybackState, PreparedSource,
};
use bridge_traits::storage::{FileMetadata, FileSystemAccess, SettingsStore};
use bridge_traits::time::SystemClock;
use bytes::Bytes;
use core_library::{Catalog, Reciter, ReciterId, Track, TrackId};
use core_playback::cache::{CacheConfig, CacheLayout, CacheStore};
use core_playback::download::{DownloadConfig, DownloadCoordinator};
use core_playback::session::{
    PlaybackSession, PlayerHandle, ResumeState, ResumeStore, SessionConfig, TransitionScheduler,
};
use core_runtime::events::EventBus;
use tokio::io::AsyncWrite;

pub const CACHE_ROOT: &str = "/cache/audio";
pub const BASE_URL: &str = "https://audio.test/quran";
pub const TRACK_SECONDS: u64 = 360;

pub fn reciter() -> Reciter {
    Reciter::new(ReciterId(1), "Test Reciter", "test_reciter")
}

pub fn other_reciter() -> Reciter {
    Reciter::new(ReciterId(2), "Other Reciter", "other/reciter")
}

pub fn track_url(reciter: &Reciter, track: u32) -> String {
    format!("{}/{}/{:03}.mp3", BASE_URL, reciter.url_path(), track)
}

pub fn catalog(count: u32) -> Catalog {
    let tracks = (1..=count)
        .map(|n| Track::new(TrackId(n), format!("Track {}", n)))
        .collect();
    Catalog::new(tracks).expect("valid catalog")
}

fn not_found(path: &Path) -> BridgeError {
    BridgeError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        path.display().to_string(),
    ))
}

// ============================================================================
// Filesystem
// ============================================================================

type FileMap = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

#[derive(Default)]
pub struct MemoryFs {
    files: FileMap,
}

impl MemoryFs {
    pub fn put(&self, path: impl Into<PathBuf>, data: &[u8]) {
        self.files.lock().unwrap().insert(path.into(), data.to_vec());
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path.as_ref()).cloned()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.files.lock().unwrap().contains_key(path.as_ref())
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.files
            .lock()
            .unwrap()
            .keys()
            .any(|p| p != path && p.starts_with(path))
    }
}

struct MemoryWriter {
    files: FileMap,
    path: PathBuf,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.files
            .lock()
            .unwrap()
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl FileSystemAccess for MemoryFs {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("/cache"))
    }

    async fn get_data_directory(&self) -> Result<PathBuf> {
        Ok(PathBuf::from("/data"))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.contains(path) || self.is_dir(path))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        if self.is_dir(path) {
            return Ok(FileMetadata {
                size: 0,
                created_at: None,
                modified_at: None,
                is_directory: true,
            });
        }
        let size = self
            .contents(path)
            .map(|d| d.len() as u64)
            .ok_or_else(|| not_found(path))?;
        Ok(FileMetadata {
            size,
            created_at: None,
            modified_at: Some(0),
            is_directory: false,
        })
    }

    async fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        self.contents(path)
            .map(Bytes::from)
            .ok_or_else(|| not_found(path))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        self.put(path, &data);
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let data = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_path_buf(), data);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().retain(|p, _| !p.starts_with(path));
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let files = self.files.lock().unwrap();
        let mut children: Vec<PathBuf> = files
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(path).ok()?;
                let first = rest.components().next()?;
                Some(path.join(first))
            })
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }

    async fn open_read_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        let data = self.contents(path).ok_or_else(|| not_found(path))?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn open_write_stream(
        &self,
        path: &Path,
    ) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Vec::new());
        Ok(Box::new(MemoryWriter {
            files: self.files.clone(),
            path: path.to_path_buf(),
        }))
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Clone)]
pub enum Scripted {
    Body(Bytes),
    Status(u16),
    Offline,
}

/// Serves queued responses per URL. The last response for a URL repeats.
#[derive(Default)]
pub struct ScriptedHttp {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedHttp {
    pub fn serve(&self, url: impl Into<String>, responses: Vec<Scripted>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.into(), responses.into_iter().collect());
    }

    pub fn serve_body(&self, url: impl Into<String>, body: &[u8]) {
        self.serve(url, vec![Scripted::Body(Bytes::copy_from_slice(body))]);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn next_response(&self, url: &str) -> Scripted {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Scripted::Status(500)),
            Some(queue) => queue.front().cloned().unwrap_or(Scripted::Status(404)),
            None => Scripted::Status(404),
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse> {
        Err(BridgeError::NotAvailable("execute".to_string()))
    }

    async fn download_stream(&self, request: HttpRequest) -> Result<HttpStream> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.url.clone())
            .or_default() += 1;

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_response(&request.url) {
            Scripted::Body(body) => Ok(HttpStream::from_bytes(200, body)),
            Scripted::Status(status) => Ok(HttpStream::from_bytes(status, Bytes::new())),
            Scripted::Offline => Err(BridgeError::Network("offline".to_string())),
        }
    }
}

// ============================================================================
// Audio output
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakeSource {
    pub file: String,
    pub state: PlaybackState,
    pub volume: f32,
    pub position: Duration,
}

/// Audio adapter that "decodes" files from a [`MemoryFs`]. Content starting
/// with `BAD` is rejected as undecodable.
pub struct FakeAdapter {
    fs: Arc<MemoryFs>,
    duration: Duration,
    sessions: Mutex<HashMap<PlaybackSessionId, FakeSource>>,
    prepared: Mutex<Vec<String>>,
    device_lost: AtomicBool,
    prepare_delay: Mutex<Duration>,
}

impl FakeAdapter {
    pub fn new(fs: Arc<MemoryFs>) -> Self {
        Self {
            fs,
            duration: Duration::from_secs(TRACK_SECONDS),
            sessions: Mutex::new(HashMap::new()),
            prepared: Mutex::new(Vec::new()),
            device_lost: AtomicBool::new(false),
            prepare_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Hold every `prepare` reply for `delay` after the source is created,
    /// like an output thread that answers late.
    pub fn set_prepare_delay(&self, delay: Duration) {
        *self.prepare_delay.lock().unwrap() = delay;
    }

    pub fn prepare_count(&self, file: &str) -> usize {
        self.prepared
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.as_str() == file)
            .count()
    }

    pub fn loaded(&self) -> Vec<FakeSource> {
        self.sessions.lock().unwrap().values().cloned().collect()
    }

    pub fn source(&self, file: &str) -> Option<FakeSource> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.file == file)
            .cloned()
    }

    /// Mark every loaded source for `file` as played to the end.
    pub fn complete(&self, file: &str) {
        for source in self.sessions.lock().unwrap().values_mut() {
            if source.file == file {
                source.state = PlaybackState::Completed;
                source.position = self.duration;
            }
        }
    }

    pub fn set_device_lost(&self, lost: bool) {
        self.device_lost.store(lost, Ordering::SeqCst);
    }

    fn check_device(&self) -> Result<()> {
        if self.device_lost.load(Ordering::SeqCst) {
            Err(BridgeError::DeviceUnavailable("headphones unplugged".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_source<T>(
        &self,
        session: PlaybackSessionId,
        f: impl FnOnce(&mut FakeSource) -> T,
    ) -> Result<T> {
        let mut sessions = self.sessions.lock().unwrap();
        let source = sessions
            .get_mut(&session)
            .ok_or_else(|| BridgeError::UnknownSource(session.to_string()))?;
        Ok(f(source))
    }
}

#[async_trait]
impl PlaybackAdapter for FakeAdapter {
    async fn prepare(&self, request: PlaybackRequest) -> Result<PreparedSource> {
        self.check_device()?;
        let file = request
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        self.prepared.lock().unwrap().push(file.clone());

        let data = self.fs.contents(&request.path).ok_or_else(|| not_found(&request.path))?;
        if data.starts_with(b"BAD") {
            return Err(BridgeError::Decode(format!("{} is not audio", file)));
        }

        let session = PlaybackSessionId::new();
        self.sessions.lock().unwrap().insert(
            session,
            FakeSource {
                file,
                state: PlaybackState::Paused,
                volume: request.options.initial_volume,
                position: request.options.start_position,
            },
        );
        let delay = *self.prepare_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(PreparedSource {
            session,
            duration: Some(self.duration),
        })
    }

    async fn play(&self, session: PlaybackSessionId) -> Result<()> {
        self.check_device()?;
        self.with_source(session, |s| s.state = PlaybackState::Playing)
    }

    async fn pause(&self, session: PlaybackSessionId) -> Result<()> {
        self.check_device()?;
        self.with_source(session, |s| s.state = PlaybackState::Paused)
    }

    async fn stop(&self, session: PlaybackSessionId) -> Result<()> {
        self.with_source(session, |s| s.state = PlaybackState::Stopped)
    }

    async fn seek(&self, session: PlaybackSessionId, position: Duration) -> Result<()> {
        self.check_device()?;
        self.with_source(session, |s| s.position = position)
    }

    async fn set_volume(&self, session: PlaybackSessionId, volume: f32) -> Result<()> {
        self.check_device()?;
        self.with_source(session, |s| s.volume = volume)
    }

    async fn get_position(&self, session: PlaybackSessionId) -> Result<Duration> {
        self.check_device()?;
        self.with_source(session, |s| s.position)
    }

    async fn state(&self, session: PlaybackSessionId) -> Result<PlaybackState> {
        self.check_device()?;
        self.with_source(session, |s| s.state.clone())
    }

    async fn unload(&self, session: PlaybackSessionId) -> Result<()> {
        self.sessions.lock().unwrap().remove(&session);
        Ok(())
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
    write_delay: Mutex<Duration>,
}

impl MemorySettings {
    /// Make every numeric write and delete take `delay`, like a busy disk.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = delay;
    }

    async fn slow_write(&self) {
        let delay = *self.write_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn get<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.values
            .lock()
            .unwrap()
            .get(key)
            .and_then(|v| v.parse().ok())
    }

    fn set(&self, key: &str, value: impl ToString) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, value);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key))
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, value);
        Ok(())
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get(key))
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.slow_write().await;
        self.set(key, value);
        Ok(())
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key))
    }

    async fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.slow_write().await;
        self.set(key, value);
        Ok(())
    }

    async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.get(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slow_write().await;
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Everything a player needs, wired to in-memory fakes.
pub struct Harness {
    pub fs: Arc<MemoryFs>,
    pub http: Arc<ScriptedHttp>,
    pub adapter: Arc<FakeAdapter>,
    pub settings: Arc<MemorySettings>,
    pub cache: Arc<CacheStore>,
    pub downloads: DownloadCoordinator,
    pub catalog: Arc<Catalog>,
    pub events: EventBus,
}

impl Harness {
    /// `tracks` catalog entries, each served as a valid file.
    pub fn new(tracks: u32) -> Self {
        Self::with_budget(tracks, 1024 * 1024)
    }

    pub fn with_budget(tracks: u32, budget_bytes: u64) -> Self {
        let fs = Arc::new(MemoryFs::default());
        let http = Arc::new(ScriptedHttp::default());
        let adapter = Arc::new(FakeAdapter::new(fs.clone()));
        let settings = Arc::new(MemorySettings::default());
        let events = EventBus::new(256);

        let layout = CacheLayout::new(&CacheConfig::new(CACHE_ROOT, BASE_URL));
        let cache = Arc::new(
            CacheStore::new(fs.clone(), layout, budget_bytes, Arc::new(SystemClock))
                .with_event_bus(events.clone()),
        );
        let downloads = DownloadCoordinator::with_event_bus(
            http.clone(),
            fs.clone(),
            cache.clone(),
            DownloadConfig::default()
                .with_user_agent("tests/1.0")
                .with_max_attempts(1),
            events.clone(),
        );

        let reciter = reciter();
        for n in 1..=tracks {
            http.serve_body(track_url(&reciter, n), format!("audio-{:03}", n).as_bytes());
        }

        Self {
            fs,
            http,
            adapter,
            settings,
            cache,
            downloads,
            catalog: Arc::new(catalog(tracks)),
            events,
        }
    }

    pub fn session(&self) -> PlaybackSession {
        PlaybackSession::new(
            self.adapter.clone(),
            self.downloads.clone(),
            self.catalog.clone(),
            ResumeStore::new(self.settings.clone()),
            self.events.clone(),
        )
        .with_config(SessionConfig::default())
        .with_reciter(Some(reciter()))
    }

    pub fn spawn(&self) -> PlayerHandle {
        TransitionScheduler::spawn(self.session())
    }

    pub fn spawn_with_resume(&self, resume: ResumeState) -> PlayerHandle {
        TransitionScheduler::spawn(self.session().with_resume(resume))
    }

    pub fn calls(&self, track: u32) -> usize {
        self.http.calls(&track_url(&reciter(), track))
    }
}
