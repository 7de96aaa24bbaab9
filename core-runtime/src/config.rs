//! # Core Configuration Module
//!
//! Configuration for the player core.
//!
//! ## Overview
//!
//! A builder produces a [`CoreConfig`] holding every bridge and tunable the
//! core needs. Validation is fail-fast: `build()` refuses to produce a config
//! with missing capabilities or out-of-range values.
//!
//! ## Required
//!
//! - `cache_dir`, `data_dir` - audio cache root and app data directory
//! - `audio_base_url`, `reciters_url` - remote endpoints
//! - `catalog_path` - JSON catalog of tracks
//! - `PlaybackAdapter` - audio output (desktop default behind `audio-output`)
//!
//! ## Optional (with platform defaults)
//!
//! - `HttpClient` - desktop default: reqwest
//! - `FileSystemAccess` - desktop default: tokio fs
//! - `SettingsStore` - desktop default: SQLite at `<data_dir>/settings.db`
//! - `PlatformIntegration` - defaults to a no-op
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/home/me/.cache/surah-player/audio")
//!     .data_dir("/home/me/.local/share/surah-player")
//!     .audio_base_url("https://download.quranicaudio.com/quran")
//!     .reciters_url("https://example.org/reciters.json")
//!     .catalog_path("/usr/share/surah-player/surahs.json")
//!     .cache_budget_bytes(512 * 1024 * 1024)
//!     .fade_duration(Duration::from_millis(300))
//!     .build()?;
//! # Ok::<(), core_runtime::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Missing capabilities come back as [`Error::CapabilityMissing`] with a
//! message naming what to inject:
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/tmp/cache")
//!     .build()
//!     .expect("Should fail - missing required settings");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    FileSystemAccess, HttpClient, NoopPlatformIntegration, PlatformIntegration, PlaybackAdapter,
    SettingsStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default cache budget: 1 GiB.
pub const DEFAULT_CACHE_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_FADE_DURATION: Duration = Duration::from_millis(280);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Longest fade the builder accepts.
pub const MAX_FADE_DURATION: Duration = Duration::from_secs(5);
/// Shortest position tick the builder accepts.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(100);

pub fn default_user_agent() -> String {
    format!("SurahPlayer/{}", env!("CARGO_PKG_VERSION"))
}

/// Core configuration for the player.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root of the audio cache; one subdirectory per reciter lives below it.
    pub cache_dir: PathBuf,

    /// Application data directory (settings database, cached reciter list).
    pub data_dir: PathBuf,

    /// Base URL audio files are fetched from.
    pub audio_base_url: String,

    /// URL of the reciter directory listing.
    pub reciters_url: String,

    /// Location of the track catalog JSON.
    pub catalog_path: PathBuf,

    /// Fallback cache budget when no persisted value exists.
    pub cache_budget_bytes: u64,

    /// Length of the fade-out and fade-in ramps.
    pub fade_duration: Duration,

    /// Position tick interval.
    pub tick_interval: Duration,

    /// Minimum spacing between resume-state writes while playing.
    pub persist_interval: Duration,

    /// Attempts per download before the failure is surfaced.
    pub download_attempts: u32,

    pub user_agent: String,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub playback_adapter: Arc<dyn PlaybackAdapter>,
    pub platform_integration: Arc<dyn PlatformIntegration>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("data_dir", &self.data_dir)
            .field("audio_base_url", &self.audio_base_url)
            .field("reciters_url", &self.reciters_url)
            .field("catalog_path", &self.catalog_path)
            .field("cache_budget_bytes", &self.cache_budget_bytes)
            .field("fade_duration", &self.fade_duration)
            .field("tick_interval", &self.tick_interval)
            .field("persist_interval", &self.persist_interval)
            .field("download_attempts", &self.download_attempts)
            .field("user_agent", &self.user_agent)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("playback_adapter", &"PlaybackAdapter { ... }")
            .field("platform_integration", &"PlatformIntegration { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// This checks:
    /// - paths are not empty
    /// - URLs are http(s)
    /// - the cache budget is positive
    /// - the fade is at most 5 s and the tick at least 100 ms
    /// - at least one download attempt is allowed
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.catalog_path.as_os_str().is_empty() {
            return Err(Error::Config("Catalog path cannot be empty".to_string()));
        }

        validate_url("audio_base_url", &self.audio_base_url)?;
        validate_url("reciters_url", &self.reciters_url)?;

        if self.cache_budget_bytes == 0 {
            return Err(Error::Config(
                "Cache budget must be greater than 0 bytes".to_string(),
            ));
        }

        if self.fade_duration > MAX_FADE_DURATION {
            return Err(Error::Config(format!(
                "Fade duration {:?} exceeds maximum of {:?}",
                self.fade_duration, MAX_FADE_DURATION
            )));
        }

        if self.tick_interval < MIN_TICK_INTERVAL {
            return Err(Error::Config(format!(
                "Tick interval {:?} is below minimum of {:?}",
                self.tick_interval, MIN_TICK_INTERVAL
            )));
        }

        if self.download_attempts == 0 {
            return Err(Error::Config(
                "At least one download attempt is required".to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("User agent cannot be empty".to_string()));
        }

        Ok(())
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));

    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(Error::Config(format!(
            "{} must be an http(s) URL, got '{}'",
            field, url
        ))),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, desktop_hint: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required. Desktop: {}. \
             Other hosts: inject a platform implementation through the builder.",
            capability, desktop_hint
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "enable the 'desktop-shims' feature to use the reqwest client",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(
    cache_dir: &Path,
    data_dir: &Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_directories(
        cache_dir.to_path_buf(),
        data_dir.to_path_buf(),
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(
    _cache_dir: &Path,
    _data_dir: &Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing(
        "FileSystemAccess",
        "enable the 'desktop-shims' feature to use tokio::fs",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(data_dir: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let candidate = data_dir.join("settings.db");

    let init_store = |path: PathBuf| -> Result<_> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Internal(format!(
                    "Failed to create data directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on inside a running runtime panics, so hop to a plain thread.
    let store = match Handle::try_current() {
        Ok(_) => {
            let path = candidate.clone();
            thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Worker thread panicked while creating default SettingsStore".to_string(),
                    )
                })??
        }
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_data_dir: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(capability_missing(
        "SettingsStore",
        "enable the 'desktop-shims' feature to use the SQLite settings store",
    ))
}

#[cfg(feature = "audio-output")]
fn provide_default_playback_adapter() -> Result<Arc<dyn PlaybackAdapter>> {
    let adapter = bridge_desktop::RodioPlaybackAdapter::new().map_err(|e| {
        Error::Internal(format!("Failed to start the audio output thread: {}", e))
    })?;
    Ok(Arc::new(adapter))
}

#[cfg(not(feature = "audio-output"))]
fn provide_default_playback_adapter() -> Result<Arc<dyn PlaybackAdapter>> {
    Err(Error::CapabilityMissing {
        capability: "PlaybackAdapter".to_string(),
        message: "PlaybackAdapter implementation is required for audio output. \
                 Desktop: enable the 'audio-output' feature to use the rodio adapter. \
                 Other hosts: inject a native audio adapter through the builder."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
///
/// Call [`build()`](CoreConfigBuilder::build) once every required value is
/// set; anything missing comes back as an actionable error.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    audio_base_url: Option<String>,
    reciters_url: Option<String>,
    catalog_path: Option<PathBuf>,
    cache_budget_bytes: Option<u64>,
    fade_duration: Option<Duration>,
    tick_interval: Option<Duration>,
    persist_interval: Option<Duration>,
    download_attempts: Option<u32>,
    user_agent: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    playback_adapter: Option<Arc<dyn PlaybackAdapter>>,
    platform_integration: Option<Arc<dyn PlatformIntegration>>,
}

impl CoreConfigBuilder {
    /// Sets the audio cache root.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().cache_dir("/var/cache/surah-player");
    /// ```
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Sets the application data directory.
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the base URL audio files are served from. A trailing slash is
    /// tolerated.
    pub fn audio_base_url(mut self, url: impl Into<String>) -> Self {
        self.audio_base_url = Some(url.into());
        self
    }

    pub fn reciters_url(mut self, url: impl Into<String>) -> Self {
        self.reciters_url = Some(url.into());
        self
    }

    pub fn catalog_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Sets the fallback cache budget in bytes.
    ///
    /// Default: 1 GiB. A persisted `cache.budget_bytes` setting wins over
    /// this value at startup.
    pub fn cache_budget_bytes(mut self, bytes: u64) -> Self {
        self.cache_budget_bytes = Some(bytes);
        self
    }

    /// Default: 280 ms.
    pub fn fade_duration(mut self, duration: Duration) -> Self {
        self.fade_duration = Some(duration);
        self
    }

    /// Default: 1 s.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Default: 1 s.
    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = Some(interval);
        self
    }

    /// Default: 3.
    pub fn download_attempts(mut self, attempts: u32) -> Self {
        self.download_attempts = Some(attempts);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Sets the HTTP client. Falls back to reqwest under `desktop-shims`.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the filesystem bridge. Falls back to tokio fs under
    /// `desktop-shims`.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the settings store. Falls back to SQLite under `desktop-shims`.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Sets the audio output adapter (required unless `audio-output` is
    /// enabled).
    pub fn playback_adapter(mut self, adapter: Arc<dyn PlaybackAdapter>) -> Self {
        self.playback_adapter = Some(adapter);
        self
    }

    pub fn platform_integration(mut self, integration: Arc<dyn PlatformIntegration>) -> Self {
        self.platform_integration = Some(integration);
        self
    }

    /// Builds the final `CoreConfig`.
    ///
    /// Returns an error if a required value or bridge is missing, or if a
    /// value is out of range.
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let audio_base_url = self.audio_base_url.ok_or_else(|| {
            Error::Config(
                "Audio base URL is required. Use .audio_base_url() to set it.".to_string(),
            )
        })?;

        let reciters_url = self.reciters_url.ok_or_else(|| {
            Error::Config("Reciters URL is required. Use .reciters_url() to set it.".to_string())
        })?;

        let catalog_path = self.catalog_path.ok_or_else(|| {
            Error::Config("Catalog path is required. Use .catalog_path() to set it.".to_string())
        })?;

        let user_agent = self.user_agent.unwrap_or_else(default_user_agent);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&cache_dir, &data_dir)?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&data_dir)?,
        };

        let playback_adapter = match self.playback_adapter {
            Some(adapter) => adapter,
            None => provide_default_playback_adapter()?,
        };

        let platform_integration = self
            .platform_integration
            .unwrap_or_else(|| Arc::new(NoopPlatformIntegration));

        let config = CoreConfig {
            cache_dir,
            data_dir,
            audio_base_url: audio_base_url.trim_end_matches('/').to_string(),
            reciters_url,
            catalog_path,
            cache_budget_bytes: self
                .cache_budget_bytes
                .unwrap_or(DEFAULT_CACHE_BUDGET_BYTES),
            fade_duration: self.fade_duration.unwrap_or(DEFAULT_FADE_DURATION),
            tick_interval: self.tick_interval.unwrap_or(DEFAULT_TICK_INTERVAL),
            persist_interval: self.persist_interval.unwrap_or(DEFAULT_PERSIST_INTERVAL),
            download_attempts: self.download_attempts.unwrap_or(DEFAULT_DOWNLOAD_ATTEMPTS),
            user_agent,
            http_client,
            file_system,
            settings_store,
            playback_adapter,
            platform_integration,
        };

        config.validate()?;

        Ok(config)
    }
}
