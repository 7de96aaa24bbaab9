//! Core service façade and bootstrap.
//!
//! This crate wires host-provided bridges (HTTP, filesystem, settings, audio
//! output, platform integration) into the shared core and owns the single
//! player for the process. Desktop apps typically enable the `desktop-shims`
//! feature, which lets [`CoreConfig`] fall back to the `bridge-desktop`
//! implementations.
//!
//! ```ignore
//! use core_service::{CoreConfig, CoreService};
//!
//! let config = CoreConfig::builder()
//!     .cache_dir(cache_dir)
//!     .data_dir(data_dir)
//!     .audio_base_url("https://download.quranicaudio.com/quran")
//!     .reciters_url(reciters_url)
//!     .catalog_path(catalog_path)
//!     .playback_adapter(adapter)
//!     .build()?;
//!
//! let core = CoreService::bootstrap(config).await?;
//! core.player().play(TrackId(1))?;
//! ```

pub mod error;
mod now_playing;

pub use core_library::{Catalog, Reciter, ReciterId, Track, TrackId};
pub use core_playback::{
    BulkOutcome, BulkProgress, CacheStats, PlaybackError, PlaybackSnapshot, PlayerHandle,
    TransitionState,
};
pub use core_playback::cache::ClearReport;
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus};
pub use error::{Result, ServiceError};

use std::sync::Arc;

use bridge_traits::platform::PlatformIntegration;
use bridge_traits::time::SystemClock;
use core_library::{ListingSource, ReciterDirectory};
use core_playback::cache::{CacheConfig, CacheLayout, CacheStore};
use core_playback::download::{DownloadConfig, DownloadCoordinator};
use core_playback::session::{
    PlaybackSession, ResumeStore, SessionConfig, TransitionScheduler, DEFAULT_FADE_STEP,
};
use core_runtime::events::Receiver;
use futures::stream::BoxStream;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Capacity of the shared event bus.
const EVENT_BUS_CAPACITY: usize = 256;

struct ServiceInner {
    catalog: Arc<Catalog>,
    directory: ReciterDirectory,
    reciters: RwLock<Vec<Reciter>>,
    current_reciter: Arc<RwLock<Option<Reciter>>>,
    cache: Arc<CacheStore>,
    downloads: DownloadCoordinator,
    resume_store: ResumeStore,
    player: PlayerHandle,
    event_bus: EventBus,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    platform: Arc<dyn PlatformIntegration>,
}

/// Primary façade exposed to host applications.
///
/// Cheap to clone; every clone drives the same player.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

impl CoreService {
    /// Build every component and start the player.
    ///
    /// Only configuration and catalog problems fail startup. An unreachable
    /// reciter directory with no cached copy leaves the service running with
    /// an empty directory; see [`refresh_reciters`](Self::refresh_reciters).
    #[instrument(skip(config), fields(cache_dir = %config.cache_dir.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let catalog =
            Arc::new(Catalog::load(config.file_system.as_ref(), &config.catalog_path).await?);

        let directory = ReciterDirectory::new(
            config.http_client.clone(),
            config.file_system.clone(),
            config.reciters_url.clone(),
            config.data_dir.clone(),
            config.user_agent.clone(),
        );
        let reciters = match directory.load().await {
            Ok(listing) => {
                if listing.source == ListingSource::Cached {
                    warn!("Running with the cached reciter directory");
                }
                listing.reciters
            }
            Err(e) => {
                warn!(error = %e, "Reciter directory unavailable");
                Vec::new()
            }
        };

        let resume_store = ResumeStore::new(config.settings_store.clone());
        let resume = resume_store.load().await;
        let budget_bytes = resume.budget_bytes.unwrap_or(config.cache_budget_bytes);

        let reciter = resume
            .reciter
            .and_then(|id| reciters.iter().find(|r| r.id == id))
            .or_else(|| reciters.iter().find(|r| r.is_default))
            .or_else(|| reciters.first())
            .cloned();
        match &reciter {
            Some(r) => info!(reciter = %r.id, name = %r.name, "Reciter selected"),
            None => warn!("No reciter available"),
        }

        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

        let cache_config =
            CacheConfig::new(&config.cache_dir, &config.audio_base_url).with_budget(budget_bytes);
        cache_config
            .validate()
            .map_err(|e| ServiceError::Runtime(core_runtime::Error::Config(e)))?;
        let cache = Arc::new(
            CacheStore::new(
                config.file_system.clone(),
                CacheLayout::new(&cache_config),
                budget_bytes,
                Arc::new(SystemClock),
            )
            .with_event_bus(event_bus.clone()),
        );

        let downloads = DownloadCoordinator::with_event_bus(
            config.http_client.clone(),
            config.file_system.clone(),
            cache.clone(),
            DownloadConfig::default()
                .with_user_agent(config.user_agent.clone())
                .with_max_attempts(config.download_attempts),
            event_bus.clone(),
        );

        let session = PlaybackSession::new(
            config.playback_adapter.clone(),
            downloads.clone(),
            catalog.clone(),
            resume_store.clone(),
            event_bus.clone(),
        )
        .with_config(SessionConfig {
            fade_duration: config.fade_duration,
            fade_step: DEFAULT_FADE_STEP,
            tick_interval: config.tick_interval,
            persist_interval: config.persist_interval,
        })
        .with_reciter(reciter.clone())
        .with_resume(resume);

        // Subscribe before the loop starts so no early event is missed.
        let forwarder_events = event_bus.subscribe();
        let player = TransitionScheduler::spawn(session);

        let current_reciter = Arc::new(RwLock::new(reciter));
        let forwarder = now_playing::spawn_forwarder(
            forwarder_events,
            catalog.clone(),
            current_reciter.clone(),
            config.platform_integration.clone(),
        );

        info!(budget_bytes, reciters = reciters.len(), "Core service started");
        Ok(Self {
            inner: Arc::new(ServiceInner {
                catalog,
                directory,
                reciters: RwLock::new(reciters),
                current_reciter,
                cache,
                downloads,
                resume_store,
                player,
                event_bus,
                forwarder: Mutex::new(Some(forwarder)),
                platform: config.platform_integration.clone(),
            }),
        })
    }

    /// Command handle for the player. Clones may be handed to hotkeys and
    /// media-center integrations.
    pub fn player(&self) -> PlayerHandle {
        self.inner.player.clone()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner.catalog.clone()
    }

    pub fn reciters(&self) -> Vec<Reciter> {
        self.inner.reciters.read().clone()
    }

    pub fn current_reciter(&self) -> Option<Reciter> {
        self.inner.current_reciter.read().clone()
    }

    /// Switch reciter. Stops playback and persists the choice.
    #[instrument(skip(self))]
    pub fn select_reciter(&self, id: ReciterId) -> Result<Reciter> {
        let reciter = self
            .inner
            .reciters
            .read()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(ServiceError::UnknownReciter(id))?;

        self.inner.player.select_reciter(reciter.clone())?;
        *self.inner.current_reciter.write() = Some(reciter.clone());
        Ok(reciter)
    }

    /// Download every catalog track for the current reciter, one at a time.
    pub fn download_all(&self) -> Result<BoxStream<'static, BulkProgress>> {
        let reciter = self.require_reciter()?;
        let tracks = self.inner.catalog.ids().collect();
        Ok(self.inner.downloads.ensure_all_available(reciter, tracks))
    }

    /// Delete the current reciter's cached files.
    pub async fn clear_cache(&self) -> Result<ClearReport> {
        let reciter = self.require_reciter()?;
        Ok(self.inner.cache.clear(&reciter).await)
    }

    /// Delete every cached file of every reciter.
    pub async fn clear_all_caches(&self) -> ClearReport {
        self.inner.cache.clear_all().await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let reciter = self.require_reciter()?;
        Ok(self.inner.cache.stats(&reciter).await)
    }

    /// Persist a new cache budget. It takes effect on the next start.
    pub async fn set_cache_budget(&self, bytes: u64) -> Result<()> {
        if bytes == 0 {
            return Err(ServiceError::Runtime(core_runtime::Error::Config(
                "Cache budget must be greater than 0 bytes".to_string(),
            )));
        }
        self.inner.resume_store.save_budget(bytes).await;
        Ok(())
    }

    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.inner.event_bus.subscribe()
    }

    /// Fetch the reciter directory again.
    ///
    /// Selects the directory's default when no reciter is selected yet.
    #[instrument(skip(self))]
    pub async fn refresh_reciters(&self) -> Result<Vec<Reciter>> {
        let listing = self.inner.directory.load().await?;
        *self.inner.reciters.write() = listing.reciters.clone();

        let needs_reciter = self.inner.current_reciter.read().is_none();
        if needs_reciter {
            if let Some(default) = listing.default_reciter().cloned() {
                self.select_reciter(default.id)?;
            }
        }
        Ok(listing.reciters)
    }

    /// Stop the player, persist its position and detach the platform
    /// integration.
    pub async fn shutdown(&self) -> Result<()> {
        match self.inner.player.shutdown().await {
            Ok(()) | Err(PlaybackError::ControlLoopClosed) => {}
            Err(e) => return Err(e.into()),
        }

        let forwarder = self.inner.forwarder.lock().take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        if let Err(e) = self.inner.platform.clear_now_playing().await {
            warn!(error = %e, "Failed to clear now-playing entry");
        }
        info!("Core service stopped");
        Ok(())
    }

    fn require_reciter(&self) -> Result<Reciter> {
        self.current_reciter()
            .ok_or(ServiceError::Playback(PlaybackError::NoReciterSelected))
    }
}
