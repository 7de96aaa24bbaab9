//! Platform integration capability.
//!
//! Media-center widgets, lock-screen controls and similar OS surfaces only
//! ever observe playback. The core forwards state changes to an
//! implementation of [`PlatformIntegration`]; commands coming back from
//! those surfaces go through the regular player handle.

use crate::error::Result;
use async_trait::async_trait;

/// Snapshot pushed to the OS "now playing" surface.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track_id: u32,
    pub title: String,
    pub subtitle: Option<String>,
    /// Reciter name, shown where platforms expect an artist.
    pub artist: Option<String>,
    pub duration_secs: f64,
    pub position_secs: f64,
    pub is_playing: bool,
}

#[async_trait]
pub trait PlatformIntegration: Send + Sync {
    /// Publish the current track and transport state.
    async fn update_now_playing(&self, now_playing: NowPlaying) -> Result<()>;

    /// Remove any published entry, e.g. after playback stops.
    async fn clear_now_playing(&self) -> Result<()>;
}

/// Integration that ignores every update.
#[derive(Debug, Clone, Default)]
pub struct NoopPlatformIntegration;

#[async_trait]
impl PlatformIntegration for NoopPlatformIntegration {
    async fn update_now_playing(&self, _now_playing: NowPlaying) -> Result<()> {
        Ok(())
    }

    async fn clear_now_playing(&self) -> Result<()> {
        Ok(())
    }
}
