//! Where cached files live locally and where they come from remotely.
//!
//! ```text
//! <root>/<sanitized reciter path>/<NNN>.mp3        complete file
//! <root>/<sanitized reciter path>/<NNN>.mp3.part   in-flight download
//! <base_url>/<reciter path>/<NNN>.mp3              remote source
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use core_library::{Reciter, TrackId};

use super::config::CacheConfig;

/// Suffix appended to the final file name while a download is in flight.
pub const TEMP_SUFFIX: &str = ".part";

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    base_url: String,
    extension: String,
}

impl CacheLayout {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            root: config.root_dir.clone(),
            base_url: config.audio_base_url.trim_end_matches('/').to_string(),
            extension: config.file_extension.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reciter_dir(&self, reciter: &Reciter) -> PathBuf {
        self.root.join(reciter.cache_directory_name())
    }

    pub fn file_name(&self, track: TrackId) -> String {
        format!("{}.{}", track.file_stem(), self.extension)
    }

    pub fn track_path(&self, reciter: &Reciter, track: TrackId) -> PathBuf {
        self.reciter_dir(reciter).join(self.file_name(track))
    }

    /// Temporary sibling of `final_path`, on the same filesystem so the
    /// final rename is atomic.
    pub fn temp_path(final_path: &Path) -> PathBuf {
        let mut name: OsString = final_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(TEMP_SUFFIX);
        final_path.with_file_name(name)
    }

    pub fn is_temp_file(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TEMP_SUFFIX))
    }

    /// Track id of a complete cached file, if the name matches `NNN.<ext>`.
    pub fn parse_track_file(&self, path: &Path) -> Option<TrackId> {
        let ext = path.extension()?.to_str()?;
        if !ext.eq_ignore_ascii_case(&self.extension) {
            return None;
        }
        TrackId::from_file_stem(path.file_stem()?.to_str()?)
    }

    pub fn remote_url(&self, reciter: &Reciter, track: TrackId) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            reciter.url_path(),
            self.file_name(track)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::ReciterId;

    fn layout() -> CacheLayout {
        CacheLayout::new(&CacheConfig::new(
            "/cache/audio",
            "https://download.quranicaudio.com/quran/",
        ))
    }

    fn reciter() -> Reciter {
        Reciter::new(ReciterId(5), "Mishary", "Mishaari Raashid/al_3afaasee")
    }

    #[test]
    fn test_local_paths() {
        let layout = layout();
        let path = layout.track_path(&reciter(), TrackId(7));
        assert_eq!(
            path,
            PathBuf::from("/cache/audio/mishaari_raashid_al_3afaasee/007.mp3")
        );
        assert_eq!(
            CacheLayout::temp_path(&path),
            PathBuf::from("/cache/audio/mishaari_raashid_al_3afaasee/007.mp3.part")
        );
    }

    #[test]
    fn test_remote_url() {
        assert_eq!(
            layout().remote_url(&reciter(), TrackId(114)),
            "https://download.quranicaudio.com/quran/Mishaari Raashid/al_3afaasee/114.mp3"
        );
    }

    #[test]
    fn test_parse_track_file() {
        let layout = layout();
        assert_eq!(
            layout.parse_track_file(Path::new("/x/012.mp3")),
            Some(TrackId(12))
        );
        assert_eq!(layout.parse_track_file(Path::new("/x/012.MP3")), Some(TrackId(12)));
        assert_eq!(layout.parse_track_file(Path::new("/x/012.mp3.part")), None);
        assert_eq!(layout.parse_track_file(Path::new("/x/cover.jpg")), None);
        assert_eq!(layout.parse_track_file(Path::new("/x/notes.mp3")), None);
        assert!(CacheLayout::is_temp_file(Path::new("/x/012.mp3.part")));
        assert!(!CacheLayout::is_temp_file(Path::new("/x/012.mp3")));
    }
}
