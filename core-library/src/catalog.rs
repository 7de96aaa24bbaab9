//! Track catalog loading and navigation.
//!
//! The catalog is a JSON array loaded once at startup:
//!
//! ```json
//! [
//!   { "number": 1, "name": "Al-Fatiha", "translation": "The Opening", "duration": 47.3 },
//!   { "number": 2, "name": "Al-Baqarah", "englishName": "The Cow", "audioFile": "002.mp3" }
//! ]
//! ```
//!
//! Numbers must be unique and run contiguously from 1, so lookups are plain
//! index arithmetic.

use std::path::Path;

use bridge_traits::storage::FileSystemAccess;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LibraryError, Result};
use crate::models::{Track, TrackId};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogRecord {
    number: u32,
    name: String,
    #[serde(default, alias = "englishName")]
    translation: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    audio_file: Option<String>,
}

impl From<CatalogRecord> for Track {
    fn from(record: CatalogRecord) -> Self {
        let id = TrackId(record.number);
        Track {
            id,
            name: record.name,
            translated_name: record.translation.filter(|t| !t.trim().is_empty()),
            expected_duration_secs: record.duration,
            audio_file: record
                .audio_file
                .unwrap_or_else(|| format!("{}.mp3", id.file_stem())),
        }
    }
}

/// Ordered, validated track list.
#[derive(Debug, Clone)]
pub struct Catalog {
    tracks: Vec<Track>,
}

impl Catalog {
    /// Build a catalog from tracks, sorting by id and validating.
    pub fn new(mut tracks: Vec<Track>) -> Result<Self> {
        if tracks.is_empty() {
            return Err(LibraryError::Catalog("catalog contains no tracks".to_string()));
        }

        tracks.sort_by_key(|t| t.id);

        for (index, track) in tracks.iter().enumerate() {
            let expected = index as u32 + 1;
            if track.id.0 != expected {
                return Err(LibraryError::Catalog(if track.id.0 < expected {
                    format!("duplicate track number {}", track.id)
                } else {
                    format!("track numbers must be contiguous: missing {}", expected)
                }));
            }
            track.validate().map_err(LibraryError::Catalog)?;
        }

        Ok(Self { tracks })
    }

    /// Parse catalog JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let records: Vec<CatalogRecord> = serde_json::from_slice(bytes)
            .map_err(|e| LibraryError::Catalog(format!("malformed catalog: {}", e)))?;
        Self::new(records.into_iter().map(Track::from).collect())
    }

    /// Read and parse the catalog through the filesystem bridge.
    ///
    /// Any failure, including a missing file, is a `LibraryError::Catalog`.
    pub async fn load(fs: &dyn FileSystemAccess, path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading catalog");

        let bytes = fs.read_file(path).await.map_err(|e| {
            LibraryError::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_json(&bytes)?;

        info!(tracks = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.tracks.iter().map(|t| t.id)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        let index = (id.0 as usize).checked_sub(1)?;
        self.tracks.get(index)
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.get(id).is_some()
    }

    pub fn first(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// Track with `id + 1`, if the catalog has one.
    pub fn next_after(&self, id: TrackId) -> Option<&Track> {
        self.get(TrackId(id.0.checked_add(1)?))
    }

    /// Track with `id - 1`, if that is still a valid id.
    pub fn previous_before(&self, id: TrackId) -> Option<&Track> {
        self.get(TrackId(id.0.checked_sub(1)?))
    }
}
