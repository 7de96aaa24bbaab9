//! Domain models for the catalog
//!
//! Tracks come from a fixed catalog and never change at runtime. Reciters
//! select which remote and local directory a track's audio lives under.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// ID Types
// =============================================================================

/// Catalog position of a track, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl TrackId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Zero-padded file stem, e.g. `007`.
    pub fn file_stem(&self) -> String {
        format!("{:03}", self.0)
    }

    /// Parse a cached file stem such as `007` back into an id.
    ///
    /// Only all-digit stems with a non-zero value are accepted.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse::<u32>().ok().filter(|id| *id > 0).map(Self)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a reciter in the remote directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReciterId(pub u32);

impl ReciterId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ReciterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Track
// =============================================================================

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    /// Primary display name
    pub name: String,
    /// Secondary display name (translation)
    pub translated_name: Option<String>,
    /// Duration listed in the catalog; the decoder's value wins when known.
    pub expected_duration_secs: Option<f64>,
    /// File name on the remote server, e.g. `001.mp3`.
    pub audio_file: String,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            translated_name: None,
            expected_duration_secs: None,
            audio_file: format!("{}.mp3", id.file_stem()),
        }
    }

    pub fn with_translation(mut self, translated: impl Into<String>) -> Self {
        self.translated_name = Some(translated.into());
        self
    }

    pub fn with_expected_duration(mut self, secs: f64) -> Self {
        self.expected_duration_secs = Some(secs);
        self
    }

    /// Validate track data
    pub fn validate(&self) -> Result<(), String> {
        if self.id.0 == 0 {
            return Err("Track number must be positive".to_string());
        }

        if self.name.trim().is_empty() {
            return Err(format!("Track {} has an empty name", self.id));
        }

        if self.audio_file.trim().is_empty() {
            return Err(format!("Track {} has an empty audio file name", self.id));
        }

        if let Some(secs) = self.expected_duration_secs {
            if !secs.is_finite() || secs < 0.0 {
                return Err(format!("Track {} has an invalid duration {}", self.id, secs));
            }
        }

        Ok(())
    }

    /// "Al-Fatiha (The Opening)" style label for media surfaces.
    pub fn display_title(&self) -> String {
        match &self.translated_name {
            Some(t) if !t.is_empty() => format!("{} ({})", self.name, t),
            _ => self.name.clone(),
        }
    }
}

// =============================================================================
// Reciter
// =============================================================================

/// A reciter (audio container) from the remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reciter {
    pub id: ReciterId,
    pub name: String,
    #[serde(default, alias = "localized_name", alias = "arabicName")]
    pub localized_name: Option<String>,
    /// Path segment under the audio base URL.
    #[serde(alias = "relativePath", alias = "relative_path")]
    pub path: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
    #[serde(default, alias = "is_default", alias = "default")]
    pub is_default: bool,
}

fn default_formats() -> Vec<String> {
    vec!["mp3".to_string()]
}

impl Reciter {
    pub fn new(id: ReciterId, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            localized_name: None,
            path: path.into(),
            formats: default_formats(),
            is_default: false,
        }
    }

    /// Local cache subdirectory for this reciter.
    ///
    /// The path segment with `/` and spaces turned into `_`, lower-cased.
    /// Always a single component below the cache root: a name made only of
    /// dots has them replaced as well.
    pub fn cache_directory_name(&self) -> String {
        let name = self
            .path
            .trim_matches('/')
            .chars()
            .map(|c| match c {
                '/' | '\\' | ' ' => '_',
                other => other,
            })
            .collect::<String>()
            .to_lowercase();

        if name.chars().all(|c| c == '.') {
            name.replace('.', "_")
        } else {
            name
        }
    }

    /// Path segment without surrounding slashes, for URL building.
    pub fn url_path(&self) -> &str {
        self.path.trim_matches('/')
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("Reciter {} has an empty name", self.id));
        }
        if self.url_path().is_empty() {
            return Err(format!("Reciter {} has an empty path", self.id));
        }
        if self
            .url_path()
            .split(['/', '\\'])
            .any(|segment| segment == "." || segment == "..")
        {
            return Err(format!(
                "Reciter {} path escapes its directory: {}",
                self.id, self.path
            ));
        }
        Ok(())
    }
}
