//! # Playback Error Types
//!
//! Errors surfaced by the cache, the download coordinator and the
//! playback state machine.

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Failure of a single download task.
///
/// `Clone` so every subscriber of a shared transfer receives the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Connection, DNS, TLS or mid-body read failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("Server returned HTTP {0}")]
    HttpStatus(u16),

    /// Writing or moving the file failed (disk full, permissions).
    #[error("Storage error: {0}")]
    Storage(String),

    /// The transfer task ended without publishing an outcome.
    #[error("Download interrupted")]
    Interrupted,
}

impl DownloadError {
    /// Network errors and 5xx responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::HttpStatus(status) => (500..600).contains(status),
            DownloadError::Storage(_) | DownloadError::Interrupted => false,
        }
    }

    pub(crate) fn from_bridge_network(err: BridgeError) -> Self {
        DownloadError::Network(err.to_string())
    }

    pub(crate) fn from_bridge_storage(err: BridgeError) -> Self {
        DownloadError::Storage(err.to_string())
    }
}

/// Errors that can occur during playback operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// Fetching the audio failed. Recoverable: the user may retry.
    #[error("Network error: {0}")]
    Network(String),

    /// The cache could not be written (disk full, permission denied).
    #[error("Storage error: {0}")]
    Storage(String),

    /// The cached file could not be opened even after a fresh download.
    #[error("Corrupt audio file: {0}")]
    CorruptAsset(String),

    /// The output device disappeared.
    #[error("Audio device unavailable: {0}")]
    Device(String),

    #[error("Track not found: {0}")]
    TrackNotFound(u32),

    #[error("No reciter selected")]
    NoReciterSelected,

    /// Attempted an operation that needs a loaded source.
    #[error("No source loaded")]
    NoSourceLoaded,

    /// The control loop has shut down; commands can no longer be delivered.
    #[error("Playback control loop is closed")]
    ControlLoopClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if a new `play` may succeed without intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlaybackError::Network(_)
                | PlaybackError::Storage(_)
                | PlaybackError::Device(_)
                | PlaybackError::NoSourceLoaded
        )
    }

    pub fn is_corrupt_asset(&self) -> bool {
        matches!(self, PlaybackError::CorruptAsset(_))
    }

    /// Short text for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            PlaybackError::Network(_) => {
                "Could not download the recitation. Check your connection and try again."
                    .to_string()
            }
            PlaybackError::Storage(_) => {
                "Could not save the recitation. Free up disk space and try again.".to_string()
            }
            PlaybackError::CorruptAsset(_) => {
                "The audio file for this track is damaged on the server.".to_string()
            }
            PlaybackError::Device(_) => "The audio output device is unavailable.".to_string(),
            PlaybackError::TrackNotFound(id) => format!("Track {} is not in the catalog.", id),
            PlaybackError::NoReciterSelected => "Choose a reciter first.".to_string(),
            PlaybackError::NoSourceLoaded => "Nothing is playing.".to_string(),
            PlaybackError::ControlLoopClosed | PlaybackError::Internal(_) => {
                "Playback stopped unexpectedly.".to_string()
            }
        }
    }
}

impl From<DownloadError> for PlaybackError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Network(msg) => PlaybackError::Network(msg),
            DownloadError::HttpStatus(status) => {
                PlaybackError::Network(format!("server returned HTTP {}", status))
            }
            DownloadError::Storage(msg) => PlaybackError::Storage(msg),
            DownloadError::Interrupted => PlaybackError::Network("download interrupted".to_string()),
        }
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Decode(msg) => PlaybackError::CorruptAsset(msg),
            BridgeError::DeviceUnavailable(msg) => PlaybackError::Device(msg),
            BridgeError::Network(msg) => PlaybackError::Network(msg),
            BridgeError::UnknownSource(_) => PlaybackError::NoSourceLoaded,
            BridgeError::Io(e) => PlaybackError::Storage(e.to_string()),
            other => PlaybackError::Internal(other.to_string()),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
