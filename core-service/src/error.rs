use core_library::ReciterId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Invalid configuration or a missing bridge.
    #[error("Core initialization failed: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Playback error: {0}")]
    Playback(#[from] core_playback::PlaybackError),

    #[error("Reciter {0} is not in the directory")]
    UnknownReciter(ReciterId),
}

impl ServiceError {
    /// Startup errors the host cannot recover from without a fix (bad
    /// configuration, unreadable catalog).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::Runtime(_)
                | ServiceError::Library(core_library::LibraryError::Catalog(_))
                | ServiceError::Library(core_library::LibraryError::Parse(_))
        )
    }

    /// Short text for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Runtime(_) => "The player is misconfigured.".to_string(),
            ServiceError::Library(core_library::LibraryError::Network(_)) => {
                "Could not load the list of reciters. Check your connection.".to_string()
            }
            ServiceError::Library(_) => "The surah catalog could not be loaded.".to_string(),
            ServiceError::Playback(e) => e.user_message(),
            ServiceError::UnknownReciter(_) => "That reciter is no longer available.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::LibraryError;
    use core_playback::PlaybackError;

    #[test]
    fn test_catalog_errors_are_fatal() {
        let err: ServiceError = LibraryError::Catalog("empty".into()).into();
        assert!(err.is_fatal());
        assert!(err.user_message().contains("catalog"));

        let err: ServiceError = LibraryError::Network("offline".into()).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_playback_message_passes_through() {
        let err: ServiceError = PlaybackError::NoReciterSelected.into();
        assert_eq!(err.user_message(), PlaybackError::NoReciterSelected.user_message());
    }
}
