//! Cache configuration

use std::path::PathBuf;

/// Default cache budget: 1 GiB.
pub const DEFAULT_BUDGET_BYTES: u64 = 1024 * 1024 * 1024;

/// Configuration for the audio cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one subdirectory per reciter
    pub root_dir: PathBuf,

    /// Base URL audio files are served from
    pub audio_base_url: String,

    /// Maximum bytes kept per reciter directory (default: 1 GiB)
    pub budget_bytes: u64,

    /// Extension of cached audio files
    pub file_extension: String,
}

impl CacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>, audio_base_url: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            audio_base_url: audio_base_url.into(),
            budget_bytes: DEFAULT_BUDGET_BYTES,
            file_extension: "mp3".to_string(),
        }
    }

    /// Set the byte budget.
    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.root_dir.as_os_str().is_empty() {
            return Err("root_dir cannot be empty".to_string());
        }

        if self.budget_bytes == 0 {
            return Err("budget_bytes must be greater than 0".to_string());
        }

        if self.file_extension.is_empty() || self.file_extension.contains('.') {
            return Err("file_extension must be a bare extension like 'mp3'".to_string());
        }

        Ok(())
    }
}
