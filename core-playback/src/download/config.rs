//! Download configuration

use std::time::Duration;

/// Bytes read from the response body per write.
pub const DOWNLOAD_CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Sent as `User-Agent` on every audio request
    pub user_agent: String,

    /// Attempts per task for transient failures (default: 3)
    pub max_attempts: u32,

    /// Linear back-off unit between attempts (default: 2s)
    pub retry_backoff: Duration,

    /// Per-request timeout handed to the HTTP client
    pub request_timeout: Option<Duration>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("SurahPlayer/{}", env!("CARGO_PKG_VERSION")),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            request_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl DownloadConfig {
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Delay before attempt number `attempt + 1`.
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff * attempt
    }
}
