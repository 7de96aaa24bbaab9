//! # Download Module
//!
//! Fetches track audio into the cache with at most one transfer per
//! (reciter, track) key.
//!
//! A transfer streams the response body into `<final>.part` next to the
//! destination, renames it into place, records the file with the
//! [`CacheStore`](crate::cache::CacheStore) and resolves every waiting
//! caller with the final path. Network errors and 5xx responses are retried
//! inside the same task with a linear back-off.

pub mod config;
pub mod coordinator;
pub mod progress;

pub use config::{DownloadConfig, DOWNLOAD_CHUNK_SIZE};
pub use coordinator::DownloadCoordinator;
pub use progress::{BulkOutcome, BulkProgress, DownloadSnapshot, DownloadState};
