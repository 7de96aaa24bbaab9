//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the player core and platform-specific
//! implementations. Each trait represents a capability that the core requires but
//! that must be implemented differently per platform.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Buffered requests and streamed downloads
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the audio cache
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Audio & Platform Integration
//! - [`PlaybackAdapter`](playback::PlaybackAdapter) - Native audio output
//! - [`PlatformIntegration`](platform::PlatformIntegration) - Now-playing surfaces
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Two
//! variants carry meaning for the player state machine:
//!
//! - [`BridgeError::Decode`] marks a file the audio backend could not open
//! - [`BridgeError::DeviceUnavailable`] marks a lost output device
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod error;
pub mod http;
pub mod platform;
pub mod playback;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStream, RetryPolicy};
pub use platform::{NoopPlatformIntegration, NowPlaying, PlatformIntegration};
pub use playback::{
    PlaybackAdapter, PlaybackMetadata, PlaybackOptions, PlaybackRequest, PlaybackSessionId,
    PlaybackState, PreparedSource,
};
pub use storage::{FileMetadata, FileSystemAccess, SettingsStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
