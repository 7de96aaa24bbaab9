//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `PlaybackAdapter` using Symphonia for probing and `rodio` for output
//!
//! ## Feature Flags
//!
//! - `audio-output`: Enable [`RodioPlaybackAdapter`] (pulls in `cpal`)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let fs = TokioFileSystem::new();
//!
//!     // Use in core configuration
//! }
//! ```

mod audio;
mod filesystem;
mod http;
mod settings;

pub use audio::{probe_file, ProbeSummary};
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "audio-output")]
pub use audio::RodioPlaybackAdapter;
