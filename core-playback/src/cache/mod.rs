//! # Audio Cache Module
//!
//! Size-bounded local storage for downloaded recitations.
//!
//! ## Overview
//!
//! Each reciter gets a subdirectory under the cache root; each complete
//! track is one `NNN.mp3` file in it. The store keeps an in-memory index of
//! those files and evicts least-recently-played tracks when a reciter's
//! directory grows past the byte budget.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheStore                         │
//! │  - has() / path_for()                  │
//! │  - record_completion() -> evict        │
//! │  - touch() / clear() / clear_all()     │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> CacheLayout (paths + remote URLs)
//!          ├──> FileSystemAccess (Storage)
//!          ├──> Clock (recency timestamps)
//!          └──> EventBus (Evicted / Cleared)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::CacheStore;
//!
//! # async fn example(cache: &CacheStore, reciter: &core_library::Reciter) {
//! let track = core_library::TrackId(1);
//! if let Some(path) = cache.path_for(reciter, track).await {
//!     cache.touch(reciter, track).await;
//!     println!("Playing {}", path.display());
//! }
//!
//! let stats = cache.stats(reciter).await;
//! println!("Cache usage: {:.1}%", stats.usage_percentage());
//! # }
//! ```

pub mod config;
pub mod layout;
pub mod stats;
pub mod store;

pub use config::{CacheConfig, DEFAULT_BUDGET_BYTES};
pub use layout::CacheLayout;
pub use stats::{CacheStats, ClearReport, EvictionReport};
pub use store::{CacheEntry, CacheStore};
