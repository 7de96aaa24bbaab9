//! # Playback Core
//!
//! Local audio cache, download coordination and the track-switch state
//! machine.
//!
//! ## Overview
//!
//! This crate handles:
//! - A size-bounded, per-reciter file cache with LRU eviction ([`cache`])
//! - Single-flight downloads with progress reporting ([`download`])
//! - Fade-out / load / fade-in track switching driven by one control loop
//!   ([`session`])
//!
//! Audio decoding and output are delegated to a host
//! [`PlaybackAdapter`](bridge_traits::playback::PlaybackAdapter).

pub mod cache;
pub mod download;
pub mod error;
pub mod session;

pub use cache::{CacheConfig, CacheLayout, CacheStats, CacheStore};
pub use download::{BulkOutcome, BulkProgress, DownloadConfig, DownloadCoordinator};
pub use error::{DownloadError, PlaybackError, Result};
pub use session::{
    PlaybackSession, PlaybackSnapshot, PlayerHandle, ResumeState, ResumeStore, SessionConfig,
    TransitionScheduler, TransitionState,
};
