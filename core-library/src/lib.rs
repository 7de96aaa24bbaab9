//! # Core Library
//!
//! Catalog and reciter domain for the player:
//! - [`models`]: `Track`, `Reciter` and their id newtypes
//! - [`catalog`]: loading and navigating the fixed track list
//! - [`reciters`]: the remote reciter directory with a cached fallback

pub mod catalog;
pub mod error;
pub mod models;
pub mod reciters;

pub use catalog::Catalog;
pub use error::{LibraryError, Result};
pub use models::{Reciter, ReciterId, Track, TrackId};
pub use reciters::{ListingSource, ReciterDirectory, ReciterListing};
