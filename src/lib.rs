//! Umbrella crate for the surah player core.
//!
//! Host applications depend on `surah-player` and pick features here
//! (`desktop-shims`, `audio-output`) instead of wiring each workspace crate
//! individually. Everything public lives in `core-service`.

pub use core_service::*;
