//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the player core:
//! - Logging and tracing bootstrap
//! - Configuration (`CoreConfig` builder)
//! - Event bus
//!
//! Every other core crate depends on this one for its logging conventions
//! and for the broadcast channel state changes are published on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
