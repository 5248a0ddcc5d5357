//! Maplapse Common Utilities
//!
//! Shared infrastructure for all Maplapse crates:
//! - Error types and result aliases
//! - Frame clock (timestamps, keyframe cadence, freeze-frame arithmetic)
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
