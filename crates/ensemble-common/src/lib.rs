//! # Ensemble Common
//!
//! Shared types, error kinds, and constants used across Ensemble components.
//!
//! ## Modules
//! - `types` - Node metadata and store-facing data structures
//! - `error` - The coordination error enum
//! - `constants` - Default paths, limits, and Redis key layout

pub mod constants;
pub mod error;
pub mod types;

pub use error::{CoordError, Result};
pub use types::*;
