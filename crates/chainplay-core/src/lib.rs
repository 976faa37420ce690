//! # chainplay-core
//!
//! Core types, settings, and error handling for the chainplay preview engine.

pub mod config;
pub mod error;
pub mod types;

pub use config::{PlaybackConfig, Settings};
pub use error::{Error, Result};
pub use types::*;
