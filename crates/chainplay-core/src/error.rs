//! Error types for chainplay.

use thiserror::Error;

/// Result type alias using chainplay's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chainplay.
#[derive(Error, Debug)]
pub enum Error {
    // Output device errors
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    // Source and rendering errors
    #[error("Cannot read audio source: {0}")]
    Source(String),

    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    // Transport errors
    #[error("Invalid transport state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Settings errors
    #[error("Configuration error: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if this error prevents a session from being created.
    ///
    /// These are the errors `start()` surfaces synchronously; anything raised
    /// once a session is running is logged and turned into a stop instead.
    pub const fn is_fatal_on_start(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_)
                | Self::UnsupportedFormat(_)
                | Self::AudioOutput(_)
                | Self::Source(_)
                | Self::InvalidState(_)
                | Self::InvalidArgument(_)
        )
    }
}
