//! Persisted settings for the preview player.
//!
//! Settings are stored as pretty-printed JSON. A missing file is created with
//! defaults on first load; an unparsable file is reported and replaced by
//! defaults in memory (the file on disk is left untouched).

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Frames per block handed between renderer and output.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Blocks buffered ahead of the output device.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;

/// Consecutive empty polls before a session is stopped for underflow.
pub const DEFAULT_UNDERFLOW_LIMIT: u32 = 10;

const SETTINGS_FILE: &str = "settings.json";

/// Engine tuning for one playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Frames per block.
    pub block_size: usize,
    /// Maximum number of blocks the queue may hold.
    pub buffer_capacity: usize,
    /// Consecutive empty polls tolerated before stopping.
    pub underflow_limit: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            underflow_limit: DEFAULT_UNDERFLOW_LIMIT,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be at least 1".to_string()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Config(
                "buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.underflow_limit == 0 {
            return Err(Error::Config(
                "underflow_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// User settings persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub block_size: usize,
    pub buffer_capacity: usize,
    pub underflow_limit: u32,
    /// Output channel count.
    pub channels: u16,
    /// Output device name; `None` selects the host default.
    pub device: Option<String>,
    /// Gain applied by the render chain, in decibels.
    pub gain_db: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            underflow_limit: DEFAULT_UNDERFLOW_LIMIT,
            channels: 2,
            device: None,
            gain_db: 0.0,
        }
    }
}

impl Settings {
    /// Location of the settings file in the platform config directory.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "chainplay", "Chainplay").ok_or_else(|| {
            Error::Config("Failed to determine configuration directory".to_string())
        })?;
        Ok(project_dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Load settings, writing defaults when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings at {}, writing defaults", path.display());
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }

        let contents = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&contents) {
            Ok(settings) => {
                debug!("Loaded settings from {}", path.display());
                Ok(settings)
            }
            Err(e) => {
                warn!("Invalid settings file {}: {e}, using defaults", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Save settings, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.playback().validate()?;
        if self.channels == 0 {
            return Err(Error::Config("channels must be at least 1".to_string()));
        }
        if !self.gain_db.is_finite() {
            return Err(Error::Config("gain_db must be finite".to_string()));
        }
        Ok(())
    }

    /// Engine tuning derived from these settings.
    pub const fn playback(&self) -> PlaybackConfig {
        PlaybackConfig {
            block_size: self.block_size,
            buffer_capacity: self.buffer_capacity,
            underflow_limit: self.underflow_limit,
        }
    }
}
