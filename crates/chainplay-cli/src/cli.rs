//! Command-line arguments.

use std::path::PathBuf;

use chainplay_core::Settings;
use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "chainplay")]
#[command(about = "Preview audio files through a processing chain")]
#[command(version)]
pub struct Args {
    /// Audio file to preview
    #[arg(required_unless_present = "list_devices")]
    pub file: Option<PathBuf>,

    /// Output device name (default device when omitted)
    #[arg(short, long, env = "CHAINPLAY_DEVICE")]
    pub device: Option<String>,

    /// Output channel count
    #[arg(short, long)]
    pub channels: Option<u16>,

    /// Start position as a fraction of the file, 0.0 to 1.0
    #[arg(short, long, default_value_t = 0.0)]
    pub start: f32,

    /// Frames per block
    #[arg(long)]
    pub block_size: Option<usize>,

    /// Blocks buffered ahead of the output
    #[arg(long)]
    pub buffer: Option<usize>,

    /// Consecutive empty output periods before playback stops
    #[arg(long)]
    pub underflow_limit: Option<u32>,

    /// Gain in decibels
    #[arg(long, allow_hyphen_values = true)]
    pub gain_db: Option<f32>,

    /// Settings file (platform config directory by default)
    #[arg(long, env = "CHAINPLAY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    pub save: bool,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,
}

impl Args {
    /// Override file settings with the flags that were given.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(device) = &self.device {
            settings.device = Some(device.clone());
        }
        if let Some(channels) = self.channels {
            settings.channels = channels;
        }
        if let Some(block_size) = self.block_size {
            settings.block_size = block_size;
        }
        if let Some(buffer) = self.buffer {
            settings.buffer_capacity = buffer;
        }
        if let Some(limit) = self.underflow_limit {
            settings.underflow_limit = limit;
        }
        if let Some(gain_db) = self.gain_db {
            settings.gain_db = gain_db;
        }
    }
}
