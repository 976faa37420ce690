//! Output stream parameters shared by the engine and device backends.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sample format requested from the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SampleFormat {
    #[default]
    F32,
    I16,
    U16,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::I16 => "i16",
            Self::U16 => "u16",
        };
        f.write_str(name)
    }
}

/// Parameters used to open an output stream for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    /// Frames per callback.
    pub block_size: usize,
    /// Output device name, `None` for the host default.
    pub device: Option<String>,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

/// Status flags passed to the fill callback by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStatus {
    /// The hardware ran out of data since the previous callback.
    pub output_underflow: bool,
}
