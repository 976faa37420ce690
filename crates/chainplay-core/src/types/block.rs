//! Fixed-length blocks of interleaved samples.

use std::fmt;

/// An immutable block of interleaved `f32` samples.
///
/// Every block handed to the output side holds exactly
/// `channels × block_size` samples. A short final block from the renderer is
/// zero-padded when it is constructed, so consumers never see a partial block.
#[derive(Clone, PartialEq)]
pub struct AudioBlock {
    samples: Box<[f32]>,
    channels: u16,
}

impl AudioBlock {
    /// Build a block from rendered samples, zero-padding (or truncating) to
    /// exactly `block_size` frames.
    pub fn padded(mut samples: Vec<f32>, channels: u16, block_size: usize) -> Self {
        let len = usize::from(channels.max(1)) * block_size;
        samples.resize(len, 0.0);
        Self {
            samples: samples.into_boxed_slice(),
            channels: channels.max(1),
        }
    }

    /// A block of silence.
    pub fn silent(channels: u16, block_size: usize) -> Self {
        Self::padded(Vec::new(), channels, block_size)
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels)
    }

    /// Total number of samples across all channels.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl fmt::Debug for AudioBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBlock")
            .field("channels", &self.channels)
            .field("frames", &self.frames())
            .finish()
    }
}
