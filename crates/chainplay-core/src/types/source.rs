//! Audio source properties.

use serde::{Deserialize, Serialize};

/// Properties of a source as reported by the renderer's probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channels in the source file.
    pub channels: u16,
    /// Total length in frames.
    pub total_frames: u64,
}

impl SourceInfo {
    pub const fn new(sample_rate: u32, channels: u16, total_frames: u64) -> Self {
        Self {
            sample_rate,
            channels,
            total_frames,
        }
    }

    /// Number of blocks needed to cover the whole source, never less than one.
    pub const fn block_count(&self, block_size: usize) -> u64 {
        if block_size == 0 {
            return 1;
        }
        let blocks = self.total_frames.div_ceil(block_size as u64);
        if blocks == 0 {
            1
        } else {
            blocks
        }
    }

    /// Frame offset for a playback position in `[0.0, 1.0]`.
    ///
    /// Out-of-range and NaN positions are clamped.
    pub fn start_frame(&self, fraction: f32) -> u64 {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            f64::from(fraction.clamp(0.0, 1.0))
        };
        (self.total_frames as f64 * fraction).floor() as u64
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.total_frames as f64 / f64::from(self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_block_count_rounds_up() {
        let info = SourceInfo::new(44100, 2, 220_500);
        assert_eq!(info.block_count(1024), 216);
    }

    #[test]
    fn test_block_count_exact_and_empty() {
        assert_eq!(SourceInfo::new(48000, 2, 4096).block_count(1024), 4);
        assert_eq!(SourceInfo::new(48000, 2, 0).block_count(1024), 1);
    }

    #[test]
    fn test_start_frame_is_never_negative() {
        let info = SourceInfo::new(44100, 2, 220_500);
        assert_eq!(info.start_frame(0.0), 0);
        assert_eq!(info.start_frame(0.5), 110_250);
        assert_eq!(info.start_frame(1.0), 220_500);
        assert_eq!(info.start_frame(-0.3), 0);
        assert_eq!(info.start_frame(7.0), 220_500);
        assert_eq!(info.start_frame(f32::NAN), 0);
    }

    #[test]
    fn test_duration() {
        let info = SourceInfo::new(44100, 2, 220_500);
        assert!((info.duration_secs() - 5.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_start_frame_stays_inside_source(
            total in 0u64..50_000_000,
            fraction in -1.0f32..2.0,
        ) {
            let info = SourceInfo::new(44100, 2, total);
            prop_assert!(info.start_frame(fraction) <= total);
        }

        #[test]
        fn prop_block_count_covers_source_exactly(
            total in 0u64..50_000_000,
            block_size in 1usize..8192,
        ) {
            let blocks = SourceInfo::new(44100, 2, total).block_count(block_size);
            let block_size = block_size as u64;
            prop_assert!(blocks >= 1);
            prop_assert!(blocks * block_size >= total);
            prop_assert!(total == 0 || (blocks - 1) * block_size < total);
        }
    }
}
