//! Output device abstraction.
//!
//! A device calls back at a fixed cadence for the next block of samples.
//! The fill callback runs on a driver-owned real-time thread and must not
//! block.

use std::sync::Arc;

use chainplay_core::{Result, StreamParams, StreamStatus};

/// Called once per period with the interleaved output buffer, the number of
/// frames requested, and the device status flags.
pub type FillCallback = Box<dyn FnMut(&mut [f32], usize, &StreamStatus) + Send + 'static>;

/// Called when the stream stops delivering callbacks.
pub type FinishedCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// An opened output stream.
pub trait OutputDevice: Send + Sync {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Begin invoking the fill callback.
    fn start_stream(&self) -> Result<()>;

    /// Stop invoking the fill callback.
    ///
    /// Must not block: it may be called from inside the fill callback.
    fn stop_stream(&self) -> Result<()>;

    fn is_stream_active(&self) -> bool;
}

/// Opens output streams.
pub trait DeviceBackend: Send + Sync {
    /// Construct a stream without starting it.
    ///
    /// An unknown device fails with `Error::DeviceNotFound`, a device that
    /// cannot play the requested format with `Error::UnsupportedFormat`.
    fn open(
        &self,
        params: &StreamParams,
        fill: FillCallback,
        finished: FinishedCallback,
    ) -> Result<Arc<dyn OutputDevice>>;

    /// Names of the available output devices.
    fn output_devices(&self) -> Result<Vec<String>>;
}
