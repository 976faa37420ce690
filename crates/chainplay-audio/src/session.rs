//! Per-session state shared by the producer, the consumer and the controller.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use chainplay_core::{Error, PlaybackConfig, Result};
use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::buffer::BoundedBlockQueue;
use crate::device::OutputDevice;
use crate::events::{PlaybackEvent, StopReason};
use crate::state::{TransportShared, TransportState};

/// Ask the controller to end a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StopRequest {
    pub session: u64,
    pub reason: StopReason,
}

/// Fixed properties of a session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionParams {
    pub id: u64,
    pub config: PlaybackConfig,
    pub sample_rate: u32,
    pub channels: u16,
    pub max_block_index: u64,
    pub start_fraction: f32,
}

pub(crate) struct SessionShared {
    params: SessionParams,
    queue: BoundedBlockQueue,
    block_index: AtomicU64,
    consecutive_empty_polls: AtomicU32,
    terminating: AtomicBool,
    stream_started: AtomicBool,
    source_exhausted: AtomicBool,
    stop_requested: AtomicBool,
    // Weak: the device's callbacks own this struct.
    device: OnceLock<Weak<dyn OutputDevice>>,
    transport: Arc<TransportShared>,
    stop_tx: Sender<StopRequest>,
}

impl SessionShared {
    pub(crate) fn new(
        params: SessionParams,
        transport: Arc<TransportShared>,
        stop_tx: Sender<StopRequest>,
    ) -> Self {
        Self {
            queue: BoundedBlockQueue::new(params.config.buffer_capacity),
            params,
            block_index: AtomicU64::new(0),
            consecutive_empty_polls: AtomicU32::new(0),
            terminating: AtomicBool::new(false),
            stream_started: AtomicBool::new(false),
            source_exhausted: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            device: OnceLock::new(),
            transport,
            stop_tx,
        }
    }

    pub(crate) const fn params(&self) -> &SessionParams {
        &self.params
    }

    pub(crate) const fn id(&self) -> u64 {
        self.params.id
    }

    pub(crate) const fn queue(&self) -> &BoundedBlockQueue {
        &self.queue
    }

    pub(crate) fn attach_device(&self, device: &Arc<dyn OutputDevice>) {
        let _ = self.device.set(Arc::downgrade(device));
    }

    pub(crate) fn device(&self) -> Option<Arc<dyn OutputDevice>> {
        self.device.get().and_then(Weak::upgrade)
    }

    /// Blocking-push timeout: two full buffer periods.
    pub(crate) fn push_timeout(&self) -> Duration {
        let SessionParams {
            config, sample_rate, ..
        } = self.params;
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        let block_secs = config.block_size as f64 / f64::from(sample_rate);
        Duration::from_secs_f64(2.0 * block_secs * config.buffer_capacity as f64)
    }

    pub(crate) fn block_index(&self) -> u64 {
        self.block_index.load(Ordering::Acquire)
    }

    /// Count one more produced block; returns the new count.
    pub(crate) fn advance_block_index(&self) -> u64 {
        self.block_index.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Playback position after `produced` blocks.
    pub(crate) fn progress_at(&self, produced: u64) -> f32 {
        progress(self.params.start_fraction, produced, self.params.max_block_index)
    }

    pub(crate) fn consecutive_empty_polls(&self) -> u32 {
        self.consecutive_empty_polls.load(Ordering::Acquire)
    }

    /// Count one more empty poll; returns the new count.
    pub(crate) fn record_empty_poll(&self) -> u32 {
        self.consecutive_empty_polls
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    pub(crate) fn reset_empty_polls(&self) {
        self.consecutive_empty_polls.store(0, Ordering::Release);
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub(crate) fn mark_terminating(&self) {
        self.terminating.store(true, Ordering::Release);
    }

    pub(crate) fn is_source_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_source_exhausted(&self) {
        self.source_exhausted.store(true, Ordering::Release);
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        self.transport.emit(event);
    }

    /// Start the output stream the first time this is called.
    ///
    /// Moves the transport from `Starting` to `Active`.
    pub(crate) fn ensure_stream_started(&self) -> Result<()> {
        if self.stream_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let device = self
            .device()
            .ok_or_else(|| Error::Internal("output device already released".to_string()))?;

        info!("START audio stream [{}]", device.name());
        device.start_stream()?;
        self.transport
            .transition(TransportState::Starting, TransportState::Active);
        Ok(())
    }

    /// Ask the controller to stop this session. Only the first request of a
    /// session is sent; the call never blocks.
    pub(crate) fn request_stop(&self, reason: StopReason) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let request = StopRequest {
            session: self.params.id,
            reason,
        };
        if let Err(e) = self.stop_tx.try_send(request) {
            debug!("Stop request for session {} not delivered: {e}", self.params.id);
        }
    }
}

/// `start_fraction + produced / max_block_index`, clamped to `[0, 1]`.
pub(crate) fn progress(start_fraction: f32, produced: u64, max_block_index: u64) -> f32 {
    let max = max_block_index.max(1) as f64;
    let value = f64::from(start_fraction) + produced as f64 / max;
    value.clamp(0.0, 1.0) as f32
}
