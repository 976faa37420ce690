//! Output-side adapter: fills device buffers from the session queue.
//!
//! Runs on the device's real-time callback. Only the non-blocking pop, a
//! fixed-size copy or zero-fill, and atomics are used here.

use std::sync::Arc;

use chainplay_core::StreamStatus;
use tracing::{debug, trace};

use crate::events::StopReason;
use crate::session::SessionShared;

pub(crate) struct ConsumerAdapter {
    shared: Arc<SessionShared>,
}

impl ConsumerAdapter {
    pub(crate) const fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    /// Supply one period of samples.
    pub(crate) fn fill(&self, output: &mut [f32], frames: usize, status: &StreamStatus) {
        let shared = &self.shared;
        if status.output_underflow {
            debug!("Audio stream output underflow: increase block size?");
        }

        let requested = (frames * usize::from(shared.params().channels)).min(output.len());

        if let Some(block) = shared.queue().try_pop() {
            let available = block.len().min(requested);
            output[..available].copy_from_slice(&block.samples()[..available]);
            output[available..].fill(0.0);
            shared.reset_empty_polls();
            return;
        }

        output.fill(0.0);
        let polls = shared.record_empty_poll();

        if shared.is_terminating() {
            if let Some(device) = shared.device() {
                if let Err(e) = device.stop_stream() {
                    debug!("Failed to stop drained stream: {e}");
                }
            }
        } else if shared.is_source_exhausted() {
            shared.request_stop(StopReason::EndOfSource);
        } else if polls >= shared.params().config.underflow_limit {
            debug!("Audio stream buffer empty for {polls} periods, stopping");
            shared.request_stop(StopReason::Underflow);
        } else {
            trace!("Audio stream buffer is empty: increase buffer capacity?");
        }
    }
}
