//! Render-side adapter: moves rendered blocks into the session queue.
//!
//! The first `buffer_capacity` blocks fill the queue without waiting while
//! the output stream is still stopped. The next block starts the stream and
//! from then on every push waits up to two buffer periods for space. A push
//! that times out drops its block and rendering carries on.

use std::sync::Arc;
use std::time::Duration;

use chainplay_core::{AudioBlock, Error};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::PushError;
use crate::chain::{BlockSink, Flow};
use crate::events::{PlaybackEvent, StopReason};
use crate::session::SessionShared;

pub(crate) struct ProducerAdapter {
    shared: Arc<SessionShared>,
    push_timeout: Duration,
}

impl ProducerAdapter {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        let push_timeout = shared.push_timeout();
        Self {
            shared,
            push_timeout,
        }
    }

    fn start_stream(&self) -> bool {
        match self.shared.ensure_stream_started() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to start audio stream: {e}");
                self.shared.request_stop(StopReason::DeviceFailed(e.to_string()));
                false
            }
        }
    }
}

impl BlockSink for ProducerAdapter {
    fn deliver(&mut self, block: AudioBlock) -> Flow {
        let shared = &self.shared;
        if shared.is_terminating() {
            trace!("Session {} terminating, halting render", shared.id());
            return Flow::Halt;
        }

        let index = shared.block_index();
        let capacity = shared.params().config.buffer_capacity as u64;

        let enqueued = if index < capacity {
            match shared.queue().try_push(block) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Warm-up block {index} rejected: {e}");
                    false
                }
            }
        } else {
            if !self.start_stream() {
                return Flow::Halt;
            }
            match shared.queue().push(block, self.push_timeout) {
                Ok(()) => true,
                Err(PushError::Timeout(_)) => {
                    debug!("Audio stream buffer is full, dropping block {index}");
                    false
                }
                Err(e) => {
                    debug!("Block {index} not enqueued: {e}");
                    false
                }
            }
        };

        let produced = shared.advance_block_index();
        if enqueued {
            shared.emit(PlaybackEvent::Progress(shared.progress_at(produced)));
        }
        Flow::Continue
    }

    fn finish(&mut self) {
        info!(
            "Render finished after {} blocks",
            self.shared.block_index()
        );
        self.shared.mark_source_exhausted();
        // Sources shorter than the warm-up window never reached the start.
        if !self.shared.is_terminating() {
            self.start_stream();
        }
    }

    fn fail(&mut self, error: Error) {
        error!("Render failed: {error}");
        self.shared
            .request_stop(StopReason::RenderFailed(error.to_string()));
    }
}
