//! Bounded FIFO of audio blocks.
//!
//! The queue is the only synchronisation point between the render thread
//! (producer) and the output device callback (consumer). The producer may
//! block with a timeout when the queue is full; the consumer never blocks.

use std::time::Duration;

use chainplay_core::AudioBlock;
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use thiserror::Error;

/// A push that did not enqueue. The rejected block is handed back.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("block queue is full")]
    Full(AudioBlock),

    #[error("timed out waiting for space in the block queue")]
    Timeout(AudioBlock),

    #[error("block queue is disconnected")]
    Disconnected(AudioBlock),
}

impl PushError {
    /// Recover the block that was not enqueued.
    pub fn into_block(self) -> AudioBlock {
        match self {
            Self::Full(block) | Self::Timeout(block) | Self::Disconnected(block) => block,
        }
    }
}

/// Fixed-capacity FIFO of [`AudioBlock`]s.
///
/// Capacity is fixed at construction and never exceeded: a full queue makes
/// the producer wait instead of dropping or growing.
pub struct BoundedBlockQueue {
    tx: Sender<AudioBlock>,
    rx: Receiver<AudioBlock>,
    capacity: usize,
}

impl BoundedBlockQueue {
    /// Create a queue holding at most `capacity` blocks (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue, waiting up to `timeout` for space.
    pub fn push(&self, block: AudioBlock, timeout: Duration) -> Result<(), PushError> {
        self.tx.send_timeout(block, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(block) => PushError::Timeout(block),
            SendTimeoutError::Disconnected(block) => PushError::Disconnected(block),
        })
    }

    /// Enqueue without waiting.
    pub fn try_push(&self, block: AudioBlock) -> Result<(), PushError> {
        self.tx.try_send(block).map_err(|e| match e {
            TrySendError::Full(block) => PushError::Full(block),
            TrySendError::Disconnected(block) => PushError::Disconnected(block),
        })
    }

    /// Dequeue the oldest block if one is ready. Never blocks.
    pub fn try_pop(&self) -> Option<AudioBlock> {
        self.rx.try_recv().ok()
    }

    /// Drop everything currently queued.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }
}
