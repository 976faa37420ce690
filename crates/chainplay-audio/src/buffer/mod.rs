//! Block buffering between the render thread and the output callback.

pub mod queue;

pub use queue::{BoundedBlockQueue, PushError};
