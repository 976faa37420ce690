//! Processing chain abstraction.
//!
//! The chain renders a source through an ordered list of stages on its own
//! thread and hands every finished block to a [`BlockSink`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chainplay_core::{AudioBlock, Error, Result, SourceInfo};

/// Whether the renderer should keep producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

/// Receives rendered blocks on the render thread.
pub trait BlockSink: Send {
    /// Called once per rendered block, in render order.
    fn deliver(&mut self, block: AudioBlock) -> Flow;

    /// The source is exhausted; no more blocks follow.
    fn finish(&mut self);

    /// Rendering failed; no more blocks follow.
    fn fail(&mut self, error: Error);
}

/// One processing stage applied to every block.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Process interleaved samples in place.
    fn process(&self, samples: &mut [f32], channels: u16);
}

/// Everything the chain needs to render one session.
#[derive(Clone)]
pub struct RenderRequest {
    pub source: PathBuf,
    /// Output channel count; the chain maps the source onto it.
    pub channels: u16,
    /// Frames per delivered block.
    pub block_size: usize,
    /// First frame to render.
    pub start_frame: u64,
    /// Frame to stop at, `None` for the end of the source.
    pub stop_frame: Option<u64>,
    pub stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for RenderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRequest")
            .field("source", &self.source)
            .field("channels", &self.channels)
            .field("block_size", &self.block_size)
            .field("start_frame", &self.start_frame)
            .field("stop_frame", &self.stop_frame)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Renders sources into blocks.
pub trait ProcessingChain: Send + Sync {
    /// Read the properties of a source without rendering it.
    fn probe(&self, source: &Path) -> Result<SourceInfo>;

    /// Start rendering asynchronously.
    fn render_start(&self, request: RenderRequest, sink: Box<dyn BlockSink>) -> Result<()>;

    /// Halt rendering at the next safe point and wait until the render
    /// thread has let go of its sink.
    fn render_stop(&self);
}
