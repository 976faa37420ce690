//! # chainplay-audio
//!
//! Real-time preview playback for chainplay.
//!
//! Features:
//! - Bounded block queue between the render thread and the output callback
//! - Warm-up then backpressure on the render side, silence padding and
//!   underflow detection on the output side
//! - Transport controller with start/stop/seek and progress events
//! - cpal output backend and a symphonia file renderer

pub mod buffer;
pub mod chain;
mod consumer;
pub mod device;
pub mod events;
pub mod output;
mod producer;
pub mod render;
mod session;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use chain::{BlockSink, Flow, ProcessingChain, RenderRequest, Stage};
pub use device::{DeviceBackend, FillCallback, FinishedCallback, OutputDevice};
pub use events::{PlaybackEvent, StopReason};
pub use output::CpalBackend;
pub use render::{FileChain, Gain};
pub use state::TransportState;
pub use transport::{StartRequest, TransportController};
