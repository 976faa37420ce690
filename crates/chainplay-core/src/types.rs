//! Core domain types for chainplay.

pub mod block;
pub mod source;
pub mod stream;

pub use block::AudioBlock;
pub use source::SourceInfo;
pub use stream::{SampleFormat, StreamParams, StreamStatus};
