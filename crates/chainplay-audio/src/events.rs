//! Notifications emitted to observers of the transport.

use std::fmt;

use crate::state::TransportState;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The renderer reached the end of the source and the queue drained.
    EndOfSource,
    /// The output ran dry for too many consecutive periods.
    Underflow,
    /// The session was restarted at a new position.
    Seek,
    /// The renderer reported an error.
    RenderFailed(String),
    /// The output device could not be started.
    DeviceFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::EndOfSource => f.write_str("end of source"),
            Self::Underflow => f.write_str("sustained underflow"),
            Self::Seek => f.write_str("seek"),
            Self::RenderFailed(e) => write!(f, "render failed: {e}"),
            Self::DeviceFailed(e) => write!(f, "device failed: {e}"),
        }
    }
}

/// Events emitted by the transport controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Playback position in `[0.0, 1.0]`, sent after every enqueued block.
    Progress(f32),
    /// The transport moved to a new state.
    StateChanged(TransportState),
    /// The session ended. Sent exactly once per session.
    Stopped(StopReason),
}
