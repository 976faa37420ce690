//! Transport state machine shared between the controller and the adapters.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam_channel::Sender;
use tracing::{debug, trace};

use crate::events::PlaybackEvent;

/// Lifecycle of the transport.
///
/// `Idle → Starting → Active → Stopping → Idle`. A session sits in
/// `Starting` while the queue warms up and becomes `Active` once the output
/// stream has been started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Idle = 0,
    Starting = 1,
    Active = 2,
    Stopping = 3,
}

impl TransportState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Active,
            3 => Self::Stopping,
            _ => Self::Idle,
        }
    }

    /// Whether a session exists in this state.
    pub const fn has_session(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Unread progress events kept before further progress is dropped.
pub(crate) const PROGRESS_BACKLOG: usize = 256;

/// State visible to every execution context of a session.
///
/// All reads are lock-free so the output callback may consult them.
pub(crate) struct TransportShared {
    state: AtomicU8,
    active: AtomicBool,
    events: Sender<PlaybackEvent>,
}

impl TransportShared {
    pub(crate) const fn new(events: Sender<PlaybackEvent>) -> Self {
        Self {
            state: AtomicU8::new(TransportState::Idle as u8),
            active: AtomicBool::new(false),
            events,
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; returns false if the state was not `from`.
    pub(crate) fn transition(&self, from: TransportState, to: TransportState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!("Transport state: {:?} -> {:?}", from, to);
            self.emit(PlaybackEvent::StateChanged(to));
        }
        moved
    }

    /// Unconditionally enter `to`, used by the stop path.
    pub(crate) fn enter(&self, to: TransportState) {
        let old = TransportState::from_u8(self.state.swap(to as u8, Ordering::AcqRel));
        if old != to {
            debug!("Transport state: {:?} -> {:?}", old, to);
            self.emit(PlaybackEvent::StateChanged(to));
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        if matches!(event, PlaybackEvent::Progress(_)) && self.events.len() >= PROGRESS_BACKLOG {
            trace!("Event backlog full, dropping progress");
            return;
        }
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_default_state() {
        assert_eq!(TransportState::default(), TransportState::Idle);
        assert!(!TransportState::Idle.has_session());
        assert!(TransportState::Starting.has_session());
    }

    #[test]
    fn test_guarded_transition() {
        let (tx, rx) = unbounded();
        let shared = TransportShared::new(tx);

        assert!(!shared.transition(TransportState::Starting, TransportState::Active));
        assert!(shared.transition(TransportState::Idle, TransportState::Starting));
        assert_eq!(shared.state(), TransportState::Starting);
        assert_eq!(
            rx.try_recv().ok(),
            Some(PlaybackEvent::StateChanged(TransportState::Starting))
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_undrained_progress_is_bounded() {
        let (tx, rx) = unbounded();
        let shared = TransportShared::new(tx);

        for i in 0..1000 {
            shared.emit(PlaybackEvent::Progress(i as f32 / 1000.0));
        }
        shared.enter(TransportState::Stopping);
        shared.emit(PlaybackEvent::Stopped(crate::events::StopReason::Requested));

        assert_eq!(rx.len(), PROGRESS_BACKLOG + 2);
        let last: Vec<_> = rx.try_iter().skip(PROGRESS_BACKLOG).collect();
        assert_eq!(
            last,
            vec![
                PlaybackEvent::StateChanged(TransportState::Stopping),
                PlaybackEvent::Stopped(crate::events::StopReason::Requested),
            ]
        );
    }

    #[test]
    fn test_enter_same_state_is_silent() {
        let (tx, rx) = unbounded();
        let shared = TransportShared::new(tx);

        shared.enter(TransportState::Idle);
        assert!(rx.try_recv().is_err());

        shared.enter(TransportState::Stopping);
        assert_eq!(shared.state(), TransportState::Stopping);
        assert!(rx.try_recv().is_ok());
    }
}
