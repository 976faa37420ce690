//! Transport controller: owns the playback session lifecycle.
//!
//! `start` opens the output stream and asks the chain to render; `stop` tears
//! the session down and emits exactly one [`PlaybackEvent::Stopped`]. The
//! adapters never stop a session themselves: they post a request to the
//! supervisor thread, which runs the same stop path as an explicit `stop`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chainplay_core::{Error, PlaybackConfig, Result, SampleFormat, StreamParams, StreamStatus};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chain::{ProcessingChain, RenderRequest, Stage};
use crate::consumer::ConsumerAdapter;
use crate::device::{DeviceBackend, OutputDevice};
use crate::events::{PlaybackEvent, StopReason};
use crate::producer::ProducerAdapter;
use crate::session::{SessionParams, SessionShared, StopRequest};
use crate::state::{TransportShared, TransportState};

/// Pending automatic stop requests; one per session at most.
const STOP_QUEUE_DEPTH: usize = 8;

/// What to play and where.
#[derive(Clone)]
pub struct StartRequest {
    pub source: PathBuf,
    /// Output device name, `None` for the default device.
    pub device: Option<String>,
    pub channels: u16,
    pub chain: Arc<dyn ProcessingChain>,
    pub stages: Vec<Arc<dyn Stage>>,
    /// Position to start from, in `[0.0, 1.0]`.
    pub start_fraction: f32,
}

struct Session {
    shared: Arc<SessionShared>,
    device: Arc<dyn OutputDevice>,
    request: StartRequest,
}

struct ControllerInner {
    config: PlaybackConfig,
    backend: Arc<dyn DeviceBackend>,
    transport: Arc<TransportShared>,
    session: Mutex<Option<Session>>,
    next_session_id: AtomicU64,
    stop_tx: Sender<StopRequest>,
}

/// Starts, stops and seeks the single playback session.
pub struct TransportController {
    inner: Arc<ControllerInner>,
    event_rx: Receiver<PlaybackEvent>,
}

impl TransportController {
    /// Create a controller that opens streams through `backend`.
    pub fn new(config: PlaybackConfig, backend: Arc<dyn DeviceBackend>) -> Result<Self> {
        config.validate()?;

        let (event_tx, event_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(STOP_QUEUE_DEPTH);

        let inner = Arc::new(ControllerInner {
            config,
            backend,
            transport: Arc::new(TransportShared::new(event_tx)),
            session: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
            stop_tx,
        });

        let weak = Arc::downgrade(&inner);
        std::thread::Builder::new()
            .name("transport-supervisor".to_string())
            .spawn(move || supervise(&weak, &stop_rx))
            .map_err(|e| Error::Internal(format!("Failed to spawn supervisor thread: {e}")))?;

        Ok(Self { inner, event_rx })
    }

    /// Begin a session.
    ///
    /// Fails without creating a session if one is already running, the
    /// source cannot be read, or the device cannot be opened.
    pub fn start(&self, request: StartRequest) -> Result<()> {
        self.inner.start(request)
    }

    /// End the current session. Does nothing when idle.
    pub fn stop(&self) {
        self.inner.stop_session(None, StopReason::Requested);
    }

    /// Restart the current session at `fraction` of the source.
    pub fn seek(&self, fraction: f32) -> Result<()> {
        let (id, request) = {
            let slot = self.inner.session.lock();
            let session = slot
                .as_ref()
                .ok_or_else(|| Error::InvalidState("nothing is playing".to_string()))?;
            (session.shared.id(), session.request.clone())
        };

        if !self.inner.stop_session(Some(id), StopReason::Seek) {
            return Err(Error::InvalidState("session ended before seek".to_string()));
        }
        debug!("Seeking to {:.3}", fraction);
        self.inner.start(StartRequest {
            start_fraction: fraction,
            ..request
        })
    }

    /// Whether a session is running. Lock-free.
    pub fn is_active(&self) -> bool {
        self.inner.transport.is_active()
    }

    pub fn state(&self) -> TransportState {
        self.inner.transport.state()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    /// Names of the output devices known to the backend.
    pub fn output_devices(&self) -> Result<Vec<String>> {
        self.inner.backend.output_devices()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Option<PlaybackEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event, blocking until one is available.
    pub fn recv_event(&self) -> Option<PlaybackEvent> {
        self.event_rx.recv().ok()
    }

    /// Receive an event, waiting at most `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<PlaybackEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// A receiver for events, for observers on other threads.
    ///
    /// Events queue until read. Lifecycle events are always kept; progress
    /// events are dropped while too many are waiting unread.
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.event_rx.clone()
    }
}

impl Drop for TransportController {
    fn drop(&mut self) {
        self.inner.stop_session(None, StopReason::Requested);
    }
}

impl ControllerInner {
    fn start(&self, request: StartRequest) -> Result<()> {
        let mut slot = self.session.lock();
        if slot.is_some() || self.transport.state().has_session() {
            return Err(Error::InvalidState(format!(
                "cannot start while {:?}",
                self.transport.state()
            )));
        }
        if request.channels == 0 {
            return Err(Error::InvalidArgument(
                "channel count must be at least 1".to_string(),
            ));
        }
        if request.start_fraction.is_nan() {
            return Err(Error::InvalidArgument(
                "start position is not a number".to_string(),
            ));
        }
        let start_fraction = request.start_fraction.clamp(0.0, 1.0);

        let info = request.chain.probe(&request.source)?;
        if info.sample_rate == 0 {
            return Err(Error::Source(format!(
                "{} reports a zero sample rate",
                request.source.display()
            )));
        }

        let block_size = self.config.block_size;
        let max_block_index = info.block_count(block_size);
        let start_frame = info.start_frame(start_fraction);

        let params = SessionParams {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            config: self.config,
            sample_rate: info.sample_rate,
            channels: request.channels,
            max_block_index,
            start_fraction,
        };
        let shared = Arc::new(SessionShared::new(
            params,
            self.transport.clone(),
            self.stop_tx.clone(),
        ));

        let stream_params = StreamParams {
            sample_rate: info.sample_rate,
            block_size,
            device: request.device.clone(),
            channels: request.channels,
            sample_format: SampleFormat::F32,
        };
        let consumer = ConsumerAdapter::new(shared.clone());
        let on_finished = {
            let shared = shared.clone();
            move || {
                // Without a stop in progress the stream ended on its own.
                if !shared.is_terminating() {
                    shared.request_stop(StopReason::DeviceFailed(
                        "output stream ended".to_string(),
                    ));
                }
                shared.mark_terminating();
            }
        };
        let device = self.backend.open(
            &stream_params,
            Box::new(move |output: &mut [f32], frames: usize, status: &StreamStatus| {
                consumer.fill(output, frames, status);
            }),
            Box::new(on_finished),
        )?;
        shared.attach_device(&device);

        self.transport.set_active(true);
        self.transport
            .transition(TransportState::Idle, TransportState::Starting);

        let render = RenderRequest {
            source: request.source.clone(),
            channels: request.channels,
            block_size,
            start_frame,
            stop_frame: None,
            stages: request.stages.clone(),
        };
        if let Err(e) = request
            .chain
            .render_start(render, Box::new(ProducerAdapter::new(shared.clone())))
        {
            shared.mark_terminating();
            self.transport.set_active(false);
            self.transport.enter(TransportState::Idle);
            return Err(e);
        }

        info!(
            "Playing {} ({:.1}s) from {:.1}% ({} blocks of {} frames, {} Hz, {} ch) on [{}]",
            request.source.display(),
            info.duration_secs(),
            start_fraction * 100.0,
            max_block_index,
            block_size,
            info.sample_rate,
            request.channels,
            device.name()
        );

        *slot = Some(Session {
            shared,
            device,
            request,
        });
        Ok(())
    }

    /// Tear down the current session. With `only` set, a session with a
    /// different id is left alone. Returns whether a session was stopped.
    fn stop_session(&self, only: Option<u64>, reason: StopReason) -> bool {
        let mut slot = self.session.lock();
        let Some(current) = slot.as_ref() else {
            return false;
        };
        if only.is_some_and(|id| id != current.shared.id()) {
            debug!("Ignoring stop request for a finished session");
            return false;
        }
        let Some(session) = slot.take() else {
            return false;
        };

        self.transport.enter(TransportState::Stopping);
        session.shared.mark_terminating();
        session.request.chain.render_stop();

        if session.device.is_stream_active() {
            if let Err(e) = session.device.stop_stream() {
                warn!("Failed to stop audio stream: {e}");
            }
        }
        let discarded = session.shared.queue().clear();
        if discarded > 0 {
            debug!("Discarded {discarded} queued blocks");
        }

        self.transport.set_active(false);
        self.transport.enter(TransportState::Idle);
        self.transport.emit(PlaybackEvent::Stopped(reason.clone()));
        info!("STOP audio stream ({reason})");
        true
    }
}

fn supervise(inner: &Weak<ControllerInner>, requests: &Receiver<StopRequest>) {
    for request in requests {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!(
            "Automatic stop of session {}: {}",
            request.session, request.reason
        );
        inner.stop_session(Some(request.session), request.reason);
    }
    debug!("Transport supervisor exiting");
}
