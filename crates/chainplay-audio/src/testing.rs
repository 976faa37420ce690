//! Test doubles for the output device and the processing chain.
//!
//! The manual device never calls back on its own: tests drive the fill
//! callback with [`ManualDevice::pump`]. The scripted chain renders blocks of
//! a constant value from a thread, either all at once or as fed by the test.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chainplay_core::{AudioBlock, Error, Result, SourceInfo, StreamParams, StreamStatus};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::chain::{BlockSink, Flow, ProcessingChain, RenderRequest};
use crate::device::{DeviceBackend, FillCallback, FinishedCallback, OutputDevice};

pub(crate) const MISSING_DEVICE: &str = "missing";
pub(crate) const UNREADABLE_SOURCE: &str = "unreadable.wav";

pub(crate) struct ManualDevice {
    params: StreamParams,
    fill: Mutex<FillCallback>,
    finished: FinishedCallback,
    active: AtomicBool,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl ManualDevice {
    /// Run the fill callback once and return what it wrote.
    pub(crate) fn pump(&self) -> Vec<f32> {
        self.pump_with(StreamStatus::default())
    }

    pub(crate) fn pump_with(&self, status: StreamStatus) -> Vec<f32> {
        let frames = self.params.block_size;
        let mut out = vec![1.0f32; frames * usize::from(self.params.channels)];
        let mut fill = self.fill.lock();
        (*fill)(&mut out, frames, &status);
        drop(fill);
        out
    }
}

impl OutputDevice for ManualDevice {
    fn name(&self) -> &str {
        "manual"
    }

    fn start_stream(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_stream(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.active.swap(false, Ordering::SeqCst) {
            (self.finished)();
        }
        Ok(())
    }

    fn is_stream_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct ManualBackend {
    last: Mutex<Option<Arc<ManualDevice>>>,
    opened: AtomicUsize,
}

impl ManualBackend {
    pub(crate) fn device(&self) -> Arc<ManualDevice> {
        self.last.lock().clone().expect("no device opened")
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl DeviceBackend for ManualBackend {
    fn open(
        &self,
        params: &StreamParams,
        fill: FillCallback,
        finished: FinishedCallback,
    ) -> Result<Arc<dyn OutputDevice>> {
        if params.device.as_deref() == Some(MISSING_DEVICE) {
            return Err(Error::DeviceNotFound(MISSING_DEVICE.to_string()));
        }
        let device = Arc::new(ManualDevice {
            params: params.clone(),
            fill: Mutex::new(fill),
            finished,
            active: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        *self.last.lock() = Some(device.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(device)
    }

    fn output_devices(&self) -> Result<Vec<String>> {
        Ok(vec!["manual".to_string()])
    }
}

/// How the scripted chain paces its output.
#[derive(Clone, Copy)]
pub(crate) enum Script {
    /// Render the whole source, then finish.
    ToEnd,
    /// Render only blocks fed through [`ScriptedChain::feed`]; never finish.
    Fed,
}

pub(crate) struct ScriptedChain {
    info: SourceInfo,
    script: Script,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    feed_tx: Sender<usize>,
    feed_rx: Receiver<usize>,
    pub requests: Mutex<Vec<RenderRequest>>,
}

impl ScriptedChain {
    pub(crate) fn new(info: SourceInfo, script: Script) -> Self {
        let (feed_tx, feed_rx) = unbounded();
        Self {
            info,
            script,
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            feed_tx,
            feed_rx,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Allow `blocks` more blocks to be rendered.
    pub(crate) fn feed(&self, blocks: usize) {
        self.feed_tx.send(blocks).unwrap();
    }

    /// Whether a render thread is still attached.
    pub(crate) fn is_rendering(&self) -> bool {
        self.worker.lock().is_some()
    }

    pub(crate) fn last_request(&self) -> RenderRequest {
        self.requests.lock().last().cloned().expect("no render started")
    }
}

impl ProcessingChain for ScriptedChain {
    fn probe(&self, source: &Path) -> Result<SourceInfo> {
        if source == Path::new(UNREADABLE_SOURCE) {
            return Err(Error::Source(UNREADABLE_SOURCE.to_string()));
        }
        Ok(self.info)
    }

    fn render_start(&self, request: RenderRequest, mut sink: Box<dyn BlockSink>) -> Result<()> {
        self.requests.lock().push(request.clone());
        self.stop.store(false, Ordering::SeqCst);

        let remaining = self.info.total_frames.saturating_sub(request.start_frame);
        let blocks = remaining.div_ceil(request.block_size as u64);
        let stop = self.stop.clone();
        let script = self.script;
        let feed = self.feed_rx.clone();

        let handle = std::thread::spawn(move || {
            let mut allowance = 0usize;
            for index in 0..blocks {
                if let Script::Fed = script {
                    while allowance == 0 {
                        if stop.load(Ordering::SeqCst) {
                            return;
                        }
                        match feed.recv_timeout(Duration::from_millis(5)) {
                            Ok(more) => allowance += more,
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                    allowance -= 1;
                }
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                let value = index as f32 + 1.0;
                let samples = vec![value; request.block_size * usize::from(request.channels)];
                let block = AudioBlock::padded(samples, request.channels, request.block_size);
                if sink.deliver(block) == Flow::Halt {
                    return;
                }
            }
            if let Script::ToEnd = script {
                sink.finish();
            }
        });
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn render_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
