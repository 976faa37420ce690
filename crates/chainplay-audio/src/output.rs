//! Audio output using cpal.
//!
//! `cpal::Stream` is not `Send`, so each opened stream lives on its own
//! thread and is driven through a small command channel. Stopping only posts
//! a command, which keeps `stop_stream` safe to call from the fill callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainplay_core::{Error, Result, SampleFormat, StreamParams, StreamStatus};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleRate, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::device::{DeviceBackend, FillCallback, FinishedCallback, OutputDevice};

/// How long `start_stream` waits for the stream thread to answer.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const COMMAND_QUEUE_DEPTH: usize = 4;

/// Conversion buffer preallocated for non-float devices, in frames.
const SCRATCH_FRAMES: usize = 8192;

#[derive(Debug, Clone)]
struct Negotiated {
    format: cpal::SampleFormat,
    buffer_size: BufferSize,
}

enum StreamCommand {
    Start(Sender<Result<()>>),
    Stop,
    Shutdown,
}

/// Output backend for the cpal default host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub const fn new() -> Self {
        Self
    }

    fn find_device(name: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();
        match name {
            None => host
                .default_output_device()
                .ok_or_else(|| Error::DeviceNotFound("default output device".to_string())),
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| Error::DeviceNotFound(name.to_string())),
        }
    }

    /// Pick the requested sample format, or the first other format the
    /// device can play at this rate and channel count, and a buffer size.
    fn negotiate(device: &Device, params: &StreamParams) -> Result<Negotiated> {
        let rate = SampleRate(params.sample_rate);
        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get output configs: {e}")))?
            .filter(|c| {
                c.channels() == params.channels
                    && c.min_sample_rate() <= rate
                    && rate <= c.max_sample_rate()
            })
            .collect();

        let preferred = to_cpal_format(params.sample_format);
        let range = supported
            .iter()
            .find(|c| c.sample_format() == preferred)
            .or_else(|| {
                [
                    cpal::SampleFormat::F32,
                    cpal::SampleFormat::I16,
                    cpal::SampleFormat::U16,
                ]
                .into_iter()
                .find_map(|f| supported.iter().find(|c| c.sample_format() == f))
            })
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!(
                    "{} with {} channels at {} Hz",
                    params.sample_format, params.channels, params.sample_rate
                ))
            })?;

        // Hosts that cannot honour a fixed size get the default; the
        // callback copes with any period length.
        let frames = params.block_size as u32;
        let buffer_size = match range.buffer_size() {
            SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&frames) => {
                BufferSize::Fixed(frames)
            }
            _ => BufferSize::Default,
        };

        Ok(Negotiated {
            format: range.sample_format(),
            buffer_size,
        })
    }
}

impl DeviceBackend for CpalBackend {
    fn open(
        &self,
        params: &StreamParams,
        fill: FillCallback,
        finished: FinishedCallback,
    ) -> Result<Arc<dyn OutputDevice>> {
        let device = Self::find_device(params.device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let negotiated = Self::negotiate(&device, params)?;
        info!(
            "Using audio output device: {device_name} ({:?}, {:?})",
            negotiated.format, negotiated.buffer_size
        );

        let (command_tx, command_rx) = bounded(COMMAND_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = bounded(1);
        let active = Arc::new(AtomicBool::new(false));
        let params = params.clone();
        let finished = Arc::new(finished);

        std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                // The stream must be created on the thread that owns it.
                match build_stream(&device, &params, negotiated, fill, finished.clone()) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        run_stream(&stream, &command_rx, &finished);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        ready_rx
            .recv_timeout(COMMAND_TIMEOUT)
            .map_err(|_| Error::AudioOutput("Output thread did not respond".to_string()))??;

        Ok(Arc::new(CpalOutputDevice {
            name: device_name,
            commands: command_tx,
            active,
        }))
    }

    fn output_devices(&self) -> Result<Vec<String>> {
        list_output_devices()
    }
}

/// An output stream owned by its `audio-output` thread.
pub struct CpalOutputDevice {
    name: String,
    commands: Sender<StreamCommand>,
    active: Arc<AtomicBool>,
}

impl OutputDevice for CpalOutputDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_stream(&self) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send_timeout(StreamCommand::Start(reply_tx), COMMAND_TIMEOUT)
            .map_err(|_| Error::AudioOutput("Output thread is gone".to_string()))?;
        reply_rx
            .recv_timeout(COMMAND_TIMEOUT)
            .map_err(|_| Error::AudioOutput("Output thread did not respond".to_string()))??;
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_stream(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.commands.try_send(StreamCommand::Stop).map_err(|e| {
            // Still playing.
            self.active.store(true, Ordering::Release);
            Error::AudioOutput(format!("Failed to stop stream: {e}"))
        })
    }

    fn is_stream_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        // Not joined: the last reference may be released on the callback thread.
        let _ = self.commands.try_send(StreamCommand::Shutdown);
    }
}

fn run_stream(stream: &Stream, commands: &Receiver<StreamCommand>, finished: &FinishedCallback) {
    for command in commands {
        match command {
            StreamCommand::Start(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")));
                let _ = reply.send(result);
            }
            StreamCommand::Stop => {
                if let Err(e) = stream.pause() {
                    warn!("Failed to pause stream: {e}");
                }
                finished();
            }
            StreamCommand::Shutdown => break,
        }
    }
    debug!("Audio output thread exiting");
}

fn build_stream(
    device: &Device,
    params: &StreamParams,
    negotiated: Negotiated,
    fill: FillCallback,
    finished: Arc<FinishedCallback>,
) -> Result<Stream> {
    let config = StreamConfig {
        channels: params.channels,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: negotiated.buffer_size,
    };
    debug!("Building output stream: {:?}", config);

    match negotiated.format {
        cpal::SampleFormat::F32 => build_f32(device, &config, fill, finished),
        cpal::SampleFormat::I16 => build_converted::<i16>(device, &config, fill, finished),
        cpal::SampleFormat::U16 => build_converted::<u16>(device, &config, fill, finished),
        other => Err(Error::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn error_callback(
    xrun: Arc<AtomicBool>,
    finished: Arc<FinishedCallback>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| handle_stream_error(&err, &xrun, &finished)
}

/// A lost device ends the stream; anything else is reported to the next
/// fill callback as an underflow.
fn handle_stream_error(err: &cpal::StreamError, xrun: &AtomicBool, finished: &FinishedCallback) {
    warn!("Audio stream error: {err}");
    match err {
        cpal::StreamError::DeviceNotAvailable => finished(),
        _ => xrun.store(true, Ordering::Relaxed),
    }
}

fn build_f32(
    device: &Device,
    config: &StreamConfig,
    mut fill: FillCallback,
    finished: Arc<FinishedCallback>,
) -> Result<Stream> {
    let channels = usize::from(config.channels).max(1);
    let xrun = Arc::new(AtomicBool::new(false));
    let callback_xrun = xrun.clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let status = StreamStatus {
                    output_underflow: callback_xrun.swap(false, Ordering::Relaxed),
                };
                let frames = data.len() / channels;
                fill(data, frames, &status);
            },
            error_callback(xrun, finished),
            None,
        )
        .map_err(map_build_error)
}

fn build_converted<T>(
    device: &Device,
    config: &StreamConfig,
    mut fill: FillCallback,
    finished: Arc<FinishedCallback>,
) -> Result<Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = usize::from(config.channels).max(1);
    let xrun = Arc::new(AtomicBool::new(false));
    let callback_xrun = xrun.clone();
    let mut scratch = vec![0.0f32; SCRATCH_FRAMES * channels];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let status = StreamStatus {
                    output_underflow: callback_xrun.swap(false, Ordering::Relaxed),
                };
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let scratch = &mut scratch[..data.len()];
                fill(scratch, data.len() / channels, &status);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            error_callback(xrun, finished),
            None,
        )
        .map_err(map_build_error)
}

fn map_build_error(e: cpal::BuildStreamError) -> Error {
    error!("Failed to build stream: {e}");
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            Error::DeviceNotFound("device is no longer available".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            Error::UnsupportedFormat("stream configuration not supported".to_string())
        }
        other => Error::AudioOutput(format!("Failed to build stream: {other}")),
    }
}

const fn to_cpal_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::F32 => cpal::SampleFormat::F32,
        SampleFormat::I16 => cpal::SampleFormat::I16,
        SampleFormat::U16 => cpal::SampleFormat::U16,
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}
