//! File rendering using symphonia.
//!
//! [`FileChain`] decodes a file on a `render` thread, fits its channels to the
//! output layout, cuts the stream into fixed-size blocks and runs every block
//! through the request's stages before handing it to the sink.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use chainplay_core::{AudioBlock, Error, Result, SourceInfo};
use parking_lot::Mutex;
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer, SignalSpec},
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, trace, warn};

use crate::chain::{BlockSink, Flow, ProcessingChain, RenderRequest, Stage};

/// Renders audio files from disk.
#[derive(Default)]
pub struct FileChain {
    worker: Mutex<Option<RenderWorker>>,
}

struct RenderWorker {
    halt: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl FileChain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessingChain for FileChain {
    fn probe(&self, source: &Path) -> Result<SourceInfo> {
        let decoder = SourceDecoder::open(source)?;
        debug!("Probed {}: {:?}", source.display(), decoder.info);
        Ok(decoder.info)
    }

    fn render_start(&self, request: RenderRequest, sink: Box<dyn BlockSink>) -> Result<()> {
        // One render at a time.
        self.render_stop();

        if request.channels == 0 || request.block_size == 0 {
            return Err(Error::InvalidArgument(format!(
                "cannot render {} channels in blocks of {} frames",
                request.channels, request.block_size
            )));
        }

        let halt = Arc::new(AtomicBool::new(false));
        let thread_halt = halt.clone();
        let handle = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || render(&request, &thread_halt, sink))
            .map_err(|e| Error::Internal(format!("Failed to spawn render thread: {e}")))?;

        *self.worker.lock() = Some(RenderWorker { halt, handle });
        Ok(())
    }

    fn render_stop(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        worker.halt.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            warn!("Render thread panicked");
        }
    }
}

impl Drop for FileChain {
    fn drop(&mut self) {
        self.render_stop();
    }
}

enum RenderEnd {
    Finished,
    Halted,
}

fn render(request: &RenderRequest, halt: &AtomicBool, mut sink: Box<dyn BlockSink>) {
    match render_blocks(request, halt, sink.as_mut()) {
        Ok(RenderEnd::Finished) => sink.finish(),
        Ok(RenderEnd::Halted) => debug!("Render of {} halted", request.source.display()),
        Err(e) => sink.fail(e),
    }
}

fn render_blocks(
    request: &RenderRequest,
    halt: &AtomicBool,
    sink: &mut dyn BlockSink,
) -> Result<RenderEnd> {
    let mut decoder = SourceDecoder::open(&request.source)?;
    let source_channels = usize::from(decoder.info.channels);
    let channels = usize::from(request.channels);
    let block_len = request.block_size * channels;

    let mut skip_frames = decoder.seek(request.start_frame);
    let mut remaining = request
        .stop_frame
        .map(|stop| stop.saturating_sub(request.start_frame));
    info!(
        "Rendering {} from frame {} ({} -> {} channels)",
        request.source.display(),
        request.start_frame,
        source_channels,
        channels
    );

    let mut fitted = Vec::new();
    let mut pending: Vec<f32> = Vec::with_capacity(block_len * 2);
    let mut delivered = 0u64;

    loop {
        if halt.load(Ordering::Acquire) {
            return Ok(RenderEnd::Halted);
        }
        if remaining == Some(0) {
            break;
        }

        let Some(decoded) = decoder.next_samples()? else {
            break;
        };

        let mut frames = decoded.len() / source_channels;
        let mut offset = 0;
        if skip_frames > 0 {
            let skipped = frames.min(usize::try_from(skip_frames).unwrap_or(usize::MAX));
            skip_frames -= skipped as u64;
            frames -= skipped;
            offset = skipped * source_channels;
        }
        if let Some(left) = remaining.as_mut() {
            let take = frames.min(usize::try_from(*left).unwrap_or(usize::MAX));
            *left -= take as u64;
            frames = take;
        }

        fitted.clear();
        fit_channels(
            &decoded[offset..offset + frames * source_channels],
            source_channels,
            channels,
            &mut fitted,
        );
        pending.extend_from_slice(&fitted);

        while pending.len() >= block_len {
            let rest = pending.split_off(block_len);
            let samples = std::mem::replace(&mut pending, rest);
            if deliver(request, sink, samples, &mut delivered) == Flow::Halt {
                return Ok(RenderEnd::Halted);
            }
            if halt.load(Ordering::Acquire) {
                return Ok(RenderEnd::Halted);
            }
        }
    }

    if !pending.is_empty() && deliver(request, sink, pending, &mut delivered) == Flow::Halt {
        return Ok(RenderEnd::Halted);
    }
    debug!("Rendered {delivered} blocks");
    Ok(RenderEnd::Finished)
}

fn deliver(
    request: &RenderRequest,
    sink: &mut dyn BlockSink,
    mut samples: Vec<f32>,
    delivered: &mut u64,
) -> Flow {
    apply_stages(&request.stages, &mut samples, request.channels);
    trace!("Delivering block {delivered}");
    *delivered += 1;
    sink.deliver(AudioBlock::padded(
        samples,
        request.channels,
        request.block_size,
    ))
}

fn apply_stages(stages: &[Arc<dyn Stage>], samples: &mut [f32], channels: u16) {
    for stage in stages {
        stage.process(samples, channels);
    }
}

/// Map interleaved frames from one channel count onto another.
///
/// Mono is copied to every output channel. Otherwise the first channels are
/// kept and missing ones are silent.
fn fit_channels(input: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    if from == 0 || to == 0 {
        return;
    }
    if from == to {
        out.extend_from_slice(input);
        return;
    }

    out.reserve(input.len() / from * to);
    for frame in input.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else {
            let kept = from.min(to);
            out.extend_from_slice(&frame[..kept]);
            out.extend(std::iter::repeat(0.0).take(to - kept));
        }
    }
}

/// A decoder positioned on the first audio track of a file.
struct SourceDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
    sample_buf: Option<SampleBuffer<f32>>,
}

impl SourceDecoder {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Source(format!("{}: {e}", path.display())))?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| Error::Source(format!("{}: {e}", path.display())))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Source(format!("{}: no audio tracks", path.display())))?;

        let params = &track.codec_params;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::Source(format!("{}: unknown sample rate", path.display())))?;
        let total_frames = params
            .n_frames
            .ok_or_else(|| Error::Source(format!("{}: unknown length", path.display())))?;
        #[allow(clippy::cast_possible_truncation)]
        let channels = params.channels.map_or(0, |c| c.count() as u16);
        if channels == 0 {
            return Err(Error::Source(format!(
                "{}: unknown channel layout",
                path.display()
            )));
        }

        let track_id = track.id;
        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::AudioDecode(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            info: SourceInfo::new(sample_rate, channels, total_frames),
            sample_buf: None,
        })
    }

    /// Move to `frame` and return how many decoded frames still have to be
    /// discarded to reach it exactly.
    fn seek(&mut self, frame: u64) -> u64 {
        if frame == 0 {
            return 0;
        }
        match self.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: frame,
                track_id: self.track_id,
            },
        ) {
            Ok(seeked) => {
                self.decoder.reset();
                debug!(
                    "Seeked to ts {} (required {})",
                    seeked.actual_ts, seeked.required_ts
                );
                seeked.required_ts.saturating_sub(seeked.actual_ts)
            }
            Err(e) => {
                debug!("Seek failed ({e}), decoding up to frame {frame}");
                frame
            }
        }
    }

    /// Decode the next packet of the track into interleaved f32 samples.
    fn next_samples(&mut self) -> Result<Option<&[f32]>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Failed to read packet: {e}")));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    copy_interleaved(&mut self.sample_buf, decoded);
                    return Ok(Some(
                        self.sample_buf.as_ref().map_or(&[][..], SampleBuffer::samples),
                    ));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error (skipping): {e}");
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!("Decode failed: {e}")));
                }
            }
        }
    }
}

fn copy_interleaved(sample_buf: &mut Option<SampleBuffer<f32>>, decoded: AudioBufferRef<'_>) {
    let spec = SignalSpec::new(decoded.spec().rate, decoded.spec().channels);
    let needed = decoded.capacity() * spec.channels.count();
    if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
        *sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
    }
    if let Some(buf) = sample_buf.as_mut() {
        buf.copy_interleaved_ref(decoded);
    }
}

/// Constant gain stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gain {
    factor: f32,
}

impl Gain {
    pub const fn new(factor: f32) -> Self {
        Self { factor }
    }

    pub fn from_db(db: f32) -> Self {
        Self::new(10f32.powf(db / 20.0))
    }

    pub const fn factor(&self) -> f32 {
        self.factor
    }
}

impl Stage for Gain {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(&self, samples: &mut [f32], _channels: u16) {
        if (self.factor - 1.0).abs() < f32::EPSILON {
            return;
        }
        for sample in samples {
            *sample *= self.factor;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Write a 16-bit PCM WAV file.
    fn write_wav(path: &Path, channels: u16, sample_rate: u32, samples: &[i16]) {
        let data_len = u32::try_from(samples.len() * 2).unwrap();
        let block_align = channels * 2;
        let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * u32::from(block_align)).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    /// Mono ramp where frame `i` holds the value `i`.
    fn ramp_wav(dir: &TempDir, frames: i16) -> PathBuf {
        let path = dir.path().join("ramp.wav");
        let samples: Vec<i16> = (0..frames).collect();
        write_wav(&path, 1, 8000, &samples);
        path
    }

    fn ramp_value(i: u64) -> f32 {
        i as f32 / 32768.0
    }

    enum SinkEvent {
        Block(AudioBlock),
        Finished,
        Failed(Error),
    }

    struct ChannelSink {
        tx: Sender<SinkEvent>,
        halt_after: Option<usize>,
        seen: usize,
    }

    impl BlockSink for ChannelSink {
        fn deliver(&mut self, block: AudioBlock) -> Flow {
            self.seen += 1;
            let _ = self.tx.send(SinkEvent::Block(block));
            if self.halt_after == Some(self.seen) {
                Flow::Halt
            } else {
                Flow::Continue
            }
        }

        fn finish(&mut self) {
            let _ = self.tx.send(SinkEvent::Finished);
        }

        fn fail(&mut self, error: Error) {
            let _ = self.tx.send(SinkEvent::Failed(error));
        }
    }

    fn sink(halt_after: Option<usize>) -> (Box<dyn BlockSink>, Receiver<SinkEvent>) {
        let (tx, rx) = unbounded();
        let sink = ChannelSink {
            tx,
            halt_after,
            seen: 0,
        };
        (Box::new(sink), rx)
    }

    fn request(source: PathBuf, channels: u16, block_size: usize) -> RenderRequest {
        RenderRequest {
            source,
            channels,
            block_size,
            start_frame: 0,
            stop_frame: None,
            stages: Vec::new(),
        }
    }

    /// Run a render to completion and collect what the sink saw.
    fn collect(chain: &FileChain, rx: &Receiver<SinkEvent>) -> (Vec<AudioBlock>, Option<SinkEvent>) {
        let mut blocks = Vec::new();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(SinkEvent::Block(block)) => blocks.push(block),
                Ok(end) => {
                    chain.render_stop();
                    return (blocks, Some(end));
                }
                Err(_) => {
                    chain.render_stop();
                    return (blocks, None);
                }
            }
        }
    }

    #[test]
    fn test_fit_channels_duplicates_mono() {
        let mut out = Vec::new();
        fit_channels(&[0.1, 0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_fit_channels_drops_extra_channels() {
        let mut out = Vec::new();
        fit_channels(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn test_fit_channels_zero_fills_missing_channels() {
        let mut out = Vec::new();
        fit_channels(&[1.0, 2.0], 2, 4, &mut out);
        assert_eq!(out, vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gain_from_db() {
        assert!((Gain::from_db(0.0).factor() - 1.0).abs() < 1e-6);
        assert!((Gain::from_db(-6.0).factor() - 0.501_187).abs() < 1e-4);
        assert!((Gain::from_db(20.0).factor() - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_gain_scales_samples() {
        let mut samples = [0.5, -0.25];
        Gain::new(2.0).process(&mut samples, 2);
        assert_eq!(samples, [1.0, -0.5]);
    }

    #[test]
    fn test_probe_missing_file_is_source_error() {
        let chain = FileChain::new();
        let result = chain.probe(Path::new("/nonexistent/preview.wav"));
        assert!(matches!(result, Err(Error::Source(_))));
    }

    #[test]
    fn test_probe_garbage_is_source_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(matches!(FileChain::new().probe(&path), Err(Error::Source(_))));
    }

    #[test]
    fn test_probe_reads_wav_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 2, 22050, &[0; 2 * 1000]);

        let info = FileChain::new().probe(&path).unwrap();
        assert_eq!(info, SourceInfo::new(22050, 2, 1000));
    }

    #[test]
    fn test_render_delivers_padded_blocks_then_finishes() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 100);
        let chain = FileChain::new();
        let (sink, rx) = sink(None);

        chain.render_start(request(path, 2, 32), sink).unwrap();
        let (blocks, end) = collect(&chain, &rx);

        assert!(matches!(end, Some(SinkEvent::Finished)));
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.frames() == 32 && b.channels() == 2));
        // Mono is duplicated onto both channels.
        assert_eq!(blocks[1].samples()[0], ramp_value(32));
        assert_eq!(blocks[1].samples()[1], ramp_value(32));
        // 100 frames leave 4 in the last block; the rest is silence.
        let last = blocks[3].samples();
        assert_eq!(last[6], ramp_value(99));
        assert!(last[8..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_render_starts_at_start_frame() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 1000);
        let chain = FileChain::new();
        let (sink, rx) = sink(None);

        let mut req = request(path, 1, 100);
        req.start_frame = 500;
        chain.render_start(req, sink).unwrap();
        let (blocks, end) = collect(&chain, &rx);

        assert!(matches!(end, Some(SinkEvent::Finished)));
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].samples()[0], ramp_value(500));
    }

    #[test]
    fn test_render_honours_stop_frame() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 1000);
        let chain = FileChain::new();
        let (sink, rx) = sink(None);

        let mut req = request(path, 1, 100);
        req.stop_frame = Some(250);
        chain.render_start(req, sink).unwrap();
        let (blocks, _) = collect(&chain, &rx);

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[2].samples()[49], ramp_value(249));
        assert_eq!(blocks[2].samples()[50], 0.0);
    }

    #[test]
    fn test_render_applies_stages() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 64);
        let chain = FileChain::new();
        let (sink, rx) = sink(None);

        let mut req = request(path, 1, 64);
        req.stages = vec![Arc::new(Gain::new(2.0))];
        chain.render_start(req, sink).unwrap();
        let (blocks, _) = collect(&chain, &rx);

        assert_eq!(blocks[0].samples()[10], ramp_value(10) * 2.0);
    }

    #[test]
    fn test_halt_answer_stops_render() {
        let dir = TempDir::new().unwrap();
        let path = ramp_wav(&dir, 1000);
        let chain = FileChain::new();
        let (sink, rx) = sink(Some(2));

        chain.render_start(request(path, 1, 100), sink).unwrap();
        let (blocks, end) = collect(&chain, &rx);

        assert_eq!(blocks.len(), 2);
        assert!(end.is_none());
    }

    #[test]
    fn test_missing_file_fails_sink() {
        let chain = FileChain::new();
        let (sink, rx) = sink(None);

        chain
            .render_start(request(PathBuf::from("/nonexistent/preview.wav"), 2, 64), sink)
            .unwrap();
        let (blocks, end) = collect(&chain, &rx);

        assert!(blocks.is_empty());
        assert!(matches!(end, Some(SinkEvent::Failed(Error::Source(_)))));
    }

    #[test]
    fn test_render_stop_without_render_is_noop() {
        FileChain::new().render_stop();
    }
}
