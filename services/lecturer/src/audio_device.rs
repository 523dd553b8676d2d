//! Native audio devices behind the engine's capture and playback seams.
//!
//! `cpal::Stream` is not `Send`, so every stream lives on a dedicated thread
//! that owns it from build to drop. The engine only holds `Send` handles that
//! signal that thread.

use anyhow::Context;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use lecture_live::audio::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE, Reframer, downmix};
use lecture_live::{
    AudioOutput, AudioOutputFactory, CaptureError, CaptureHandle, MicStream, Microphone,
    PlaybackError,
};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Frames of capture buffered between the device thread and the engine.
const CAPTURE_QUEUE: usize = 32;

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the named input device, or the host default when no name is given.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("No default input device"),
        Some(target) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No input device named '{target}'")),
    }
}

/// Finds the named output device, or the host default when no name is given.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("No default output device"),
        Some(target) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No output device named '{target}'")),
    }
}

fn describe(device: &Device, config: Option<cpal::SupportedStreamConfig>, default: &str) -> String {
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    let mut line = match config {
        Some(config) => format!(
            " * {}({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        ),
        None => format!(" * {}", name),
    };
    if name == default {
        line.push_str(" [default]");
    }
    line
}

/// Lists input and output devices, one per line.
pub fn list_devices() -> anyhow::Result<String> {
    let host = get_host();
    let mut lines = vec!["Input devices:".to_string()];
    let default_input = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    for device in host
        .input_devices()
        .context("Failed to enumerate input devices")?
    {
        let config = device.default_input_config().ok();
        lines.push(describe(&device, config, &default_input));
    }

    lines.push("Output devices:".to_string());
    let default_output = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    for device in host
        .output_devices()
        .context("Failed to enumerate output devices")?
    {
        let config = device.default_output_config().ok();
        lines.push(describe(&device, config, &default_output));
    }
    Ok(lines.join("\n"))
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Turns raw device input into fixed-size mono frames at 16 kHz.
pub struct CaptureConverter {
    channels: usize,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    reframer: Reframer,
}

impl CaptureConverter {
    const RESAMPLER_CHUNK: usize = 1024;

    pub fn new(device_rate: u32, channels: usize, frame_size: usize) -> anyhow::Result<Self> {
        let resampler = if device_rate == CAPTURE_SAMPLE_RATE {
            None
        } else {
            Some(create_resampler(
                device_rate as f64,
                CAPTURE_SAMPLE_RATE as f64,
                Self::RESAMPLER_CHUNK,
            )?)
        };
        Ok(Self {
            channels: channels.max(1),
            resampler,
            pending: Vec::new(),
            reframer: Reframer::new(frame_size),
        })
    }

    /// Consumes one device callback worth of interleaved samples.
    pub fn push(&mut self, data: &[f32]) -> Vec<Vec<f32>> {
        let mono = downmix(data, self.channels);
        let Some(resampler) = self.resampler.as_mut() else {
            return self.reframer.push(&mono);
        };

        self.pending.extend_from_slice(&mono);
        let mut resampled = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[chunk.as_slice()], None) {
                Ok(output) => {
                    if let Some(channel) = output.first() {
                        resampled.extend_from_slice(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to resample capture chunk: {}", e);
                    break;
                }
            }
        }
        self.reframer.push(&resampled)
    }
}

enum DeviceSignal {
    Stop,
    Lost(String),
}

/// Stops the thread that owns a capture stream.
struct DeviceThreadHandle {
    signals: Option<std_mpsc::Sender<DeviceSignal>>,
}

impl CaptureHandle for DeviceThreadHandle {
    fn release(&mut self) {
        if let Some(signals) = self.signals.take() {
            let _ = signals.send(DeviceSignal::Stop);
        }
    }
}

/// Parks the thread owning `stream` until it is told to stop or the device
/// goes away. Dropping the stream drops its callback and whatever it holds.
fn hold_stream(stream: cpal::Stream, signals: std_mpsc::Receiver<DeviceSignal>, label: &str) {
    match signals.recv() {
        Ok(DeviceSignal::Lost(reason)) => {
            tracing::warn!(device = label, %reason, "Audio device lost");
        }
        Ok(DeviceSignal::Stop) | Err(_) => {
            tracing::debug!(device = label, "Audio stream stopped");
        }
    }
    drop(stream);
}

fn capture_error(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        CaptureError::PermissionDenied(message)
    } else {
        CaptureError::DeviceUnavailable(message)
    }
}

/// The system microphone.
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self, frame_size: usize) -> Result<MicStream, CaptureError> {
        let (frames_tx, frames_rx) = mpsc::channel(CAPTURE_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (signals_tx, signals_rx) = std_mpsc::channel();
        let lost_tx = signals_tx.clone();
        let device_name = self.device_name.clone();

        std::thread::Builder::new()
            .name("lecturer-mic".to_string())
            .spawn(move || {
                match build_capture_stream(device_name.as_deref(), frame_size, frames_tx, lost_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        hold_stream(stream, signals_rx, "microphone");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                    }
                }
            })
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(MicStream::new(
                frames_rx,
                Box::new(DeviceThreadHandle {
                    signals: Some(signals_tx),
                }),
            )),
            Ok(Err(message)) => Err(capture_error(message)),
            Err(_) => Err(CaptureError::DeviceUnavailable(
                "capture thread exited before the stream started".to_string(),
            )),
        }
    }
}

fn build_capture_stream(
    device_name: Option<&str>,
    frame_size: usize,
    frames: mpsc::Sender<Vec<f32>>,
    lost: std_mpsc::Sender<DeviceSignal>,
) -> anyhow::Result<cpal::Stream> {
    let device = get_or_default_input(device_name)?;
    tracing::info!("Using input device: {:?}", device.name()?);
    let supported = device
        .default_input_config()
        .context("Failed to get default input config")?;
    let config: StreamConfig = supported.config();
    tracing::info!("Input stream config: {:?}", &config);

    let mut converter = CaptureConverter::new(
        config.sample_rate.0,
        config.channels as usize,
        frame_size,
    )?;
    let input_data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        for frame in converter.push(data) {
            if let Err(e) = frames.try_send(frame) {
                tracing::warn!("Failed to queue capture frame: {}", e);
            }
        }
    };

    let stream = device.build_input_stream(
        &config,
        input_data_fn,
        move |err| {
            tracing::error!("An error occurred on input stream: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                let _ = lost.send(DeviceSignal::Lost(err.to_string()));
            }
        },
        None,
    )?;
    stream.play()?;
    Ok(stream)
}


/// Input frames per playback resampler chunk, 20 ms of model audio.
const PLAYBACK_CHUNK: usize = 480;

/// How often the speaker thread checks for a held-back tail.
const TAIL_POLL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Voice {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
}

/// Buffers placed on a sample clock that advances as the device plays.
#[derive(Default)]
struct Timeline {
    position: u64,
    voices: Vec<Voice>,
    /// Set once the device reports it is gone.
    lost: Option<String>,
}

impl Timeline {
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        for (offset, frame) in out.chunks_mut(channels).enumerate() {
            let at = self.position + offset as u64;
            let mixed: f32 = self
                .voices
                .iter()
                .filter(|voice| at >= voice.start_frame)
                .filter_map(|voice| voice.samples.get((at - voice.start_frame) as usize))
                .sum();
            frame.fill(mixed.clamp(-1.0, 1.0));
        }
        self.position += frames as u64;
        let position = self.position;
        self.voices
            .retain(|voice| voice.start_frame + voice.samples.len() as u64 > position);
    }
}

/// A stretch of back-to-back buffers sharing one resampler history.
struct Run {
    /// Source time, in seconds, where the input fed so far ends.
    end_at: f64,
    /// Device frame where the next resampled sample lands.
    next_frame: u64,
    input: u64,
    output: u64,
    last_id: u64,
}

/// Converts model audio to the device rate without gaps between buffers.
///
/// A buffer that starts where the previous one ended continues the current
/// run, so the resampler's history carries across the seam and its output is
/// laid down right after what the run already produced. Input short of a full
/// chunk waits in `pending` until more audio arrives or the run is finished.
struct PlaybackConverter {
    device_rate: u32,
    source_rate: u32,
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    /// Leading output samples that still belong to the resampler's delay.
    skip: usize,
    run: Option<Run>,
}

impl PlaybackConverter {
    fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            source_rate: device_rate,
            resampler: None,
            pending: Vec::new(),
            skip: 0,
            run: None,
        }
    }

    fn push(
        &mut self,
        id: u64,
        samples: &[f32],
        sample_rate: u32,
        start_at: f64,
    ) -> anyhow::Result<Vec<Voice>> {
        anyhow::ensure!(sample_rate > 0, "audio without a sample rate");
        let mut voices = Vec::new();
        let device_rate = self.device_rate as f64;
        let contiguous = sample_rate == self.source_rate
            && self
                .run
                .as_ref()
                .is_some_and(|run| (start_at - run.end_at).abs() * device_rate < 1.0);
        if !contiguous {
            voices.extend(self.finish()?);
            self.begin(sample_rate, start_at)?;
        }

        let mut output = Vec::new();
        match self.resampler.as_mut() {
            None => output.extend_from_slice(samples),
            Some(resampler) => {
                self.pending.extend_from_slice(samples);
                while self.pending.len() >= resampler.input_frames_next() {
                    let chunk: Vec<f32> =
                        self.pending.drain(..resampler.input_frames_next()).collect();
                    let processed = resampler.process(&[chunk.as_slice()], None)?;
                    output.extend(processed.into_iter().next().unwrap_or_default());
                }
            }
        }
        if let Some(run) = self.run.as_mut() {
            run.end_at += samples.len() as f64 / sample_rate as f64;
            run.input += samples.len() as u64;
            run.last_id = id;
        }
        voices.extend(self.place(output));
        Ok(voices)
    }

    fn begin(&mut self, sample_rate: u32, start_at: f64) -> anyhow::Result<()> {
        if sample_rate != self.source_rate {
            self.source_rate = sample_rate;
            self.resampler = if sample_rate == self.device_rate {
                None
            } else {
                Some(create_resampler(
                    sample_rate as f64,
                    self.device_rate as f64,
                    PLAYBACK_CHUNK,
                )?)
            };
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
        self.pending.clear();
        self.skip = self
            .resampler
            .as_ref()
            .map_or(0, |resampler| resampler.output_delay());
        self.run = Some(Run {
            end_at: start_at,
            next_frame: (start_at.max(0.0) * self.device_rate as f64).round() as u64,
            input: 0,
            output: 0,
            last_id: 0,
        });
        Ok(())
    }

    /// Lays `output` down after what the run already produced.
    fn place(&mut self, mut output: Vec<f32>) -> Option<Voice> {
        let skipped = self.skip.min(output.len());
        output.drain(..skipped);
        self.skip -= skipped;
        let run = self.run.as_mut()?;
        if output.is_empty() {
            return None;
        }
        let voice = Voice {
            id: run.last_id,
            start_frame: run.next_frame,
            samples: output,
        };
        run.next_frame += voice.samples.len() as u64;
        run.output += voice.samples.len() as u64;
        Some(voice)
    }

    /// Whether the device is about to play up to the end of what the run has
    /// produced while input is still held back.
    fn tail_due(&self, position: u64) -> bool {
        let margin =
            self.device_rate as u64 * PLAYBACK_CHUNK as u64 / self.source_rate.max(1) as u64;
        self.resampler.is_some()
            && self
                .run
                .as_ref()
                .is_some_and(|run| run.next_frame <= position + margin)
    }

    /// Ends the run, pushing out held-back input and the samples still inside
    /// the resampler. The run's output is cut to its exact resampled length.
    fn finish(&mut self) -> anyhow::Result<Option<Voice>> {
        let Some(input) = self.run.as_ref().map(|run| run.input) else {
            return Ok(None);
        };
        let expected =
            (input as f64 * self.device_rate as f64 / self.source_rate as f64).round() as u64;
        let mut output = Vec::new();
        if let Some(resampler) = self.resampler.as_mut() {
            if !self.pending.is_empty() {
                let tail = [std::mem::take(&mut self.pending)];
                let processed = resampler.process_partial(Some(&tail[..]), None)?;
                output.extend(processed.into_iter().next().unwrap_or_default());
            }
            let drained = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
            output.extend(drained.into_iter().next().unwrap_or_default());
        }
        let mut voice = self.place(output);
        if let (Some(voice), Some(run)) = (voice.as_mut(), self.run.as_ref()) {
            let excess = run.output.saturating_sub(expected) as usize;
            let keep = voice.samples.len().saturating_sub(excess);
            voice.samples.truncate(keep);
        }
        self.reset();
        Ok(voice.filter(|voice| !voice.samples.is_empty()))
    }

    /// Drops the run and everything held back for it.
    fn reset(&mut self) {
        self.run = None;
        self.pending.clear();
        self.skip = 0;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// The system speaker.
pub struct CpalSpeaker {
    device_name: Option<String>,
}

impl CpalSpeaker {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl AudioOutputFactory for CpalSpeaker {
    fn open(&self) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (signals_tx, signals_rx) = std_mpsc::channel();
        let lost_tx = signals_tx.clone();
        let device_name = self.device_name.clone();
        let shared = timeline.clone();

        std::thread::Builder::new()
            .name("lecturer-speaker".to_string())
            .spawn(move || {
                match build_playback_stream(device_name.as_deref(), shared.clone(), lost_tx) {
                    Ok((stream, sample_rate)) => {
                        let converter = Arc::new(Mutex::new(PlaybackConverter::new(sample_rate)));
                        let _ = ready_tx.send(Ok((sample_rate, converter.clone())));
                        hold_playback(stream, signals_rx, &converter, &shared);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                    }
                }
            })
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        let (sample_rate, converter) = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Output("playback thread exited".to_string()))?
            .map_err(PlaybackError::Output)?;
        Ok(Box::new(CpalOutput {
            timeline,
            converter,
            sample_rate,
            signals: Some(signals_tx),
        }))
    }
}

/// Like `hold_stream`, but wakes up regularly to hand the converter's
/// held-back tail to the timeline before the device runs out of audio.
fn hold_playback(
    stream: cpal::Stream,
    signals: std_mpsc::Receiver<DeviceSignal>,
    converter: &Mutex<PlaybackConverter>,
    timeline: &Mutex<Timeline>,
) {
    loop {
        match signals.recv_timeout(TAIL_POLL) {
            Err(std_mpsc::RecvTimeoutError::Timeout) => flush_due_tail(converter, timeline),
            Ok(DeviceSignal::Lost(reason)) => {
                tracing::warn!(device = "speaker", %reason, "Audio device lost");
                break;
            }
            Ok(DeviceSignal::Stop) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                tracing::debug!(device = "speaker", "Audio stream stopped");
                break;
            }
        }
    }
    drop(stream);
}

fn flush_due_tail(converter: &Mutex<PlaybackConverter>, timeline: &Mutex<Timeline>) {
    let Some(position) = timeline.lock().ok().map(|timeline| timeline.position) else {
        return;
    };
    let Ok(mut converter) = converter.lock() else {
        return;
    };
    if !converter.tail_due(position) {
        return;
    }
    match converter.finish() {
        Ok(Some(voice)) => {
            if let Ok(mut timeline) = timeline.lock() {
                timeline.voices.push(voice);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to flush playback tail: {:#}", e),
    }
}

/// The device's default output config, at the model's own rate when the
/// device offers it so playback needs no resampling.
fn output_config(device: &Device) -> anyhow::Result<StreamConfig> {
    let default = device
        .default_output_config()
        .context("Failed to get default output config")?;
    let native = device.supported_output_configs().ok().and_then(|mut ranges| {
        ranges.find(|range| {
            range.channels() == default.channels()
                && range.sample_format() == default.sample_format()
                && range.min_sample_rate().0 <= PLAYBACK_SAMPLE_RATE
                && PLAYBACK_SAMPLE_RATE <= range.max_sample_rate().0
        })
    });
    Ok(match native {
        Some(range) => range
            .with_sample_rate(cpal::SampleRate(PLAYBACK_SAMPLE_RATE))
            .config(),
        None => default.config(),
    })
}

fn build_playback_stream(
    device_name: Option<&str>,
    timeline: Arc<Mutex<Timeline>>,
    lost: std_mpsc::Sender<DeviceSignal>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let device = get_or_default_output(device_name)?;
    tracing::info!("Using output device: {:?}", device.name()?);
    let config = output_config(&device)?;
    tracing::info!("Output stream config: {:?}", &config);
    let channels = config.channels as usize;

    let rendered = timeline.clone();
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        match rendered.lock() {
            Ok(mut timeline) => timeline.render(data, channels),
            Err(_) => data.fill(0.0),
        }
    };

    let stream = device.build_output_stream(
        &config,
        output_data_fn,
        move |err| {
            tracing::error!("An error occurred on output stream: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                if let Ok(mut timeline) = timeline.lock() {
                    timeline.lost = Some(err.to_string());
                }
                let _ = lost.send(DeviceSignal::Lost(err.to_string()));
            }
        },
        None,
    )?;
    stream.play()?;
    Ok((stream, config.sample_rate.0))
}

/// One open speaker stream, clocked by the frames it has played.
struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    converter: Arc<Mutex<PlaybackConverter>>,
    sample_rate: u32,
    signals: Option<std_mpsc::Sender<DeviceSignal>>,
}

impl CpalOutput {
    fn timeline(&self) -> Result<std::sync::MutexGuard<'_, Timeline>, PlaybackError> {
        self.timeline
            .lock()
            .map_err(|_| PlaybackError::Output("playback timeline poisoned".to_string()))
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        match self.timeline.lock() {
            Ok(timeline) => timeline.position as f64 / self.sample_rate as f64,
            Err(_) => 0.0,
        }
    }

    fn schedule(
        &mut self,
        id: u64,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<(), PlaybackError> {
        if let Some(reason) = self.timeline()?.lost.clone() {
            return Err(PlaybackError::Output(format!("output device lost: {reason}")));
        }
        let voices = self
            .converter
            .lock()
            .map_err(|_| PlaybackError::Output("playback converter poisoned".to_string()))?
            .push(id, &samples, sample_rate, start_at)
            .map_err(|e| PlaybackError::Output(format!("{e:#}")))?;
        self.timeline()?.voices.extend(voices);
        Ok(())
    }

    /// Stopping any buffer ends the current run, since whatever follows it
    /// can no longer join seamlessly.
    fn stop(&mut self, id: u64) {
        if let Ok(mut converter) = self.converter.lock() {
            converter.reset();
        }
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.voices.retain(|voice| voice.id != id);
        }
    }

    fn close(&mut self) {
        if let Ok(mut converter) = self.converter.lock() {
            converter.reset();
        }
        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.voices.clear();
        }
        if let Some(signals) = self.signals.take() {
            let _ = signals.send(DeviceSignal::Stop);
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_converter_passes_16k_through() {
        let mut converter = CaptureConverter::new(16_000, 2, 4).unwrap();
        let frames = converter.push(&[0.5, 0.5, 1.0, 0.0, 0.2, 0.2, 0.0, 0.0, 0.3, 0.3]);
        assert_eq!(frames.len(), 1);
        assert_abs_diff_eq!(frames[0].as_slice(), [0.5f32, 0.5, 0.2, 0.0].as_slice());

        assert!(converter.push(&[0.1, 0.1]).is_empty());
    }

    #[test]
    fn test_converter_resamples_48k_to_16k_frames() {
        let mut converter = CaptureConverter::new(48_000, 1, 4096).unwrap();
        let one_second = vec![0.25f32; 48_000];
        let frames = converter.push(&one_second);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|frame| frame.len() == 4096));
    }

    fn assert_back_to_back(voices: &[Voice]) {
        for pair in voices.windows(2) {
            assert_eq!(
                pair[0].start_frame + pair[0].samples.len() as u64,
                pair[1].start_frame,
                "gap between {:?} and {:?}",
                pair[0].id,
                pair[1].id
            );
        }
    }

    #[test]
    fn test_playback_joins_consecutive_buffers_without_a_seam() {
        let mut converter = PlaybackConverter::new(48_000);
        let chunk = vec![0.5f32; 2400];
        let mut voices = converter.push(1, &chunk, 24_000, 0.0).unwrap();
        voices.extend(converter.push(2, &chunk, 24_000, 0.1).unwrap());
        voices.extend(converter.finish().unwrap());

        assert_eq!(voices[0].start_frame, 0);
        assert_back_to_back(&voices);
        let total: usize = voices.iter().map(|voice| voice.samples.len()).sum();
        assert_eq!(total, 9600);

        let mut timeline = Timeline {
            voices,
            ..Timeline::default()
        };
        let mut out = vec![0.0f32; 9600];
        timeline.render(&mut out, 1);
        // The first and last few samples lean on the silence around the run.
        for (frame, sample) in out.iter().enumerate().take(9580).skip(8) {
            assert!((sample - 0.5).abs() < 1e-3, "frame {frame} is {sample}");
        }
        assert_abs_diff_eq!(out[4800], 0.5, epsilon = 1e-3);
    }

    #[test]
    fn test_playback_holds_short_input_until_the_run_ends() {
        let mut converter = PlaybackConverter::new(48_000);
        assert!(converter.push(1, &[0.5; 100], 24_000, 1.0).unwrap().is_empty());
        assert!(converter.tail_due(48_000));
        assert!(!converter.tail_due(0));

        let tail = converter.finish().unwrap().unwrap();
        assert_eq!(tail.id, 1);
        assert_eq!(tail.start_frame, 48_000);
        assert_eq!(tail.samples.len(), 200);
        assert!(converter.finish().unwrap().is_none());
    }

    #[test]
    fn test_playback_starts_a_new_run_after_a_gap() {
        let mut converter = PlaybackConverter::new(48_000);
        let chunk = vec![0.5f32; 960];
        let first = converter.push(1, &chunk, 24_000, 0.0).unwrap();
        let second = converter.push(2, &chunk, 24_000, 1.0).unwrap();

        // The first run's tail is flushed in place before the second starts.
        let first_end = first.last().map_or(0, |v| v.start_frame + v.samples.len() as u64);
        assert_eq!(second[0].id, 1);
        assert_eq!(second[0].start_frame, first_end);
        assert_eq!(first_end + second[0].samples.len() as u64, 1920);
        assert_eq!(second[1].id, 2);
        assert_eq!(second[1].start_frame, 48_000);
    }

    #[test]
    fn test_playback_at_the_model_rate_passes_through() {
        let mut converter = PlaybackConverter::new(PLAYBACK_SAMPLE_RATE);
        let voices = converter.push(1, &[0.1, 0.2, 0.3], 24_000, 0.5).unwrap();
        let more = converter.push(2, &[0.4], 24_000, 0.5 + 3.0 / 24_000.0).unwrap();
        assert_eq!(voices[0].start_frame, 12_000);
        assert_eq!(more[0].start_frame, 12_003);
        assert_abs_diff_eq!(more[0].samples.as_slice(), [0.4f32].as_slice());
        assert!(!converter.tail_due(u64::MAX / 2));
    }

    #[test]
    fn test_stop_drops_the_held_back_tail() {
        let mut converter = PlaybackConverter::new(48_000);
        converter.push(1, &[0.5; 100], 24_000, 0.0).unwrap();
        converter.reset();
        assert!(converter.finish().unwrap().is_none());
    }

    fn detached_output() -> CpalOutput {
        CpalOutput {
            timeline: Arc::new(Mutex::new(Timeline::default())),
            converter: Arc::new(Mutex::new(PlaybackConverter::new(PLAYBACK_SAMPLE_RATE))),
            sample_rate: PLAYBACK_SAMPLE_RATE,
            signals: None,
        }
    }

    #[test]
    fn test_schedule_fails_once_the_device_is_lost() {
        let mut output = detached_output();
        output.schedule(1, vec![0.1; 4], 24_000, 0.0).unwrap();
        assert_eq!(output.timeline.lock().unwrap().voices.len(), 1);

        output.timeline.lock().unwrap().lost = Some("device is no longer available".to_string());
        let err = output.schedule(2, vec![0.1; 4], 24_000, 0.1).unwrap_err();
        assert!(
            matches!(err, PlaybackError::Output(message) if message.contains("output device lost"))
        );
    }

    #[test]
    fn test_timeline_mixes_voices_at_offsets() {
        let mut timeline = Timeline::default();
        timeline.voices.push(Voice {
            id: 1,
            start_frame: 0,
            samples: vec![0.1; 4],
        });
        timeline.voices.push(Voice {
            id: 2,
            start_frame: 2,
            samples: vec![0.2; 4],
        });

        let mut out = vec![0.0f32; 8];
        timeline.render(&mut out, 2);
        assert_abs_diff_eq!(
            out.as_slice(),
            [0.1f32, 0.1, 0.1, 0.1, 0.3, 0.3, 0.3, 0.3].as_slice(),
            epsilon = 1e-6
        );
        assert_eq!(timeline.position, 4);
        assert_eq!(timeline.voices.len(), 1);

        let mut out = vec![0.0f32; 4];
        timeline.render(&mut out, 1);
        assert_abs_diff_eq!(out.as_slice(), [0.2f32, 0.2, 0.0, 0.0].as_slice(), epsilon = 1e-6);
        assert!(timeline.voices.is_empty());
    }

    #[test]
    fn test_timeline_clamps_overlapping_voices() {
        let mut timeline = Timeline::default();
        for id in 0..3 {
            timeline.voices.push(Voice {
                id,
                start_frame: 0,
                samples: vec![0.6; 2],
            });
        }
        let mut out = vec![0.0f32; 2];
        timeline.render(&mut out, 1);
        assert_abs_diff_eq!(out.as_slice(), [1.0f32, 1.0].as_slice());
    }

    #[test]
    fn test_capture_error_classification() {
        assert!(matches!(
            capture_error("Permission denied by the system".to_string()),
            CaptureError::PermissionDenied(_)
        ));
        assert!(matches!(
            capture_error("No default input device".to_string()),
            CaptureError::DeviceUnavailable(_)
        ));
    }
}
