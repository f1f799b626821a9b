use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::audio::{downmix_mono, resample_linear};
use crate::domain::DomainError;
use crate::ports::{AudioCapture, AudioPlayback, BufferId};

/// Captured frames buffered between the audio thread and the session.
const FRAME_QUEUE: usize = 64;

fn device_error(context: &str, err: impl std::fmt::Display) -> DomainError {
    DomainError::AudioDevice {
        message: format!("{context}: {err}"),
    }
}

fn stream_config(supported: &cpal::SupportedStreamConfig) -> StreamConfig {
    StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    }
}

enum CaptureCommand {
    Start {
        sample_rate: u32,
        frames: mpsc::Sender<Vec<f32>>,
        reply: oneshot::Sender<Result<(), DomainError>>,
    },
    Stop,
    Shutdown,
}

fn open_input(sample_rate: u32, frames: mpsc::Sender<Vec<f32>>) -> Result<Stream, DomainError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| DomainError::AudioDevice {
            message: "No default input device available".to_string(),
        })?;
    let supported = device
        .default_input_config()
        .map_err(|e| device_error("Failed to get input config", e))?;
    let config = stream_config(&supported);
    let channels = config.channels as usize;
    let device_rate = config.sample_rate.0;

    debug!(
        device = %device.name().unwrap_or_default(),
        device_rate = device_rate,
        channels = channels,
        format = ?supported.sample_format(),
        "Opening input"
    );

    let forward = move |data: &[f32]| {
        let mono = downmix_mono(data, channels);
        let frame = resample_linear(&mono, device_rate, sample_rate);
        // Never block the audio callback; a full queue drops the frame.
        let _ = frames.try_send(frame);
    };
    let on_error = |err: cpal::StreamError| error!(?err, "Input stream error");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| forward(data),
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                forward(&converted)
            },
            on_error,
            None,
        ),
        other => return Err(device_error("Unsupported input format", format!("{other:?}"))),
    }
    .map_err(|e| device_error("Failed to build input stream", e))?;

    stream.play().map_err(|e| device_error("Failed to start input stream", e))?;
    Ok(stream)
}

fn capture_thread(mut commands: mpsc::Receiver<CaptureCommand>) {
    // cpal streams are not Send and stay on this thread.
    let mut stream: Option<Stream> = None;
    while let Some(command) = commands.blocking_recv() {
        match command {
            CaptureCommand::Start {
                sample_rate,
                frames,
                reply,
            } => {
                stream.take();
                let result = open_input(sample_rate, frames).map(|s| {
                    stream = Some(s);
                    info!(sample_rate = sample_rate, "Microphone capture started");
                });
                let _ = reply.send(result);
            }
            CaptureCommand::Stop => {
                if stream.take().is_some() {
                    info!("Microphone capture stopped");
                }
            }
            CaptureCommand::Shutdown => break,
        }
    }
    debug!("Capture thread shutting down");
}

/// Microphone capture on the default input device.
pub struct CpalCapture {
    commands: mpsc::Sender<CaptureCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalCapture {
    pub fn new() -> Result<Self, DomainError> {
        let (commands, rx) = mpsc::channel(16);
        let thread = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_thread(rx))
            .map_err(|e| device_error("Failed to spawn capture thread", e))?;
        Ok(Self {
            commands,
            thread: Mutex::new(Some(thread)),
        })
    }
}

#[async_trait]
impl AudioCapture for CpalCapture {
    async fn start(&self, sample_rate: u32) -> Result<mpsc::Receiver<Vec<f32>>, DomainError> {
        let (frames, rx) = mpsc::channel(FRAME_QUEUE);
        let (reply, result) = oneshot::channel();
        self.commands
            .send(CaptureCommand::Start {
                sample_rate,
                frames,
                reply,
            })
            .await
            .map_err(|_| device_error("Capture thread", "not running"))?;
        result
            .await
            .map_err(|_| device_error("Capture thread", "dropped the request"))??;
        Ok(rx)
    }

    fn stop(&self) {
        if self.commands.try_send(CaptureCommand::Stop).is_err() {
            warn!("Capture thread busy, stop request dropped");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.commands.try_send(CaptureCommand::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

struct Voice {
    id: BufferId,
    start_frame: u64,
    samples: Vec<f32>,
}

/// Buffers placed on a frame clock that advances as the device pulls audio.
#[derive(Default)]
struct Mixer {
    device_rate: u32,
    source_rate: u32,
    clock: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let frames = out.len() / channels.max(1);
        for (i, frame) in out.chunks_mut(channels.max(1)).enumerate() {
            let t = self.clock + i as u64;
            let sample: f32 = self
                .voices
                .iter()
                .filter(|v| t >= v.start_frame)
                .filter_map(|v| v.samples.get((t - v.start_frame) as usize))
                .sum();
            frame.fill(sample.clamp(-1.0, 1.0));
        }
        self.clock += frames as u64;
        let clock = self.clock;
        self.voices
            .retain(|v| v.start_frame + v.samples.len() as u64 > clock);
    }
}

enum PlaybackCommand {
    Open {
        mixer: Arc<Mutex<Mixer>>,
        reply: oneshot::Sender<Result<u32, DomainError>>,
    },
    Close,
    Shutdown,
}

fn open_output(mixer: Arc<Mutex<Mixer>>) -> Result<(Stream, u32), DomainError> {
    let device: Device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| DomainError::AudioDevice {
            message: "No default output device available".to_string(),
        })?;
    let supported = device
        .default_output_config()
        .map_err(|e| device_error("Failed to get output config", e))?;
    let config = stream_config(&supported);
    let channels = config.channels as usize;
    let on_error = |err: cpal::StreamError| error!(?err, "Output stream error");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |out: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.lock().render(out, channels),
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(out.len(), 0.0);
                    mixer.lock().render(&mut scratch, channels);
                    for (dst, src) in out.iter_mut().zip(&scratch) {
                        *dst = (src * 32767.0) as i16;
                    }
                },
                on_error,
                None,
            )
        }
        other => return Err(device_error("Unsupported output format", format!("{other:?}"))),
    }
    .map_err(|e| device_error("Failed to build output stream", e))?;

    stream.play().map_err(|e| device_error("Failed to start output stream", e))?;
    Ok((stream, config.sample_rate.0))
}

fn playback_thread(mut commands: mpsc::Receiver<PlaybackCommand>) {
    let mut stream: Option<Stream> = None;
    while let Some(command) = commands.blocking_recv() {
        match command {
            PlaybackCommand::Open { mixer, reply } => {
                stream.take();
                let result = open_output(mixer).map(|(s, rate)| {
                    stream = Some(s);
                    rate
                });
                let _ = reply.send(result);
            }
            PlaybackCommand::Close => {
                if stream.take().is_some() {
                    info!("Audio output closed");
                }
            }
            PlaybackCommand::Shutdown => break,
        }
    }
    debug!("Playback thread shutting down");
}

/// Scheduled playback on the default output device.
///
/// Buffers arrive at the model's rate and are resampled to the device rate
/// when scheduled.
pub struct CpalPlayback {
    commands: mpsc::Sender<PlaybackCommand>,
    mixer: Arc<Mutex<Mixer>>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalPlayback {
    pub fn new() -> Result<Self, DomainError> {
        let (commands, rx) = mpsc::channel(16);
        let thread = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_thread(rx))
            .map_err(|e| device_error("Failed to spawn playback thread", e))?;
        Ok(Self {
            commands,
            mixer: Arc::new(Mutex::new(Mixer::default())),
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }
}

#[async_trait]
impl AudioPlayback for CpalPlayback {
    async fn open(&self, sample_rate: u32) -> Result<(), DomainError> {
        *self.mixer.lock() = Mixer {
            source_rate: sample_rate,
            ..Mixer::default()
        };

        let (reply, result) = oneshot::channel();
        self.commands
            .send(PlaybackCommand::Open {
                mixer: Arc::clone(&self.mixer),
                reply,
            })
            .await
            .map_err(|_| device_error("Playback thread", "not running"))?;
        let device_rate = result
            .await
            .map_err(|_| device_error("Playback thread", "dropped the request"))??;

        self.mixer.lock().device_rate = device_rate;
        info!(source_rate = sample_rate, device_rate = device_rate, "Audio output open");
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let mixer = self.mixer.lock();
        if mixer.device_rate == 0 {
            return 0.0;
        }
        mixer.clock as f64 / mixer.device_rate as f64
    }

    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<BufferId, DomainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut mixer = self.mixer.lock();
        if mixer.device_rate == 0 {
            return Err(DomainError::AudioDevice {
                message: "Audio output is not open".to_string(),
            });
        }
        let samples = resample_linear(&samples, mixer.source_rate, mixer.device_rate);
        let start_frame = (start_at.max(0.0) * mixer.device_rate as f64).round() as u64;
        mixer.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(id)
    }

    fn stop(&self, id: BufferId) {
        self.mixer.lock().voices.retain(|v| v.id != id);
    }

    fn close(&self) {
        {
            let mut mixer = self.mixer.lock();
            mixer.voices.clear();
            mixer.device_rate = 0;
        }
        let _ = self.commands.try_send(PlaybackCommand::Close);
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.commands.try_send(PlaybackCommand::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}
