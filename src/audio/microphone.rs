//! Audio capture from microphone
//!
//! Uses cpal for cross-platform capture. The cpal stream is not `Send`, so it
//! lives on a dedicated thread controlled through a command channel. The
//! realtime callback only pushes into a lock-free ring buffer; the capture
//! thread drains it, downmixes to mono and hands frames to the `FrameSink`.

use super::buffer::FrameSink;
use super::device::{AudioInput, CaptureConstraints, DeviceError, InputHandle};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the capture thread moves samples out of the ring buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

/// Seconds of interleaved audio the ring buffer can hold between drains
const RING_SECONDS: usize = 2;

/// Commands to control the audio thread
enum AudioCommand {
    Stop,
}

/// Microphone input backed by the default cpal host
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    device_name: Option<String>,
}

impl CpalMicrophone {
    /// Use the host's default input device
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the input device with the given name
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }
}

impl AudioInput for CpalMicrophone {
    fn acquire(
        &self,
        constraints: &CaptureConstraints,
        sink: FrameSink,
    ) -> Result<Box<dyn InputHandle>, DeviceError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let device_name = self.device_name.clone();
        let constraints = constraints.clone();

        let thread_handle = thread::Builder::new()
            .name("auscult-capture".into())
            .spawn(move || {
                run_audio_capture(device_name, constraints, sink, ready_tx, command_rx)
            })
            .map_err(|e| DeviceError::Backend(format!("cannot spawn capture thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(Box::new(CpalHandle {
                sample_rate,
                command_tx,
                thread_handle: Some(thread_handle),
            })),
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(DeviceError::Backend(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }
}

/// Handle to a running cpal capture
pub struct CpalHandle {
    sample_rate: u32,
    command_tx: mpsc::Sender<AudioCommand>,
    thread_handle: Option<JoinHandle<()>>,
}

impl InputHandle for CpalHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        let Some(handle) = self.thread_handle.take() else {
            return Ok(());
        };
        let _ = self.command_tx.send(AudioCommand::Stop);
        handle
            .join()
            .map_err(|_| DeviceError::Backend("audio capture thread panicked".into()))?;
        tracing::info!("Microphone released");
        Ok(())
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release microphone on drop: {}", e);
        }
    }
}

/// List available input devices
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// An input stream that has been built but not yet started
struct OpenStream {
    stream: cpal::Stream,
    consumer: HeapCons<f32>,
    overruns: Arc<AtomicUsize>,
    sample_rate: u32,
    channels: usize,
}

/// Run audio capture (in a dedicated thread)
fn run_audio_capture(
    device_name: Option<String>,
    constraints: CaptureConstraints,
    sink: FrameSink,
    ready_tx: mpsc::Sender<Result<u32, DeviceError>>,
    command_rx: mpsc::Receiver<AudioCommand>,
) {
    let open = match open_stream(device_name.as_deref(), &constraints) {
        Ok(open) => open,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let OpenStream {
        stream,
        mut consumer,
        overruns,
        sample_rate,
        channels,
    } = open;

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(map_play_error(e)));
        return;
    }
    if ready_tx.send(Ok(sample_rate)).is_err() {
        return;
    }

    tracing::info!("Audio capture started");

    let mut drain = Drainer::new(channels);
    loop {
        match command_rx.recv_timeout(DRAIN_INTERVAL) {
            Ok(AudioCommand::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => drain.run(&mut consumer, &sink),
        }
    }

    // Dropping the stream unregisters the callback; whatever it pushed
    // before that is still in the ring.
    drop(stream);
    drain.run(&mut consumer, &sink);

    let lost = overruns.load(Ordering::Relaxed);
    if lost > 0 {
        tracing::warn!("Ring buffer overran, {} samples lost", lost);
    }
    tracing::info!("Audio capture stopped");
}

fn open_stream(
    device_name: Option<&str>,
    constraints: &CaptureConstraints,
) -> Result<OpenStream, DeviceError> {
    let host = cpal::default_host();
    let processing = constraints.noise_suppression
        || constraints.echo_cancellation
        || constraints.auto_gain_control;
    if processing {
        tracing::debug!(
            "Host {:?} has no input processing, noise suppression / echo cancellation / AGC unavailable",
            host.id()
        );
    }

    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| classify_backend(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| DeviceError::Unavailable(format!("no input device named {:?}", name)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| DeviceError::Unavailable("no default input device".into()))?,
    };

    tracing::info!("Audio device: {:?}", device.name());

    // Keep the device's native rate; only the channel layout is negotiated
    let default_config = device.default_input_config().map_err(map_config_error)?;
    let native_rate = default_config.sample_rate();
    let supported = device
        .supported_input_configs()
        .ok()
        .and_then(|mut configs| {
            configs.find(|c| {
                c.channels() == constraints.channel_count
                    && c.sample_format() == default_config.sample_format()
                    && c.min_sample_rate() <= native_rate
                    && native_rate <= c.max_sample_rate()
            })
        })
        .map(|c| c.with_sample_rate(native_rate))
        .unwrap_or(default_config);

    let sample_rate = supported.sample_rate().0;
    if sample_rate == 0 {
        return Err(DeviceError::Unavailable("device reports a 0Hz sample rate".into()));
    }
    let channels = usize::from(supported.channels().max(1));
    let sample_format = supported.sample_format();

    tracing::info!(
        "Audio config: {}Hz {}ch {:?}",
        sample_rate,
        channels,
        sample_format
    );

    let rb = HeapRb::<f32>::new(sample_rate as usize * channels * RING_SECONDS);
    let (producer, consumer) = rb.split();
    let overruns = Arc::new(AtomicUsize::new(0));
    let config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, producer, &overruns),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, producer, &overruns),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, producer, &overruns),
        other => Err(DeviceError::Unavailable(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }?;

    Ok(OpenStream {
        stream,
        consumer,
        overruns,
        sample_rate,
        channels,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<f32>,
    overruns: &Arc<AtomicUsize>,
) -> Result<cpal::Stream, DeviceError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let overruns = Arc::clone(overruns);
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    if producer.try_push(f32::from_sample(sample)).is_err() {
                        overruns.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            |err| {
                tracing::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(map_build_error)
}

/// Moves interleaved samples from the ring to the sink as mono frames
struct Drainer {
    channels: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl Drainer {
    fn new(channels: usize) -> Self {
        Self {
            channels,
            pending: Vec::new(),
            scratch: vec![0.0; 4096],
        }
    }

    fn run(&mut self, consumer: &mut HeapCons<f32>, sink: &FrameSink) {
        loop {
            let n = consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }

        // Only whole interleaved frames are downmixed
        let whole = self.pending.len() - self.pending.len() % self.channels;
        if whole == 0 {
            return;
        }
        let mono = downmix(&self.pending[..whole], self.channels);
        sink.deliver(&mono);
        self.pending.drain(..whole);
    }
}

/// Average interleaved channels into a mono signal
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Backends report a refused microphone only through their error text
fn classify_backend(message: String) -> DeviceError {
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not permitted", "unauthorized", "not authorized"]
        .iter()
        .any(|needle| lower.contains(needle));
    if denied {
        DeviceError::PermissionDenied(message)
    } else {
        DeviceError::Backend(message)
    }
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> DeviceError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable
        | cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            DeviceError::Unavailable(err.to_string())
        }
        other => classify_backend(other.to_string()),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable
        | cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::Unavailable(err.to_string())
        }
        other => classify_backend(other.to_string()),
    }
}

fn map_play_error(err: cpal::PlayStreamError) -> DeviceError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => DeviceError::Unavailable(err.to_string()),
        other => classify_backend(other.to_string()),
    }
}
