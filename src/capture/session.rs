//! Single-shot microphone capture
//!
//! A `CaptureSession` acquires an input device, buffers the frames it
//! delivers, and on `stop` turns them into a WAV byte stream at the target
//! rate. Every exit path (stop, cancel, failed start, drop) releases the
//! device exactly once.

use crate::audio::{
    resample, wav, AudioInput, CaptureConstraints, DeviceError, FrameSink, InputHandle, WavError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Sample rate of the encoded WAV (16kHz for the analysis service)
    pub target_sample_rate: u32,
    /// Processing requested from the input device
    pub constraints: CaptureConstraints,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: wav::DEFAULT_TARGET_SAMPLE_RATE,
            constraints: CaptureConstraints::default(),
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.target_sample_rate == 0 {
            return Err(CaptureError::InvalidConfig(
                "target sample rate must be positive".into(),
            ));
        }
        if self.constraints.channel_count != 1 {
            return Err(CaptureError::InvalidConfig(format!(
                "only mono capture is supported, got {} channels",
                self.constraints.channel_count
            )));
        }
        Ok(())
    }
}

/// Session lifecycle
///
/// `Idle → Acquiring → Capturing → Stopping → Finalized` on success.
/// `Finalized`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Created, nothing acquired yet
    Idle,
    /// Waiting for the platform to grant the device
    Acquiring,
    /// Device open, frames accumulating
    Capturing,
    /// Device released, encoding in progress
    Stopping,
    /// WAV produced
    Finalized,
    /// Acquisition or encoding failed
    Failed,
    /// Discarded without output
    Cancelled,
}

impl CaptureState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CaptureState::Finalized | CaptureState::Failed | CaptureState::Cancelled
        )
    }
}

/// Capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("No audio input device available: {0}")]
    DeviceUnavailable(String),

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },

    #[error("WAV encoding failed: {0}")]
    EncodingFailure(#[from] WavError),

    #[error("Capture cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<DeviceError> for CaptureError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied(msg) => CaptureError::PermissionDenied(msg),
            DeviceError::Unavailable(msg) | DeviceError::Backend(msg) => {
                CaptureError::DeviceUnavailable(msg)
            }
        }
    }
}

struct Inner {
    state: CaptureState,
    sink: Option<FrameSink>,
    handle: Option<Box<dyn InputHandle>>,
    input_sample_rate: Option<u32>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.discard();
        }
        if let Some(mut handle) = self.handle.take() {
            tracing::warn!("Capture session dropped while {:?}, releasing device", self.state);
            release_device(handle.as_mut(), "drop");
        }
    }
}

/// One microphone capture, from device acquisition to WAV bytes
///
/// Dropping the session releases a held device. An acquisition still in
/// flight keeps the state alive until it returns, then releases.
pub struct CaptureSession {
    input: Arc<dyn AudioInput>,
    config: CaptureConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CaptureSession {
    /// Create an idle session over the given input
    pub fn new(input: Arc<dyn AudioInput>, config: CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        Ok(Self {
            input,
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CaptureState::Idle,
                sink: None,
                handle: None,
                input_sample_rate: None,
            })),
        })
    }

    /// Acquire the input device and begin buffering frames
    ///
    /// Suspends while the platform grants access. If `cancel` is called in
    /// the meantime, the device is released as soon as it arrives and
    /// `CaptureError::Cancelled` is returned. The outcome is recorded by the
    /// acquisition task itself, so dropping this future does not orphan the
    /// device: the session moves to `Capturing` (or releases on cancel) once
    /// the platform answers.
    pub async fn start(&self) -> Result<(), CaptureError> {
        let sink = {
            let mut inner = self.inner.lock().await;
            if inner.state != CaptureState::Idle {
                return Err(CaptureError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.state = CaptureState::Acquiring;
            let sink = FrameSink::new();
            inner.sink = Some(sink.clone());
            sink
        };

        tracing::info!("Acquiring audio input");

        let input = Arc::clone(&self.input);
        let constraints = self.config.constraints.clone();
        let target_sample_rate = self.config.target_sample_rate;
        let shared = Arc::clone(&self.inner);
        let settled = tokio::task::spawn_blocking(move || {
            let acquired = input.acquire(&constraints, sink);
            let mut inner = shared.blocking_lock();
            settle_acquisition(&mut inner, acquired, target_sample_rate)
        })
        .await;

        match settled {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Acquisition task failed: {}", e);
                let mut inner = self.inner.lock().await;
                if inner.state == CaptureState::Acquiring {
                    inner.sink = None;
                    inner.state = CaptureState::Failed;
                }
                Err(CaptureError::DeviceUnavailable(format!(
                    "acquisition task failed: {}",
                    e
                )))
            }
        }
    }

    /// Finish the capture and return the encoded WAV
    ///
    /// Frame delivery is cut off and the device released before the buffer
    /// is read, whatever happens during encoding.
    pub async fn stop(&self) -> Result<Vec<u8>, CaptureError> {
        let mut inner = self.inner.lock().await;
        if inner.state != CaptureState::Capturing {
            return Err(CaptureError::InvalidState {
                operation: "stop",
                state: inner.state,
            });
        }
        inner.state = CaptureState::Stopping;

        let sink = inner.sink.take();
        if let Some(sink) = &sink {
            sink.seal();
        }
        if let Some(handle) = inner.handle.take() {
            release_off_runtime(handle, "stop").await;
        }
        let samples = sink.map(|s| s.take()).unwrap_or_default();

        let target_rate = self.config.target_sample_rate;
        let input_rate = inner.input_sample_rate.unwrap_or(target_rate);
        let captured = samples.len();
        let samples = if input_rate == target_rate {
            samples
        } else {
            resample(&samples, input_rate, target_rate)
        };

        match wav::encode(&samples, target_rate) {
            Ok(bytes) => {
                inner.state = CaptureState::Finalized;
                tracing::info!(
                    "Capture finalized: {} samples @ {}Hz -> {} samples @ {}Hz ({} bytes)",
                    captured,
                    input_rate,
                    samples.len(),
                    target_rate,
                    bytes.len()
                );
                Ok(bytes)
            }
            Err(e) => {
                inner.state = CaptureState::Failed;
                tracing::error!("WAV encoding failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Abandon the capture without producing output
    ///
    /// Safe from any state; a no-op once the session is terminal. Teardown
    /// errors are logged, never returned.
    pub async fn cancel(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state.is_terminal() {
            tracing::debug!("Cancel ignored, session already {:?}", inner.state);
            return;
        }

        let previous = inner.state;
        inner.state = CaptureState::Cancelled;
        if let Some(sink) = inner.sink.take() {
            sink.discard();
        }
        if let Some(handle) = inner.handle.take() {
            release_off_runtime(handle, "cancel").await;
        }

        tracing::info!("Capture cancelled (was {:?})", previous);
    }

    /// Current lifecycle state
    pub async fn state(&self) -> CaptureState {
        self.inner.lock().await.state
    }

    /// Native rate of the acquired device, once known
    pub async fn input_sample_rate(&self) -> Option<u32> {
        self.inner.lock().await.input_sample_rate
    }

    /// Samples buffered so far at the input rate
    pub async fn buffered_samples(&self) -> usize {
        self.inner
            .lock()
            .await
            .sink
            .as_ref()
            .map(FrameSink::len)
            .unwrap_or(0)
    }
}

/// Record the outcome of an acquisition (runs on the blocking pool)
fn settle_acquisition(
    inner: &mut Inner,
    acquired: Result<Box<dyn InputHandle>, DeviceError>,
    target_sample_rate: u32,
) -> Result<(), CaptureError> {
    let cancelled = inner.state == CaptureState::Cancelled;

    let mut handle = match acquired {
        Ok(handle) => handle,
        Err(e) if cancelled => {
            tracing::debug!("Acquisition failed after cancel: {}", e);
            return Err(CaptureError::Cancelled);
        }
        Err(e) => {
            tracing::error!("Audio input acquisition failed: {}", e);
            inner.sink = None;
            inner.state = CaptureState::Failed;
            return Err(e.into());
        }
    };

    if cancelled {
        tracing::info!("Cancelled during acquisition, releasing device");
        release_device(handle.as_mut(), "cancelled start");
        return Err(CaptureError::Cancelled);
    }

    let input_sample_rate = handle.sample_rate();
    if input_sample_rate == 0 {
        release_device(handle.as_mut(), "failed start");
        inner.sink = None;
        inner.state = CaptureState::Failed;
        return Err(CaptureError::DeviceUnavailable(
            "device reported a 0Hz sample rate".into(),
        ));
    }

    inner.input_sample_rate = Some(input_sample_rate);
    inner.handle = Some(handle);
    inner.state = CaptureState::Capturing;

    tracing::info!(
        "Capture started: {}Hz -> {}Hz",
        input_sample_rate,
        target_sample_rate
    );
    Ok(())
}

/// Release on the blocking pool; the cpal adapter joins its capture thread
async fn release_off_runtime(mut handle: Box<dyn InputHandle>, during: &'static str) {
    let released =
        tokio::task::spawn_blocking(move || release_device(handle.as_mut(), during)).await;
    if let Err(e) = released {
        tracing::warn!("Device release task failed during {}: {}", during, e);
    }
}

fn release_device(handle: &mut dyn InputHandle, during: &str) {
    if let Err(e) = handle.release() {
        tracing::warn!("Device release failed during {}: {}", during, e);
    }
}
