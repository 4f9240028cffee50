// Integration tests for the capture lifecycle
//
// A scripted input stands in for the microphone: it delivers a fixed set of
// frames once acquired and counts how often its handle is released.

use auscult::audio::{wav, AudioInput, CaptureConstraints, DeviceError, FrameSink, InputHandle};
use auscult::{CaptureConfig, CaptureError, CaptureSession, CaptureState, WavHeader};
use mockall::mock;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

mock! {
    pub Handle {}

    impl InputHandle for Handle {
        fn sample_rate(&self) -> u32;
        fn release(&mut self) -> Result<(), DeviceError>;
    }
}

struct ScriptedInput {
    sample_rate: u32,
    frames: Vec<Vec<f32>>,
    releases: Arc<AtomicUsize>,
    requested: Arc<Mutex<Option<CaptureConstraints>>>,
}

impl ScriptedInput {
    fn new(sample_rate: u32, frames: Vec<Vec<f32>>) -> Self {
        Self {
            sample_rate,
            frames,
            releases: Arc::new(AtomicUsize::new(0)),
            requested: Arc::new(Mutex::new(None)),
        }
    }
}

impl AudioInput for ScriptedInput {
    fn acquire(
        &self,
        constraints: &CaptureConstraints,
        sink: FrameSink,
    ) -> Result<Box<dyn InputHandle>, DeviceError> {
        *self.requested.lock().unwrap() = Some(constraints.clone());
        for frame in &self.frames {
            sink.deliver(frame);
        }

        let releases = Arc::clone(&self.releases);
        let mut handle = MockHandle::new();
        handle.expect_sample_rate().return_const(self.sample_rate);
        handle.expect_release().times(1).returning(move || {
            releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        Ok(Box::new(handle))
    }
}

struct RefusingInput(DeviceError);

impl AudioInput for RefusingInput {
    fn acquire(
        &self,
        _constraints: &CaptureConstraints,
        _sink: FrameSink,
    ) -> Result<Box<dyn InputHandle>, DeviceError> {
        Err(self.0.clone())
    }
}

fn capture_with(
    input: ScriptedInput,
    target_sample_rate: u32,
) -> (CaptureSession, Arc<AtomicUsize>) {
    let releases = Arc::clone(&input.releases);
    let config = CaptureConfig {
        target_sample_rate,
        ..Default::default()
    };
    let session = CaptureSession::new(Arc::new(input), config).unwrap();
    (session, releases)
}

fn decode(bytes: Vec<u8>) -> (hound::WavSpec, Vec<i16>) {
    let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
    let spec = reader.spec();
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    (spec, samples)
}

#[tokio::test]
async fn test_capture_at_target_rate_is_not_resampled() {
    let input = ScriptedInput::new(48000, vec![vec![0.0, 0.5], vec![-0.5, 1.0]]);
    let (session, releases) = capture_with(input, 48000);

    session.start().await.unwrap();
    let bytes = session.stop().await.unwrap();

    assert_eq!(
        &bytes[wav::HEADER_LEN..],
        &[0x00, 0x00, 0xFF, 0x3F, 0x00, 0xC0, 0xFF, 0x7F]
    );
    let (spec, samples) = decode(bytes);
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(samples, vec![0, 16383, -16384, 32767]);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_one_second_at_48khz_becomes_16000_samples() {
    let tone: Vec<f32> = (0..48000)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin() * 0.8)
        .collect();
    // Delivered in driver-sized chunks
    let frames = tone.chunks(1023).map(|c| c.to_vec()).collect();
    let (session, _releases) = capture_with(ScriptedInput::new(48000, frames), 16000);

    session.start().await.unwrap();
    let bytes = session.stop().await.unwrap();

    let header = WavHeader::parse(&bytes).unwrap();
    assert_eq!(header.sample_count(), 16000);
    assert_eq!(header.duration().as_secs_f64(), 1.0);

    let (spec, samples) = decode(bytes);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(spec.sample_rate, 16000);
    assert_eq!(samples.len(), 16000);
    // 3:1 decimation lands exactly on every third input sample
    assert_eq!(samples[5], wav::quantize(tone[15]));
    assert!(samples.iter().all(|&s| s.unsigned_abs() <= 26214));
}

#[tokio::test]
async fn test_three_samples_downsample_to_one() {
    let input = ScriptedInput::new(48000, vec![vec![0.0, 1.0, 0.0]]);
    let (session, _releases) = capture_with(input, 16000);

    session.start().await.unwrap();
    let (_, samples) = decode(session.stop().await.unwrap());

    assert_eq!(samples, vec![0]);
}

#[tokio::test]
async fn test_empty_capture_produces_header_only() {
    let (session, releases) = capture_with(ScriptedInput::new(44100, vec![]), 16000);

    session.start().await.unwrap();
    let bytes = session.stop().await.unwrap();

    assert_eq!(bytes.len(), 44);
    assert_eq!(&bytes[40..44], &0u32.to_le_bytes());
    let (spec, samples) = decode(bytes);
    assert_eq!(spec.sample_rate, 16000);
    assert!(samples.is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_right_after_start() {
    let (session, releases) = capture_with(ScriptedInput::new(48000, vec![]), 16000);

    session.start().await.unwrap();
    session.cancel().await;

    assert_eq!(session.state().await, CaptureState::Cancelled);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(matches!(
        session.stop().await,
        Err(CaptureError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_out_of_range_samples_are_clamped() {
    let frames = vec![vec![1.7, -3.0, 1.0, -1.0]];
    let (session, _releases) = capture_with(ScriptedInput::new(16000, frames), 16000);

    session.start().await.unwrap();
    let (_, samples) = decode(session.stop().await.unwrap());

    assert_eq!(samples, vec![32767, -32768, 32767, -32768]);
}

#[tokio::test]
async fn test_requests_mono_with_processing() {
    let input = ScriptedInput::new(48000, vec![]);
    let requested = Arc::clone(&input.requested);
    let (session, _releases) = capture_with(input, 16000);

    session.start().await.unwrap();
    session.cancel().await;

    let constraints = requested.lock().unwrap().clone().unwrap();
    assert_eq!(constraints.channel_count, 1);
    assert!(constraints.noise_suppression);
    assert!(constraints.echo_cancellation);
    assert!(constraints.auto_gain_control);
}

#[tokio::test]
async fn test_start_failures_are_distinguishable() {
    let denied = CaptureSession::new(
        Arc::new(RefusingInput(DeviceError::PermissionDenied("blocked".into()))),
        CaptureConfig::default(),
    )
    .unwrap();
    let missing = CaptureSession::new(
        Arc::new(RefusingInput(DeviceError::Unavailable("no device".into()))),
        CaptureConfig::default(),
    )
    .unwrap();

    assert!(matches!(
        denied.start().await,
        Err(CaptureError::PermissionDenied(_))
    ));
    assert!(matches!(
        missing.start().await,
        Err(CaptureError::DeviceUnavailable(_))
    ));
    assert_eq!(denied.state().await, CaptureState::Failed);
    assert_eq!(missing.state().await, CaptureState::Failed);
}

#[tokio::test]
async fn test_shared_session_rejects_concurrent_start() {
    let input = ScriptedInput::new(48000, vec![vec![0.1; 480]]);
    let (session, releases) = capture_with(input, 16000);
    let session = Arc::new(session);

    session.start().await.unwrap();
    let second = Arc::clone(&session);
    let result = tokio::spawn(async move { second.start().await }).await.unwrap();

    assert!(matches!(
        result,
        Err(CaptureError::InvalidState {
            operation: "start",
            state: CaptureState::Capturing,
        })
    ));

    let bytes = session.stop().await.unwrap();
    assert_eq!(WavHeader::parse(&bytes).unwrap().sample_count(), 160);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
