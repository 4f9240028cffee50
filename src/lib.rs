//! Auscult - microphone capture for acoustic analysis
//!
//! Records a mono microphone stream and turns it into a 16-bit PCM WAV at a
//! fixed sample rate, ready to be uploaded to the analysis service.

pub mod audio;
pub mod capture;

pub use audio::{
    AudioInput, CaptureConstraints, CpalMicrophone, DeviceError, FrameSink, InputHandle,
    SampleBuffer, WavError, WavHeader,
};
pub use capture::{CaptureConfig, CaptureError, CaptureSession, CaptureState};
