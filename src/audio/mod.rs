//! Audio capture, resampling and WAV encoding
//!
//! Leaf building blocks of the capture pipeline: the sample buffer, the
//! resampler, the WAV encoder, and the device boundary with its cpal
//! implementation.

pub mod buffer;
pub mod device;
pub mod microphone;
pub mod resample;
pub mod wav;

pub use buffer::{FrameSink, SampleBuffer};
pub use device::{AudioInput, CaptureConstraints, DeviceError, InputHandle};
pub use microphone::{list_input_devices, CpalHandle, CpalMicrophone};
pub use resample::resample;
pub use wav::{encode, WavError, WavHeader};
