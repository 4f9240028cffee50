//! Capture lifecycle
//!
//! Drives one microphone recording from device acquisition to WAV bytes.

mod session;

pub use session::{CaptureConfig, CaptureError, CaptureSession, CaptureState};
