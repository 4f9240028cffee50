//! Audio input boundary
//!
//! The capture session talks to the host audio stack only through these
//! traits. `microphone` provides the cpal implementation; tests substitute
//! mocks.

use super::buffer::FrameSink;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Processing requested from the input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Requested channel count (the session only accepts mono)
    pub channel_count: u16,
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            channel_count: 1,
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
        }
    }
}

/// Errors reported by an audio input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No audio input available: {0}")]
    Unavailable(String),

    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// A source of microphone audio
#[cfg_attr(test, automock)]
pub trait AudioInput: Send + Sync {
    /// Open the device and start delivering mono frames to `sink`
    ///
    /// Blocks until the platform grants or refuses access, which may involve
    /// a user permission prompt. The device runs at its native rate, reported
    /// by the returned handle.
    fn acquire(
        &self,
        constraints: &CaptureConstraints,
        sink: FrameSink,
    ) -> Result<Box<dyn InputHandle>, DeviceError>;
}

/// An open input device
#[cfg_attr(test, automock)]
pub trait InputHandle: Send {
    /// Native sample rate of the delivered frames
    fn sample_rate(&self) -> u32;

    /// Stop frame delivery and close the device
    fn release(&mut self) -> Result<(), DeviceError>;
}
