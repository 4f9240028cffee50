//! Captured sample storage
//!
//! A `SampleBuffer` accumulates the mono frames of a single capture. The
//! device never touches it directly: it is handed a `FrameSink`, the
//! frame-delivery callback, which is the buffer's only writer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Append-only store of mono samples for one capture
///
/// Grows while the capture runs and becomes immutable once sealed.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sealed: bool,
    rejected: usize,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame to the end of the buffer
    ///
    /// Returns `false` and stores nothing if the buffer is sealed.
    pub fn append(&mut self, frame: &[f32]) -> bool {
        if self.sealed {
            self.rejected += frame.len();
            return false;
        }
        self.samples.extend_from_slice(frame);
        true
    }

    /// Freeze the buffer. Later appends are rejected.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples refused after sealing
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Seal the buffer and move its samples out
    pub fn into_samples(mut self) -> Vec<f32> {
        self.seal();
        self.samples
    }
}

/// Frame-delivery callback handed to an audio input
///
/// Clones share the same underlying buffer. Frames arrive one at a time from
/// a single producer, so the lock is uncontended while capturing; it only
/// orders the final `take` against a late delivery.
#[derive(Debug, Clone, Default)]
pub struct FrameSink {
    buffer: Arc<Mutex<SampleBuffer>>,
}

impl FrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SampleBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy a delivered mono frame into the buffer
    pub fn deliver(&self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        if !self.lock().append(frame) {
            tracing::trace!("Dropped {} samples delivered after seal", frame.len());
        }
    }

    /// Stop accepting frames
    pub fn seal(&self) {
        self.lock().seal();
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().is_sealed()
    }

    /// Number of samples buffered so far
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Seal the buffer and take its samples
    ///
    /// The first call returns everything captured; later calls return an
    /// empty vector.
    pub fn take(&self) -> Vec<f32> {
        let mut buffer = self.lock();
        buffer.seal();
        let rejected = buffer.rejected();
        if rejected > 0 {
            tracing::debug!("{} late samples were refused after seal", rejected);
        }
        std::mem::take(&mut buffer.samples)
    }

    /// Seal the buffer and drop its samples
    pub fn discard(&self) {
        let mut buffer = self.lock();
        buffer.seal();
        buffer.samples = Vec::new();
    }
}
