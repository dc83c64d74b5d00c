//! Diktant Audio crate - payload decoding and single-flight line playback.
//!
//! Provides a trait-based abstraction over the audio output device, a PCM
//! decoder for lesson payloads, and the playback controller that guarantees
//! at most one line is audible at a time. Includes a mock output for testing
//! without real audio hardware; real speaker output lives behind the `cpal`
//! feature.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use diktant_core::error::DiktantError;

pub mod decoder;
pub mod playback;

#[cfg(feature = "cpal")]
pub mod cpal_output;

pub use decoder::{AudioDecoder, Pcm16Decoder, PcmBuffer, LESSON_SAMPLE_RATE};
pub use playback::{PlayOutcome, PlaybackController};

#[cfg(feature = "cpal")]
pub use cpal_output::CpalAudioOutput;

// =============================================================================
// Traits
// =============================================================================

/// An audio output context (a sound card, a browser audio context, ...).
///
/// The context is created lazily by `open` and torn down by `release`.
/// `render` plays one buffer and resolves when it has finished.
pub trait AudioOutput: Send + Sync {
    /// Acquire the output context. Idempotent.
    fn open(&self) -> Result<(), DiktantError>;

    /// Play `buffer` to completion.
    fn render(&self, buffer: PcmBuffer) -> impl Future<Output = Result<(), DiktantError>> + Send;

    /// Release the output context, stopping anything still audible.
    fn release(&self);

    /// Whether the context is currently held.
    fn is_open(&self) -> bool;
}

// =============================================================================
// Mock implementation
// =============================================================================

/// Silent output for tests and headless runs.
///
/// Clones share their counters, so a test can keep a handle while the
/// controller owns another. `render` waits for the configured delay (zero by
/// default) instead of the buffer's real duration.
#[derive(Debug, Clone, Default)]
pub struct MockAudioOutput {
    open: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    rendered: Arc<Mutex<Vec<usize>>>,
    render_delay: Duration,
    fail_render: bool,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every render take `delay`.
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// Make every render fail, as a lost device would.
    pub fn failing(mut self) -> Self {
        self.fail_render = true;
        self
    }

    /// Number of times the context was created.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of times an open context was released.
    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Sample counts of every buffer rendered so far.
    pub fn rendered(&self) -> Vec<usize> {
        self.rendered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AudioOutput for MockAudioOutput {
    fn open(&self) -> Result<(), DiktantError> {
        if !self.open.swap(true, Ordering::SeqCst) {
            self.opened.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Mock audio output opened");
        }
        Ok(())
    }

    async fn render(&self, buffer: PcmBuffer) -> Result<(), DiktantError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(DiktantError::Audio("Output context is not open".to_string()));
        }
        if !self.render_delay.is_zero() {
            tokio::time::sleep(self.render_delay).await;
        }
        if self.fail_render {
            return Err(DiktantError::Audio("Mock output device lost".to_string()));
        }
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(buffer.len());
        }
        Ok(())
    }

    fn release(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.released.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Mock audio output released");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_output_open_is_idempotent() {
        let output = MockAudioOutput::new();
        output.open().unwrap();
        output.open().unwrap();
        assert!(output.is_open());
        assert_eq!(output.open_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_output_render_requires_open() {
        let output = MockAudioOutput::new();
        let result = output.render(PcmBuffer::new(vec![0.1; 10], 24_000, 1)).await;
        assert!(result.is_err());
        assert!(output.rendered().is_empty());
    }

    #[tokio::test]
    async fn test_mock_output_records_renders() {
        let output = MockAudioOutput::new();
        output.open().unwrap();
        output
            .render(PcmBuffer::new(vec![0.1; 10], 24_000, 1))
            .await
            .unwrap();
        assert_eq!(output.rendered(), vec![10]);
    }

    #[tokio::test]
    async fn test_mock_output_release_then_reopen() {
        let output = MockAudioOutput::new();
        output.open().unwrap();
        output.release();
        output.release();
        assert!(!output.is_open());
        assert_eq!(output.release_count(), 1);

        output.open().unwrap();
        assert_eq!(output.open_count(), 2);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let output = MockAudioOutput::new();
        let handle = output.clone();
        output.open().unwrap();
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn test_failing_output() {
        let output = MockAudioOutput::new().failing();
        output.open().unwrap();
        let result = output.render(PcmBuffer::new(vec![0.0; 4], 24_000, 1)).await;
        assert!(matches!(result, Err(DiktantError::Audio(_))));
    }
}
