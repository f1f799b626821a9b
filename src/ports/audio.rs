use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::DomainError;

/// Identifier of a scheduled playback buffer.
pub type BufferId = u64;

/// Port for microphone capture.
///
/// Implementations own the platform device and push mono f32 frames at the
/// requested sample rate.
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Acquire the input device and start streaming frames.
    ///
    /// Fails when no device is available or permission is denied.
    async fn start(&self, sample_rate: u32) -> Result<mpsc::Receiver<Vec<f32>>, DomainError>;

    /// Stop capture and release the device. Safe to call when not capturing.
    fn stop(&self);
}

/// Port for scheduled speaker playback.
///
/// Buffers are placed on the playback clock at absolute start times, so
/// consecutive buffers can be laid back to back without gaps.
#[async_trait]
pub trait AudioPlayback: Send + Sync {
    /// Open the output graph at `sample_rate`.
    async fn open(&self, sample_rate: u32) -> Result<(), DomainError>;

    /// Current playback clock in seconds since `open`.
    fn current_time(&self) -> f64;

    /// Schedule mono samples to start at `start_at` seconds on the playback clock.
    fn schedule(&self, samples: Vec<f32>, start_at: f64) -> Result<BufferId, DomainError>;

    /// Stop a scheduled or playing buffer. Unknown ids are ignored.
    fn stop(&self, id: BufferId);

    /// Close the output graph. Safe to call more than once.
    fn close(&self);
}
