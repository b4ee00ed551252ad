//! Microphone device seam.
//!
//! The platform audio-input API sits behind these object-safe traits so
//! the orchestrator and its tests never touch real hardware directly.

use async_trait::async_trait;

use super::UtteranceBlob;

/// Failure opening or running a microphone stream.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    /// The user (or platform policy) denied microphone access.
    #[error("microphone access denied")]
    PermissionDenied,

    /// No compatible audio input device exists.
    #[error("no audio input device available")]
    NoDevice,

    /// The device failed after access was granted.
    #[error("audio input device error: {0}")]
    Device(String),
}

/// A source of microphone streams, requested fresh for every recording
/// cycle.
#[async_trait]
pub trait MicrophoneDevice: Send + Sync {
    /// Request microphone access. Resolves once the hardware grants a
    /// stream, or fails with the reason access could not be obtained.
    async fn acquire(&self) -> Result<Box<dyn MicrophoneStream>, CaptureError>;
}

/// A live microphone stream bound to an in-progress recorder.
#[async_trait]
pub trait MicrophoneStream: Send {
    /// Start the recorder. Resolves when recording is confirmed active,
    /// which is a later point than the stream grant itself.
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Finalize the recording and return the utterance. An utterance
    /// with an empty payload means no speech was captured.
    async fn finalize(&mut self) -> Result<UtteranceBlob, CaptureError>;

    /// Stop every hardware track backing the stream. Idempotent; must
    /// leave no device resources allocated.
    fn stop_tracks(&mut self);
}
