//! Audio output seam.
//!
//! The platform playback primitive sits behind these object-safe traits.
//! All handle methods take `&self`; implementations use interior
//! mutability so the controller can hand clones of the handle to spawned
//! play tasks.

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    /// The audio output device could not be opened.
    #[error("audio output unavailable: {0}")]
    Output(String),

    /// The reply reference could not be fetched or decoded.
    #[error("could not play reply audio: {0}")]
    Source(String),
}

/// Lifecycle notification from the playback handle, tagged with the
/// generation of the play call it belongs to so notifications from a
/// superseded cycle can be discarded.
#[derive(Debug, Clone)]
pub struct PlaybackEvent {
    pub generation: u64,
    pub kind: PlaybackEventKind,
}

#[derive(Debug, Clone)]
pub enum PlaybackEventKind {
    /// Playback actually began.
    Started,
    /// Playback ended, by natural completion or explicit stop.
    Stopped,
    /// The play attempt failed after it was issued.
    Failed(PlaybackError),
}

/// Factory for the process-wide playback handle.
pub trait AudioOutput: Send + Sync {
    /// Create the playback handle. The controller calls this at most
    /// once per process; notifications go to `events`.
    fn open(
        &self,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError>;
}

/// The single reusable playback handle. Never reconstructed, only
/// re-pointed at new sources.
#[async_trait]
pub trait PlaybackHandle: Send + Sync {
    /// Re-point the handle at `reference` and start playback,
    /// superseding whatever was playing. On success the handle emits one
    /// `Started` and, later, exactly one `Stopped` event tagged with
    /// `generation`.
    async fn play(&self, reference: &str, generation: u64) -> Result<(), PlaybackError>;

    /// Pause and rewind to the beginning so the next `play` starts
    /// cleanly. No-op when nothing is playing.
    fn stop(&self);
}
