//! Reply playback: output seam, the singleton-handle controller, and the
//! local rodio backend.

mod controller;
#[cfg(feature = "audio-io")]
mod local;
mod output;

pub use controller::PlaybackController;
#[cfg(feature = "audio-io")]
pub use local::LocalSpeaker;
pub use output::{AudioOutput, PlaybackError, PlaybackEvent, PlaybackEventKind, PlaybackHandle};
