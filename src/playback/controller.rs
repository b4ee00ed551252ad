//! Controller for the singleton playback handle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use super::{AudioOutput, PlaybackError, PlaybackEvent, PlaybackEventKind, PlaybackHandle};

/// Owns the process-wide playback handle for the process's lifetime.
///
/// The handle is created lazily on the first `play` and reused across
/// cycles. Each `play` bumps a generation counter; events carrying an
/// older generation belong to a superseded cycle and are filtered by the
/// orchestrator via [`PlaybackController::is_live`].
pub struct PlaybackController {
    output: Arc<dyn AudioOutput>,
    events: mpsc::Sender<PlaybackEvent>,
    handle: Option<Arc<dyn PlaybackHandle>>,
    generation: u64,
}

impl PlaybackController {
    pub fn new(output: Arc<dyn AudioOutput>, events: mpsc::Sender<PlaybackEvent>) -> Self {
        Self {
            output,
            events,
            handle: None,
            generation: 0,
        }
    }

    /// Point the handle at `reference` and start playback. The fetch and
    /// decode run on a spawned task; a failure there comes back as a
    /// `Failed` event instead of an error return.
    pub fn play(&mut self, reference: &str) -> Result<(), PlaybackError> {
        let handle = match &self.handle {
            Some(handle) => Arc::clone(handle),
            None => {
                let handle: Arc<dyn PlaybackHandle> =
                    Arc::from(self.output.open(self.events.clone())?);
                self.handle = Some(Arc::clone(&handle));
                handle
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let reference = reference.to_string();
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = handle.play(&reference, generation).await {
                warn!(%reference, %e, "playback failed");
                let _ = events
                    .send(PlaybackEvent {
                        generation,
                        kind: PlaybackEventKind::Failed(e),
                    })
                    .await;
            }
        });
        Ok(())
    }

    /// Pause playback and rewind. Safe to call when nothing is playing;
    /// before the handle exists this is a no-op.
    pub fn stop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.stop();
        }
    }

    /// Whether `generation` identifies the playback cycle most recently
    /// started.
    pub fn is_live(&self, generation: u64) -> bool {
        generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct RecordingOutput {
        opens: AtomicUsize,
        played: Arc<Mutex<Vec<String>>>,
        fail_play: bool,
    }

    impl AudioOutput for RecordingOutput {
        fn open(
            &self,
            events: mpsc::Sender<PlaybackEvent>,
        ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingHandle {
                events,
                played: Arc::clone(&self.played),
                fail_play: self.fail_play,
            }))
        }
    }

    struct RecordingHandle {
        events: mpsc::Sender<PlaybackEvent>,
        played: Arc<Mutex<Vec<String>>>,
        fail_play: bool,
    }

    #[async_trait]
    impl PlaybackHandle for RecordingHandle {
        async fn play(&self, reference: &str, generation: u64) -> Result<(), PlaybackError> {
            if self.fail_play {
                return Err(PlaybackError::Source("no such resource".to_string()));
            }
            self.played.lock().unwrap().push(reference.to_string());
            let _ = self
                .events
                .send(PlaybackEvent {
                    generation,
                    kind: PlaybackEventKind::Started,
                })
                .await;
            Ok(())
        }

        fn stop(&self) {}
    }

    #[tokio::test]
    async fn stop_before_first_play_is_a_noop() {
        let output = Arc::new(RecordingOutput::default());
        let (tx, _rx) = mpsc::channel(8);
        let shared: Arc<dyn AudioOutput> = Arc::clone(&output);
        let mut controller = PlaybackController::new(shared, tx);

        controller.stop();
        assert_eq!(output.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handle_is_created_once_and_repointed_across_plays() {
        let output = Arc::new(RecordingOutput::default());
        let (tx, mut rx) = mpsc::channel(8);
        let shared: Arc<dyn AudioOutput> = Arc::clone(&output);
        let mut controller = PlaybackController::new(shared, tx);

        controller.play("http://host/a.mp3").unwrap();
        let started = rx.recv().await.unwrap();
        assert_eq!(started.generation, 1);

        controller.play("http://host/b.mp3").unwrap();
        let started = rx.recv().await.unwrap();
        assert_eq!(started.generation, 2);

        assert_eq!(output.opens.load(Ordering::SeqCst), 1);
        assert_eq!(
            *output.played.lock().unwrap(),
            vec!["http://host/a.mp3", "http://host/b.mp3"]
        );
    }

    #[tokio::test]
    async fn only_the_latest_generation_is_live() {
        let output: Arc<dyn AudioOutput> = Arc::new(RecordingOutput::default());
        let (tx, mut rx) = mpsc::channel(8);
        let mut controller = PlaybackController::new(output, tx);

        controller.play("http://host/a.mp3").unwrap();
        controller.play("http://host/b.mp3").unwrap();
        let _ = rx.recv().await;

        assert!(!controller.is_live(1));
        assert!(controller.is_live(2));
    }

    #[tokio::test]
    async fn failed_play_surfaces_as_a_failed_event() {
        let output: Arc<dyn AudioOutput> = Arc::new(RecordingOutput {
            fail_play: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::channel(8);
        let mut controller = PlaybackController::new(output, tx);

        controller.play("http://host/missing.mp3").unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, 1);
        assert!(matches!(event.kind, PlaybackEventKind::Failed(_)));
    }
}
