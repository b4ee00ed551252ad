//! Local playback backend built on rodio.
//!
//! The reply reference is a URL; the handle fetches it over HTTP and
//! feeds the bytes to a rodio sink, which handles container decoding.
//! `rodio::OutputStream` is not `Send`, so it is parked on a dedicated
//! thread for the life of the handle; the `Sink` itself is shareable and
//! drives playback from the async side.

use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{AudioOutput, PlaybackError, PlaybackEvent, PlaybackEventKind, PlaybackHandle};

/// Audio output backed by the host's default rodio output device.
pub struct LocalSpeaker;

impl LocalSpeaker {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for LocalSpeaker {
    fn open(
        &self,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> Result<Box<dyn PlaybackHandle>, PlaybackError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (keepalive_tx, keepalive_rx) = std_mpsc::channel::<()>();

        // The OutputStream must outlive every play; park it on its own
        // thread until the handle is dropped.
        std::thread::Builder::new()
            .name("playback-output".to_string())
            .spawn(move || output_thread(ready_tx, keepalive_rx))
            .map_err(|e| PlaybackError::Output(format!("failed to spawn output thread: {e}")))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Output("output thread exited before opening".to_string()))??;

        info!("playback output open");
        Ok(Box::new(LocalPlaybackHandle {
            sink,
            http: reqwest::Client::new(),
            events,
            _keepalive: keepalive_tx,
        }))
    }
}

fn output_thread(
    ready_tx: std_mpsc::Sender<Result<Arc<rodio::Sink>, PlaybackError>>,
    keepalive_rx: std_mpsc::Receiver<()>,
) {
    let (stream, stream_handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
            return;
        }
    };
    let sink = match rodio::Sink::try_new(&stream_handle) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
            return;
        }
    };
    let _ = ready_tx.send(Ok(Arc::clone(&sink)));

    // Blocks until the handle drops its keepalive sender, then the
    // stream drops with the thread and the device is released.
    let _ = keepalive_rx.recv();
    drop(stream);
    debug!("playback output released");
}

struct LocalPlaybackHandle {
    sink: Arc<rodio::Sink>,
    http: reqwest::Client,
    events: mpsc::Sender<PlaybackEvent>,
    _keepalive: std_mpsc::Sender<()>,
}

#[async_trait]
impl PlaybackHandle for LocalPlaybackHandle {
    async fn play(&self, reference: &str, generation: u64) -> Result<(), PlaybackError> {
        debug!(%reference, generation, "fetching reply audio");
        let bytes = self
            .http
            .get(reference)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| PlaybackError::Source(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| PlaybackError::Source(e.to_string()))?;

        let source = rodio::Decoder::new(Cursor::new(bytes.to_vec()))
            .map_err(|e| PlaybackError::Source(e.to_string()))?;

        // Supersede whatever was queued, then start the new source from
        // the beginning.
        self.sink.clear();
        self.sink.append(source);
        self.sink.play();
        let _ = self
            .events
            .send(PlaybackEvent {
                generation,
                kind: PlaybackEventKind::Started,
            })
            .await;

        // Watch for the sink draining; an explicit stop() also unblocks
        // this, and the stale event is filtered by generation upstream.
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            sink.sleep_until_end();
            let _ = events.blocking_send(PlaybackEvent {
                generation,
                kind: PlaybackEventKind::Stopped,
            });
        });

        Ok(())
    }

    fn stop(&self) {
        // Emptying the queue both pauses and rewinds; the sink stays
        // usable for the next play.
        self.sink.clear();
    }
}
