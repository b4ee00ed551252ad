//! Per-utterance capture session.
//!
//! `begin()` runs the acquire -> start -> finalize sequence on a spawned
//! task; completions come back as [`CaptureEvent`]s on the channel handed
//! to the session at construction, each fired at most once per cycle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{CaptureError, MicrophoneDevice, MicrophoneStream, UtteranceBlob};

/// Completions emitted by a capture cycle.
#[derive(Debug)]
pub enum CaptureEvent {
    /// The recorder confirmed an active recording. Fires strictly after
    /// the stream grant; the window between the two is "permission
    /// pending" from the user's point of view.
    RecorderActive,

    /// The finalized utterance. The stream's hardware tracks are
    /// guaranteed stopped by the time this fires, on every path.
    Captured(UtteranceBlob),

    /// The cycle failed; no stream or recorder resources remain
    /// allocated.
    Failed(CaptureError),
}

/// Owns microphone capture for one utterance at a time.
///
/// At most one capture cycle is live per session, and the orchestrator
/// holds exactly one session, so at most one microphone stream exists
/// process-wide.
pub struct AudioCaptureSession {
    device: Arc<dyn MicrophoneDevice>,
    events: mpsc::Sender<CaptureEvent>,
    finalize_tx: Option<oneshot::Sender<()>>,
}

impl AudioCaptureSession {
    pub fn new(device: Arc<dyn MicrophoneDevice>, events: mpsc::Sender<CaptureEvent>) -> Self {
        Self {
            device,
            events,
            finalize_tx: None,
        }
    }

    /// Whether a capture cycle is live, i.e. `end()` may be called.
    pub fn is_active(&self) -> bool {
        self.finalize_tx.is_some()
    }

    /// Start a capture cycle: request microphone access and begin
    /// recording as soon as it is granted. Completions arrive on the
    /// event channel. Calling this while a cycle is live is a
    /// programming error.
    pub fn begin(&mut self) {
        assert!(
            self.finalize_tx.is_none(),
            "begin() called while a capture cycle is live"
        );

        let (finalize_tx, finalize_rx) = oneshot::channel();
        self.finalize_tx = Some(finalize_tx);

        let device = Arc::clone(&self.device);
        let events = self.events.clone();
        tokio::spawn(run_capture(device, events, finalize_rx));
    }

    /// Signal the recorder to finalize. Exactly one `Captured` (or
    /// `Failed`) event follows. Calling this with no live cycle is a
    /// programming error.
    pub fn end(&mut self) {
        let finalize_tx = self
            .finalize_tx
            .take()
            .expect("end() called with no active capture session");
        let _ = finalize_tx.send(());
    }

    /// Mark the current cycle as settled. The orchestrator calls this on
    /// `Captured`/`Failed` so a cycle that died before `end()` does not
    /// leave the session looking live.
    pub fn settle(&mut self) {
        self.finalize_tx = None;
    }
}

async fn run_capture(
    device: Arc<dyn MicrophoneDevice>,
    events: mpsc::Sender<CaptureEvent>,
    finalize_rx: oneshot::Receiver<()>,
) {
    let mut stream = match device.acquire().await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(CaptureEvent::Failed(e)).await;
            return;
        }
    };

    if let Err(e) = stream.start().await {
        stream.stop_tracks();
        let _ = events.send(CaptureEvent::Failed(e)).await;
        return;
    }
    let _ = events.send(CaptureEvent::RecorderActive).await;

    // A dropped sender means the session was torn down without end();
    // finalize anyway so the hardware is released.
    if finalize_rx.await.is_err() {
        debug!("capture session dropped before end(), releasing stream");
    }

    let result = stream.finalize().await;
    // Unconditional: the microphone must be released no later than the
    // moment the payload becomes available, empty or not.
    stream.stop_tracks();

    match result {
        Ok(blob) => {
            let _ = events.send(CaptureEvent::Captured(blob)).await;
        }
        Err(e) => {
            let _ = events.send(CaptureEvent::Failed(e)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Scripted device: grants a stream that records `payload`, or
    /// denies access outright.
    struct ScriptedDevice {
        payload: Option<Vec<u8>>,
        fail_finalize: bool,
        acquires: AtomicUsize,
        tracks_stopped: Arc<AtomicBool>,
    }

    impl ScriptedDevice {
        fn granting(payload: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                payload: Some(payload),
                fail_finalize: false,
                acquires: AtomicUsize::new(0),
                tracks_stopped: Arc::new(AtomicBool::new(false)),
            })
        }

        fn denying() -> Arc<Self> {
            Arc::new(Self {
                payload: None,
                fail_finalize: false,
                acquires: AtomicUsize::new(0),
                tracks_stopped: Arc::new(AtomicBool::new(false)),
            })
        }

        fn failing_finalize() -> Arc<Self> {
            Arc::new(Self {
                payload: Some(vec![1]),
                fail_finalize: true,
                acquires: AtomicUsize::new(0),
                tracks_stopped: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    #[async_trait]
    impl MicrophoneDevice for ScriptedDevice {
        async fn acquire(&self) -> Result<Box<dyn MicrophoneStream>, CaptureError> {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            match &self.payload {
                Some(payload) => Ok(Box::new(ScriptedStream {
                    payload: payload.clone(),
                    fail_finalize: self.fail_finalize,
                    tracks_stopped: Arc::clone(&self.tracks_stopped),
                })),
                None => Err(CaptureError::PermissionDenied),
            }
        }
    }

    struct ScriptedStream {
        payload: Vec<u8>,
        fail_finalize: bool,
        tracks_stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MicrophoneStream for ScriptedStream {
        async fn start(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        async fn finalize(&mut self) -> Result<UtteranceBlob, CaptureError> {
            if self.fail_finalize {
                return Err(CaptureError::Device("recorder died".into()));
            }
            Ok(UtteranceBlob::new(self.payload.clone(), "audio/wav"))
        }

        fn stop_tracks(&mut self) {
            self.tracks_stopped.store(true, Ordering::SeqCst);
        }
    }

    fn session_with(
        device: Arc<ScriptedDevice>,
    ) -> (AudioCaptureSession, mpsc::Receiver<CaptureEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (AudioCaptureSession::new(device, tx), rx)
    }

    #[tokio::test]
    async fn full_cycle_stops_tracks_before_captured_fires() {
        let device = ScriptedDevice::granting(b"utterance".to_vec());
        let (mut session, mut rx) = session_with(Arc::clone(&device));

        session.begin();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::RecorderActive
        ));

        session.end();
        match rx.recv().await.unwrap() {
            CaptureEvent::Captured(blob) => {
                assert_eq!(blob.len(), 9);
                assert!(device.tracks_stopped.load(Ordering::SeqCst));
            }
            other => panic!("expected Captured, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_payload_still_stops_tracks_and_fires_captured() {
        let device = ScriptedDevice::granting(Vec::new());
        let (mut session, mut rx) = session_with(Arc::clone(&device));

        session.begin();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::RecorderActive
        ));

        session.end();
        match rx.recv().await.unwrap() {
            CaptureEvent::Captured(blob) => {
                assert!(blob.is_empty());
                assert!(device.tracks_stopped.load(Ordering::SeqCst));
            }
            other => panic!("expected Captured, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn denied_access_emits_failed_without_recorder_active() {
        let device = ScriptedDevice::denying();
        let (mut session, mut rx) = session_with(device);

        session.begin();
        match rx.recv().await.unwrap() {
            CaptureEvent::Failed(CaptureError::PermissionDenied) => {}
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finalize_failure_still_stops_tracks() {
        let device = ScriptedDevice::failing_finalize();
        let (mut session, mut rx) = session_with(Arc::clone(&device));

        session.begin();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CaptureEvent::RecorderActive
        ));

        session.end();
        assert!(matches!(rx.recv().await.unwrap(), CaptureEvent::Failed(_)));
        assert!(device.tracks_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    #[should_panic(expected = "no active capture session")]
    async fn end_without_begin_is_a_programming_error() {
        let device = ScriptedDevice::granting(Vec::new());
        let (mut session, _rx) = session_with(device);
        session.end();
    }
}
