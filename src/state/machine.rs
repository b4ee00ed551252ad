//! Core state machine implementation
//!
//! Orchestrates one utterance cycle at a time: capture the user's
//! speech, upload it to the chat service, play the synthesized reply,
//! and surface failures as a dismissable error, with exactly one state
//! active at any moment.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::capture::{AudioCaptureSession, CaptureEvent, MicrophoneDevice, UtteranceBlob};
use crate::chat::{ChatResponse, ChatUploadClient, UploadError};
use crate::events::StateChanged;
use crate::playback::{AudioOutput, PlaybackController, PlaybackEvent, PlaybackEventKind};

/// The five possible states of the interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    /// Waiting for the user to press the microphone control
    Idle,
    /// An utterance is being captured
    Recording,
    /// The utterance is in flight to the chat service
    Uploading,
    /// The synthesized reply is playing
    Speaking,
    /// A failure message is displayed until dismissed
    Error,
}

impl Default for InteractionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for InteractionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InteractionState::Idle => write!(f, "Idle"),
            InteractionState::Recording => write!(f, "Recording"),
            InteractionState::Uploading => write!(f, "Uploading"),
            InteractionState::Speaking => write!(f, "Speaking"),
            InteractionState::Error => write!(f, "Error"),
        }
    }
}

/// UI-origin intents forwarded into the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// The microphone control was pressed
    MicButton,
    /// The cancel control was pressed
    Cancel,
    /// The error dialog was dismissed
    DismissError,
}

type UploadOutcome = Result<ChatResponse, UploadError>;

/// The state machine that orchestrates capture, upload, and playback
pub struct InteractionMachine {
    /// Current state
    state: InteractionState,
    /// Message displayed while in `Error`
    error: Option<String>,
    /// Time when the current state was entered
    state_entered_at: Instant,
    /// Guards the permission window: a capture cycle has been requested
    /// but has not yet resolved
    capture_in_flight: bool,
    capture: AudioCaptureSession,
    capture_rx: mpsc::Receiver<CaptureEvent>,
    uploader: ChatUploadClient,
    upload_tx: mpsc::Sender<UploadOutcome>,
    upload_rx: mpsc::Receiver<UploadOutcome>,
    playback: PlaybackController,
    playback_rx: mpsc::Receiver<PlaybackEvent>,
    /// Channel for emitting state-change notifications
    event_tx: broadcast::Sender<StateChanged>,
}

/// The one external event the machine processes per loop turn.
enum Step {
    Intent(Intent),
    Capture(CaptureEvent),
    Upload(UploadOutcome),
    Playback(PlaybackEvent),
    IntentsClosed,
}

impl InteractionMachine {
    /// Create a new machine wired to the given device seams and chat
    /// client
    pub fn new(
        device: Arc<dyn MicrophoneDevice>,
        output: Arc<dyn AudioOutput>,
        uploader: ChatUploadClient,
        event_tx: broadcast::Sender<StateChanged>,
    ) -> Self {
        let (capture_tx, capture_rx) = mpsc::channel(8);
        let (upload_tx, upload_rx) = mpsc::channel(4);
        let (playback_tx, playback_rx) = mpsc::channel(8);

        Self {
            state: InteractionState::Idle,
            error: None,
            state_entered_at: Instant::now(),
            capture_in_flight: false,
            capture: AudioCaptureSession::new(device, capture_tx),
            capture_rx,
            uploader,
            upload_tx,
            upload_rx,
            playback: PlaybackController::new(output, playback_tx),
            playback_rx,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> InteractionState {
        self.state
    }

    /// Get the currently displayed error message
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Run the machine, processing intents and cycle completions one at
    /// a time until the intent channel closes
    pub async fn run(&mut self, mut intents: mpsc::Receiver<Intent>) {
        info!("interaction machine started in Idle state");

        loop {
            let step = tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => Step::Intent(intent),
                    None => Step::IntentsClosed,
                },
                Some(event) = self.capture_rx.recv() => Step::Capture(event),
                Some(outcome) = self.upload_rx.recv() => Step::Upload(outcome),
                Some(event) = self.playback_rx.recv() => Step::Playback(event),
            };

            match step {
                Step::Intent(intent) => self.handle_intent(intent),
                Step::Capture(event) => self.handle_capture_event(event),
                Step::Upload(outcome) => self.handle_upload_outcome(outcome),
                Step::Playback(event) => self.handle_playback_event(event),
                Step::IntentsClosed => break,
            }
        }

        info!("interaction machine stopped");
    }

    /// Handle a UI-origin intent
    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::MicButton => self.on_mic_button(),
            Intent::Cancel => self.on_cancel(),
            Intent::DismissError => self.on_dismiss_error(),
        }
    }

    fn on_mic_button(&mut self) {
        match self.state {
            InteractionState::Idle => {
                if self.capture_in_flight {
                    debug!("mic press ignored, capture cycle already in flight");
                    return;
                }
                debug!("requesting microphone");
                self.capture_in_flight = true;
                self.capture.begin();
            }
            InteractionState::Recording => {
                if self.capture.is_active() {
                    debug!("finalizing recording");
                    self.capture.end();
                } else {
                    debug!("mic press ignored, recording already finalizing");
                }
            }
            state => debug!(%state, "mic press ignored"),
        }
    }

    fn on_cancel(&mut self) {
        if self.state == InteractionState::Speaking {
            self.playback.stop();
            self.transition_to(InteractionState::Idle);
        } else {
            debug!(state = %self.state, "cancel ignored");
        }
    }

    fn on_dismiss_error(&mut self) {
        if self.state == InteractionState::Error {
            self.error = None;
            self.transition_to(InteractionState::Idle);
        } else {
            debug!(state = %self.state, "error dismissal ignored");
        }
    }

    /// Handle a capture-cycle completion
    fn handle_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::RecorderActive => {
                if self.state == InteractionState::Idle && self.capture_in_flight {
                    self.transition_to(InteractionState::Recording);
                } else {
                    warn!(state = %self.state, "recorder became active outside a capture cycle");
                }
            }
            CaptureEvent::Captured(blob) => {
                self.capture_in_flight = false;
                self.capture.settle();
                if blob.is_empty() {
                    debug!("empty utterance, nothing to send");
                    self.transition_to(InteractionState::Idle);
                } else {
                    self.start_upload(blob);
                    self.transition_to(InteractionState::Uploading);
                }
            }
            CaptureEvent::Failed(e) => {
                self.capture_in_flight = false;
                self.capture.settle();
                self.raise_error(e.to_string());
            }
        }
    }

    /// Send the blob to the chat service on a spawned task; the outcome
    /// comes back through the upload channel
    fn start_upload(&self, blob: UtteranceBlob) {
        let uploader = self.uploader.clone();
        let outcome_tx = self.upload_tx.clone();
        tokio::spawn(async move {
            let outcome = uploader.send(blob).await;
            let _ = outcome_tx.send(outcome).await;
        });
    }

    /// Handle the resolution of the in-flight upload
    fn handle_upload_outcome(&mut self, outcome: UploadOutcome) {
        if self.state != InteractionState::Uploading {
            warn!(state = %self.state, "upload resolved outside Uploading");
            return;
        }
        match outcome {
            Ok(response) => match self.playback.play(&response.audio_response_file) {
                Ok(()) => self.transition_to(InteractionState::Speaking),
                Err(e) => self.raise_error(e.to_string()),
            },
            Err(e) => self.raise_error(e.to_string()),
        }
    }

    /// Handle a playback lifecycle notification
    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        if !self.playback.is_live(event.generation) {
            debug!(generation = event.generation, "stale playback event dropped");
            return;
        }
        match event.kind {
            PlaybackEventKind::Started => {
                if self.state == InteractionState::Speaking {
                    debug!("reply playback started");
                } else {
                    // cancelled before the reply started; silence the
                    // late start
                    self.playback.stop();
                }
            }
            PlaybackEventKind::Stopped => {
                if self.state == InteractionState::Speaking {
                    self.transition_to(InteractionState::Idle);
                }
            }
            PlaybackEventKind::Failed(e) => {
                if self.state == InteractionState::Speaking {
                    self.raise_error(e.to_string());
                }
            }
        }
    }

    /// Enter `Error` with `message`. Last-write-wins: a newer failure
    /// replaces whatever is currently displayed.
    fn raise_error(&mut self, message: String) {
        self.error = Some(message);
        self.transition_to(InteractionState::Error);
    }

    /// Perform a state transition and broadcast it
    fn transition_to(&mut self, new_state: InteractionState) {
        let old_state = self.state;
        let elapsed_ms = self.state_entered_at.elapsed().as_millis() as u64;

        self.state = new_state;
        self.state_entered_at = Instant::now();

        info!(
            from = %old_state,
            to = %new_state,
            elapsed_ms = elapsed_ms,
            "state transition"
        );

        let _ = self.event_tx.send(StateChanged {
            from: old_state,
            to: new_state,
            elapsed_ms,
            message: self.error.clone(),
        });
    }
}
