//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::StateChanged;
use crate::state::InteractionState;

/// UI-facing projection of the interaction state, named the way the
/// interface presents it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Waiting for the user
    Idle,
    /// The microphone is live
    Listening,
    /// The utterance is with the chat service
    Thinking,
    /// The reply is playing
    Speaking,
    /// A failure message is on display
    Error,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to state change notifications; the connection becomes
    /// push-only afterwards
    Subscribe,

    /// The user pressed the microphone control
    MicButton,

    /// The user pressed the cancel control
    Cancel,

    /// The user dismissed the error dialog
    DismissError,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Intent accepted and forwarded to the state machine
    Accepted,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// The interaction moved to a new phase
    StateChanged {
        phase: Phase,
        previous: Phase,
        /// Failure message to display while `phase` is `Error`
        message: Option<String>,
    },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current phase
    pub phase: Phase,

    /// Failure message currently on display, if any
    pub message: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            phase: Phase::default(),
            message: None,
            uptime_secs: 0,
        }
    }
}

/// Convert internal InteractionState to the UI-facing Phase
impl From<InteractionState> for Phase {
    fn from(state: InteractionState) -> Self {
        match state {
            InteractionState::Idle => Phase::Idle,
            InteractionState::Recording => Phase::Listening,
            InteractionState::Uploading => Phase::Thinking,
            InteractionState::Speaking => Phase::Speaking,
            InteractionState::Error => Phase::Error,
        }
    }
}

impl From<StateChanged> for Notification {
    fn from(change: StateChanged) -> Self {
        Notification::StateChanged {
            phase: change.to.into(),
            previous: change.from.into(),
            message: change.message,
        }
    }
}
