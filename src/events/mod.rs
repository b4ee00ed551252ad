//! State-change notifications broadcast by the interaction machine.
//!
//! Emitted after every transition; the IPC server and the status mirror
//! in `main` are the subscribers.

use serde::{Deserialize, Serialize};

use crate::state::InteractionState;

/// One transition of the interaction machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChanged {
    /// State being left.
    pub from: InteractionState,

    /// State being entered.
    pub to: InteractionState,

    /// Milliseconds spent in `from`.
    pub elapsed_ms: u64,

    /// Display message accompanying an `Error` state; `None` otherwise.
    pub message: Option<String>,
}

impl std::fmt::Display for StateChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(
                f,
                "{} -> {} after {}ms: {}",
                self.from, self.to, self.elapsed_ms, message
            ),
            None => write!(f, "{} -> {} after {}ms", self.from, self.to, self.elapsed_ms),
        }
    }
}
