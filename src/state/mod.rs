//! Interaction state machine.
//!
//! Provides an explicit state machine with five mutually exclusive
//! states:
//! - Idle: waiting for the user to press the microphone control
//! - Recording: an utterance is being captured
//! - Uploading: the utterance is in flight to the chat service
//! - Speaking: the synthesized reply is playing
//! - Error: a failure message is displayed until dismissed

mod machine;

pub use machine::{InteractionMachine, InteractionState, Intent};
