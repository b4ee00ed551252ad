//! voicechat-daemon: client-side controller for a voice chat service
//!
//! The daemon provides:
//! - An explicit state machine for the record -> upload -> playback cycle
//! - Microphone capture and reply playback through local audio backends
//! - An IPC server the UI connects to for intents and state notifications
//!
//! The UI surface is an external subscriber: it forwards the microphone,
//! cancel, and error-dismiss intents over IPC and renders whatever phase
//! the daemon broadcasts.

mod capture;
mod chat;
mod config;
mod events;
mod ipc;
mod lifecycle;
mod playback;
mod state;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::MicrophoneDevice;
use crate::chat::ChatUploadClient;
use crate::config::Config;
use crate::events::StateChanged;
use crate::ipc::Server;
use crate::playback::AudioOutput;
use crate::state::InteractionMachine;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voicechat-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        endpoint = %config.chat_endpoint,
        "configuration loaded"
    );

    // Create channels for inter-component communication
    // IPC server -> state machine
    let (intent_tx, intent_rx) = mpsc::channel(32);
    // State machine -> IPC server and status mirror
    let (event_tx, _event_rx) = broadcast::channel::<StateChanged>(64);

    // Wire the machine to the local audio backends and the chat service
    let (device, output) = audio_backends()?;
    let uploader = ChatUploadClient::new(&config.chat_endpoint);
    let mut machine = InteractionMachine::new(device, output, uploader, event_tx.clone());

    // Create IPC server; it forwards intents and pushes state changes
    let server = Server::new(&config.socket_path, intent_tx, event_tx.clone())?;

    // Mirror state changes into the IPC status snapshot
    let mut mirror_rx = event_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the state machine (processes intents and cycle completions)
        _ = machine.run(intent_rx) => {
            info!("interaction machine exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the status snapshot in step with the machine
        _ = async {
            loop {
                match mirror_rx.recv().await {
                    Ok(change) => {
                        server_for_events
                            .set_state(change.to, change.message.clone())
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state mirror lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state mirror exited");
        }

        // Wait for shutdown signal
        _ = lifecycle::shutdown_signal() => {}
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("voicechat-daemon stopped");

    Ok(())
}

#[cfg(feature = "audio-io")]
fn audio_backends() -> Result<(Arc<dyn MicrophoneDevice>, Arc<dyn AudioOutput>)> {
    Ok((
        Arc::new(capture::LocalMicrophone::new()),
        Arc::new(playback::LocalSpeaker::new()),
    ))
}

#[cfg(not(feature = "audio-io"))]
fn audio_backends() -> Result<(Arc<dyn MicrophoneDevice>, Arc<dyn AudioOutput>)> {
    anyhow::bail!("built without the audio-io feature: no microphone or speaker backend available")
}
