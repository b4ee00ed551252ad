//! Unix domain socket server for IPC
//!
//! Provides request-response communication for status queries and UI
//! intents, plus push notifications for state changes to subscribed
//! clients. A connection that subscribes becomes push-only; clients use
//! a separate connection for intents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::StateChanged;
use crate::state::{InteractionState, Intent};

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Forwards UI intents into the state machine
    intent_tx: mpsc::Sender<Intent>,
    /// Source of state-change notifications; each subscribing client
    /// gets its own receiver
    event_tx: broadcast::Sender<StateChanged>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        intent_tx: mpsc::Sender<Intent>,
        event_tx: broadcast::Sender<StateChanged>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            intent_tx,
            event_tx,
        })
    }

    /// Update the server's view of the interaction state
    pub async fn set_state(&self, state: InteractionState, message: Option<String>) {
        let mut server_state = self.state.write().await;
        let old_phase = server_state.status.phase;
        server_state.status.phase = state.into();
        server_state.status.message = message;

        if old_phase != server_state.status.phase {
            debug!(
                from = ?old_phase,
                to = ?server_state.status.phase,
                "IPC server: phase updated"
            );
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let intent_tx = self.intent_tx.clone();
                    let event_rx = self.event_tx.subscribe();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, intent_tx, event_rx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        intent_tx: mpsc::Sender<Intent>,
        event_rx: broadcast::Receiver<StateChanged>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > 1024 * 1024 {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            // Parse request
            let request: Request =
                serde_json::from_slice(&msg_buf).context("failed to parse request")?;

            debug!(?request, "received request");

            // Process request
            let (response, subscribe) = Self::process_request(request, &state, &intent_tx).await;

            // Send response
            Self::send_message(&mut stream, &response).await?;

            if subscribe {
                debug!("client subscribed to notifications");
                return Self::push_notifications(stream, event_rx).await;
            }
        }
    }

    /// Forward state changes to a subscribed client until it disconnects
    async fn push_notifications(
        mut stream: UnixStream,
        mut event_rx: broadcast::Receiver<StateChanged>,
    ) -> Result<()> {
        loop {
            match event_rx.recv().await {
                Ok(change) => {
                    let notification = Notification::from(change);
                    if Self::send_message(&mut stream, &notification).await.is_err() {
                        debug!("subscribed client disconnected");
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscribed client lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Ok(());
                }
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        intent_tx: &mpsc::Sender<Intent>,
    ) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::Subscribe => (Response::Subscribed, true),

            Request::MicButton => (Self::forward_intent(intent_tx, Intent::MicButton).await, false),

            Request::Cancel => (Self::forward_intent(intent_tx, Intent::Cancel).await, false),

            Request::DismissError => (
                Self::forward_intent(intent_tx, Intent::DismissError).await,
                false,
            ),
        }
    }

    async fn forward_intent(intent_tx: &mpsc::Sender<Intent>, intent: Intent) -> Response {
        match intent_tx.send(intent).await {
            Ok(()) => Response::Accepted,
            Err(_) => Response::Error {
                code: "machine_unavailable".to_string(),
                message: "the interaction machine is not running".to_string(),
            },
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_socket(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voicechat-{}-{}.sock", name, std::process::id()))
    }

    async fn send_request(stream: &mut UnixStream, request: &Request) -> Response {
        let bytes = serde_json::to_vec(request).unwrap();
        stream
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(&bytes).await.unwrap();

        read_message(stream).await
    }

    async fn read_message<T: serde::de::DeserializeOwned>(stream: &mut UnixStream) -> T {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_intents_round_trip() {
        let socket_path = scratch_socket("intents");
        let (intent_tx, mut intent_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);
        let server = Server::new(&socket_path, intent_tx, event_tx).unwrap();

        let run = tokio::spawn(async move { server.run().await });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        assert!(matches!(
            send_request(&mut client, &Request::Ping).await,
            Response::Pong
        ));
        assert!(matches!(
            send_request(&mut client, &Request::MicButton).await,
            Response::Accepted
        ));
        assert_eq!(intent_rx.recv().await, Some(Intent::MicButton));

        run.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    #[tokio::test]
    async fn test_subscribed_client_receives_state_changes() {
        let socket_path = scratch_socket("subscribe");
        let (intent_tx, _intent_rx) = mpsc::channel(8);
        let (event_tx, _) = broadcast::channel(8);
        let server = Server::new(&socket_path, intent_tx, event_tx.clone()).unwrap();

        let run = tokio::spawn(async move { server.run().await });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        assert!(matches!(
            send_request(&mut client, &Request::Subscribe).await,
            Response::Subscribed
        ));

        event_tx
            .send(StateChanged {
                from: InteractionState::Idle,
                to: InteractionState::Recording,
                elapsed_ms: 3,
                message: None,
            })
            .unwrap();

        let notification: Notification = read_message(&mut client).await;
        match notification {
            Notification::StateChanged {
                phase, previous, ..
            } => {
                assert_eq!(phase, super::super::protocol::Phase::Listening);
                assert_eq!(previous, super::super::protocol::Phase::Idle);
            }
        }

        run.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
}
