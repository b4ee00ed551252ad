//! HTTP client that uploads one recorded utterance and parses the reply.

use reqwest::multipart;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::capture::UtteranceBlob;

/// Multipart form field carrying the recorded audio.
const AUDIO_FIELD: &str = "promptAudio";

/// Successful reply from the chat service: a reference to the
/// synthesized audio resource. Extra fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub audio_response_file: String,
}

/// Failure body the service sends on non-success statuses.
#[derive(Debug, Deserialize)]
struct FailureBody {
    message: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Failure message supplied by the service, surfaced verbatim.
    #[error("{0}")]
    Server(String),

    /// The service answered 200 but the body was not a usable reply.
    #[error("malformed response from chat service: {0}")]
    MalformedResponse(String),

    /// The request never produced a usable HTTP outcome.
    #[error("network failure: {0}")]
    Transport(String),
}

/// Uploads utterances to the chat endpoint. Cheap to clone; the
/// orchestrator clones one per upload task.
#[derive(Debug, Clone)]
pub struct ChatUploadClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChatUploadClient {
    /// Build a client for `endpoint`. No request timeout is configured;
    /// an upload runs until the transport itself resolves.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// POST `blob` as multipart form content and parse the reply.
    /// Exactly one upload is in flight per recording cycle; the
    /// orchestrator enforces that.
    pub async fn send(&self, blob: UtteranceBlob) -> Result<ChatResponse, UploadError> {
        let content_type = blob.content_type().to_string();
        debug!(bytes = blob.len(), %content_type, "uploading utterance");

        let part = multipart::Part::bytes(blob.into_bytes())
            .file_name("utterance")
            .mime_str(&content_type)
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let form = multipart::Form::new().part(AUDIO_FIELD, part);

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        if status == StatusCode::OK {
            serde_json::from_slice::<ChatResponse>(&body)
                .map_err(|e| UploadError::MalformedResponse(e.to_string()))
        } else {
            match serde_json::from_slice::<FailureBody>(&body) {
                Ok(FailureBody {
                    message: Some(message),
                }) if !message.is_empty() => Err(UploadError::Server(message)),
                _ => Err(UploadError::Transport(format!(
                    "chat service returned {status}"
                ))),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Canned single-request HTTP responder for upload-path tests.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Serve exactly one HTTP exchange: read the full request, reply with
    /// `status_line` and `body`, and hand the raw request back through
    /// the returned receiver. Returns the endpoint URL to post to.
    pub(crate) async fn canned_chat_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, oneshot::Receiver<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;

            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            let _ = request_tx.send(request);
        });

        (format!("http://{addr}/api/v1/chat/audio"), request_rx)
    }

    /// Read headers plus a Content-Length-delimited body.
    async fn read_request(stream: &mut tokio::net::TcpStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a full request");
            request.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find_header_end(&request) {
                break pos;
            }
        };

        let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);

        while request.len() < header_end + 4 + content_length {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed mid-body");
            request.extend_from_slice(&chunk[..n]);
        }
        request
    }

    fn find_header_end(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|w| w == b"\r\n\r\n")
    }
}
