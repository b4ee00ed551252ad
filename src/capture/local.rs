//! Local microphone backend built on cpal.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated
//! worker thread and the async half talks to it over channels. Finalized
//! utterances are framed as 16-bit PCM WAV by hound; the empty recording
//! case yields a zero-length payload rather than a bare WAV header.

use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use super::{CaptureError, MicrophoneDevice, MicrophoneStream, UtteranceBlob};

const CONTENT_TYPE: &str = "audio/wav";

/// Microphone device backed by the host's default cpal input device.
pub struct LocalMicrophone;

impl LocalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MicrophoneDevice for LocalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn MicrophoneStream>, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (command_tx, command_rx) = std_mpsc::channel();

        std::thread::Builder::new()
            .name("microphone-capture".to_string())
            .spawn(move || capture_thread(ready_tx, command_rx))
            .map_err(|e| CaptureError::Device(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(LocalMicrophoneStream {
                commands: command_tx,
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Device(
                "capture thread exited before opening the device".to_string(),
            )),
        }
    }
}

struct LocalMicrophoneStream {
    commands: std_mpsc::Sender<Command>,
}

#[async_trait]
impl MicrophoneStream for LocalMicrophoneStream {
    async fn start(&mut self) -> Result<(), CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Start(reply_tx))
            .map_err(|_| thread_gone())?;
        reply_rx.await.map_err(|_| thread_gone())?
    }

    async fn finalize(&mut self) -> Result<UtteranceBlob, CaptureError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Finalize(reply_tx))
            .map_err(|_| thread_gone())?;
        let bytes = reply_rx.await.map_err(|_| thread_gone())??;
        Ok(UtteranceBlob::new(bytes, CONTENT_TYPE))
    }

    fn stop_tracks(&mut self) {
        // The worker exits on Finalize or Stop; a send failure means the
        // device is already released.
        let _ = self.commands.send(Command::Stop);
    }
}

fn thread_gone() -> CaptureError {
    CaptureError::Device("capture thread is gone".to_string())
}

enum Command {
    Start(oneshot::Sender<Result<(), CaptureError>>),
    Finalize(oneshot::Sender<Result<Vec<u8>, CaptureError>>),
    Stop,
}

/// Owns the cpal stream for the lifetime of one recording cycle.
fn capture_thread(
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
    commands: std_mpsc::Receiver<Command>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(device) => device,
        None => {
            let _ = ready_tx.send(Err(CaptureError::NoDevice));
            return;
        }
    };

    let supported = match device.default_input_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
            return;
        }
    };
    let sample_rate = supported.sample_rate();
    let channels = supported.channels();

    let samples: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let callback_samples = Arc::clone(&samples);

    let stream = match device.build_input_stream(
        &supported.into(),
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Ok(mut buffer) = callback_samples.lock() {
                buffer.extend_from_slice(data);
            }
        },
        |err| {
            error!(%err, "input stream error");
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(cpal::BuildStreamError::DeviceNotAvailable) => {
            let _ = ready_tx.send(Err(CaptureError::NoDevice));
            return;
        }
        Err(e) => {
            let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
            return;
        }
    };

    info!(sample_rate, channels, "microphone stream open");
    let _ = ready_tx.send(Ok(()));

    let mut stream = Some(stream);
    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(reply) => {
                let result = match &stream {
                    Some(stream) => stream.play().map_err(|e| CaptureError::Device(e.to_string())),
                    None => Err(thread_gone()),
                };
                let _ = reply.send(result);
            }
            Command::Finalize(reply) => {
                drop(stream.take());
                let recorded = samples
                    .lock()
                    .map(|mut buffer| std::mem::take(&mut *buffer))
                    .unwrap_or_default();
                debug!(samples = recorded.len(), "finalizing recording");
                let _ = reply.send(encode_wav(&recorded, sample_rate, channels));
                return;
            }
            Command::Stop => {
                drop(stream.take());
                return;
            }
        }
    }
    // Command sender dropped without finalize: the stream drops here and
    // the device is released.
    debug!("capture thread released without finalize");
}

fn encode_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>, CaptureError> {
    if samples.is_empty() {
        // No speech captured: a zero-length payload, not an error.
        return Ok(Vec::new());
    }

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)
        .map_err(|e| CaptureError::Device(e.to_string()))?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(value)
            .map_err(|e| CaptureError::Device(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| CaptureError::Device(e.to_string()))?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_recording_encodes_to_zero_length_payload() {
        let bytes = encode_wav(&[], 44_100, 1).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn encoded_wav_carries_riff_header_and_samples() {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.0], 16_000, 1).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        // 16-bit mono: four samples past the 44-byte header
        assert_eq!(bytes.len(), 44 + 4 * 2);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let bytes = encode_wav(&[2.0], 16_000, 1).unwrap();
        let value = i16::from_le_bytes([bytes[44], bytes[45]]);
        assert_eq!(value, i16::MAX);
    }
}
