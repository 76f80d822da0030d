//! Transcription Session (C3): a live WebSocket to the speech service,
//! streaming μ-law audio in and surfacing finalized transcripts. Actor-like
//! — one task owns the socket read half, callers drive it through a
//! narrow set of operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::SpeechConfig;
use crate::error::{OrchestratorError, Result};

const WS_URL: &str = "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview";

/// Transcripts that are near-certainly speech-to-text noise rather than a
/// real utterance — filtered before a `waitForTranscript` call resolves.
const HALLUCINATIONS: &[&str] = &[
    "thank you",
    "thanks for watching",
    "thank you for watching",
    "subscribe",
    "like and subscribe",
    "bye",
    "bye bye",
    "you",
    "the end",
    "so",
    "...",
    "eh",
    "hmm",
];

fn is_hallucination(transcript: &str) -> bool {
    let lower = transcript.trim().to_lowercase();
    HALLUCINATIONS.iter().any(|h| lower == *h)
}

fn default_timeout_ms(silence_duration_ms: u64) -> u64 {
    10 * silence_duration_ms
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientEvent<'a> {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig<'a> },
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },
}

#[derive(Serialize)]
struct SessionConfig<'a> {
    input_audio_format: &'static str,
    turn_detection: TurnDetection,
    input_audio_transcription: InputAudioTranscription<'a>,
}

#[derive(Serialize)]
struct TurnDetection {
    #[serde(rename = "type")]
    detection_type: &'static str,
    threshold: f32,
    prefix_padding_ms: u64,
    silence_duration_ms: u64,
}

#[derive(Serialize)]
struct InputAudioTranscription<'a> {
    model: &'a str,
}

#[derive(Deserialize, Debug)]
struct ServerEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<ServerError>,
}

#[derive(Deserialize, Debug)]
struct ServerError {
    message: String,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

enum Resolution {
    Transcript(String),
    Failed(String),
    HungUp,
}

/// A single live transcription session, bound to one call.
pub struct TranscriptionSession {
    write: Mutex<futures_util::stream::SplitSink<WsStream, WsMessage>>,
    events: Mutex<mpsc::UnboundedReceiver<Resolution>>,
    waiting: AtomicBool,
    silence_duration_ms: u64,
}

impl TranscriptionSession {
    /// Open the WebSocket and configure server-side VAD turn detection.
    pub async fn connect(config: &SpeechConfig) -> Result<Self> {
        let mut request = WS_URL
            .into_client_request()
            .map_err(|e| OrchestratorError::NetworkError(e.to_string()))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|e| OrchestratorError::NetworkError(e.to_string()))?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| OrchestratorError::NetworkError(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        let session_update = ClientEvent::SessionUpdate {
            session: SessionConfig {
                input_audio_format: "g711_ulaw",
                turn_detection: TurnDetection {
                    detection_type: "server_vad",
                    threshold: 0.5,
                    prefix_padding_ms: 300,
                    silence_duration_ms: config.silence_duration_ms,
                },
                input_audio_transcription: InputAudioTranscription {
                    model: &config.transcription_model,
                },
            },
        };
        write
            .send(WsMessage::Text(
                serde_json::to_string(&session_update)
                    .expect("session update serializes")
                    .into(),
            ))
            .await
            .map_err(|e| OrchestratorError::NetworkError(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let Ok(event) = serde_json::from_str::<ServerEvent>(&text) else {
                            continue;
                        };
                        match event.event_type.as_str() {
                            "conversation.item.input_audio_transcription.completed" => {
                                let transcript = event.transcript.unwrap_or_default();
                                if tx.send(Resolution::Transcript(transcript)).is_err() {
                                    return;
                                }
                            }
                            "conversation.item.input_audio_transcription.failed" => {
                                let detail = event
                                    .error
                                    .map(|e| e.message)
                                    .unwrap_or_else(|| "transcription failed".to_string());
                                if tx.send(Resolution::Failed(detail)).is_err() {
                                    return;
                                }
                            }
                            "error" => {
                                let detail = event
                                    .error
                                    .map(|e| e.message)
                                    .unwrap_or_else(|| "unknown realtime error".to_string());
                                if tx.send(Resolution::Failed(detail)).is_err() {
                                    return;
                                }
                            }
                            // speech_started/stopped are observed implicitly via VAD
                            // timing but not surfaced to callers.
                            _ => {}
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => {
                        let _ = tx.send(Resolution::HungUp);
                        return;
                    }
                    _ => {}
                }
            }
            let _ = tx.send(Resolution::HungUp);
        });

        Ok(Self {
            write: Mutex::new(write),
            events: Mutex::new(rx),
            waiting: AtomicBool::new(false),
            silence_duration_ms: config.silence_duration_ms,
        })
    }

    /// Stream a chunk of μ-law audio into the session.
    pub async fn send_audio(&self, mulaw: &[u8]) -> Result<()> {
        let audio = base64::engine::general_purpose::STANDARD.encode(mulaw);
        let append = ClientEvent::AudioAppend { audio };
        let mut write = self.write.lock().await;
        write
            .send(WsMessage::Text(
                serde_json::to_string(&append).expect("audio append serializes").into(),
            ))
            .await
            .map_err(|e| OrchestratorError::NetworkError(e.to_string()))
    }

    /// Register a callback observing partial hypotheses. The reference
    /// protocol carries no partial-transcript event in server-VAD mode, so
    /// this is a no-op placeholder kept for interface parity with §4.3.
    pub fn on_partial(&self, _cb: impl Fn(&str) + Send + Sync + 'static) {}

    /// Wait for the next finalized, non-hallucination transcript, racing a
    /// deadline. Only one call may be outstanding at a time; a second call
    /// before the first resolves is a programming error.
    pub async fn wait_for_transcript(&self, timeout_ms: u64) -> Result<String> {
        if self
            .waiting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            panic!("wait_for_transcript called while a previous call is still outstanding");
        }
        let result = self.wait_for_transcript_inner(timeout_ms).await;
        self.waiting.store(false, Ordering::SeqCst);
        result
    }

    async fn wait_for_transcript_inner(&self, timeout_ms: u64) -> Result<String> {
        if timeout_ms == 0 {
            return Err(OrchestratorError::CallTimeout);
        }
        let deadline = Duration::from_millis(timeout_ms);
        let mut events = self.events.lock().await;

        loop {
            match timeout(deadline, events.recv()).await {
                Ok(Some(Resolution::Transcript(text))) => {
                    if is_hallucination(&text) {
                        continue;
                    }
                    return Ok(text);
                }
                Ok(Some(Resolution::Failed(detail))) => {
                    return Err(OrchestratorError::TranscriptionError(detail))
                }
                Ok(Some(Resolution::HungUp)) | Ok(None) => return Err(OrchestratorError::CallHungUp),
                Err(_) => return Err(OrchestratorError::CallTimeout),
            }
        }
    }

    /// The default wait deadline when the caller has no more specific one:
    /// `10 × silence_duration_ms`.
    pub fn default_timeout_ms(&self) -> u64 {
        default_timeout_ms(self.silence_duration_ms)
    }

    pub async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.send(WsMessage::Close(None)).await;
    }
}

/// Session handle shared between the orchestrator and the media pump.
pub type SharedTranscriptionSession = Arc<TranscriptionSession>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_known_hallucinations_case_insensitively() {
        assert!(is_hallucination("Thank you."));
        assert!(is_hallucination("  bye bye  "));
        assert!(!is_hallucination("I'm doing well, thanks for asking"));
    }

    #[test]
    fn default_timeout_is_ten_times_silence_duration() {
        assert_eq!(default_timeout_ms(800), 8000);
    }
}
