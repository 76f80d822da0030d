//! Media Pump (C5): the per-call bidirectional audio shuttle between the
//! carrier WebSocket and the transcription session. The carrier socket has
//! exactly one writer (this pump) and one reader (the webhook/media
//! endpoint, which hands each frame here for demultiplexing).

use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::audio;
use crate::error::{OrchestratorError, Result};

const FRAME_PACING: Duration = Duration::from_millis(18);
const FLUSH_TAIL: Duration = Duration::from_millis(200);

pub(crate) type CarrierSink = SplitSink<axum::extract::ws::WebSocket, Message>;

/// Outbound half: accepts a complete μ-law buffer from the orchestrator,
/// chunks and paces it onto the carrier WebSocket. Never buffers more
/// than one utterance at a time — the orchestrator's speak/listen mutual
/// exclusion guarantees that.
pub struct MediaPump {
    write: Mutex<CarrierSink>,
}

impl MediaPump {
    pub fn new(write: CarrierSink) -> Self {
        Self {
            write: Mutex::new(write),
        }
    }

    /// Split a μ-law buffer into 160-byte (20 ms) frames, write each as a
    /// media message, pacing 18 ms apart, then wait 200 ms for the carrier
    /// to flush before returning.
    pub async fn send_utterance(&self, mulaw: &[u8], stream_sid: Option<&str>) -> Result<()> {
        let mut write = self.write.lock().await;
        for chunk in mulaw.chunks(160) {
            let frame = audio::make_media_message(chunk, stream_sid);
            let text = String::from_utf8(frame).expect("media message is valid utf8");
            write
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| OrchestratorError::NetworkError(e.to_string()))?;
            tokio::time::sleep(FRAME_PACING).await;
        }
        tokio::time::sleep(FLUSH_TAIL).await;
        Ok(())
    }

    pub async fn close(&self) {
        let mut write = self.write.lock().await;
        let _ = write.send(Message::Close(None)).await;
    }
}

/// The result of demultiplexing one inbound carrier-WS text frame.
pub enum InboundFrame {
    /// Decoded inbound-track μ-law audio, destined for the transcription
    /// session.
    Audio(Vec<u8>),
    /// A carrier control message.
    Control(ControlEvent),
    /// Frame didn't parse as either — logged upstream, not fatal.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Connected,
    Start { stream_sid: String },
    Mark,
    Stop,
}

#[derive(Deserialize)]
struct ControlFrame {
    event: String,
    #[serde(rename = "streamSid", default)]
    stream_sid: Option<String>,
}

/// Demultiplex one inbound text frame from the carrier WebSocket:
/// extract inbound-track audio if present, otherwise interpret it as a
/// control message.
pub fn demux_inbound(raw: &[u8]) -> InboundFrame {
    if let Some(audio) = audio::extract_inbound_audio(raw) {
        return InboundFrame::Audio(audio);
    }

    let Ok(frame) = serde_json::from_slice::<ControlFrame>(raw) else {
        return InboundFrame::Unrecognized;
    };

    match frame.event.as_str() {
        "connected" => InboundFrame::Control(ControlEvent::Connected),
        "start" => InboundFrame::Control(ControlEvent::Start {
            stream_sid: frame.stream_sid.unwrap_or_default(),
        }),
        "mark" => InboundFrame::Control(ControlEvent::Mark),
        "stop" => InboundFrame::Control(ControlEvent::Stop),
        _ => InboundFrame::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_captures_stream_sid() {
        let raw = br#"{"event":"start","streamSid":"MZ123"}"#;
        match demux_inbound(raw) {
            InboundFrame::Control(ControlEvent::Start { stream_sid }) => {
                assert_eq!(stream_sid, "MZ123")
            }
            _ => panic!("expected Start control event"),
        }
    }

    #[test]
    fn stop_frame_is_recognized() {
        let raw = br#"{"event":"stop"}"#;
        assert!(matches!(
            demux_inbound(raw),
            InboundFrame::Control(ControlEvent::Stop)
        ));
    }

    #[test]
    fn inbound_media_frame_extracts_audio_over_control() {
        let payload = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8, 2, 3]);
        let raw = format!(r#"{{"event":"media","media":{{"track":"inbound","payload":"{payload}"}}}}"#);
        match demux_inbound(raw.as_bytes()) {
            InboundFrame::Audio(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            _ => panic!("expected Audio frame"),
        }
    }

    #[test]
    fn garbage_is_unrecognized_not_an_error() {
        assert!(matches!(demux_inbound(b"not json"), InboundFrame::Unrecognized));
    }
}
