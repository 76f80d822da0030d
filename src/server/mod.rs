//! Webhook/Media Endpoint (C7): the HTTP surface. Three routes — health,
//! the carrier's `/twiml` webhook, and the `/media-stream` WebSocket the
//! carrier dials once it has a token. Everything here is a thin adapter
//! onto the orchestrator; no call state lives in this module.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::media::{self, InboundFrame, ControlEvent, MediaPump};
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/twiml", post(twiml))
        .route("/media-stream", get(media_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    let active_calls = state.orchestrator.registry().active_count().await;
    axum::Json(serde_json::json!({"status": "ok", "activeCalls": active_calls})).into_response()
}

/// `POST /twiml`: the carrier's call-status and streaming-lifecycle webhook.
/// On a strict-mode signature mismatch, respond `403` without touching any
/// call state; in permissive mode a bad signature is logged and accepted.
async fn twiml(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> Response {
    let strict = state.orchestrator.strict_signatures();
    let header_sig = signature_header(&headers);
    let full_url = full_url(&headers, "/twiml");

    let valid = state
        .orchestrator
        .carrier()
        .verify_signature(header_sig.as_deref(), &full_url, &body, strict);
    if strict && !valid {
        tracing::warn!("webhook signature rejected in strict mode");
        return StatusCode::FORBIDDEN.into_response();
    }
    if !valid {
        tracing::warn!("webhook signature could not be verified, accepting permissively");
    }

    match state.orchestrator.carrier().parse_event(&body) {
        Ok(event) => {
            if let Err(e) = state.orchestrator.handle_webhook_event(event).await {
                tracing::error!("error handling webhook event: {e}");
            }
        }
        Err(e) => {
            tracing::warn!("malformed webhook body, answering with empty response: {e}");
        }
    }

    let ws_url = state.orchestrator.active_media_ws_url().await.unwrap_or_default();
    let doc = state.orchestrator.carrier().stream_connect_response(&ws_url);
    ([("Content-Type", "application/xml")], doc).into_response()
}

fn signature_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-twilio-signature")
        .or_else(|| headers.get("telnyx-signature-ed25519"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn full_url(headers: &HeaderMap, path: &str) -> String {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("https://{host}{path}")
}

#[derive(Deserialize)]
struct MediaStreamQuery {
    #[serde(default)]
    token: String,
}

/// `GET /media-stream?token=<T>` with `Upgrade: websocket`. An empty token
/// is rejected before the upgrade; a non-empty token that doesn't match any
/// bound channel fails inside the handshake loop once `bind_media` runs.
async fn media_stream(
    Query(query): Query<MediaStreamQuery>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    if query.token.is_empty() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_media_stream(socket, state, query.token))
}

async fn handle_media_stream(socket: WebSocket, state: AppState, token: String) {
    let (write, mut read) = futures_util::StreamExt::split(socket);
    let pump = MediaPump::new(write);

    let call_id = match state.orchestrator.bind_media(&token, pump).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("media-stream bind failed: {e}");
            return;
        }
    };

    tracing::info!(call_id = %call_id, "media stream connected");

    loop {
        let msg = match futures_util::StreamExt::next(&mut read).await {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(_))) | None => {
                tracing::info!(call_id = %call_id, "media stream closed");
                state.orchestrator.note_channel_closed(&call_id).await;
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(call_id = %call_id, "media stream error: {e}");
                state.orchestrator.note_channel_closed(&call_id).await;
                break;
            }
            _ => continue,
        };

        match media::demux_inbound(&msg) {
            InboundFrame::Audio(mulaw) => {
                if let Err(e) = state.orchestrator.feed_inbound_audio(&call_id, &mulaw).await {
                    tracing::warn!(call_id = %call_id, "failed to feed inbound audio: {e}");
                }
            }
            InboundFrame::Control(ControlEvent::Start { stream_sid }) => {
                state.orchestrator.note_stream_sid(&call_id, stream_sid).await;
            }
            InboundFrame::Control(ControlEvent::Stop) => {
                state.orchestrator.note_channel_closed(&call_id).await;
                break;
            }
            InboundFrame::Control(ControlEvent::Connected | ControlEvent::Mark) => {}
            InboundFrame::Unrecognized => {
                tracing::debug!(call_id = %call_id, "unrecognized media-stream frame");
            }
        }
    }
}
