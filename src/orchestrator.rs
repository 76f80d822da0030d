//! Call Orchestrator (C8): the per-call state machine and the four tool
//! operations. Coordinates the carrier driver, transcription session,
//! synthesizer, media pump and registry. There is at most one call in
//! flight; its runtime state lives in `runtime`, replaced wholesale by
//! each `initiate` and cleared by `end`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use rand::RngCore;
use tokio::sync::{Mutex, Notify, OnceCell};
use tokio::time::timeout;

use crate::audio;
use crate::carrier::{CarrierDriver, WebhookEvent};
use crate::config::{Config, PublicUrl};
use crate::error::{OrchestratorError, Result};
use crate::media::MediaPump;
use crate::registry::{CallRegistry, Speaker};
use crate::speech::{Synthesizer, TranscriptionSession};

/// Load the configured hold-music file as mu-law, logging success or
/// failure the way the teacher logs its own startup-time asset loads.
/// A missing or invalid file is not fatal: hold music is a nicety, not
/// a dependency of the state machine.
fn load_hold_music(config: &Config) -> Option<Arc<Vec<u8>>> {
    let hm = config.hold_music.as_ref()?;
    let path = std::path::Path::new(&hm.file);
    match audio::load_wav_as_mulaw(path, hm.volume) {
        Ok(data) => {
            tracing::info!(
                path = %hm.file,
                volume = hm.volume as f64,
                mulaw_bytes = data.len(),
                "loaded hold music"
            );
            Some(Arc::new(data))
        }
        Err(e) => {
            tracing::warn!(path = %hm.file, "failed to load hold music: {e}");
            None
        }
    }
}

const CONNECT_DEADLINE: Duration = Duration::from_secs(15);
const HANGUP_TAIL: Duration = Duration::from_secs(2);

/// Observability-only view of where a call is; the actual exclusion
/// guarantees come from `turn_lock` and the registry's `hungUp` flag, not
/// from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
    Creating,
    Dialing,
    Streaming,
    Idle,
    Speaking,
    Listening,
    Closing,
    Closed,
}

/// Runtime resources for the single active call. Constructed by
/// `initiate`, torn down by `end` or fatal failure.
struct CallRuntime {
    call_id: String,
    token: String,
    ws_url: String,
    transcription: TranscriptionSession,
    media: OnceCell<MediaPump>,
    channel_bound: AtomicBool,
    progress: Notify,
    hang_up: Notify,
    turn_lock: Mutex<()>,
    state: Mutex<CallState>,
    carrier_call_id: Mutex<Option<String>>,
}

impl CallRuntime {
    async fn set_state(&self, state: CallState) {
        let carrier_call_id = self.carrier_call_id.lock().await.clone();
        tracing::debug!(
            call_id = %self.call_id,
            carrier_call_id = carrier_call_id.as_deref().unwrap_or(""),
            state = ?state,
            "call state transition"
        );
        *self.state.lock().await = state;
    }
}

pub struct Orchestrator {
    config: Arc<Config>,
    public_url: PublicUrl,
    registry: CallRegistry,
    carrier: CarrierDriver,
    synthesizer: Synthesizer,
    hold_music: Option<Arc<Vec<u8>>>,
    runtime: Mutex<Option<Arc<CallRuntime>>>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, registry: CallRegistry) -> Self {
        let carrier = CarrierDriver::new(&config.carrier);
        let synthesizer = Synthesizer::new(&config.speech);
        let public_url = PublicUrl::new(config.server.public_url.clone());
        let hold_music = load_hold_music(&config);
        Self {
            config,
            public_url,
            registry,
            carrier,
            synthesizer,
            hold_music,
            runtime: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    /// Bind the public URL once, for deployments that provision a tunnel
    /// after startup rather than configuring it up front.
    pub fn set_public_url(&self, url: String) -> Result<()> {
        self.public_url.set(url)
    }

    /// `initiate(msg)`: dial out, wait for the media channel to come up,
    /// speak `msg`, then listen for a reply.
    pub async fn initiate(&self, message: &str) -> Result<(String, String)> {
        {
            let mut slot = self.runtime.lock().await;
            if slot.is_some() {
                return Err(OrchestratorError::ProviderError(
                    "one active call at a time".into(),
                ));
            }
            // Reserve the slot before any await so a concurrent initiate
            // cannot race past this check.
            let record = self.registry.create(self.config.server.user_number.clone()).await;
            tracing::info!(call_id = %record.call_id, "initiate: call record created");

            let token = mint_token();
            self.registry.bind_channel(token.clone(), &record.call_id).await;

            let base = self.public_url.require()?.to_string();
            let ws_url = format!("{}/media-stream?token={token}", to_ws_scheme(&base));

            let transcription = TranscriptionSession::connect(&self.config.speech).await?;

            let runtime = Arc::new(CallRuntime {
                call_id: record.call_id.clone(),
                token,
                ws_url,
                transcription,
                media: OnceCell::new(),
                channel_bound: AtomicBool::new(false),
                progress: Notify::new(),
                hang_up: Notify::new(),
                turn_lock: Mutex::new(()),
                state: Mutex::new(CallState::Creating),
                carrier_call_id: Mutex::new(None),
            });
            *slot = Some(runtime);
        }

        let result = self.initiate_inner(message).await;
        if result.is_err() {
            // Fatal failure during initiate: remove the half-built call.
            if let Some(runtime) = self.runtime.lock().await.take() {
                self.registry.remove(&runtime.call_id).await;
            }
        }
        result
    }

    async fn initiate_inner(&self, message: &str) -> Result<(String, String)> {
        let runtime = self.current_runtime().await?;
        runtime.set_state(CallState::Dialing).await;

        let webhook_url = format!("{}/twiml", self.public_url.require()?);
        let carrier_call_id = self
            .carrier
            .initiate(
                &self.config.server.user_number,
                &self.config.carrier.caller_id,
                &webhook_url,
            )
            .await?;
        tracing::info!(
            call_id = %runtime.call_id,
            carrier_call_id = %carrier_call_id,
            "carrier accepted outbound call"
        );
        *runtime.carrier_call_id.lock().await = Some(carrier_call_id.clone());
        self.registry
            .set_carrier_call_id(&runtime.call_id, carrier_call_id)
            .await;

        self.wait_for_streaming(&runtime).await?;
        runtime.set_state(CallState::Idle).await;

        self.speak_internal(&runtime, message).await?;
        let transcript = self.listen_internal(&runtime).await?;
        Ok((runtime.call_id.clone(), transcript))
    }

    /// Await until the media channel is bound and either `streamSid` is
    /// set or `streamingReady` is true, or fail with `CallTimeout`. Once
    /// the media channel is bound, plays hold music on loop (if
    /// configured) until the wait resolves one way or the other.
    async fn wait_for_streaming(&self, runtime: &Arc<CallRuntime>) -> Result<()> {
        let deadline = Instant::now() + CONNECT_DEADLINE;
        let stop_hold_music = Arc::new(AtomicBool::new(false));
        let mut hold_music_task: Option<tokio::task::JoinHandle<()>> = None;

        let outcome = loop {
            let record = self.registry.get(&runtime.call_id).await;
            let ready = runtime.channel_bound.load(Ordering::SeqCst)
                && record
                    .as_ref()
                    .map(|r| r.stream_sid.is_some() || r.streaming_ready)
                    .unwrap_or(false);
            if ready {
                runtime.set_state(CallState::Streaming).await;
                break Ok(());
            }

            if runtime.channel_bound.load(Ordering::SeqCst) && hold_music_task.is_none() {
                if let Some(hold_music) = self.hold_music.clone() {
                    tracing::debug!(call_id = %runtime.call_id, "playing hold music while streaming connects");
                    let stop = Arc::clone(&stop_hold_music);
                    let task_runtime = Arc::clone(runtime);
                    hold_music_task = Some(tokio::spawn(async move {
                        while !stop.load(Ordering::SeqCst) {
                            let Some(media) = task_runtime.media.get() else {
                                break;
                            };
                            if media.send_utterance(&hold_music, None).await.is_err() {
                                break;
                            }
                        }
                    }));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Err(OrchestratorError::CallTimeout);
            }
            let _ = timeout(remaining, runtime.progress.notified()).await;
        };

        stop_hold_music.store(true, Ordering::SeqCst);
        if let Some(task) = hold_music_task {
            let _ = task.await;
        }
        outcome
    }

    /// `continue(id, msg)`: requires `Idle` and `hungUp=false`.
    pub async fn continue_call(&self, call_id: &str, message: &str) -> Result<String> {
        let runtime = self.current_runtime().await?;
        self.ensure_same_call(&runtime, call_id)?;
        self.ensure_not_hung_up(call_id).await?;

        self.speak_internal(&runtime, message).await?;
        self.listen_internal(&runtime).await
    }

    /// `speak(id, msg)`: `Idle -> Speaking -> Idle`. No transcript consumed.
    pub async fn speak(&self, call_id: &str, message: &str) -> Result<()> {
        let runtime = self.current_runtime().await?;
        self.ensure_same_call(&runtime, call_id)?;
        self.ensure_not_hung_up(call_id).await?;
        self.speak_internal(&runtime, message).await
    }

    async fn speak_internal(&self, runtime: &CallRuntime, message: &str) -> Result<()> {
        let _turn = runtime.turn_lock.lock().await;
        runtime.set_state(CallState::Speaking).await;

        let pcm24 = self.synthesizer.synthesize(message).await?;
        let pcm8 = audio::resample_24k_to_8k(&pcm24);
        let mulaw = audio::pcm16_to_mulaw(&pcm8);

        let media = self.wait_for_media(runtime).await?;
        let record = self.registry.get(&runtime.call_id).await;
        let stream_sid = record.as_ref().and_then(|r| r.stream_sid.as_deref());
        media.send_utterance(&mulaw, stream_sid).await?;

        self.registry
            .append_transcript(&runtime.call_id, Speaker::Agent, message.to_string())
            .await;
        runtime.set_state(CallState::Idle).await;
        Ok(())
    }

    async fn listen_internal(&self, runtime: &CallRuntime) -> Result<String> {
        let _turn = runtime.turn_lock.lock().await;
        runtime.set_state(CallState::Listening).await;

        let timeout_ms = self
            .config
            .speech
            .transcript_timeout_ms
            .unwrap_or_else(|| runtime.transcription.default_timeout_ms());
        let outcome = tokio::select! {
            result = runtime.transcription.wait_for_transcript(timeout_ms) => result,
            _ = runtime.hang_up.notified() => Err(OrchestratorError::CallHungUp),
        };

        runtime.set_state(CallState::Idle).await;

        match &outcome {
            Ok(text) => {
                self.registry
                    .append_transcript(&runtime.call_id, Speaker::User, text.clone())
                    .await;
            }
            Err(OrchestratorError::CallHungUp) => {
                self.registry.mark_hung_up(&runtime.call_id).await;
            }
            Err(_) => {}
        }
        outcome
    }

    /// `end(id, msg)`: speak the closing line, wait for tail audio, hang
    /// up, tear down the session, and return elapsed seconds.
    pub async fn end(&self, call_id: &str, message: &str) -> Result<u64> {
        let runtime = self.current_runtime().await?;
        self.ensure_same_call(&runtime, call_id)?;

        runtime.set_state(CallState::Closing).await;
        if !message.is_empty() {
            let _ = self.speak_internal(&runtime, message).await;
        }
        tokio::time::sleep(HANGUP_TAIL).await;

        let record = self.registry.get(call_id).await;
        if let Some(carrier_call_id) = record.as_ref().and_then(|r| r.carrier_call_id.clone()) {
            tracing::info!(call_id = %call_id, carrier_call_id = %carrier_call_id, "hanging up");
            let _ = self.carrier.hangup(&carrier_call_id).await;
        }
        runtime.transcription.close().await;
        if let Some(media) = runtime.media.get() {
            media.close().await;
        }
        runtime.set_state(CallState::Closed).await;

        self.registry.remove(call_id).await;
        *self.runtime.lock().await = None;

        let elapsed = record
            .map(|r| r.start_time.elapsed().as_secs())
            .unwrap_or(0);
        tracing::info!(call_id = %call_id, elapsed_secs = elapsed, "call ended");
        Ok(elapsed)
    }

    /// Bind the media pump once the carrier's WebSocket connects with a
    /// valid token. Called by the webhook/media endpoint.
    pub async fn bind_media(&self, token: &str, media: MediaPump) -> Result<String> {
        let record = self
            .registry
            .get_by_channel(token)
            .await
            .ok_or(OrchestratorError::AuthenticationFailed)?;
        let runtime = self.current_runtime().await?;
        if runtime.call_id != record.call_id {
            return Err(OrchestratorError::AuthenticationFailed);
        }
        runtime
            .media
            .set(media)
            .map_err(|_| OrchestratorError::ProviderError("media already bound".into()))?;
        runtime.channel_bound.store(true, Ordering::SeqCst);
        tracing::info!(call_id = %runtime.call_id, "media channel bound");
        runtime.progress.notify_waiters();
        Ok(runtime.call_id.clone())
    }

    /// Forward decoded inbound audio from the media endpoint into the
    /// transcription session for the current call.
    pub async fn feed_inbound_audio(&self, call_id: &str, mulaw: &[u8]) -> Result<()> {
        let runtime = self.current_runtime().await?;
        self.ensure_same_call(&runtime, call_id)?;
        runtime.transcription.send_audio(mulaw).await
    }

    pub async fn note_stream_sid(&self, call_id: &str, stream_sid: String) {
        tracing::debug!(call_id = %call_id, stream_sid = %stream_sid, "stream sid assigned");
        self.registry.set_stream_sid(call_id, stream_sid).await;
        if let Ok(runtime) = self.current_runtime().await {
            runtime.progress.notify_waiters();
        }
    }

    /// The carrier WS closed, or a `stop` control frame arrived. Fails any
    /// pending `listen` with `CallHungUp`.
    pub async fn note_channel_closed(&self, call_id: &str) {
        tracing::info!(call_id = %call_id, "media channel closed, marking call hung up");
        self.registry.mark_hung_up(call_id).await;
        if let Ok(runtime) = self.current_runtime().await {
            if runtime.call_id == call_id {
                runtime.hang_up.notify_waiters();
            }
        }
    }

    /// Handle a parsed webhook event.
    pub async fn handle_webhook_event(&self, event: WebhookEvent) -> Result<()> {
        tracing::debug!(event = ?event, "webhook event received");
        match event {
            WebhookEvent::CallAnswered { carrier_call_id } => {
                tracing::info!(carrier_call_id = %carrier_call_id, "call answered");
            }
            WebhookEvent::CallHungUp { carrier_call_id }
            | WebhookEvent::CallBusy { carrier_call_id }
            | WebhookEvent::CallNoAnswer { carrier_call_id }
            | WebhookEvent::CallFailed { carrier_call_id } => {
                if let Some(record) = self.registry.get_by_carrier_id(&carrier_call_id).await {
                    tracing::info!(
                        call_id = %record.call_id,
                        carrier_call_id = %carrier_call_id,
                        "carrier reported call end"
                    );
                    self.note_channel_closed(&record.call_id).await;
                }
            }
            WebhookEvent::StreamingStarted { carrier_call_id } => {
                if let Some(record) = self.registry.get_by_carrier_id(&carrier_call_id).await {
                    self.registry.set_streaming_ready(&record.call_id).await;
                    if let Ok(runtime) = self.current_runtime().await {
                        if runtime.call_id == record.call_id {
                            tracing::info!(
                                call_id = %record.call_id,
                                carrier_call_id = %carrier_call_id,
                                "starting media stream"
                            );
                            self.carrier
                                .start_streaming(&carrier_call_id, &runtime.ws_url)
                                .await?;
                            runtime.progress.notify_waiters();
                        }
                    }
                }
            }
            WebhookEvent::StreamingStopped { .. }
            | WebhookEvent::CallInitiated { .. }
            | WebhookEvent::Unknown(_) => {}
        }
        Ok(())
    }

    pub fn carrier(&self) -> &CarrierDriver {
        &self.carrier
    }

    pub fn strict_signatures(&self) -> bool {
        self.config.server.strict_signatures
    }

    pub async fn active_media_ws_url(&self) -> Option<String> {
        self.runtime.lock().await.as_ref().map(|r| r.ws_url.clone())
    }

    async fn current_runtime(&self) -> Result<Arc<CallRuntime>> {
        self.runtime
            .lock()
            .await
            .clone()
            .ok_or_else(|| OrchestratorError::CallNotFound("no active call".into()))
    }

    fn ensure_same_call(&self, runtime: &CallRuntime, call_id: &str) -> Result<()> {
        if runtime.call_id == call_id {
            Ok(())
        } else {
            Err(OrchestratorError::CallNotFound(call_id.to_string()))
        }
    }

    async fn ensure_not_hung_up(&self, call_id: &str) -> Result<()> {
        match self.registry.get(call_id).await {
            Some(record) if record.hung_up => Err(OrchestratorError::CallHungUp),
            Some(_) => Ok(()),
            None => Err(OrchestratorError::CallNotFound(call_id.to_string())),
        }
    }

    async fn wait_for_media<'a>(&self, runtime: &'a CallRuntime) -> Result<&'a MediaPump> {
        let deadline = Instant::now() + CONNECT_DEADLINE;
        loop {
            if let Some(media) = runtime.media.get() {
                return Ok(media);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OrchestratorError::CallTimeout);
            }
            let _ = timeout(remaining, runtime.progress.notified()).await;
        }
    }
}

fn mint_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn to_ws_scheme(url: &str) -> String {
    url.replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_token_produces_nonempty_distinct_tokens() {
        let a = mint_token();
        let b = mint_token();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn to_ws_scheme_rewrites_both_http_schemes() {
        assert_eq!(to_ws_scheme("https://example.ngrok.io"), "wss://example.ngrok.io");
        assert_eq!(to_ws_scheme("http://localhost:3333"), "ws://localhost:3333");
    }
}
