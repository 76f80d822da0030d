//! Synthesizer (C4): one-shot text-to-speech against the speech service's
//! REST endpoint. No caching, no retry — a synthesis failure surfaces
//! immediately to the orchestrator.

use crate::config::SpeechConfig;
use crate::error::{OrchestratorError, Result};

const API_URL: &str = "https://api.openai.com/v1/audio/speech";

pub struct Synthesizer {
    client: reqwest::Client,
    api_key: String,
    voice: &'static str,
    model: String,
}

impl Synthesizer {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            voice: config.voice.as_str(),
            model: config.tts_model.clone(),
        }
    }

    /// `synthesize(text) -> pcm16@24kHz bytes`.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "pcm",
        });

        let resp = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrchestratorError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::SynthesisError(format!("{status}: {text}")));
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| OrchestratorError::SynthesisError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Voice;

    #[test]
    fn voice_is_threaded_from_config() {
        let config = SpeechConfig {
            api_key: "sk-test".into(),
            voice: Voice::Nova,
            tts_model: "tts-1".into(),
            transcription_model: "gpt-4o-transcribe".into(),
            silence_duration_ms: 800,
            transcript_timeout_ms: Some(180_000),
        };
        let synth = Synthesizer::new(&config);
        assert_eq!(synth.voice, "nova");
    }
}
