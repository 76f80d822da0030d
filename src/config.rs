//! Process configuration: loaded once at startup from a TOML file with
//! environment-variable overrides for secrets, using an `.env`-alongside-
//! `config.toml` split. The public URL is late-bound —
//! it may be supplied up front in config, or filled in once after startup
//! by a tunnel-provisioning collaborator — then frozen.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarrierVariant {
    /// REST+JSON carrier, streaming started by explicit API call.
    Telnyx,
    /// REST+form-encoded carrier, streaming started via a TwiML-style document.
    Twilio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Alloy,
    Echo,
    Fable,
    #[default]
    Onyx,
    Nova,
    Shimmer,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Fable => "fable",
            Voice::Onyx => "onyx",
            Voice::Nova => "nova",
            Voice::Shimmer => "shimmer",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarrierConfig {
    pub variant: CarrierVariant,
    /// Telnyx: API key (bearer auth). Twilio: Account SID.
    pub account_id: String,
    /// Telnyx: webhook ed25519 public key (base64). Twilio: Auth Token, also the HMAC secret.
    pub secret: String,
    /// Telnyx call control connection id. Unused by the Twilio variant.
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Outbound caller-id number, E.164.
    pub caller_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    pub api_key: String,
    #[serde(default)]
    pub voice: Voice,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u64,
    /// Hard deadline for `waitForTranscript`. Absent means fall back to
    /// `10 × silence_duration_ms`, the default the transcription session
    /// itself computes.
    #[serde(default)]
    pub transcript_timeout_ms: Option<u64>,
}

fn default_tts_model() -> String {
    "tts-1".to_string()
}

fn default_transcription_model() -> String {
    "gpt-4o-transcribe".to_string()
}

fn default_silence_duration_ms() -> u64 {
    800
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// The human being called, E.164. One call runs per process, so this
    /// is fixed for the process lifetime rather than per-request.
    pub user_number: String,
    /// Public base URL used in webhooks and WS URLs. May be absent at
    /// startup and set exactly once later; see `PublicUrl`.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Auth token for a tunnel collaborator (e.g. ngrok). Not interpreted
    /// by the core; carried through for the tunnel provisioner.
    #[serde(default)]
    pub tunnel_auth_token: Option<String>,
    /// Strict webhook signature verification. Default permissive: tunnels
    /// commonly rewrite headers, so production deployments opt in.
    #[serde(default)]
    pub strict_signatures: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3333
}

/// Optional hold music played while `initiate` is waiting for the media
/// channel to come up. File path plus a volume multiplier applied at
/// load time.
#[derive(Debug, Clone, Deserialize)]
pub struct HoldMusicConfig {
    pub file: String,
    #[serde(default = "default_hold_music_volume")]
    pub volume: f32,
}

fn default_hold_music_volume() -> f32 {
    0.3
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub carrier: CarrierConfig,
    pub speech: SpeechConfig,
    #[serde(default)]
    pub hold_music: Option<HoldMusicConfig>,
}

impl Config {
    pub fn load() -> Result<Self, OrchestratorError> {
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            OrchestratorError::MissingConfiguration(format!(
                "failed to read config at {}: {e}. Copy config.example.toml to {}",
                path.display(),
                path.display()
            ))
        })?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| OrchestratorError::MissingConfiguration(format!("invalid config: {e}")))?;

        if let Ok(v) = std::env::var("CARRIER_ACCOUNT_ID") {
            config.carrier.account_id = v;
        }
        if let Ok(v) = std::env::var("CARRIER_SECRET") {
            config.carrier.secret = v;
        }
        if let Ok(v) = std::env::var("SPEECH_API_KEY") {
            config.speech.api_key = v;
        }
        if let Ok(v) = std::env::var("TUNNEL_AUTH_TOKEN") {
            config.server.tunnel_auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("SERVER_PUBLIC_URL") {
            config.server.public_url = Some(v);
        }

        Ok(config)
    }
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("CALL_ORCHESTRATOR_CONFIG") {
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".call-orchestrator")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("CALL_ORCHESTRATOR_CONFIG") {
        return PathBuf::from(p);
    }
    config_dir().join("config.toml")
}

/// The public base URL, late-bound: set once from config at startup, or
/// left empty for a tunnel collaborator to fill in exactly once before
/// the first call is placed. Frozen thereafter.
#[derive(Debug, Default)]
pub struct PublicUrl(OnceLock<String>);

impl PublicUrl {
    pub fn new(initial: Option<String>) -> Self {
        let cell = OnceLock::new();
        if let Some(url) = initial {
            let _ = cell.set(url);
        }
        Self(cell)
    }

    /// Bind the public URL. Fails if already set (config-provided or a
    /// previous call to this method).
    pub fn set(&self, url: String) -> Result<(), OrchestratorError> {
        self.0
            .set(url)
            .map_err(|_| OrchestratorError::ProviderError("public URL already bound".into()))
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    pub fn require(&self) -> Result<&str, OrchestratorError> {
        self.get()
            .ok_or_else(|| OrchestratorError::MissingConfiguration("server.public_url".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_freezes_after_first_set() {
        let url = PublicUrl::new(None);
        assert!(url.get().is_none());
        url.set("https://example.ngrok.io".into()).unwrap();
        assert_eq!(url.get(), Some("https://example.ngrok.io"));
        assert!(url.set("https://other.example".into()).is_err());
        assert_eq!(url.get(), Some("https://example.ngrok.io"));
    }

    #[test]
    fn public_url_preseeded_from_config_cannot_be_overwritten() {
        let url = PublicUrl::new(Some("https://configured.example".into()));
        assert!(url.set("https://attempted-override.example".into()).is_err());
        assert_eq!(url.get(), Some("https://configured.example"));
    }

    #[test]
    fn voice_as_str_matches_enum() {
        assert_eq!(Voice::Onyx.as_str(), "onyx");
        assert_eq!(Voice::default(), Voice::Onyx);
    }
}
