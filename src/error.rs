//! Error taxonomy for the orchestrator and its collaborators.
//!
//! Every fallible operation in the crate resolves to one of these variants.
//! `kind()` gives the short tag used in tool-facing `Error: <kind>: <detail>`
//! strings (see `tools::format_error`).

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("no active call with id {0}")]
    CallNotFound(String),

    #[error("call timed out")]
    CallTimeout,

    #[error("call was hung up")]
    CallHungUp,

    #[error("transcription error: {0}")]
    TranscriptionError(String),

    #[error("synthesis error: {0}")]
    SynthesisError(String),

    #[error("webhook signature invalid")]
    WebhookSignatureInvalid,

    #[error("authentication failed")]
    AuthenticationFailed,
}

impl OrchestratorError {
    /// Short tag used in `Error: <kind>: <detail>` tool responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingConfiguration(_) => "MissingConfiguration",
            Self::ProviderError(_) => "ProviderError",
            Self::NetworkError(_) => "NetworkError",
            Self::CallNotFound(_) => "CallNotFound",
            Self::CallTimeout => "CallTimeout",
            Self::CallHungUp => "CallHungUp",
            Self::TranscriptionError(_) => "TranscriptionError",
            Self::SynthesisError(_) => "SynthesisError",
            Self::WebhookSignatureInvalid => "WebhookSignatureInvalid",
            Self::AuthenticationFailed => "AuthenticationFailed",
        }
    }

    /// The detail portion, if any (empty for unit variants).
    pub fn detail(&self) -> String {
        match self {
            Self::MissingConfiguration(d)
            | Self::ProviderError(d)
            | Self::NetworkError(d)
            | Self::TranscriptionError(d)
            | Self::SynthesisError(d) => d.clone(),
            Self::CallNotFound(id) => id.clone(),
            Self::CallTimeout | Self::CallHungUp | Self::WebhookSignatureInvalid
            | Self::AuthenticationFailed => String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_match_variants() {
        assert_eq!(OrchestratorError::CallTimeout.kind(), "CallTimeout");
        assert_eq!(OrchestratorError::CallHungUp.kind(), "CallHungUp");
        assert_eq!(
            OrchestratorError::CallNotFound("call-1-1".into()).kind(),
            "CallNotFound"
        );
    }

    #[test]
    fn display_includes_detail() {
        let e = OrchestratorError::ProviderError("one active call at a time".into());
        assert_eq!(e.to_string(), "provider error: one active call at a time");
    }
}
