//! Variant T: REST+JSON carrier (Telnyx-shaped). Streaming is started by
//! an explicit API call once the carrier confirms the call is ringing.

use super::{provider_err, signature, WebhookEvent};
use crate::config::CarrierConfig;
use crate::error::{OrchestratorError, Result};

const API_BASE: &str = "https://api.telnyx.com/v2";

pub struct TelnyxDriver {
    client: reqwest::Client,
    api_key: String,
    connection_id: Option<String>,
    /// Base64 ed25519 public key used to verify webhook signatures. Absent
    /// means signature verification follows the permissive compatibility
    /// rule unless `strict` is requested.
    webhook_public_key: Option<String>,
}

impl TelnyxDriver {
    pub fn new(config: &CarrierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.account_id.clone(),
            connection_id: config.connection_id.clone(),
            webhook_public_key: if config.secret.is_empty() {
                None
            } else {
                Some(config.secret.clone())
            },
        }
    }

    pub async fn initiate(&self, to: &str, from: &str, webhook_url: &str) -> Result<String> {
        let body = serde_json::json!({
            "to": to,
            "from": from,
            "webhook_url": webhook_url,
            "webhook_url_method": "POST",
            "connection_id": self.connection_id,
        });

        let resp = self
            .client
            .post(format!("{API_BASE}/calls"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(provider_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::ProviderError(format!(
                "telnyx initiate failed: {status}: {text}"
            )));
        }

        let value: serde_json::Value = resp.json().await.map_err(provider_err)?;
        value["data"]["call_control_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                OrchestratorError::ProviderError("telnyx response missing call_control_id".into())
            })
    }

    pub async fn hangup(&self, carrier_call_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{API_BASE}/calls/{carrier_call_id}/actions/hangup"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(provider_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(OrchestratorError::ProviderError(format!(
                "telnyx hangup failed: {status}"
            )));
        }
        Ok(())
    }

    pub async fn start_streaming(&self, carrier_call_id: &str, ws_url: &str) -> Result<()> {
        let body = serde_json::json!({
            "stream_url": ws_url,
            "stream_track": "inbound",
            "format": "ULAW",
            "sample_rate": 8000,
        });

        let resp = self
            .client
            .post(format!("{API_BASE}/calls/{carrier_call_id}/actions/stream"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(provider_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(OrchestratorError::ProviderError(format!(
                "telnyx start_streaming failed: {status}"
            )));
        }
        Ok(())
    }

    /// Streaming for variant T is triggered by an API call after the
    /// `streaming.started` webhook, not by the webhook response body, so
    /// the response document is an empty envelope.
    pub fn stream_connect_response(&self, _ws_url: &str) -> Vec<u8> {
        br#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#.to_vec()
    }

    /// ed25519 over the raw body using the configured carrier public key.
    /// When no key is configured, the permissive compatibility rule
    /// applies unless `strict` mode is on, in which case an unconfigured
    /// key always fails closed.
    pub fn verify_signature(&self, header_sig: Option<&str>, body: &[u8], strict: bool) -> bool {
        match (&self.webhook_public_key, header_sig) {
            (Some(key), Some(sig)) => signature::verify_ed25519(key, body, sig),
            _ => !strict,
        }
    }

    pub fn parse_event(&self, body: &[u8]) -> Result<WebhookEvent> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| OrchestratorError::ProviderError(format!("malformed webhook: {e}")))?;

        let event_type = value["data"]["event_type"].as_str().unwrap_or("");
        let carrier_call_id = value["data"]["payload"]["call_control_id"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let event = match event_type {
            "call.initiated" => WebhookEvent::CallInitiated { carrier_call_id },
            "call.answered" => WebhookEvent::CallAnswered { carrier_call_id },
            "call.hangup" => WebhookEvent::CallHungUp { carrier_call_id },
            "call.busy" => WebhookEvent::CallBusy { carrier_call_id },
            "call.no_answer" => WebhookEvent::CallNoAnswer { carrier_call_id },
            "call.failed" => WebhookEvent::CallFailed { carrier_call_id },
            "streaming.started" => WebhookEvent::StreamingStarted { carrier_call_id },
            "streaming.stopped" => WebhookEvent::StreamingStopped { carrier_call_id },
            other => WebhookEvent::Unknown(other.to_string()),
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> TelnyxDriver {
        TelnyxDriver::new(&CarrierConfig {
            variant: crate::config::CarrierVariant::Telnyx,
            account_id: "KEY123".into(),
            secret: String::new(),
            connection_id: Some("conn-1".into()),
            caller_id: "+15551230000".into(),
        })
    }

    #[test]
    fn parses_known_event_types() {
        let d = driver();
        let body = serde_json::json!({
            "data": {
                "event_type": "streaming.started",
                "payload": { "call_control_id": "call-control-1" }
            }
        });
        let event = d.parse_event(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(
            event,
            WebhookEvent::StreamingStarted {
                carrier_call_id: "call-control-1".into()
            }
        );
    }

    #[test]
    fn unknown_event_type_round_trips_via_unknown() {
        let d = driver();
        let body = serde_json::json!({
            "data": { "event_type": "call.recording.saved", "payload": {} }
        });
        let event = d.parse_event(&serde_json::to_vec(&body).unwrap()).unwrap();
        assert_eq!(event, WebhookEvent::Unknown("call.recording.saved".into()));
    }

    #[test]
    fn permissive_mode_accepts_missing_signature() {
        let d = driver();
        assert!(d.verify_signature(None, b"body", false));
    }

    #[test]
    fn strict_mode_rejects_unconfigured_key() {
        let d = driver();
        assert!(!d.verify_signature(Some("c2ln"), b"body", true));
    }

    #[test]
    fn stream_connect_response_is_empty_envelope() {
        let d = driver();
        let doc = d.stream_connect_response("wss://example/media-stream?token=abc");
        assert!(String::from_utf8(doc).unwrap().contains("<Response>"));
    }
}
