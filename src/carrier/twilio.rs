//! Variant W: REST+form-encoded carrier (Twilio-shaped). Streaming is
//! started by the document returned from the webhook, not a separate API
//! call.

use super::{provider_err, signature, WebhookEvent};
use crate::config::CarrierConfig;
use crate::error::{OrchestratorError, Result};

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

pub struct TwilioDriver {
    client: reqwest::Client,
    account_sid: String,
    auth_token: String,
}

impl TwilioDriver {
    pub fn new(config: &CarrierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            account_sid: config.account_id.clone(),
            auth_token: config.secret.clone(),
        }
    }

    pub async fn initiate(&self, to: &str, from: &str, webhook_url: &str) -> Result<String> {
        let url = format!("{API_BASE}/Accounts/{}/Calls.json", self.account_sid);
        let params = [("To", to), ("From", from), ("Url", webhook_url)];

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await
            .map_err(provider_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(OrchestratorError::ProviderError(format!(
                "twilio initiate failed: {status}: {body}"
            )));
        }

        let value: serde_json::Value = resp.json().await.map_err(provider_err)?;
        value["sid"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::ProviderError("twilio response missing sid".into()))
    }

    pub async fn hangup(&self, carrier_call_id: &str) -> Result<()> {
        let url = format!(
            "{API_BASE}/Accounts/{}/Calls/{carrier_call_id}.json",
            self.account_sid
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await
            .map_err(provider_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(OrchestratorError::ProviderError(format!(
                "twilio hangup failed: {status}"
            )));
        }
        Ok(())
    }

    /// Variant W starts streaming by returning a document from the
    /// webhook, so there is nothing to do here.
    pub async fn start_streaming(&self, _carrier_call_id: &str, _ws_url: &str) -> Result<()> {
        Ok(())
    }

    pub fn stream_connect_response(&self, ws_url: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><Response><Start><Stream url="{ws_url}"/></Start><Pause length="60"/></Response>"#
        )
        .into_bytes()
    }

    /// HMAC-SHA1 of `fullUrl ‖ rawBody`, base64-compared to the header.
    pub fn verify_signature(
        &self,
        header_sig: Option<&str>,
        full_url: &str,
        body: &[u8],
        strict: bool,
    ) -> bool {
        match header_sig {
            Some(sig) => signature::verify_hmac_sha1(&self.auth_token, full_url, body, sig),
            None => !strict,
        }
    }

    pub fn parse_event(&self, body: &[u8]) -> Result<WebhookEvent> {
        let form = parse_form_urlencoded(body);

        let carrier_call_id = form.get("CallSid").cloned().unwrap_or_default();
        let status = form.get("CallStatus").map(String::as_str).unwrap_or("");

        let event = match status {
            "ringing" | "in-progress" => WebhookEvent::CallAnswered { carrier_call_id },
            "completed" => WebhookEvent::CallHungUp { carrier_call_id },
            "busy" => WebhookEvent::CallBusy { carrier_call_id },
            "no-answer" => WebhookEvent::CallNoAnswer { carrier_call_id },
            "failed" => WebhookEvent::CallFailed { carrier_call_id },
            other => WebhookEvent::Unknown(other.to_string()),
        };

        Ok(event)
    }
}

/// Minimal `application/x-www-form-urlencoded` body parser — just enough
/// to pull the fields this variant's webhooks need out of a raw POST body.
fn parse_form_urlencoded(body: &[u8]) -> std::collections::HashMap<String, String> {
    std::str::from_utf8(body)
        .unwrap_or("")
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((percent_decode(key), percent_decode(value)))
        })
        .collect()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> TwilioDriver {
        TwilioDriver::new(&CarrierConfig {
            variant: crate::config::CarrierVariant::Twilio,
            account_id: "AC123".into(),
            secret: "authtoken".into(),
            connection_id: None,
            caller_id: "+15551230000".into(),
        })
    }

    #[test]
    fn maps_call_status_to_events() {
        let d = driver();
        let event = d
            .parse_event(b"CallSid=CA123&CallStatus=completed")
            .unwrap();
        assert_eq!(
            event,
            WebhookEvent::CallHungUp {
                carrier_call_id: "CA123".into()
            }
        );
    }

    #[test]
    fn unknown_status_round_trips_via_unknown() {
        let d = driver();
        let event = d
            .parse_event(b"CallSid=CA123&CallStatus=queued")
            .unwrap();
        assert_eq!(event, WebhookEvent::Unknown("queued".into()));
    }

    #[test]
    fn stream_connect_response_embeds_ws_url() {
        let d = driver();
        let doc = d.stream_connect_response("wss://example.ngrok.io/media-stream?token=abc");
        let text = String::from_utf8(doc).unwrap();
        assert!(text.contains("<Start><Stream url=\"wss://example.ngrok.io/media-stream?token=abc\"/></Start>"));
    }

    #[test]
    fn signature_verification_roundtrips() {
        let d = driver();
        let url = "https://example.ngrok.io/twiml";
        let body = b"CallSid=CA123&CallStatus=completed";

        use hmac::{Hmac, Mac};
        use sha1::Sha1;
        let mut mac = Hmac::<Sha1>::new_from_slice(b"authtoken").unwrap();
        mac.update(url.as_bytes());
        mac.update(body);
        use base64::Engine;
        let sig = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(d.verify_signature(Some(&sig), url, body, true));
        assert!(!d.verify_signature(Some("wrong"), url, body, true));
    }

    #[test]
    fn permissive_mode_accepts_missing_signature() {
        let d = driver();
        assert!(d.verify_signature(None, "https://example.ngrok.io/twiml", b"body", false));
    }
}
