//! Webhook-signature verification primitives. The ed25519 and HMAC math
//! itself is an external collaborator (`ed25519-dalek`, `hmac`/`sha1`);
//! this module only wraps it behind the two calls each carrier variant
//! needs.

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Verify an ed25519 signature over the raw request body, as variant T
/// does. `public_key_b64` and `signature_b64` are both base64.
pub fn verify_ed25519(public_key_b64: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(key_bytes) = base64::engine::general_purpose::STANDARD.decode(public_key_b64) else {
        return false;
    };
    let Ok(key_array) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_array) else {
        return false;
    };
    let Ok(sig_bytes) = base64::engine::general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_array);
    verifying_key.verify(body, &signature).is_ok()
}

/// Verify an HMAC-SHA1 over `full_url ‖ body`, as variant W does.
/// `secret` is the carrier auth token; `signature_b64` is base64.
pub fn verify_hmac_sha1(secret: &str, full_url: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(full_url.as_bytes());
    mac.update(body);

    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn ed25519_roundtrip_verifies() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let body = b"telnyx webhook body";
        let signature = signing_key.sign(body);

        let pub_b64 = base64::engine::general_purpose::STANDARD.encode(verifying_key.to_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        assert!(verify_ed25519(&pub_b64, body, &sig_b64));
        assert!(!verify_ed25519(&pub_b64, b"tampered body", &sig_b64));
    }

    #[test]
    fn hmac_sha1_roundtrip_verifies() {
        let secret = "auth-token";
        let url = "https://example.com/twiml";
        let body = b"To=%2B15551234567&From=%2B15559876543";

        let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(url.as_bytes());
        mac.update(body);
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_hmac_sha1(secret, url, body, &sig_b64));
        assert!(!verify_hmac_sha1("wrong-secret", url, body, &sig_b64));
        assert!(!verify_hmac_sha1(secret, "https://example.com/other", body, &sig_b64));
    }
}
