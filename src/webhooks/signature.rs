//! Webhook payload signing
//!
//! `X-Webhook-Signature: hex(hmac_sha256(secret, "{timestamp}.{payload}"))`.
//! The timestamp binds the signature to the request so a captured payload
//! cannot be replayed indefinitely.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookSigner<'a> {
    secret: &'a str,
}

impl<'a> WebhookSigner<'a> {
    pub fn new(secret: &'a str) -> Self {
        Self { secret }
    }

    /// Signature over `"{timestamp_ms}.{payload_json}"`.
    pub fn sign(&self, timestamp_ms: i64, payload_json: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(timestamp_ms.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload_json.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification for receivers and tests.
    pub fn verify(&self, timestamp_ms: i64, payload_json: &str, signature_hex: &str) -> bool {
        let Ok(expected) = hex::decode(signature_hex) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(timestamp_ms.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload_json.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}
