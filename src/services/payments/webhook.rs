//! Stripe webhook signature verification and event envelope.
//!
//! Stripe signs every delivery with the endpoint secret:
//!
//! ```text
//! Stripe-Signature: t=1700000000,v1=5257a869e7ecebeda32affa62cdca3fa51cad7e77a0e56ff536d0ce8e108d8bd
//! ```
//!
//! The expected signature is HMAC-SHA256(secret, "<t>.<raw body>") in hex.
//! Several `v1` entries may be present while a secret is being rolled.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Deliveries older than this are rejected as replays.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Missing or malformed Stripe-Signature header")]
    MalformedHeader,
    #[error("Webhook timestamp outside the tolerance window")]
    Expired,
    #[error("Webhook signature does not match")]
    Mismatch,
}

/// Check a delivery against the endpoint secret.
///
/// `now` is the current Unix time in seconds.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = value.parse().ok();
            }
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader);
    }
    if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Mismatch)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    // verify_slice compares in constant time
    if signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok())
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Compute a header value for `payload`; used to sign test deliveries.
#[cfg(test)]
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Event envelope. Only the fields used for dispatch are typed; the rest of
/// `data.object` is read field by field.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

impl StripeEvent {
    /// `data.object.<field>` as a string, if present.
    pub fn object_str(&self, field: &str) -> Option<&str> {
        self.data.object.get(field).and_then(|v| v.as_str())
    }

    /// `data.object.metadata.<key>` as a string, if present.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.data
            .object
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }

    /// Human-readable failure reason carried by failed invoices and payment intents.
    pub fn failure_message(&self) -> Option<String> {
        let object = &self.data.object;
        object
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .or_else(|| {
                object
                    .get("last_finalization_error")
                    .and_then(|e| e.get("message"))
            })
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_792_000_000;

    #[test]
    fn valid_signature_is_accepted() {
        let payload = br#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let header = sign(payload, SECRET, NOW);
        assert_eq!(verify_signature(payload, &header, SECRET, NOW + 10), Ok(()));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign(b"{\"amount\":100}", SECRET, NOW);
        assert_eq!(
            verify_signature(b"{\"amount\":999}", &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign(b"{}", "whsec_other", NOW);
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn old_deliveries_are_rejected() {
        let header = sign(b"{}", SECRET, NOW - TIMESTAMP_TOLERANCE_SECS - 1);
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, NOW),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let valid = sign(b"{}", SECRET, NOW);
        let v1 = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={NOW},v1={},v1={v1}", "00".repeat(32));
        assert_eq!(verify_signature(b"{}", &header, SECRET, NOW), Ok(()));
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(
            verify_signature(b"{}", "v1=abcd", SECRET, NOW),
            Err(SignatureError::MalformedHeader)
        );
        assert_eq!(
            verify_signature(b"{}", &format!("t={NOW}"), SECRET, NOW),
            Err(SignatureError::MalformedHeader)
        );
    }

    #[test]
    fn event_accessors() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "data": { "object": {
                "id": "pi_1",
                "metadata": { "transfer_id": "abc" },
                "last_payment_error": { "message": "Insufficient funds." }
            }}
        }))
        .unwrap();

        assert_eq!(event.event_type, "payment_intent.payment_failed");
        assert_eq!(event.object_str("id"), Some("pi_1"));
        assert_eq!(event.metadata("transfer_id"), Some("abc"));
        assert_eq!(event.failure_message().as_deref(), Some("Insufficient funds."));
    }
}
