//! Request construction and signing.
//!
//! The HMAC covers `{id, timestamp, action, payload, source}` as
//! canonical JSON; a request is immutable once signed.

use chrono::Utc;
use semblance_crypto::MacSigner;
use semblance_proto::{ActionRequest, ActionType};
use serde_json::Value;
use uuid::Uuid;

pub struct RequestSigner {
    mac: MacSigner,
}

impl RequestSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            mac: MacSigner::new(secret),
        }
    }

    /// Build a fresh signed request for one action.
    pub fn sign_request(&self, action: ActionType, payload: Value) -> ActionRequest {
        let mut request = ActionRequest {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            payload,
            source: "core".to_string(),
            signature: String::new(),
        };
        request.signature = self.mac.sign(&request.signing_subset());
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signed_request_verifies() {
        let signer = RequestSigner::new(b"secret");
        let request = signer.sign_request(ActionType::EmailFetch, json!({"folder": "inbox"}));

        assert!(!request.signature.is_empty());
        assert_eq!(request.source, "core");

        let mac = MacSigner::new(b"secret");
        assert!(mac.verify(&request.signing_subset(), &request.signature));
    }

    #[test]
    fn test_each_request_gets_fresh_id() {
        let signer = RequestSigner::new(b"secret");
        let a = signer.sign_request(ActionType::EmailFetch, json!({}));
        let b = signer.sign_request(ActionType::EmailFetch, json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_signature_survives_wire_round_trip() {
        let signer = RequestSigner::new(b"secret");
        let request = signer.sign_request(ActionType::EmailSend, json!({"to": ["a@x"]}));

        // What the gateway does: re-derive the subset from the raw frame.
        let wire = serde_json::to_value(&request).expect("serialize");
        let subset = json!({
            "id": wire["id"],
            "timestamp": wire["timestamp"],
            "action": wire["action"],
            "payload": wire["payload"],
            "source": wire["source"],
        });
        let mac = MacSigner::new(b"secret");
        assert!(mac.verify(&subset, wire["signature"].as_str().expect("sig")));
    }
}
