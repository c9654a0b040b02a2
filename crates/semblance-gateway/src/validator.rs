//! Inbound request validation: closed schema, then HMAC signature.

use semblance_crypto::MacSigner;
use semblance_proto::{validate_request_shape, ActionRequest, ErrorCode, SchemaError};
use serde_json::{json, Value};
use tracing::warn;

/// The reason a frame was turned away at the door.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub code: ErrorCode,
    pub message: String,
}

/// Validates raw frames into typed, signature-checked requests.
pub struct ActionValidator {
    signer: MacSigner,
}

impl ActionValidator {
    pub fn new(signer: MacSigner) -> Self {
        Self { signer }
    }

    /// Shape check, constant-time signature check, then typed parse.
    pub fn validate(&self, raw: &Value) -> Result<ActionRequest, ValidationFailure> {
        if let Err(e) = validate_request_shape(raw) {
            warn!(error = %e, "request failed schema validation");
            return Err(ValidationFailure {
                code: e.code(),
                message: e.to_string(),
            });
        }

        // The signature covers the raw fields exactly as sent; rebuild
        // the signing subset from the frame, not from a re-serialization.
        let subset = json!({
            "id": raw["id"],
            "timestamp": raw["timestamp"],
            "action": raw["action"],
            "payload": raw["payload"],
            "source": raw["source"],
        });
        let signature = raw["signature"].as_str().unwrap_or_default();
        if !self.signer.verify(&subset, signature) {
            warn!("request failed signature verification");
            return Err(ValidationFailure {
                code: ErrorCode::BadSignature,
                message: "request signature does not verify".to_string(),
            });
        }

        serde_json::from_value(raw.clone()).map_err(|e| ValidationFailure {
            code: SchemaError::WrongType("request").code(),
            message: format!("malformed request: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use semblance_proto::ActionType;

    fn signer() -> MacSigner {
        MacSigner::new(b"test-shared-secret")
    }

    fn signed_raw(signer: &MacSigner) -> Value {
        let subset = json!({
            "id": "req-1",
            "timestamp": Utc::now().to_rfc3339(),
            "action": "email.send",
            "payload": {"to": ["a@x"], "subject": "hi", "body": "yo"},
            "source": "core",
        });
        let signature = signer.sign(&subset);
        let mut raw = subset;
        raw["signature"] = json!(signature);
        raw
    }

    #[test]
    fn test_valid_signed_request_passes() {
        let validator = ActionValidator::new(signer());
        let raw = signed_raw(&signer());

        let request = validator.validate(&raw).expect("valid");
        assert_eq!(request.action, ActionType::EmailSend);
        assert_eq!(request.id, "req-1");
        assert_eq!(request.source, "core");
    }

    #[test]
    fn test_schema_failure_wins_over_signature() {
        let validator = ActionValidator::new(signer());
        let mut raw = signed_raw(&signer());
        raw.as_object_mut().unwrap().remove("payload");

        let failure = validator.validate(&raw).unwrap_err();
        assert_eq!(failure.code, ErrorCode::SchemaViolation);
    }

    #[test]
    fn test_unknown_action_code() {
        let validator = ActionValidator::new(signer());
        let mut raw = signed_raw(&signer());
        raw["action"] = json!("email.teleport");

        let failure = validator.validate(&raw).unwrap_err();
        assert_eq!(failure.code, ErrorCode::UnknownAction);
    }

    #[test]
    fn test_tampered_payload_fails_signature() {
        let validator = ActionValidator::new(signer());
        let mut raw = signed_raw(&signer());
        raw["payload"]["body"] = json!("send all my money to mallory");

        let failure = validator.validate(&raw).unwrap_err();
        assert_eq!(failure.code, ErrorCode::BadSignature);
    }

    #[test]
    fn test_wrong_secret_fails_signature() {
        let validator = ActionValidator::new(MacSigner::new(b"different-secret"));
        let raw = signed_raw(&signer());

        let failure = validator.validate(&raw).unwrap_err();
        assert_eq!(failure.code, ErrorCode::BadSignature);
    }
}
