//! Wire types for the Semblance action protocol.
//!
//! Defines the message types exchanged between the Core orchestrator and
//! the Gateway over the local IPC stream, the closed action enum, and the
//! stable error taxonomy the rest of the system relies on.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ─── Action enum ─────────────────────────────────────────────────────────────

/// The closed set of actions the Gateway will accept.
///
/// Additions are versioned additive changes; removals are forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "email.fetch")]
    EmailFetch,
    #[serde(rename = "email.send")]
    EmailSend,
    #[serde(rename = "email.draft")]
    EmailDraft,
    #[serde(rename = "email.archive")]
    EmailArchive,
    #[serde(rename = "email.move")]
    EmailMove,
    #[serde(rename = "email.markRead")]
    EmailMarkRead,
    #[serde(rename = "calendar.fetch")]
    CalendarFetch,
    #[serde(rename = "calendar.create")]
    CalendarCreate,
    #[serde(rename = "calendar.update")]
    CalendarUpdate,
    #[serde(rename = "calendar.delete")]
    CalendarDelete,
    #[serde(rename = "finance.fetch_transactions")]
    FinanceFetchTransactions,
    #[serde(rename = "health.fetch")]
    HealthFetch,
    #[serde(rename = "service.api_call")]
    ServiceApiCall,
    #[serde(rename = "web.search")]
    WebSearch,
    #[serde(rename = "network.startDiscovery")]
    NetworkStartDiscovery,
    #[serde(rename = "network.stopDiscovery")]
    NetworkStopDiscovery,
    #[serde(rename = "model.download")]
    ModelDownload,
    #[serde(rename = "inheritance.test-run")]
    InheritanceTestRun,
}

impl ActionType {
    /// All members of the closed enum, in wire order.
    pub const ALL: [ActionType; 18] = [
        Self::EmailFetch,
        Self::EmailSend,
        Self::EmailDraft,
        Self::EmailArchive,
        Self::EmailMove,
        Self::EmailMarkRead,
        Self::CalendarFetch,
        Self::CalendarCreate,
        Self::CalendarUpdate,
        Self::CalendarDelete,
        Self::FinanceFetchTransactions,
        Self::HealthFetch,
        Self::ServiceApiCall,
        Self::WebSearch,
        Self::NetworkStartDiscovery,
        Self::NetworkStopDiscovery,
        Self::ModelDownload,
        Self::InheritanceTestRun,
    ];

    /// The dotted wire name of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailFetch => "email.fetch",
            Self::EmailSend => "email.send",
            Self::EmailDraft => "email.draft",
            Self::EmailArchive => "email.archive",
            Self::EmailMove => "email.move",
            Self::EmailMarkRead => "email.markRead",
            Self::CalendarFetch => "calendar.fetch",
            Self::CalendarCreate => "calendar.create",
            Self::CalendarUpdate => "calendar.update",
            Self::CalendarDelete => "calendar.delete",
            Self::FinanceFetchTransactions => "finance.fetch_transactions",
            Self::HealthFetch => "health.fetch",
            Self::ServiceApiCall => "service.api_call",
            Self::WebSearch => "web.search",
            Self::NetworkStartDiscovery => "network.startDiscovery",
            Self::NetworkStopDiscovery => "network.stopDiscovery",
            Self::ModelDownload => "model.download",
            Self::InheritanceTestRun => "inheritance.test-run",
        }
    }

    /// Parse a dotted wire name. `None` for anything outside the closed set.
    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.as_str() == s)
    }

    /// The service prefix (`email`, `calendar`, ...) used for per-service
    /// audit aggregation.
    pub fn service(&self) -> &'static str {
        let name = self.as_str();
        name.split('.').next().unwrap_or(name)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Request / response ──────────────────────────────────────────────────────

/// A single signed intent sent from Core to Gateway.
///
/// Immutable after signing: the signature covers `{id, timestamp, action,
/// payload, source}` as canonical JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: ActionType,
    pub payload: Value,
    pub source: String,
    pub signature: String,
}

impl ActionRequest {
    /// The JSON subset covered by the request signature.
    pub fn signing_subset(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "timestamp": self.timestamp,
            "action": self.action,
            "payload": self.payload,
            "source": self.source,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
    Rejected,
    Pending,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        };
        write!(f, "{s}")
    }
}

/// Whether an audit entry records the inbound request or the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Gateway's answer to an [`ActionRequest`], correlated by `requestId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub audit_ref: String,
}

impl ActionResponse {
    pub fn success(request_id: &str, data: Value, audit_ref: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
            audit_ref: audit_ref.to_string(),
        }
    }

    pub fn rejected(request_id: &str, code: ErrorCode, message: &str, audit_ref: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            status: ResponseStatus::Rejected,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.to_string(),
            }),
            audit_ref: audit_ref.to_string(),
        }
    }

    pub fn failure(request_id: &str, code: ErrorCode, message: &str, audit_ref: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.to_string(),
            }),
            audit_ref: audit_ref.to_string(),
        }
    }
}

// ─── Error taxonomy ──────────────────────────────────────────────────────────

/// Stable machine-readable failure codes.
///
/// The exact strings are load-bearing: UIs map them to user-facing copy and
/// the audit trail stores them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Input — recovered at the gateway boundary, returned as `rejected`.
    SchemaViolation,
    UnknownAction,
    BadSignature,
    // Policy — returned as `rejected`, never retried automatically.
    DeniedByPolicy,
    DeniedByInheritanceGuard,
    RateLimited,
    DomainNotOnAllowlist,
    // Transport — core retries a bounded number of times, then `error`.
    IpcDisconnected,
    Timeout,
    FrameTooLarge,
    // Adapter — surfaced verbatim to core.
    AuthFailed,
    ServerUnreachable,
    TlsHandshakeFailed,
    ProviderRateLimit,
    // Integrity — fatal for the affected flow, prominently audited.
    AuditChainBroken,
    SignatureInvalid,
    DecryptFailed,
    // Inheritance flow.
    PassphraseInvalid,
    PackageInvalidOrCorrupt,
    CancelTooLate,
    BlockedByConsensus,
    ActivationExists,
    InvalidState,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaViolation => "schema_violation",
            Self::UnknownAction => "unknown_action",
            Self::BadSignature => "bad_signature",
            Self::DeniedByPolicy => "denied_by_policy",
            Self::DeniedByInheritanceGuard => "denied_by_inheritance_guard",
            Self::RateLimited => "rate_limited",
            Self::DomainNotOnAllowlist => "domain_not_on_allowlist",
            Self::IpcDisconnected => "ipc_disconnected",
            Self::Timeout => "timeout",
            Self::FrameTooLarge => "frame_too_large",
            Self::AuthFailed => "auth_failed",
            Self::ServerUnreachable => "server_unreachable",
            Self::TlsHandshakeFailed => "tls_handshake_failed",
            Self::ProviderRateLimit => "provider_rate_limit",
            Self::AuditChainBroken => "audit_chain_broken",
            Self::SignatureInvalid => "signature_invalid",
            Self::DecryptFailed => "decrypt_failed",
            Self::PassphraseInvalid => "passphrase_invalid",
            Self::PackageInvalidOrCorrupt => "package_invalid_or_corrupt",
            Self::CancelTooLate => "cancel_too_late",
            Self::BlockedByConsensus => "blocked_by_consensus",
            Self::ActivationExists => "activation_exists",
            Self::InvalidState => "invalid_state",
        }
    }

    /// Transport errors are the only class the core retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IpcDisconnected | Self::Timeout)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Schema validation ───────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("source must be \"core\", got '{0}'")]
    BadSource(String),
    #[error("signature must be non-empty")]
    EmptySignature,
    #[error("timestamp is not RFC 3339: '{0}'")]
    BadTimestamp(String),
}

impl SchemaError {
    /// The taxonomy code a violation maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
            _ => ErrorCode::SchemaViolation,
        }
    }
}

/// Validate a raw inbound frame against the closed request schema.
///
/// Runs on the untyped JSON so that a malformed frame is rejected with a
/// precise reason instead of a serde soup. Signature verification is a
/// separate step; this only checks shape.
pub fn validate_request_shape(raw: &Value) -> Result<(), SchemaError> {
    let obj = raw
        .as_object()
        .ok_or(SchemaError::WrongType("request"))?;

    let id = obj.get("id").ok_or(SchemaError::MissingField("id"))?;
    let id = id.as_str().ok_or(SchemaError::WrongType("id"))?;
    if id.is_empty() {
        return Err(SchemaError::MissingField("id"));
    }

    let ts = obj
        .get("timestamp")
        .ok_or(SchemaError::MissingField("timestamp"))?;
    let ts = ts.as_str().ok_or(SchemaError::WrongType("timestamp"))?;
    if DateTime::parse_from_rfc3339(ts).is_err() {
        return Err(SchemaError::BadTimestamp(ts.to_string()));
    }

    let action = obj
        .get("action")
        .ok_or(SchemaError::MissingField("action"))?;
    let action = action.as_str().ok_or(SchemaError::WrongType("action"))?;
    if ActionType::from_wire(action).is_none() {
        return Err(SchemaError::UnknownAction(action.to_string()));
    }

    let payload = obj
        .get("payload")
        .ok_or(SchemaError::MissingField("payload"))?;
    if !payload.is_object() {
        return Err(SchemaError::WrongType("payload"));
    }

    let source = obj
        .get("source")
        .ok_or(SchemaError::MissingField("source"))?;
    let source = source.as_str().ok_or(SchemaError::WrongType("source"))?;
    if source != "core" {
        return Err(SchemaError::BadSource(source.to_string()));
    }

    let signature = obj
        .get("signature")
        .ok_or(SchemaError::MissingField("signature"))?;
    let signature = signature
        .as_str()
        .ok_or(SchemaError::WrongType("signature"))?;
    if signature.is_empty() {
        return Err(SchemaError::EmptySignature);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_raw() -> Value {
        json!({
            "id": "req-1",
            "timestamp": "2026-03-01T12:00:00Z",
            "action": "email.send",
            "payload": {"to": ["a@x"], "subject": "hi"},
            "source": "core",
            "signature": "ab12",
        })
    }

    #[test]
    fn test_action_wire_names_round_trip() {
        for action in ActionType::ALL {
            let wire = serde_json::to_value(action).expect("serialize");
            assert_eq!(wire, Value::String(action.as_str().to_string()));
            let back: ActionType = serde_json::from_value(wire).expect("deserialize");
            assert_eq!(back, action);
            assert_eq!(ActionType::from_wire(action.as_str()), Some(action));
        }
    }

    #[test]
    fn test_action_from_wire_rejects_unknown() {
        assert_eq!(ActionType::from_wire("email.explode"), None);
        assert_eq!(ActionType::from_wire(""), None);
        assert_eq!(ActionType::from_wire("EMAIL.SEND"), None);
    }

    #[test]
    fn test_action_service_prefix() {
        assert_eq!(ActionType::EmailSend.service(), "email");
        assert_eq!(ActionType::FinanceFetchTransactions.service(), "finance");
        assert_eq!(ActionType::InheritanceTestRun.service(), "inheritance");
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let resp = ActionResponse::success("req-9", json!({"ok": true}), "audit-3");
        let s = serde_json::to_string(&resp).expect("serialize");
        assert!(s.contains(r#""requestId":"req-9""#), "got {s}");
        assert!(s.contains(r#""auditRef":"audit-3""#), "got {s}");
        assert!(s.contains(r#""status":"success""#), "got {s}");
        assert!(!s.contains(r#""error""#), "error must be omitted: {s}");
    }

    #[test]
    fn test_rejected_response_carries_code() {
        let resp =
            ActionResponse::rejected("req-2", ErrorCode::DomainNotOnAllowlist, "nope", "audit-1");
        assert_eq!(resp.status, ResponseStatus::Rejected);
        let s = serde_json::to_string(&resp).expect("serialize");
        assert!(s.contains("domain_not_on_allowlist"), "got {s}");
    }

    #[test]
    fn test_error_code_strings_are_stable() {
        assert_eq!(ErrorCode::SchemaViolation.as_str(), "schema_violation");
        assert_eq!(ErrorCode::RateLimited.as_str(), "rate_limited");
        assert_eq!(
            ErrorCode::DeniedByInheritanceGuard.as_str(),
            "denied_by_inheritance_guard"
        );
        assert_eq!(ErrorCode::TlsHandshakeFailed.as_str(), "tls_handshake_failed");
        assert_eq!(ErrorCode::CancelTooLate.as_str(), "cancel_too_late");
        let wire = serde_json::to_value(ErrorCode::BlockedByConsensus).expect("serialize");
        assert_eq!(wire, Value::String("blocked_by_consensus".to_string()));
    }

    #[test]
    fn test_only_transport_errors_retry() {
        assert!(ErrorCode::IpcDisconnected.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(!ErrorCode::RateLimited.is_retryable());
        assert!(!ErrorCode::AuthFailed.is_retryable());
        assert!(!ErrorCode::FrameTooLarge.is_retryable());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert_eq!(validate_request_shape(&valid_raw()), Ok(()));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        for field in ["id", "timestamp", "action", "payload", "source", "signature"] {
            let mut raw = valid_raw();
            raw.as_object_mut().unwrap().remove(field);
            assert!(
                validate_request_shape(&raw).is_err(),
                "missing '{field}' must fail"
            );
        }
    }

    #[test]
    fn test_validate_rejects_unknown_action() {
        let mut raw = valid_raw();
        raw["action"] = json!("email.explode");
        let err = validate_request_shape(&raw).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownAction);
    }

    #[test]
    fn test_validate_rejects_non_object_payload() {
        let mut raw = valid_raw();
        raw["payload"] = json!([1, 2, 3]);
        let err = validate_request_shape(&raw).unwrap_err();
        assert_eq!(err, SchemaError::WrongType("payload"));
        assert_eq!(err.code(), ErrorCode::SchemaViolation);
    }

    #[test]
    fn test_validate_rejects_wrong_source() {
        let mut raw = valid_raw();
        raw["source"] = json!("gateway");
        assert!(matches!(
            validate_request_shape(&raw),
            Err(SchemaError::BadSource(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_signature() {
        let mut raw = valid_raw();
        raw["signature"] = json!("");
        assert_eq!(
            validate_request_shape(&raw),
            Err(SchemaError::EmptySignature)
        );
    }

    #[test]
    fn test_validate_rejects_bad_timestamp() {
        let mut raw = valid_raw();
        raw["timestamp"] = json!("yesterday at noon");
        assert!(matches!(
            validate_request_shape(&raw),
            Err(SchemaError::BadTimestamp(_))
        ));
    }

    #[test]
    fn test_signing_subset_excludes_signature() {
        let req = ActionRequest {
            id: "r-1".to_string(),
            timestamp: Utc::now(),
            action: ActionType::EmailFetch,
            payload: json!({}),
            source: "core".to_string(),
            signature: "sig".to_string(),
        };
        let subset = req.signing_subset();
        assert!(subset.get("signature").is_none());
        assert_eq!(subset["id"], json!("r-1"));
        assert_eq!(subset["action"], json!("email.fetch"));
    }
}
