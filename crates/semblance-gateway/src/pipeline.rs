//! The gateway pipeline.
//!
//! Fixed order for every frame: schema + signature validation → rate
//! limiter → allowlist → anomaly detector → service adapter. A request
//! audit entry is appended before any check runs and a response entry
//! after the outcome is known, so absence of network activity is as
//! auditable as its presence.

use crate::adapters::AdapterRegistry;
use crate::validator::ActionValidator;
use async_trait::async_trait;
use parking_lot::Mutex;
use semblance_audit::{AuditRecord, AuditTrail};
use semblance_ipc::RequestHandler;
use semblance_netguard::{
    Allowlist, AnomalyConfig, AnomalyDetector, AnomalySignal, RateDecision, RateLimitConfig,
    RateLimiter,
};
use semblance_proto::{ActionRequest, ActionResponse, Direction, ErrorCode, ResponseStatus};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Decision metadata the core embeds in the signed payload under
/// `policy`, lifted into the audit entry.
#[derive(Debug, Clone, Default)]
struct PolicyMeta {
    tier: Option<String>,
    approval_required: bool,
    approval_given: bool,
    time_saved_seconds: i64,
}

impl PolicyMeta {
    fn from_payload(payload: &Value) -> Self {
        let policy = payload.get("policy");
        let get_bool = |key: &str| {
            policy
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        };
        Self {
            tier: policy
                .and_then(|p| p.get("tier"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            approval_required: get_bool("approvalRequired"),
            approval_given: get_bool("approvalGiven"),
            time_saved_seconds: policy
                .and_then(|p| p.get("estimatedTimeSavedSeconds"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        }
    }
}

/// `(domain, protocol)` a request wants to reach, if it names one.
fn target_of(payload: &Value) -> Option<(String, String)> {
    if let Some(domain) = payload.get("targetDomain").and_then(|v| v.as_str()) {
        let protocol = payload
            .get("protocol")
            .and_then(|v| v.as_str())
            .unwrap_or("https");
        return Some((domain.to_ascii_lowercase(), protocol.to_ascii_lowercase()));
    }
    if let Some(raw_url) = payload.get("url").and_then(|v| v.as_str()) {
        if let Ok(url) = url::Url::parse(raw_url) {
            if let Some(host) = url.host_str() {
                return Some((host.to_ascii_lowercase(), url.scheme().to_string()));
            }
        }
    }
    None
}

/// The assembled gateway: owns the audit trail, the netguard layers, and
/// the adapter registry.
pub struct Gateway {
    validator: ActionValidator,
    audit: AuditTrail,
    allowlist: Mutex<Allowlist>,
    rate: Mutex<RateLimiter>,
    anomaly: Mutex<AnomalyDetector>,
    adapters: AdapterRegistry,
    adapter_timeout: std::time::Duration,
}

impl Gateway {
    pub fn new(
        validator: ActionValidator,
        audit: AuditTrail,
        allowlist: Allowlist,
        rate_config: RateLimitConfig,
        anomaly_config: AnomalyConfig,
        adapters: AdapterRegistry,
    ) -> Self {
        Self {
            validator,
            audit,
            allowlist: Mutex::new(allowlist),
            rate: Mutex::new(RateLimiter::new(rate_config)),
            anomaly: Mutex::new(AnomalyDetector::new(anomaly_config)),
            adapters,
            adapter_timeout: std::time::Duration::from_secs(30),
        }
    }

    /// Deadline for one adapter execution; expiry is audited as `timeout`.
    pub fn with_adapter_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn allowlist(&self) -> &Mutex<Allowlist> {
        &self.allowlist
    }

    fn append_response_entry(
        &self,
        request_id: &str,
        action: &str,
        payload: &Value,
        status: ResponseStatus,
        meta: &PolicyMeta,
        detail: Value,
    ) -> String {
        let record = AuditRecord {
            request_id: request_id.to_string(),
            action: action.to_string(),
            direction: Direction::Response,
            status,
            payload: payload.clone(),
            signature: String::new(),
            metadata: detail,
            estimated_time_saved_seconds: meta.time_saved_seconds,
            autonomy_tier: meta.tier.clone(),
            approval_required: meta.approval_required,
            approval_given: meta.approval_given,
        };
        match self.audit.append(record) {
            Ok(entry) => entry.id,
            Err(e) => {
                // The trail is the source of truth; failing to write it
                // is an integrity event, loudly logged.
                error!(error = %e, request_id, "FAILED TO APPEND AUDIT ENTRY");
                String::new()
            }
        }
    }

    fn reject(
        &self,
        request_id: &str,
        action: &str,
        payload: &Value,
        code: ErrorCode,
        message: &str,
        meta: &PolicyMeta,
        anomalies: &[AnomalySignal],
    ) -> ActionResponse {
        warn!(request_id, action, code = %code, message, "request rejected");
        let audit_ref = self.append_response_entry(
            request_id,
            action,
            payload,
            ResponseStatus::Rejected,
            meta,
            json!({"reason": code.as_str(), "anomalies": anomalies}),
        );
        ActionResponse::rejected(request_id, code, message, &audit_ref)
    }
}

#[async_trait]
impl RequestHandler for Gateway {
    async fn handle(&self, raw: Value) -> ActionResponse {
        let request_id = raw
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let action = raw
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let payload = raw
            .get("payload")
            .filter(|p| p.is_object())
            .cloned()
            .unwrap_or_else(|| json!({}));
        let signature = raw
            .get("signature")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let meta = PolicyMeta::from_payload(&payload);

        // Request entry first — audit completeness does not depend on
        // anything downstream succeeding.
        if let Err(e) = self.audit.append(
            AuditRecord::new(
                &request_id,
                &action,
                Direction::Request,
                ResponseStatus::Pending,
                &payload,
            )
            .with_signature(&signature),
        ) {
            error!(error = %e, request_id, "FAILED TO APPEND AUDIT ENTRY");
            return ActionResponse::failure(
                &request_id,
                ErrorCode::AuditChainBroken,
                "audit trail unavailable",
                "",
            );
        }

        // 1. Schema + signature.
        let request: ActionRequest = match self.validator.validate(&raw) {
            Ok(request) => request,
            Err(failure) => {
                return self.reject(
                    &request_id,
                    &action,
                    &payload,
                    failure.code,
                    &failure.message,
                    &meta,
                    &[],
                );
            }
        };

        // 2. Rate limiter.
        let decision = self.rate.lock().check(request.action);
        if let RateDecision::Limited { retry_after_ms } = decision {
            let audit_ref = self.append_response_entry(
                &request_id,
                &action,
                &payload,
                ResponseStatus::Rejected,
                &meta,
                json!({"reason": ErrorCode::RateLimited.as_str(), "retryAfterMs": retry_after_ms}),
            );
            return ActionResponse::rejected(
                &request_id,
                ErrorCode::RateLimited,
                &format!("rate limited, retry in {retry_after_ms} ms"),
                &audit_ref,
            );
        }

        // 3. Allowlist, for requests that name an outbound target.
        let target = target_of(&request.payload);
        if let Some((domain, protocol)) = &target {
            if !self.allowlist.lock().contains(domain, protocol) {
                return self.reject(
                    &request_id,
                    &action,
                    &payload,
                    ErrorCode::DomainNotOnAllowlist,
                    &format!("{domain} ({protocol}) is not on the allowlist"),
                    &meta,
                    &[],
                );
            }
        }

        // 4. Anomaly detector — flags ride along, nothing blocks here.
        let anomalies = self
            .anomaly
            .lock()
            .inspect(target.as_ref().map(|(d, _)| d.as_str()), &request.payload);

        // 5. Adapter execution, bounded by the per-request deadline.
        let executed = tokio::time::timeout(
            self.adapter_timeout,
            self.adapters.execute(request.action, &request.payload),
        )
        .await;

        let executed = match executed {
            Ok(result) => result,
            Err(_) => {
                let audit_ref = self.append_response_entry(
                    &request_id,
                    &action,
                    &payload,
                    ResponseStatus::Error,
                    &meta,
                    json!({
                        "reason": ErrorCode::Timeout.as_str(),
                        "anomalies": anomalies,
                    }),
                );
                warn!(request_id, action, "adapter deadline exceeded");
                return ActionResponse::failure(
                    &request_id,
                    ErrorCode::Timeout,
                    "adapter did not complete in time",
                    &audit_ref,
                );
            }
        };

        match executed {
            Ok(data) => {
                let audit_ref = self.append_response_entry(
                    &request_id,
                    &action,
                    &payload,
                    ResponseStatus::Success,
                    &meta,
                    json!({"anomalies": anomalies}),
                );
                info!(request_id, action, "action executed");
                ActionResponse::success(&request_id, data, &audit_ref)
            }
            Err(adapter_error) => {
                let audit_ref = self.append_response_entry(
                    &request_id,
                    &action,
                    &payload,
                    ResponseStatus::Error,
                    &meta,
                    json!({
                        "reason": adapter_error.code.as_str(),
                        "anomalies": anomalies,
                    }),
                );
                warn!(request_id, action, error = %adapter_error, "adapter failed");
                ActionResponse::failure(
                    &request_id,
                    adapter_error.code,
                    &adapter_error.message,
                    &audit_ref,
                )
            }
        }
    }
}
