//! Service adapters — the seam where external collaborators plug in.
//!
//! Real protocol adapters (IMAP, CalDAV, bank APIs) live outside this
//! repository; they implement [`ServiceAdapter`] and register by service
//! prefix. In-tree there are two: a local echo adapter used as the
//! default, and an allowlist-gated HTTP adapter for `service.api_call`
//! and `web.search`. Adapter error strings are stable — UIs map them to
//! user-facing copy.

use async_trait::async_trait;
use semblance_proto::{ActionType, ErrorCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AdapterError {
    pub code: ErrorCode,
    pub message: String,
}

impl AdapterError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// One backend capable of executing actions for a service.
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, action: ActionType, payload: &Value) -> Result<Value, AdapterError>;
}

/// Routes actions to adapters by service prefix (`email`, `web`, ...).
pub struct AdapterRegistry {
    by_service: HashMap<String, Arc<dyn ServiceAdapter>>,
    fallback: Arc<dyn ServiceAdapter>,
}

impl AdapterRegistry {
    pub fn new(fallback: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            by_service: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, service: &str, adapter: Arc<dyn ServiceAdapter>) {
        self.by_service.insert(service.to_string(), adapter);
    }

    pub fn adapter_for(&self, action: ActionType) -> &Arc<dyn ServiceAdapter> {
        self.by_service
            .get(action.service())
            .unwrap_or(&self.fallback)
    }

    pub async fn execute(
        &self,
        action: ActionType,
        payload: &Value,
    ) -> Result<Value, AdapterError> {
        let adapter = self.adapter_for(action);
        debug!(action = %action, adapter = adapter.name(), "dispatching to adapter");
        adapter.execute(action, payload).await
    }
}

// ─── Local echo adapter ──────────────────────────────────────────────────────

/// Default adapter: acknowledges the action without leaving the machine.
/// Used for local-only actions and as the stand-in until a real adapter
/// is registered for a service.
pub struct LocalEchoAdapter;

#[async_trait]
impl ServiceAdapter for LocalEchoAdapter {
    fn name(&self) -> &str {
        "local-echo"
    }

    async fn execute(&self, action: ActionType, _payload: &Value) -> Result<Value, AdapterError> {
        Ok(json!({
            "handled": true,
            "action": action.as_str(),
            "adapter": self.name(),
        }))
    }
}

// ─── HTTP adapter ────────────────────────────────────────────────────────────

/// Outbound HTTP for `service.api_call` and `web.search`. The pipeline
/// has already enforced the allowlist by the time this runs.
pub struct HttpApiAdapter {
    client: reqwest::Client,
}

impl HttpApiAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpApiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceAdapter for HttpApiAdapter {
    fn name(&self) -> &str {
        "http-api"
    }

    async fn execute(&self, action: ActionType, payload: &Value) -> Result<Value, AdapterError> {
        let url = payload
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AdapterError::new(ErrorCode::ServerUnreachable, "payload missing 'url'")
            })?;

        let method = payload
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_ascii_uppercase();

        let mut builder = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(AdapterError::new(
                    ErrorCode::ServerUnreachable,
                    format!("unsupported method '{other}'"),
                ))
            }
        };
        if let Some(body) = payload.get("body") {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AdapterError::new(
                ErrorCode::AuthFailed,
                format!("{action} got HTTP {status}"),
            ));
        }
        if status.as_u16() == 429 {
            return Err(AdapterError::new(
                ErrorCode::ProviderRateLimit,
                format!("{action} got HTTP 429"),
            ));
        }
        if !status.is_success() {
            warn!(action = %action, status = %status, "upstream returned failure");
            return Err(AdapterError::new(
                ErrorCode::ServerUnreachable,
                format!("{action} got HTTP {status}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .unwrap_or_else(|_| json!({"raw": "non-json response"}));
        Ok(json!({"status": status.as_u16(), "body": body}))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> AdapterError {
    let text = e.to_string();
    if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
        AdapterError::new(ErrorCode::TlsHandshakeFailed, text)
    } else {
        AdapterError::new(ErrorCode::ServerUnreachable, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingAdapter;

    #[async_trait]
    impl ServiceAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _: ActionType, _: &Value) -> Result<Value, AdapterError> {
            Err(AdapterError::new(ErrorCode::AuthFailed, "login refused"))
        }
    }

    #[tokio::test]
    async fn test_registry_routes_by_service() {
        let mut registry = AdapterRegistry::new(Arc::new(LocalEchoAdapter));
        registry.register("email", Arc::new(FailingAdapter));

        let err = registry
            .execute(ActionType::EmailFetch, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthFailed);

        // Unregistered services fall back to echo.
        let ok = registry
            .execute(ActionType::CalendarFetch, &json!({}))
            .await
            .expect("fallback");
        assert_eq!(ok["adapter"], "local-echo");
        assert_eq!(ok["action"], "calendar.fetch");
    }

    #[tokio::test]
    async fn test_echo_adapter_does_not_leak_payload() {
        let result = LocalEchoAdapter
            .execute(ActionType::EmailSend, &json!({"body": "private text"}))
            .await
            .expect("echo");
        assert!(!result.to_string().contains("private text"));
    }

    #[tokio::test]
    async fn test_http_adapter_requires_url() {
        let err = HttpApiAdapter::new()
            .execute(ActionType::ServiceApiCall, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerUnreachable);
        assert!(err.message.contains("url"));
    }

    #[test]
    fn test_adapter_error_display_is_stable() {
        let err = AdapterError::new(ErrorCode::ProviderRateLimit, "slow down");
        assert_eq!(err.to_string(), "provider_rate_limit: slow down");
    }
}
