//! The Semblance gateway — the sole network citizen.
//!
//! Core decides *what* to attempt; the gateway decides *whether and how*
//! it actually reaches the outside world. Every request runs the same
//! pipeline: schema validation → signature check → rate limiter →
//! allowlist → anomaly detector → service adapter, with an audit entry
//! for the request and one for whatever the outcome was.

#![forbid(unsafe_code)]

pub mod adapters;
pub mod config;
pub mod pipeline;
pub mod validator;

pub use adapters::{AdapterError, AdapterRegistry, HttpApiAdapter, LocalEchoAdapter, ServiceAdapter};
pub use config::GatewayConfig;
pub use pipeline::Gateway;
pub use validator::ActionValidator;

use semblance_audit::AuditError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
