//! Outbound traffic gate for the Semblance gateway.
//!
//! Three layers applied in fixed order to every validated request: the
//! sliding-window rate limiter, the user-approved domain allowlist, and
//! the anomaly detector. The first two can reject; anomalies only flag —
//! they ride on the audit entry and let any approval gate do the
//! blocking.

#![forbid(unsafe_code)]

mod allowlist;
mod anomaly;
mod ratelimit;

pub use allowlist::{AddedBy, Allowlist, AllowlistEntry};
pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalySignal};
pub use ratelimit::{RateDecision, RateLimitConfig, RateLimiter};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetguardError {
    #[error("onboarding entries require explicit user consent")]
    ConsentRequired,

    #[error("imported entries require user confirmation")]
    ConfirmationRequired,

    #[error("allowlist entry for {domain} ({protocol}) not found")]
    EntryNotFound { domain: String, protocol: String },
}
