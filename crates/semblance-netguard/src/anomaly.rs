//! Anomaly detection over the request stream.
//!
//! Three signals: request bursts, never-seen-before target domains, and
//! oversized payloads. Signals flag the request for the audit trail and
//! any approval gate; they do not block on their own. The seen-domain set
//! is history, deliberately separate from the allowlist (which is
//! policy).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    /// More than this many requests inside `burst_window_ms` flags a burst.
    pub burst_threshold: u32,
    pub burst_window_ms: u64,
    /// Serialized payloads above this size flag `large_payload`.
    pub max_payload_bytes: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            burst_threshold: 5,
            burst_window_ms: 10_000,
            max_payload_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySignal {
    Burst,
    NewDomain,
    LargePayload,
}

impl AnomalySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Burst => "burst",
            Self::NewDomain => "new_domain",
            Self::LargePayload => "large_payload",
        }
    }
}

impl std::fmt::Display for AnomalySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Process-local detector state. Lifetime == gateway process lifetime.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    recent: VecDeque<Instant>,
    seen_domains: HashSet<String>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            recent: VecDeque::new(),
            seen_domains: HashSet::new(),
        }
    }

    /// Inspect one request; returns every signal it trips.
    pub fn inspect(&mut self, target_domain: Option<&str>, payload: &Value) -> Vec<AnomalySignal> {
        self.inspect_at(target_domain, payload, Instant::now())
    }

    fn inspect_at(
        &mut self,
        target_domain: Option<&str>,
        payload: &Value,
        now: Instant,
    ) -> Vec<AnomalySignal> {
        let mut signals = Vec::new();

        let window = Duration::from_millis(self.config.burst_window_ms);
        while let Some(front) = self.recent.front() {
            if now.duration_since(*front) >= window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back(now);
        if self.recent.len() > self.config.burst_threshold as usize {
            signals.push(AnomalySignal::Burst);
        }

        if let Some(domain) = target_domain {
            let domain = domain.to_ascii_lowercase();
            if self.seen_domains.insert(domain.clone()) {
                debug!(domain = %domain, "first contact with domain");
                signals.push(AnomalySignal::NewDomain);
            }
        }

        let payload_len = serde_json::to_string(payload).map_or(0, |s| s.len());
        if payload_len > self.config.max_payload_bytes {
            signals.push(AnomalySignal::LargePayload);
        }

        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector(threshold: u32) -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig {
            burst_threshold: threshold,
            burst_window_ms: 10_000,
            max_payload_bytes: 64,
        })
    }

    #[test]
    fn test_burst_flags_after_threshold() {
        let mut d = detector(5);
        let start = Instant::now();
        for i in 0..5 {
            let signals = d.inspect_at(None, &json!({}), start + Duration::from_millis(i));
            assert!(!signals.contains(&AnomalySignal::Burst), "request {i}");
        }
        let signals = d.inspect_at(None, &json!({}), start + Duration::from_millis(5));
        assert!(signals.contains(&AnomalySignal::Burst));
    }

    #[test]
    fn test_burst_window_slides() {
        let mut d = detector(2);
        let start = Instant::now();
        d.inspect_at(None, &json!({}), start);
        d.inspect_at(None, &json!({}), start + Duration::from_millis(1));
        // Third inside the window trips the threshold of 2.
        let signals = d.inspect_at(None, &json!({}), start + Duration::from_millis(2));
        assert!(signals.contains(&AnomalySignal::Burst));

        // Far enough out, the window has drained.
        let signals = d.inspect_at(None, &json!({}), start + Duration::from_millis(20_000));
        assert!(!signals.contains(&AnomalySignal::Burst));
    }

    #[test]
    fn test_new_domain_flags_once() {
        let mut d = detector(100);
        let signals = d.inspect(Some("api.example.com"), &json!({}));
        assert!(signals.contains(&AnomalySignal::NewDomain));

        let signals = d.inspect(Some("api.example.com"), &json!({}));
        assert!(!signals.contains(&AnomalySignal::NewDomain));

        let signals = d.inspect(Some("API.EXAMPLE.COM"), &json!({}));
        assert!(!signals.contains(&AnomalySignal::NewDomain), "case-insensitive");

        let signals = d.inspect(Some("other.example.com"), &json!({}));
        assert!(signals.contains(&AnomalySignal::NewDomain));
    }

    #[test]
    fn test_no_domain_no_new_domain_signal() {
        let mut d = detector(100);
        let signals = d.inspect(None, &json!({}));
        assert!(!signals.contains(&AnomalySignal::NewDomain));
    }

    #[test]
    fn test_large_payload() {
        let mut d = detector(100);
        let signals = d.inspect(None, &json!({"body": "x".repeat(100)}));
        assert!(signals.contains(&AnomalySignal::LargePayload));

        let signals = d.inspect(None, &json!({"body": "small"}));
        assert!(!signals.contains(&AnomalySignal::LargePayload));
    }

    #[test]
    fn test_signals_combine() {
        let mut d = detector(1);
        d.inspect(None, &json!({}));
        let signals = d.inspect(Some("fresh.example"), &json!({"body": "y".repeat(100)}));
        assert!(signals.contains(&AnomalySignal::Burst));
        assert!(signals.contains(&AnomalySignal::NewDomain));
        assert!(signals.contains(&AnomalySignal::LargePayload));
    }

    #[test]
    fn test_signal_wire_names() {
        assert_eq!(
            serde_json::to_value(AnomalySignal::NewDomain).expect("serialize"),
            json!("new_domain")
        );
        assert_eq!(AnomalySignal::Burst.as_str(), "burst");
        assert_eq!(AnomalySignal::LargePayload.as_str(), "large_payload");
    }
}
