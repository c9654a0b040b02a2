//! Sliding-window rate limiting, per action and global.
//!
//! State is in-memory by design: a restart is a privileged event that is
//! already audited, so the windows start fresh.

use semblance_proto::ActionType;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Window width in milliseconds.
    pub window_ms: u64,
    /// Explicit per-action limits; anything absent uses the default.
    pub per_action: HashMap<ActionType, u32>,
    pub default_per_action: u32,
    /// Across all actions.
    pub global_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            per_action: HashMap::new(),
            default_per_action: 30,
            global_limit: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_ms: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Sliding windows of request timestamps.
pub struct RateLimiter {
    config: RateLimitConfig,
    per_action: HashMap<ActionType, VecDeque<Instant>>,
    global: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            per_action: HashMap::new(),
            global: VecDeque::new(),
        }
    }

    /// Admit or reject one request at the current instant.
    pub fn check(&mut self, action: ActionType) -> RateDecision {
        self.check_at(action, Instant::now())
    }

    fn check_at(&mut self, action: ActionType, now: Instant) -> RateDecision {
        let window = Duration::from_millis(self.config.window_ms);
        prune(&mut self.global, now, window);
        let actions = self.per_action.entry(action).or_default();
        prune(actions, now, window);

        if self.global.len() >= self.config.global_limit as usize {
            let decision = limited(&self.global, now, self.config.window_ms);
            warn!(action = %action, "global rate limit exceeded");
            return decision;
        }

        let limit = self
            .config
            .per_action
            .get(&action)
            .copied()
            .unwrap_or(self.config.default_per_action);
        if actions.len() >= limit as usize {
            let decision = limited(actions, now, self.config.window_ms);
            warn!(action = %action, limit, "per-action rate limit exceeded");
            return decision;
        }

        actions.push_back(now);
        self.global.push_back(now);
        RateDecision::Allowed
    }

    /// Current in-window count for an action (diagnostics).
    pub fn in_window(&self, action: ActionType) -> usize {
        self.per_action.get(&action).map_or(0, |w| w.len())
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, width: Duration) {
    while let Some(front) = window.front() {
        if now.duration_since(*front) >= width {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn limited(window: &VecDeque<Instant>, now: Instant, window_ms: u64) -> RateDecision {
    let elapsed = window
        .front()
        .map(|oldest| now.duration_since(*oldest).as_millis() as u64)
        .unwrap_or(0);
    RateDecision::Limited {
        retry_after_ms: window_ms.saturating_sub(elapsed),
    }
}
