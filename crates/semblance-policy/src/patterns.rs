//! Approval pattern tracking — the persisted memory behind escalation.
//!
//! Patterns are keyed by `(action, sub_type)`. Enough consecutive
//! approvals of the same key make it routine; a single rejection resets
//! the streak. The caller records each logical user decision exactly once.

use chrono::{DateTime, Utc};
use semblance_persist::StateStore;
use semblance_proto::ActionType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_AUTO_EXECUTE_THRESHOLD: u32 = 3;

/// Derive the deterministic sub-type for a pattern key.
///
/// The derivation is a pure function of `(action, payload)` so the same
/// intent always lands on the same counter.
pub fn derive_sub_type(action: ActionType, payload: &Value) -> &'static str {
    match action {
        ActionType::EmailSend => {
            if payload.get("replyToMessageId").is_some() {
                "reply"
            } else {
                "new"
            }
        }
        ActionType::CalendarCreate => {
            if payload.get("recurrence").is_some() {
                "recurring"
            } else {
                "single"
            }
        }
        _ => "default",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPattern {
    pub action: ActionType,
    pub sub_type: String,
    pub consecutive_approvals: u32,
    pub total_approvals: u32,
    pub total_rejections: u32,
    pub last_approval_at: Option<DateTime<Utc>>,
    pub last_rejection_at: Option<DateTime<Utc>>,
    pub auto_execute_threshold: u32,
}

impl ApprovalPattern {
    fn new(action: ActionType, sub_type: &str, threshold: u32) -> Self {
        Self {
            action,
            sub_type: sub_type.to_string(),
            consecutive_approvals: 0,
            total_approvals: 0,
            total_rejections: 0,
            last_approval_at: None,
            last_rejection_at: None,
            auto_execute_threshold: threshold,
        }
    }

    pub fn is_routine(&self) -> bool {
        self.consecutive_approvals >= self.auto_execute_threshold
    }
}

/// Persisted `(action, sub_type)` → counters store. Core-owned.
pub struct ApprovalPatternTracker {
    patterns: HashMap<String, ApprovalPattern>,
    store: StateStore,
    default_threshold: u32,
}

fn key_of(action: ActionType, sub_type: &str) -> String {
    format!("{action}:{sub_type}")
}

impl ApprovalPatternTracker {
    pub fn new(root: &Path) -> Self {
        let store = StateStore::new(root, "approval_patterns");
        let patterns = store.load();
        debug!(count = patterns.len(), "loaded approval patterns");
        Self {
            patterns,
            store,
            default_threshold: DEFAULT_AUTO_EXECUTE_THRESHOLD,
        }
    }

    /// Threshold applied to patterns created from now on. Existing rows
    /// keep the threshold they were created with; no back-fill.
    pub fn set_default_threshold(&mut self, threshold: u32) {
        self.default_threshold = threshold;
    }

    pub fn get(&self, action: ActionType, sub_type: &str) -> Option<&ApprovalPattern> {
        self.patterns.get(&key_of(action, sub_type))
    }

    /// True iff the pattern exists and its streak has reached threshold.
    pub fn is_routine(&self, action: ActionType, sub_type: &str) -> bool {
        self.get(action, sub_type).is_some_and(|p| p.is_routine())
    }

    /// Record a user (or auto) approval. Returns the updated pattern and
    /// whether this approval crossed the routine threshold.
    pub fn record_approval(&mut self, action: ActionType, sub_type: &str) -> (ApprovalPattern, bool) {
        let threshold = self.default_threshold;
        let entry = self
            .patterns
            .entry(key_of(action, sub_type))
            .or_insert_with(|| ApprovalPattern::new(action, sub_type, threshold));

        let was_routine = entry.is_routine();
        entry.consecutive_approvals += 1;
        entry.total_approvals += 1;
        entry.last_approval_at = Some(Utc::now());
        let crossed = !was_routine && entry.is_routine();
        if crossed {
            info!(action = %action, sub_type, "approval pattern became routine");
        }
        let snapshot = entry.clone();
        self.snapshot();
        (snapshot, crossed)
    }

    /// Record a user rejection. The streak resets to zero.
    pub fn record_rejection(&mut self, action: ActionType, sub_type: &str) -> ApprovalPattern {
        let threshold = self.default_threshold;
        let entry = self
            .patterns
            .entry(key_of(action, sub_type))
            .or_insert_with(|| ApprovalPattern::new(action, sub_type, threshold));

        entry.consecutive_approvals = 0;
        entry.total_rejections += 1;
        entry.last_rejection_at = Some(Utc::now());
        info!(action = %action, sub_type, "rejection recorded, streak reset");
        let snapshot = entry.clone();
        self.snapshot();
        snapshot
    }

    pub fn all(&self) -> Vec<&ApprovalPattern> {
        self.patterns.values().collect()
    }

    fn snapshot(&self) {
        if let Err(e) = self.store.save(&self.patterns) {
            warn!(error = %e, "failed to snapshot approval patterns");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracker() -> (tempfile::TempDir, ApprovalPatternTracker) {
        let dir = tempfile::tempdir().expect("tempdir");
        let t = ApprovalPatternTracker::new(dir.path());
        (dir, t)
    }

    #[test]
    fn test_sub_type_email_send() {
        assert_eq!(
            derive_sub_type(ActionType::EmailSend, &json!({"replyToMessageId": "m-1"})),
            "reply"
        );
        assert_eq!(
            derive_sub_type(ActionType::EmailSend, &json!({"to": ["a@x"]})),
            "new"
        );
    }

    #[test]
    fn test_sub_type_calendar_create() {
        assert_eq!(
            derive_sub_type(ActionType::CalendarCreate, &json!({"recurrence": "weekly"})),
            "recurring"
        );
        assert_eq!(derive_sub_type(ActionType::CalendarCreate, &json!({})), "single");
    }

    #[test]
    fn test_sub_type_default() {
        assert_eq!(derive_sub_type(ActionType::EmailArchive, &json!({})), "default");
        assert_eq!(derive_sub_type(ActionType::WebSearch, &json!({"q": "x"})), "default");
    }

    #[test]
    fn test_consecutive_approvals_strictly_increase() {
        let (_dir, mut t) = tracker();
        for n in 1..=5u32 {
            let (p, _) = t.record_approval(ActionType::EmailArchive, "default");
            assert_eq!(p.consecutive_approvals, n);
            assert_eq!(p.total_approvals, n);
        }
    }

    #[test]
    fn test_rejection_resets_streak_only() {
        let (_dir, mut t) = tracker();
        t.record_approval(ActionType::EmailArchive, "default");
        t.record_approval(ActionType::EmailArchive, "default");
        let p = t.record_rejection(ActionType::EmailArchive, "default");

        assert_eq!(p.consecutive_approvals, 0);
        assert_eq!(p.total_approvals, 2);
        assert_eq!(p.total_rejections, 1);
        assert!(p.last_rejection_at.is_some());
    }

    #[test]
    fn test_routine_at_threshold() {
        let (_dir, mut t) = tracker();
        assert!(!t.is_routine(ActionType::EmailArchive, "default"));

        t.record_approval(ActionType::EmailArchive, "default");
        t.record_approval(ActionType::EmailArchive, "default");
        let (_, crossed) = t.record_approval(ActionType::EmailArchive, "default");

        assert!(crossed, "third approval crosses the default threshold");
        assert!(t.is_routine(ActionType::EmailArchive, "default"));

        // Further approvals stay routine but don't re-cross.
        let (_, crossed) = t.record_approval(ActionType::EmailArchive, "default");
        assert!(!crossed);
    }

    #[test]
    fn test_rejection_revokes_routine() {
        let (_dir, mut t) = tracker();
        for _ in 0..3 {
            t.record_approval(ActionType::CalendarUpdate, "default");
        }
        assert!(t.is_routine(ActionType::CalendarUpdate, "default"));

        t.record_rejection(ActionType::CalendarUpdate, "default");
        assert!(!t.is_routine(ActionType::CalendarUpdate, "default"));
    }

    #[test]
    fn test_sub_types_tracked_separately() {
        let (_dir, mut t) = tracker();
        for _ in 0..3 {
            t.record_approval(ActionType::EmailSend, "reply");
        }
        assert!(t.is_routine(ActionType::EmailSend, "reply"));
        assert!(!t.is_routine(ActionType::EmailSend, "new"));
    }

    #[test]
    fn test_threshold_change_no_backfill() {
        let (_dir, mut t) = tracker();
        t.record_approval(ActionType::EmailArchive, "default");
        t.set_default_threshold(1);

        // Existing pattern keeps its original threshold of 3.
        assert!(!t.is_routine(ActionType::EmailArchive, "default"));

        // A new pattern picks up the new threshold.
        t.record_approval(ActionType::EmailMove, "default");
        assert!(t.is_routine(ActionType::EmailMove, "default"));
    }

    #[test]
    fn test_patterns_persist_across_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let mut t = ApprovalPatternTracker::new(dir.path());
            for _ in 0..3 {
                t.record_approval(ActionType::EmailArchive, "default");
            }
        }
        let t = ApprovalPatternTracker::new(dir.path());
        assert!(t.is_routine(ActionType::EmailArchive, "default"));
    }
}
