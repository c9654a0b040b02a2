//! Policy engine for the Semblance action plane.
//!
//! Maps each action to a life domain, looks up the effective autonomy
//! tier, and resolves the frozen capability matrix into one of three
//! decisions: auto-approve, require approval, or deny. Approval patterns
//! can downgrade a required approval to automatic — never for
//! `email.send`.

#![forbid(unsafe_code)]

mod autonomy;
mod patterns;

pub use autonomy::{
    AutonomyConfig, AutonomyManager, AutonomyTier, Domain, InheritanceGuard, TierListener,
};
pub use patterns::{
    derive_sub_type, ApprovalPattern, ApprovalPatternTracker, DEFAULT_AUTO_EXECUTE_THRESHOLD,
};

use semblance_proto::{ActionType, ErrorCode};
use serde_json::Value;
use tracing::debug;

// ─── Action classification ───────────────────────────────────────────────────

/// Capability class of an action, the row axis of the tier matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Pure reads (`*.fetch` and friends).
    Read,
    /// Local artifact creation; nothing leaves the machine.
    DraftCreate,
    /// Sends, mutations of remote state, external calls.
    External,
}

/// Fixed action → domain table.
pub fn domain_of(action: ActionType) -> Domain {
    use ActionType::*;
    match action {
        EmailFetch | EmailSend | EmailDraft | EmailArchive | EmailMove | EmailMarkRead => {
            Domain::Email
        }
        CalendarFetch | CalendarCreate | CalendarUpdate | CalendarDelete => Domain::Calendar,
        FinanceFetchTransactions => Domain::Finances,
        HealthFetch => Domain::Health,
        ServiceApiCall | WebSearch | NetworkStartDiscovery | NetworkStopDiscovery
        | ModelDownload | InheritanceTestRun => Domain::Services,
    }
}

/// Fixed action → capability class table.
pub fn classify(action: ActionType) -> ActionClass {
    use ActionType::*;
    match action {
        EmailFetch | CalendarFetch | FinanceFetchTransactions | HealthFetch => ActionClass::Read,
        EmailDraft | CalendarCreate => ActionClass::DraftCreate,
        EmailSend | EmailArchive | EmailMove | EmailMarkRead | CalendarUpdate | CalendarDelete
        | ServiceApiCall | WebSearch | NetworkStartDiscovery | NetworkStopDiscovery
        | ModelDownload | InheritanceTestRun => ActionClass::External,
    }
}

// ─── Decisions ───────────────────────────────────────────────────────────────

/// Where a request originated, for the inheritance guard short-circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOrigin {
    /// A live user intent through the orchestrator.
    User,
    /// The inheritance executor working through an activation.
    InheritanceExecutor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    AutoApprove,
    RequiresApproval,
    Deny { code: ErrorCode },
}

/// Full result of a policy evaluation.
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub decision: PolicyDecision,
    pub domain: Domain,
    pub tier: AutonomyTier,
    pub sub_type: String,
    /// True when a required approval was downgraded by a routine pattern.
    pub escalated: bool,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Resolves requests against the guard, the tier matrix, and approval
/// patterns. Owns the autonomy manager; the pattern tracker is passed per
/// evaluation because the orchestrator also mutates it.
pub struct PolicyEngine {
    autonomy: AutonomyManager,
    guard: InheritanceGuard,
}

impl PolicyEngine {
    pub fn new(autonomy: AutonomyManager, guard: InheritanceGuard) -> Self {
        Self { autonomy, guard }
    }

    pub fn autonomy(&self) -> &AutonomyManager {
        &self.autonomy
    }

    pub fn autonomy_mut(&mut self) -> &mut AutonomyManager {
        &mut self.autonomy
    }

    pub fn guard(&self) -> &InheritanceGuard {
        &self.guard
    }

    /// The frozen capability matrix.
    fn matrix(tier: AutonomyTier, class: ActionClass, action: ActionType) -> PolicyDecision {
        match (tier, class) {
            (AutonomyTier::Guardian, _) => PolicyDecision::RequiresApproval,
            (AutonomyTier::Partner, ActionClass::Read | ActionClass::DraftCreate) => {
                PolicyDecision::AutoApprove
            }
            (AutonomyTier::Partner, ActionClass::External) => PolicyDecision::RequiresApproval,
            (AutonomyTier::AlterEgo, ActionClass::Read | ActionClass::DraftCreate) => {
                PolicyDecision::AutoApprove
            }
            (AutonomyTier::AlterEgo, ActionClass::External) => {
                if action == ActionType::EmailSend {
                    PolicyDecision::RequiresApproval
                } else {
                    PolicyDecision::AutoApprove
                }
            }
        }
    }

    /// Decide what happens to an action before it is signed or sent.
    pub fn evaluate(
        &self,
        action: ActionType,
        payload: &Value,
        origin: ActionOrigin,
        patterns: &ApprovalPatternTracker,
    ) -> PolicyOutcome {
        let domain = domain_of(action);
        let tier = self.autonomy.tier_for(domain);
        let sub_type = derive_sub_type(action, payload).to_string();

        if self.guard.is_enabled() && origin != ActionOrigin::InheritanceExecutor {
            return PolicyOutcome {
                decision: PolicyDecision::Deny {
                    code: ErrorCode::DeniedByInheritanceGuard,
                },
                domain,
                tier,
                sub_type,
                escalated: false,
            };
        }

        let mut decision = Self::matrix(tier, classify(action), action);
        let mut escalated = false;

        // Routine-pattern downgrade. email.send is the explicit exception:
        // it always keeps its approval gate.
        if decision == PolicyDecision::RequiresApproval
            && action != ActionType::EmailSend
            && patterns.is_routine(action, &sub_type)
        {
            decision = PolicyDecision::AutoApprove;
            escalated = true;
        }

        debug!(
            action = %action,
            domain = %domain,
            tier = %tier,
            sub_type,
            escalated,
            ?decision,
            "policy evaluated"
        );

        PolicyOutcome {
            decision,
            domain,
            tier,
            sub_type,
            escalated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine_with_tier(dir: &std::path::Path, tier: AutonomyTier) -> PolicyEngine {
        let mut mgr = AutonomyManager::new(dir);
        mgr.set_default_tier(tier);
        PolicyEngine::new(mgr, InheritanceGuard::new())
    }

    #[test]
    fn test_every_action_has_domain_and_class() {
        for action in ActionType::ALL {
            let _ = domain_of(action);
            let _ = classify(action);
        }
    }

    #[test]
    fn test_domain_table() {
        assert_eq!(domain_of(ActionType::EmailMarkRead), Domain::Email);
        assert_eq!(domain_of(ActionType::CalendarDelete), Domain::Calendar);
        assert_eq!(domain_of(ActionType::FinanceFetchTransactions), Domain::Finances);
        assert_eq!(domain_of(ActionType::HealthFetch), Domain::Health);
        assert_eq!(domain_of(ActionType::WebSearch), Domain::Services);
        assert_eq!(domain_of(ActionType::InheritanceTestRun), Domain::Services);
    }

    #[test]
    fn test_guardian_requires_approval_for_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::Guardian);
        let patterns = ApprovalPatternTracker::new(dir.path());

        for action in ActionType::ALL {
            let out = engine.evaluate(action, &json!({}), ActionOrigin::User, &patterns);
            assert_eq!(
                out.decision,
                PolicyDecision::RequiresApproval,
                "guardian must gate {action}"
            );
        }
    }

    #[test]
    fn test_partner_auto_approves_reads_and_drafts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::Partner);
        let patterns = ApprovalPatternTracker::new(dir.path());

        for action in [
            ActionType::EmailFetch,
            ActionType::CalendarFetch,
            ActionType::EmailDraft,
            ActionType::CalendarCreate,
        ] {
            let out = engine.evaluate(action, &json!({}), ActionOrigin::User, &patterns);
            assert_eq!(out.decision, PolicyDecision::AutoApprove, "{action}");
        }

        let out = engine.evaluate(ActionType::EmailSend, &json!({}), ActionOrigin::User, &patterns);
        assert_eq!(out.decision, PolicyDecision::RequiresApproval);
    }

    #[test]
    fn test_alter_ego_gates_only_email_send() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::AlterEgo);
        let patterns = ApprovalPatternTracker::new(dir.path());

        let out = engine.evaluate(ActionType::EmailSend, &json!({}), ActionOrigin::User, &patterns);
        assert_eq!(out.decision, PolicyDecision::RequiresApproval);

        for action in [
            ActionType::EmailArchive,
            ActionType::CalendarDelete,
            ActionType::ServiceApiCall,
            ActionType::ModelDownload,
        ] {
            let out = engine.evaluate(action, &json!({}), ActionOrigin::User, &patterns);
            assert_eq!(out.decision, PolicyDecision::AutoApprove, "{action}");
        }
    }

    #[test]
    fn test_routine_pattern_downgrades() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::Partner);
        let mut patterns = ApprovalPatternTracker::new(dir.path());

        for _ in 0..3 {
            patterns.record_approval(ActionType::EmailArchive, "default");
        }

        let out = engine.evaluate(
            ActionType::EmailArchive,
            &json!({}),
            ActionOrigin::User,
            &patterns,
        );
        assert_eq!(out.decision, PolicyDecision::AutoApprove);
        assert!(out.escalated);
    }

    #[test]
    fn test_email_send_never_escalates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::Partner);
        let mut patterns = ApprovalPatternTracker::new(dir.path());

        for _ in 0..10 {
            patterns.record_approval(ActionType::EmailSend, "new");
        }
        assert!(patterns.is_routine(ActionType::EmailSend, "new"));

        let out = engine.evaluate(
            ActionType::EmailSend,
            &json!({"to": ["a@x"]}),
            ActionOrigin::User,
            &patterns,
        );
        assert_eq!(out.decision, PolicyDecision::RequiresApproval);
        assert!(!out.escalated);
    }

    #[test]
    fn test_rejection_restores_approval_gate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::Partner);
        let mut patterns = ApprovalPatternTracker::new(dir.path());

        for _ in 0..3 {
            patterns.record_approval(ActionType::EmailArchive, "default");
        }
        patterns.record_rejection(ActionType::EmailArchive, "default");

        let out = engine.evaluate(
            ActionType::EmailArchive,
            &json!({}),
            ActionOrigin::User,
            &patterns,
        );
        assert_eq!(out.decision, PolicyDecision::RequiresApproval);
    }

    #[test]
    fn test_guard_blocks_user_actions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::AlterEgo);
        let patterns = ApprovalPatternTracker::new(dir.path());

        engine.guard().enable();
        let out = engine.evaluate(ActionType::EmailFetch, &json!({}), ActionOrigin::User, &patterns);
        assert_eq!(
            out.decision,
            PolicyDecision::Deny {
                code: ErrorCode::DeniedByInheritanceGuard
            }
        );
    }

    #[test]
    fn test_guard_passes_inheritance_executor() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::AlterEgo);
        let patterns = ApprovalPatternTracker::new(dir.path());

        engine.guard().enable();
        let out = engine.evaluate(
            ActionType::InheritanceTestRun,
            &json!({}),
            ActionOrigin::InheritanceExecutor,
            &patterns,
        );
        assert_eq!(out.decision, PolicyDecision::AutoApprove);
    }

    #[test]
    fn test_sub_type_flows_into_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_with_tier(dir.path(), AutonomyTier::Guardian);
        let patterns = ApprovalPatternTracker::new(dir.path());

        let out = engine.evaluate(
            ActionType::EmailSend,
            &json!({"replyToMessageId": "m-1"}),
            ActionOrigin::User,
            &patterns,
        );
        assert_eq!(out.sub_type, "reply");
    }
}
