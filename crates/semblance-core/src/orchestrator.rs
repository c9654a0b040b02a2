//! The orchestrator — the thin spine that wires the core together.
//!
//! Turns an intent into a signed ActionRequest, asks the policy engine,
//! runs the approval flow, records the pattern after the decision is
//! final, dispatches over IPC, issues witness attestations for
//! autonomous premium actions, and drives inheritance activations.

use crate::signer::RequestSigner;
use crate::{CoreError, CoreResult};
use semblance_crypto::DeviceIdentity;
use semblance_inherit::{
    ActionDisposition, InheritanceConfig, InheritanceEngine, SimulatedStep,
};
use semblance_ipc::CoreClient;
use semblance_policy::{
    domain_of, ActionOrigin, ApprovalPatternTracker, AutonomyManager, AutonomyTier,
    InheritanceGuard, PolicyDecision, PolicyEngine,
};
use semblance_proto::{ActionResponse, ActionType, ErrorCode, ResponseStatus};
use semblance_witness::{AttestationSigner, WitnessGenerator};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

// ─── Approval flow ───────────────────────────────────────────────────────────

/// How approval requests reach the user.
pub trait ApprovalProvider: Send + Sync {
    fn request_approval(&self, action: ActionType, sub_type: &str, payload: &Value) -> bool;
}

/// Approves everything; used by `--yes` runs and tests.
pub struct AutoApprove;

impl ApprovalProvider for AutoApprove {
    fn request_approval(&self, _: ActionType, _: &str, _: &Value) -> bool {
        true
    }
}

/// Callback fired when a pattern crosses its routine threshold, so the
/// UI can offer "stop asking about this?".
pub type EscalationListener = Box<dyn Fn(ActionType, &str) + Send + Sync>;

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum IntentOutcome {
    Executed(ActionResponse),
    Denied { code: ErrorCode },
    RejectedByUser,
}

/// Summary of one inheritance activation run.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub executed: Vec<String>,
    pub skipped: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Premium accounts get witness attestations for autonomous actions.
    pub premium: bool,
    pub time_lock_hours: i64,
    pub require_all_parties_for_deletion: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            premium: false,
            time_lock_hours: 72,
            require_all_parties_for_deletion: true,
        }
    }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct Orchestrator {
    policy: PolicyEngine,
    patterns: ApprovalPatternTracker,
    inherit: InheritanceEngine,
    signer: RequestSigner,
    client: CoreClient,
    witness: Option<WitnessGenerator>,
    approval: Arc<dyn ApprovalProvider>,
    escalation_listeners: Vec<EscalationListener>,
}

impl Orchestrator {
    pub fn new(
        root: &Path,
        client: CoreClient,
        signer: RequestSigner,
        approval: Arc<dyn ApprovalProvider>,
        options: OrchestratorOptions,
    ) -> Self {
        let guard = InheritanceGuard::new();
        let policy = PolicyEngine::new(AutonomyManager::new(root), guard.clone());
        let patterns = ApprovalPatternTracker::new(root);
        let inherit = InheritanceEngine::new(
            root,
            InheritanceConfig {
                time_lock_hours: options.time_lock_hours,
                require_all_parties_for_deletion: options.require_all_parties_for_deletion,
            },
            guard,
        );

        let witness = if options.premium {
            match DeviceIdentity::load_or_create(&root.join("device.json")) {
                Ok(identity) => {
                    let device_id = identity.device_id.clone();
                    Some(WitnessGenerator::new(
                        root,
                        AttestationSigner::ed25519(identity),
                        &device_id,
                    ))
                }
                Err(e) => {
                    warn!(error = %e, "device identity unavailable, witnessing disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            policy,
            patterns,
            inherit,
            signer,
            client,
            witness,
            approval,
            escalation_listeners: Vec::new(),
        }
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PolicyEngine {
        &mut self.policy
    }

    pub fn patterns(&self) -> &ApprovalPatternTracker {
        &self.patterns
    }

    /// Mutable access for UI-driven pattern maintenance (e.g. the user
    /// revoking a routine escalation).
    pub fn patterns_mut(&mut self) -> &mut ApprovalPatternTracker {
        &mut self.patterns
    }

    pub fn inherit(&self) -> &InheritanceEngine {
        &self.inherit
    }

    pub fn inherit_mut(&mut self) -> &mut InheritanceEngine {
        &mut self.inherit
    }

    pub fn witness(&self) -> Option<&WitnessGenerator> {
        self.witness.as_ref()
    }

    pub fn on_escalation(&mut self, listener: EscalationListener) {
        self.escalation_listeners.push(listener);
    }

    /// One user intent, end to end.
    pub async fn handle_intent(
        &mut self,
        action: ActionType,
        payload: Value,
    ) -> CoreResult<IntentOutcome> {
        let outcome = self
            .policy
            .evaluate(action, &payload, ActionOrigin::User, &self.patterns);
        let tier = outcome.tier;
        let sub_type = outcome.sub_type.clone();

        match outcome.decision {
            PolicyDecision::Deny { code } => {
                info!(action = %action, code = %code, "intent denied by policy");
                Ok(IntentOutcome::Denied { code })
            }

            PolicyDecision::RequiresApproval => {
                let approved = self.approval.request_approval(action, &sub_type, &payload);
                if !approved {
                    // Decision final: record, surface, stop.
                    self.patterns.record_rejection(action, &sub_type);
                    return Ok(IntentOutcome::RejectedByUser);
                }
                self.record_approval(action, &sub_type);
                let response = self
                    .dispatch(action, payload, tier, true, true, false, &sub_type)
                    .await?;
                Ok(IntentOutcome::Executed(response))
            }

            PolicyDecision::AutoApprove => {
                self.record_approval(action, &sub_type);
                let (required, given) = if outcome.escalated {
                    // Routine-pattern downgrade: the gate existed, the
                    // streak answered it.
                    (true, true)
                } else {
                    (false, false)
                };
                let response = self
                    .dispatch(action, payload, tier, required, given, true, &sub_type)
                    .await?;
                Ok(IntentOutcome::Executed(response))
            }
        }
    }

    fn record_approval(&mut self, action: ActionType, sub_type: &str) {
        let (_, crossed) = self.patterns.record_approval(action, sub_type);
        if crossed {
            for listener in &self.escalation_listeners {
                listener(action, sub_type);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &mut self,
        action: ActionType,
        mut payload: Value,
        tier: AutonomyTier,
        approval_required: bool,
        approval_given: bool,
        autonomous: bool,
        sub_type: &str,
    ) -> CoreResult<ActionResponse> {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "policy".to_string(),
                json!({
                    "tier": tier.as_str(),
                    "approvalRequired": approval_required,
                    "approvalGiven": approval_given,
                    "estimatedTimeSavedSeconds": estimate_time_saved(action),
                }),
            );
        }

        let request = self.signer.sign_request(action, payload);
        let response = self.client.call_with_retry(&request).await?;

        if autonomous && response.status == ResponseStatus::Success {
            self.issue_witness(&response.audit_ref, &action_summary(action, sub_type), tier);
        }

        Ok(response)
    }

    fn issue_witness(&mut self, audit_ref: &str, summary: &str, tier: AutonomyTier) {
        let Some(witness) = self.witness.as_mut() else {
            return;
        };
        if audit_ref.is_empty() {
            return;
        }
        if let Err(e) = witness.issue(audit_ref, summary, tier.as_str()) {
            warn!(error = %e, "failed to issue witness attestation");
        }
    }

    // ─── Inheritance execution ──────────────────────────────────────────

    /// Drive an executing activation to completion. Every action goes
    /// through the normal signed IPC path so the gateway audits it.
    pub async fn run_activation(&mut self, activation_id: &str) -> CoreResult<ExecutionReport> {
        let mut report = ExecutionReport::default();

        loop {
            match self.inherit.begin_next(activation_id)? {
                ActionDisposition::Completed => break,

                ActionDisposition::Skipped { action, reason } => {
                    report.skipped.push((action.label, reason.to_string()));
                    // Skipping the final action completes the activation.
                    let done = self
                        .inherit
                        .activation(activation_id)
                        .is_some_and(|a| a.state.is_terminal());
                    if done {
                        break;
                    }
                }

                ActionDisposition::Execute(action) => {
                    let tier = self.policy.autonomy().tier_for(domain_of(action.action_type));
                    let response = self
                        .dispatch(
                            action.action_type,
                            action.payload.clone(),
                            tier,
                            false,
                            false,
                            false,
                            "default",
                        )
                        .await?;

                    // The gateway audited whatever happened; the sequence
                    // marches on either way.
                    let updated = self.inherit.complete_current(activation_id)?;

                    if response.status == ResponseStatus::Success {
                        self.issue_witness(&response.audit_ref, &action.label, tier);
                        report.executed.push(action.label);
                    } else {
                        let reason = response
                            .error
                            .map(|e| e.code.to_string())
                            .unwrap_or_else(|| response.status.to_string());
                        report.skipped.push((action.label, reason));
                    }

                    if updated.state.is_terminal() {
                        break;
                    }
                }
            }
        }

        info!(
            activation_id,
            executed = report.executed.len(),
            skipped = report.skipped.len(),
            "activation run finished"
        );
        Ok(report)
    }

    /// Simulate a party's sequence and record the dry run in the audit
    /// trail as a first-class `inheritance.test-run` action.
    pub async fn test_run(&mut self, party_id: &str) -> CoreResult<Vec<SimulatedStep>> {
        let steps = self.inherit.simulate(party_id)?;

        let payload = json!({
            "partyId": party_id,
            "steps": steps.len(),
            "wouldExecute": steps.iter().filter(|s| s.would_execute).count(),
        });
        if let Err(e) = self.handle_intent(ActionType::InheritanceTestRun, payload).await {
            warn!(error = %e, "test-run audit dispatch failed");
        }

        Ok(steps)
    }
}

// ─── Heuristics ──────────────────────────────────────────────────────────────

/// Rough per-action time-saved estimate, surfaced in audit aggregation.
fn estimate_time_saved(action: ActionType) -> i64 {
    use ActionType::*;
    match action {
        EmailSend | EmailDraft => 120,
        EmailFetch | EmailMarkRead => 15,
        EmailArchive | EmailMove => 30,
        CalendarFetch => 15,
        CalendarCreate | CalendarUpdate | CalendarDelete => 60,
        FinanceFetchTransactions | HealthFetch => 45,
        ServiceApiCall | WebSearch => 30,
        NetworkStartDiscovery | NetworkStopDiscovery | ModelDownload => 0,
        InheritanceTestRun => 0,
    }
}

/// Content-free summary for witness attestations.
fn action_summary(action: ActionType, sub_type: &str) -> String {
    format!("{action} ({sub_type})")
}
