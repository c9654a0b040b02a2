//! The activation state machine and inheritance engine.
//!
//! ```text
//! inactive → time_locked → (paused_for_confirmation | executing) → completed
//!                │
//!                ▼
//!            cancelled
//! ```
//!
//! Cancellation is only possible while time-locked. The process guard is
//! enabled on the first live activation and disabled when none remain.

use crate::package::{open_package, EncryptedActivationPackage};
use crate::party::{InheritanceAction, TrustedParty};
use crate::{InheritError, InheritResult};
use chrono::{DateTime, Duration, Utc};
use semblance_persist::StateStore;
use semblance_policy::InheritanceGuard;
use semblance_proto::ErrorCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ─── Activation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    Inactive,
    TimeLocked,
    Executing,
    PausedForConfirmation,
    Completed,
    Cancelled,
}

impl ActivationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::TimeLocked => "time_locked",
            Self::Executing => "executing",
            Self::PausedForConfirmation => "paused_for_confirmation",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One activation of one party's package. At most one non-terminal
/// activation exists per party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
    pub id: String,
    pub party_id: String,
    pub state: ActivationState,
    pub activated_at: DateTime<Utc>,
    pub time_lock_expires_at: DateTime<Utc>,
    pub actions_total: usize,
    pub actions_completed: usize,
    pub current_action_id: Option<String>,
    pub requires_step_confirmation: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritanceConfig {
    pub time_lock_hours: i64,
    /// When true, deletion-consensus actions need every trusted party's
    /// activation to be live.
    pub require_all_parties_for_deletion: bool,
}

impl Default for InheritanceConfig {
    fn default() -> Self {
        Self {
            time_lock_hours: 72,
            require_all_parties_for_deletion: true,
        }
    }
}

/// What the executor should do with the next action in sequence.
#[derive(Debug, Clone)]
pub enum ActionDisposition {
    /// Dispatch this action, then call `complete_current`.
    Execute(InheritanceAction),
    /// Consensus blocked it; already counted as processed.
    Skipped {
        action: InheritanceAction,
        reason: ErrorCode,
    },
    /// Nothing left; the activation is now completed.
    Completed,
}

/// One row of a test-run simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedStep {
    pub action_id: String,
    pub label: String,
    pub sequence_order: u32,
    pub would_execute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Core-owned inheritance engine: parties, configured actions, live
/// activations, and the guard lifecycle.
pub struct InheritanceEngine {
    config: InheritanceConfig,
    guard: InheritanceGuard,
    parties: HashMap<String, TrustedParty>,
    actions: HashMap<String, InheritanceAction>,
    activations: HashMap<String, Activation>,
    /// Decrypted, ordered action list per activation.
    installed: HashMap<String, Vec<InheritanceAction>>,
    party_store: StateStore,
    action_store: StateStore,
    activation_store: StateStore,
    installed_store: StateStore,
}

impl InheritanceEngine {
    pub fn new(root: &Path, config: InheritanceConfig, guard: InheritanceGuard) -> Self {
        let party_store = StateStore::new(root, "trusted_parties");
        let action_store = StateStore::new(root, "inheritance_actions");
        let activation_store = StateStore::new(root, "activations");
        let installed_store = StateStore::new(root, "activation_actions");

        let parties = party_store.load();
        let actions = action_store.load();
        let activations: HashMap<String, Activation> = activation_store.load();
        let installed = installed_store.load();

        // Restore the guard after restart: it stays up while any live
        // activation exists.
        if activations.values().any(|a| !a.state.is_terminal()) {
            guard.enable();
        }

        debug!(
            parties = parties.len(),
            activations = activations.len(),
            "inheritance engine loaded"
        );

        Self {
            config,
            guard,
            parties,
            actions,
            activations,
            installed,
            party_store,
            action_store,
            activation_store,
            installed_store,
        }
    }

    pub fn config(&self) -> &InheritanceConfig {
        &self.config
    }

    // ─── Parties & actions ──────────────────────────────────────────────

    pub fn add_party(&mut self, party: TrustedParty) -> String {
        let id = party.id.clone();
        info!(party_id = %id, name = %party.name, "trusted party added");
        self.parties.insert(id.clone(), party);
        self.snapshot_parties();
        id
    }

    pub fn party(&self, id: &str) -> Option<&TrustedParty> {
        self.parties.get(id)
    }

    pub fn parties(&self) -> Vec<&TrustedParty> {
        self.parties.values().collect()
    }

    pub fn add_action(&mut self, action: InheritanceAction) -> String {
        let id = action.id.clone();
        self.actions.insert(id.clone(), action);
        self.snapshot_actions();
        id
    }

    /// A party's configured actions, in sequence order.
    pub fn actions_for_party(&self, party_id: &str) -> Vec<InheritanceAction> {
        let mut out: Vec<InheritanceAction> = self
            .actions
            .values()
            .filter(|a| a.party_id == party_id)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.sequence_order);
        out
    }

    /// Seal the party's current action list into an activation package.
    pub fn build_package(
        &self,
        party_id: &str,
        passphrase: &str,
        requires_step_confirmation: bool,
        version: u8,
    ) -> InheritResult<EncryptedActivationPackage> {
        if !self.parties.contains_key(party_id) {
            return Err(InheritError::UnknownParty(party_id.to_string()));
        }
        let contents = crate::package::PackageContents {
            requires_step_confirmation,
            actions: self.actions_for_party(party_id),
        };
        crate::package::seal_package(party_id, passphrase, &contents, version)
    }

    // ─── Activation lifecycle ───────────────────────────────────────────

    pub fn activate(
        &mut self,
        package: &EncryptedActivationPackage,
        passphrase: &str,
    ) -> InheritResult<Activation> {
        self.activate_at(package, passphrase, Utc::now())
    }

    /// Activation with an explicit clock, used by the executor and tests.
    pub fn activate_at(
        &mut self,
        package: &EncryptedActivationPackage,
        passphrase: &str,
        now: DateTime<Utc>,
    ) -> InheritResult<Activation> {
        let party_id = package.header.party_id.clone();
        let party = self
            .parties
            .get(&party_id)
            .ok_or_else(|| InheritError::UnknownParty(party_id.clone()))?;

        if !party.passphrase_matches(passphrase) {
            warn!(party_id = %party_id, "activation rejected: passphrase mismatch");
            return Err(InheritError::PassphraseInvalid);
        }

        let contents = open_package(package, passphrase)?;

        if self
            .activations
            .values()
            .any(|a| a.party_id == party_id && !a.state.is_terminal())
        {
            return Err(InheritError::ActivationExists(party_id));
        }

        let mut installed = contents.actions;
        installed.sort_by_key(|a| a.sequence_order);

        let activation = Activation {
            id: Uuid::new_v4().to_string(),
            party_id: party_id.clone(),
            state: ActivationState::TimeLocked,
            activated_at: now,
            time_lock_expires_at: now + Duration::hours(self.config.time_lock_hours),
            actions_total: installed.len(),
            actions_completed: 0,
            current_action_id: None,
            requires_step_confirmation: contents.requires_step_confirmation,
            cancelled_at: None,
            completed_at: None,
        };

        info!(
            activation_id = %activation.id,
            party_id = %party_id,
            expires = %activation.time_lock_expires_at,
            actions = activation.actions_total,
            "activation created, time lock started"
        );

        self.installed.insert(activation.id.clone(), installed);
        self.activations
            .insert(activation.id.clone(), activation.clone());
        self.guard.enable();
        self.snapshot_activations();
        Ok(activation)
    }

    /// Cancel — permitted only while time-locked.
    pub fn cancel(&mut self, activation_id: &str) -> InheritResult<Activation> {
        let activation = self
            .activations
            .get_mut(activation_id)
            .ok_or_else(|| InheritError::UnknownActivation(activation_id.to_string()))?;

        if activation.state != ActivationState::TimeLocked {
            return Err(InheritError::CancelTooLate);
        }

        activation.state = ActivationState::Cancelled;
        activation.cancelled_at = Some(Utc::now());
        info!(activation_id, "activation cancelled");
        let result = activation.clone();
        self.sync_guard();
        self.snapshot_activations();
        Ok(result)
    }

    pub fn advance(&mut self, activation_id: &str) -> InheritResult<Activation> {
        self.advance_at(activation_id, Utc::now())
    }

    /// Advance past the time lock, once it has expired.
    pub fn advance_at(
        &mut self,
        activation_id: &str,
        now: DateTime<Utc>,
    ) -> InheritResult<Activation> {
        let activation = self
            .activations
            .get_mut(activation_id)
            .ok_or_else(|| InheritError::UnknownActivation(activation_id.to_string()))?;

        if activation.state != ActivationState::TimeLocked {
            return Err(InheritError::InvalidState(activation.state));
        }
        if now < activation.time_lock_expires_at {
            return Err(InheritError::TimeLockActive);
        }

        activation.state = if activation.requires_step_confirmation {
            ActivationState::PausedForConfirmation
        } else {
            ActivationState::Executing
        };
        info!(activation_id, state = %activation.state, "time lock expired, advancing");
        let result = activation.clone();
        self.snapshot_activations();
        Ok(result)
    }

    /// Confirm a paused step, resuming execution.
    pub fn confirm_step(&mut self, activation_id: &str) -> InheritResult<Activation> {
        let activation = self
            .activations
            .get_mut(activation_id)
            .ok_or_else(|| InheritError::UnknownActivation(activation_id.to_string()))?;

        if activation.state != ActivationState::PausedForConfirmation {
            return Err(InheritError::InvalidState(activation.state));
        }
        activation.state = ActivationState::Executing;
        let result = activation.clone();
        self.snapshot_activations();
        Ok(result)
    }

    // ─── Execution ──────────────────────────────────────────────────────

    /// Hand the executor its next action, enforcing deletion consensus.
    pub fn begin_next(&mut self, activation_id: &str) -> InheritResult<ActionDisposition> {
        let consensus = self.deletion_consensus_met();
        let activation = self
            .activations
            .get_mut(activation_id)
            .ok_or_else(|| InheritError::UnknownActivation(activation_id.to_string()))?;

        if activation.state != ActivationState::Executing {
            return Err(InheritError::InvalidState(activation.state));
        }

        let installed = self
            .installed
            .get(activation_id)
            .cloned()
            .unwrap_or_default();

        if activation.actions_completed >= activation.actions_total {
            Self::mark_completed(activation);
            let disposition = ActionDisposition::Completed;
            self.sync_guard();
            self.snapshot_activations();
            return Ok(disposition);
        }

        let action = installed[activation.actions_completed].clone();

        if action.requires_deletion_consensus && !consensus {
            warn!(
                activation_id,
                action_id = %action.id,
                "action blocked by deletion consensus, skipping"
            );
            activation.actions_completed += 1;
            activation.current_action_id = None;
            if activation.actions_completed >= activation.actions_total {
                Self::mark_completed(activation);
            }
            let disposition = ActionDisposition::Skipped {
                action,
                reason: ErrorCode::BlockedByConsensus,
            };
            self.sync_guard();
            self.snapshot_activations();
            return Ok(disposition);
        }

        activation.current_action_id = Some(action.id.clone());
        self.snapshot_activations();
        Ok(ActionDisposition::Execute(action))
    }

    /// Mark the in-flight action as done (audited by the caller).
    pub fn complete_current(&mut self, activation_id: &str) -> InheritResult<Activation> {
        let activation = self
            .activations
            .get_mut(activation_id)
            .ok_or_else(|| InheritError::UnknownActivation(activation_id.to_string()))?;

        if activation.state != ActivationState::Executing
            || activation.current_action_id.is_none()
        {
            return Err(InheritError::InvalidState(activation.state));
        }

        activation.actions_completed += 1;
        activation.current_action_id = None;
        if activation.actions_completed >= activation.actions_total {
            Self::mark_completed(activation);
        }
        let result = activation.clone();
        self.sync_guard();
        self.snapshot_activations();
        Ok(result)
    }

    fn mark_completed(activation: &mut Activation) {
        activation.state = ActivationState::Completed;
        activation.completed_at = Some(Utc::now());
        info!(activation_id = %activation.id, "activation completed");
    }

    /// All trusted parties must have a live activation for destructive
    /// actions (unless the config relaxes it).
    pub fn deletion_consensus_met(&self) -> bool {
        if !self.config.require_all_parties_for_deletion {
            return true;
        }
        self.parties.keys().all(|party_id| {
            self.activations
                .values()
                .any(|a| &a.party_id == party_id && !a.state.is_terminal())
        })
    }

    // ─── Queries & simulation ───────────────────────────────────────────

    pub fn activation(&self, id: &str) -> Option<&Activation> {
        self.activations.get(id)
    }

    pub fn live_activation_for_party(&self, party_id: &str) -> Option<&Activation> {
        self.activations
            .values()
            .find(|a| a.party_id == party_id && !a.state.is_terminal())
    }

    pub fn activations(&self) -> Vec<&Activation> {
        self.activations.values().collect()
    }

    /// Dry-run a party's configured sequence without executing anything.
    /// Honors the same consensus rule as real execution.
    pub fn simulate(&self, party_id: &str) -> InheritResult<Vec<SimulatedStep>> {
        if !self.parties.contains_key(party_id) {
            return Err(InheritError::UnknownParty(party_id.to_string()));
        }
        let consensus = self.deletion_consensus_met();
        Ok(self
            .actions_for_party(party_id)
            .into_iter()
            .map(|action| {
                let blocked = action.requires_deletion_consensus && !consensus;
                SimulatedStep {
                    action_id: action.id,
                    label: action.label,
                    sequence_order: action.sequence_order,
                    would_execute: !blocked,
                    reason: blocked.then(|| ErrorCode::BlockedByConsensus.to_string()),
                }
            })
            .collect())
    }

    // ─── Internals ──────────────────────────────────────────────────────

    /// Guard is up iff at least one non-terminal activation exists.
    fn sync_guard(&self) {
        if self.activations.values().any(|a| !a.state.is_terminal()) {
            self.guard.enable();
        } else {
            self.guard.disable();
        }
    }

    fn snapshot_parties(&self) {
        if let Err(e) = self.party_store.save(&self.parties) {
            warn!(error = %e, "failed to snapshot trusted parties");
        }
    }

    fn snapshot_actions(&self) {
        if let Err(e) = self.action_store.save(&self.actions) {
            warn!(error = %e, "failed to snapshot inheritance actions");
        }
    }

    fn snapshot_activations(&self) {
        if let Err(e) = self.activation_store.save(&self.activations) {
            warn!(error = %e, "failed to snapshot activations");
        }
        if let Err(e) = self.installed_store.save(&self.installed) {
            warn!(error = %e, "failed to snapshot installed actions");
        }
    }
}
