//! Trusted parties and their pre-authorized actions.

use semblance_crypto::passphrase_hash_hex;
use semblance_proto::ActionType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Someone authorized to trigger inheritance for this user.
///
/// Only the SHA-256 of the passphrase is ever stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedParty {
    pub id: String,
    pub name: String,
    pub email: String,
    pub relationship: String,
    pub passphrase_hash: String,
}

impl TrustedParty {
    pub fn new(name: &str, email: &str, relationship: &str, passphrase: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            relationship: relationship.to_string(),
            passphrase_hash: passphrase_hash_hex(passphrase),
        }
    }

    pub fn passphrase_matches(&self, passphrase: &str) -> bool {
        self.passphrase_hash == passphrase_hash_hex(passphrase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCategory {
    #[serde(rename = "notification")]
    Notification,
    #[serde(rename = "account-action")]
    AccountAction,
    #[serde(rename = "data-sharing")]
    DataSharing,
    #[serde(rename = "preservation")]
    Preservation,
}

impl std::fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Notification => "notification",
            Self::AccountAction => "account-action",
            Self::DataSharing => "data-sharing",
            Self::Preservation => "preservation",
        };
        write!(f, "{s}")
    }
}

/// One pre-authorized step in a party's inheritance sequence.
///
/// Actions are totally ordered per party by `sequence_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritanceAction {
    pub id: String,
    pub party_id: String,
    pub category: ActionCategory,
    pub sequence_order: u32,
    pub action_type: ActionType,
    pub payload: Value,
    pub label: String,
    pub requires_deletion_consensus: bool,
}

impl InheritanceAction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        party_id: &str,
        category: ActionCategory,
        sequence_order: u32,
        action_type: ActionType,
        payload: Value,
        label: &str,
        requires_deletion_consensus: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            party_id: party_id.to_string(),
            category,
            sequence_order,
            action_type,
            payload,
            label: label.to_string(),
            requires_deletion_consensus,
        }
    }
}
