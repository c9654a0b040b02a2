//! Signed attestations for autonomous actions.
//!
//! An attestation is a verifiable statement that the assistant performed
//! an action on the user's behalf: canonical JSON payload, SHA-256
//! digest, signature in a detached proof. Ed25519 with the device key is
//! preferred; HMAC-SHA256 is the legacy symmetric path. The attested
//! payload carries an action summary only — raw action content never
//! leaves the audit database.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use semblance_crypto::{canonical_json, sha256_hex, DeviceIdentity, MacSigner};
use semblance_persist::StateStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

// ─── Proof types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofType {
    Ed25519Signature2020,
    HmacSha256Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub proof_type: ProofType,
    pub created: DateTime<Utc>,
    /// `device:<device-id>` — names the key a verifier must use.
    pub verification_method: String,
    pub proof_purpose: String,
    /// Lowercase hex signature over the SHA-256 of the canonical payload.
    pub proof_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub payload: Value,
    pub proof: Proof,
}

#[derive(Debug, Error)]
pub enum WitnessError {
    #[error("no signing key configured")]
    NoKeyConfigured,

    #[error("malformed proof value: {0}")]
    MalformedProof(String),

    #[error("persistence error: {0}")]
    Persist(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WitnessResult<T> = Result<T, WitnessError>;

// ─── Signer ──────────────────────────────────────────────────────────────────

/// Signs and verifies attestations. When both keys are configured the
/// Ed25519 device key wins.
pub struct AttestationSigner {
    device: Option<DeviceIdentity>,
    mac: Option<MacSigner>,
}

impl AttestationSigner {
    pub fn new(device: Option<DeviceIdentity>, mac: Option<MacSigner>) -> WitnessResult<Self> {
        if device.is_none() && mac.is_none() {
            return Err(WitnessError::NoKeyConfigured);
        }
        Ok(Self { device, mac })
    }

    pub fn ed25519(device: DeviceIdentity) -> Self {
        Self {
            device: Some(device),
            mac: None,
        }
    }

    pub fn hmac(mac: MacSigner) -> Self {
        Self {
            device: None,
            mac: Some(mac),
        }
    }

    fn device_label(&self) -> String {
        match &self.device {
            Some(device) => format!("device:{}", device.device_id),
            None => "device:shared".to_string(),
        }
    }

    /// Issue an attestation over a payload.
    pub fn attest(&self, payload: &Value) -> WitnessResult<Attestation> {
        let digest = sha256_hex(canonical_json(payload).as_bytes());

        let (proof_type, proof_value) = if let Some(device) = &self.device {
            (
                ProofType::Ed25519Signature2020,
                hex::encode(device.sign(digest.as_bytes())),
            )
        } else if let Some(mac) = &self.mac {
            (
                ProofType::HmacSha256Signature,
                hex::encode(mac.sign_bytes(digest.as_bytes())),
            )
        } else {
            return Err(WitnessError::NoKeyConfigured);
        };

        Ok(Attestation {
            payload: payload.clone(),
            proof: Proof {
                proof_type,
                created: Utc::now(),
                verification_method: self.device_label(),
                proof_purpose: "assertionMethod".to_string(),
                proof_value,
            },
        })
    }

    /// Verify an attestation against the keys this signer holds.
    pub fn verify(&self, attestation: &Attestation) -> bool {
        let digest = sha256_hex(canonical_json(&attestation.payload).as_bytes());
        let Ok(signature) = hex::decode(&attestation.proof.proof_value) else {
            return false;
        };

        match attestation.proof.proof_type {
            ProofType::Ed25519Signature2020 => match &self.device {
                Some(device) => {
                    DeviceIdentity::verify(&device.public_key(), digest.as_bytes(), &signature)
                }
                None => false,
            },
            ProofType::HmacSha256Signature => match &self.mac {
                Some(mac) => mac.verify_bytes(digest.as_bytes(), &signature),
                None => false,
            },
        }
    }
}

/// Verify an Ed25519 attestation against an exported public key — what an
/// external verifier without the device does.
pub fn verify_with_public_key(attestation: &Attestation, public_key: &[u8; 32]) -> bool {
    if attestation.proof.proof_type != ProofType::Ed25519Signature2020 {
        return false;
    }
    let digest = sha256_hex(canonical_json(&attestation.payload).as_bytes());
    let Ok(signature) = hex::decode(&attestation.proof.proof_value) else {
        return false;
    };
    DeviceIdentity::verify(public_key, digest.as_bytes(), &signature)
}

// ─── Witness generator ───────────────────────────────────────────────────────

/// One record per attested autonomous action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessRecord {
    pub id: String,
    pub audit_entry_id: String,
    pub action_summary: String,
    pub autonomy_tier: String,
    pub device_id: String,
    pub attestation_json: String,
    pub created_at: DateTime<Utc>,
}

/// Issues witness records for premium autonomous actions.
pub struct WitnessGenerator {
    signer: AttestationSigner,
    device_id: String,
    records: HashMap<String, WitnessRecord>,
    store: StateStore,
}

impl WitnessGenerator {
    pub fn new(root: &Path, signer: AttestationSigner, device_id: &str) -> Self {
        let store = StateStore::new(root, "witnesses");
        let records = store.load();
        Self {
            signer,
            device_id: device_id.to_string(),
            records,
            store,
        }
    }

    /// Attest one executed action. The payload carries the summary string
    /// only, so witness exports never leak action content.
    pub fn issue(
        &mut self,
        audit_entry_id: &str,
        action_summary: &str,
        autonomy_tier: &str,
    ) -> WitnessResult<WitnessRecord> {
        let payload = serde_json::json!({
            "actionSummary": action_summary,
            "auditEntryId": audit_entry_id,
            "autonomyTier": autonomy_tier,
            "deviceId": self.device_id,
        });
        let attestation = self.signer.attest(&payload)?;

        let record = WitnessRecord {
            id: Uuid::new_v4().to_string(),
            audit_entry_id: audit_entry_id.to_string(),
            action_summary: action_summary.to_string(),
            autonomy_tier: autonomy_tier.to_string(),
            device_id: self.device_id.clone(),
            attestation_json: serde_json::to_string(&attestation)?,
            created_at: Utc::now(),
        };

        info!(witness_id = %record.id, audit_entry_id, "witness attestation issued");
        self.records.insert(record.id.clone(), record.clone());
        self.snapshot();
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<&WitnessRecord> {
        self.records.get(id)
    }

    pub fn for_audit_entry(&self, audit_entry_id: &str) -> Vec<&WitnessRecord> {
        self.records
            .values()
            .filter(|r| r.audit_entry_id == audit_entry_id)
            .collect()
    }

    pub fn all(&self) -> Vec<&WitnessRecord> {
        self.records.values().collect()
    }

    fn snapshot(&self) {
        if let Err(e) = self.store.save(&self.records) {
            warn!(error = %e, "failed to snapshot witness records");
        }
    }
}
