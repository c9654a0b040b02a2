//! Ed25519 device identity for attestation signing.
//!
//! One keypair per device. The device id is the SHA-256 hex digest of the
//! public key; verifiers resolve `device:<id>` back to the key they hold.

use crate::canonical::sha256_hex;
use crate::{CryptoError, CryptoResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Device identity containing an Ed25519 keypair.
#[derive(Clone)]
pub struct DeviceIdentity {
    /// SHA-256 hex digest of the public key.
    pub device_id: String,
    signing_key: SigningKey,
}

/// On-disk identity format.
#[derive(Debug, Serialize, Deserialize)]
struct StoredIdentity {
    version: u8,
    device_id: String,
    /// Hex-encoded raw public key (32 bytes).
    public_key: String,
    /// Hex-encoded secret key (32 bytes).
    secret_key: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl DeviceIdentity {
    /// Generate a new random device identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let device_id = sha256_hex(signing_key.verifying_key().as_bytes());
        info!(device_id = %device_id, "generated new device identity");
        Self {
            device_id,
            signing_key,
        }
    }

    /// Load identity from file, or generate and save if it doesn't exist.
    pub fn load_or_create(path: &Path) -> CryptoResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no device identity, creating");
            let identity = Self::generate();
            identity.save(path)?;
            return Ok(identity);
        }

        let content = fs::read_to_string(path)?;
        let stored: StoredIdentity = serde_json::from_str(&content)?;
        if stored.version != 1 {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported identity version {}",
                stored.version
            )));
        }

        let secret = hex::decode(&stored.secret_key)
            .map_err(|e| CryptoError::InvalidKey(format!("secret key hex: {e}")))?;
        let secret: [u8; 32] = secret
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("secret key must be 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&secret);

        let computed_id = sha256_hex(signing_key.verifying_key().as_bytes());
        if computed_id != stored.device_id {
            return Err(CryptoError::InvalidKey("device id mismatch".to_string()));
        }

        info!(device_id = %stored.device_id, "loaded device identity");
        Ok(Self {
            device_id: stored.device_id,
            signing_key,
        })
    }

    /// Save identity to file with restrictive permissions.
    pub fn save(&self, path: &Path) -> CryptoResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored = StoredIdentity {
            version: 1,
            device_id: self.device_id.clone(),
            public_key: hex::encode(self.signing_key.verifying_key().as_bytes()),
            secret_key: hex::encode(self.signing_key.to_bytes()),
            created_at: chrono::Utc::now(),
        };
        fs::write(path, serde_json::to_string_pretty(&stored)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        info!(path = %path.display(), "saved device identity");
        Ok(())
    }

    /// Raw 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign raw bytes, returning the 64-byte Ed25519 signature.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.signing_key.sign(data).to_bytes()
    }

    /// Verify an Ed25519 signature against a raw public key.
    pub fn verify(public_key: &[u8; 32], data: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify(data, &sig).is_ok()
    }
}
