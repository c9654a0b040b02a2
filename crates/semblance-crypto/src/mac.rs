//! HMAC-SHA256 signing for the IPC request path.
//!
//! The shared secret is provisioned at install time; both processes hold
//! it. Verification is constant-time — a forged signature must not be
//! distinguishable by timing.

use crate::canonical::canonical_json;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Symmetric signer over canonical JSON. Key material is wiped on drop.
#[derive(Clone)]
pub struct MacSigner {
    key: Zeroizing<Vec<u8>>,
}

impl MacSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Zeroizing::new(secret.to_vec()),
        }
    }

    /// HMAC-SHA256 over raw bytes.
    pub fn sign_bytes(&self, data: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length; new_from_slice cannot fail.
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("hmac key");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Sign the canonical form of a JSON value, lowercase hex output.
    pub fn sign(&self, value: &Value) -> String {
        hex::encode(self.sign_bytes(canonical_json(value).as_bytes()))
    }

    /// Constant-time verification of a hex signature over a JSON value.
    pub fn verify(&self, value: &Value, signature_hex: &str) -> bool {
        let expected = self.sign(value);
        bool::from(expected.as_bytes().ct_eq(signature_hex.as_bytes()))
    }

    /// Constant-time verification over raw bytes.
    pub fn verify_bytes(&self, data: &[u8], signature: &[u8]) -> bool {
        let expected = self.sign_bytes(data);
        bool::from(expected.as_slice().ct_eq(signature))
    }
}
