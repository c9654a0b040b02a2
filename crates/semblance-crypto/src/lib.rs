//! Crypto capability surface for Semblance.
//!
//! Everything cryptographic the action plane needs lives behind this crate:
//! canonical JSON hashing, HMAC request signing, the Ed25519 device
//! identity, AES-256-GCM sealing, and passphrase key derivation. Nothing in
//! here opens a socket.

#![forbid(unsafe_code)]

mod canonical;
mod identity;
mod mac;
mod sealed;

pub use canonical::{canonical_json, canonical_sha256_hex, sha256_hex};
pub use identity::DeviceIdentity;
pub use mac::MacSigner;
pub use sealed::{
    derive_key_argon2id, derive_key_sha256, open, passphrase_hash_hex, random_secret32, seal,
    SealedBox,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
