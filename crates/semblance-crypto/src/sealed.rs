//! AES-256-GCM sealing and passphrase key derivation.
//!
//! Activation packages are sealed with a key derived from the trusted
//! party's passphrase: Argon2id for v2 packages, single-pass SHA-256 for
//! legacy v1. The GCM tag is kept separate from the ciphertext on the
//! wire, so the two are split here.

use crate::canonical::sha256_hex;
use crate::{CryptoError, CryptoResult};
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

const TAG_LEN: usize = 16;

/// A sealed payload: ciphertext, 96-bit IV, 128-bit GCM tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; 12],
    pub tag: [u8; 16],
}

/// Argon2id key derivation (package format v2).
pub fn derive_key_argon2id(passphrase: &str, salt: &[u8]) -> CryptoResult<[u8; 32]> {
    let params = Params::new(19_456, 2, 1, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Legacy SHA-256 key derivation (package format v1).
pub fn derive_key_sha256(passphrase: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.finalize().into()
}

/// SHA-256 hex of a passphrase, the stored form for trusted parties.
/// The plaintext is never persisted.
pub fn passphrase_hash_hex(passphrase: &str) -> String {
    sha256_hex(passphrase.as_bytes())
}

/// 32 bytes of OS randomness, for install-time secret provisioning.
pub fn random_secret32() -> [u8; 32] {
    let mut out = [0u8; 32];
    OsRng.fill_bytes(&mut out);
    out
}

/// Encrypt with AES-256-GCM under a fresh random IV.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> CryptoResult<SealedBox> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut sealed = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    // aes-gcm appends the tag to the ciphertext; split them apart.
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Encrypt);
    }
    let tag_bytes = sealed.split_off(sealed.len() - TAG_LEN);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    let mut iv = [0u8; 12];
    iv.copy_from_slice(&nonce);

    Ok(SealedBox {
        ciphertext: sealed,
        iv,
        tag,
    })
}

/// Decrypt a sealed box. Any mismatch — wrong key, flipped bit, wrong
/// tag — yields [`CryptoError::Decrypt`].
pub fn open(key: &[u8; 32], boxed: &SealedBox) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut combined = boxed.ciphertext.clone();
    combined.extend_from_slice(&boxed.tag);
    cipher
        .decrypt(Nonce::from_slice(&boxed.iv), combined.as_slice())
        .map_err(|_| CryptoError::Decrypt)
}
