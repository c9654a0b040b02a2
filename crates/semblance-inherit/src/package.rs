//! Encrypted activation package format.
//!
//! A single JSON object: cleartext `header` for identification, payload
//! sealed with AES-256-GCM under a passphrase-derived key. Version 2
//! derives the key with Argon2id and a stored salt; version 1 is the
//! legacy single-pass SHA-256 derivation and is accepted read-only.
//! Versions above 2 are rejected.

use crate::party::InheritanceAction;
use crate::{InheritError, InheritResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use semblance_crypto::{derive_key_argon2id, derive_key_sha256, open, seal, SealedBox};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const PACKAGE_VERSION_LEGACY: u8 = 1;
pub const PACKAGE_VERSION_V2: u8 = 2;

const KDF_ARGON2ID: &str = "argon2id";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageHeader {
    pub party_id: String,
    pub version: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kdf: Option<String>,
    /// Hex-encoded KDF salt (v2 only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagePayload {
    /// Base64 ciphertext.
    pub ciphertext: String,
    /// Base64 96-bit IV.
    pub iv: String,
    /// Base64 128-bit GCM tag.
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedActivationPackage {
    pub header: PackageHeader,
    pub payload: PackagePayload,
}

/// The plaintext a package seals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageContents {
    pub requires_step_confirmation: bool,
    pub actions: Vec<InheritanceAction>,
}

/// Build and seal a package for a party.
pub fn seal_package(
    party_id: &str,
    passphrase: &str,
    contents: &PackageContents,
    version: u8,
) -> InheritResult<EncryptedActivationPackage> {
    let plaintext = serde_json::to_vec(contents)
        .map_err(|e| InheritError::PackageInvalidOrCorrupt(e.to_string()))?;

    let (key, kdf, salt_hex) = match version {
        PACKAGE_VERSION_LEGACY => (derive_key_sha256(passphrase), None, None),
        PACKAGE_VERSION_V2 => {
            let salt = Uuid::new_v4().into_bytes();
            let key = derive_key_argon2id(passphrase, &salt)
                .map_err(|e| InheritError::PackageInvalidOrCorrupt(e.to_string()))?;
            (key, Some(KDF_ARGON2ID.to_string()), Some(hex::encode(salt)))
        }
        other => {
            return Err(InheritError::PackageInvalidOrCorrupt(format!(
                "unsupported package version {other}"
            )))
        }
    };

    let sealed = seal(&key, &plaintext)
        .map_err(|e| InheritError::PackageInvalidOrCorrupt(e.to_string()))?;

    info!(party_id, version, "activation package sealed");
    Ok(EncryptedActivationPackage {
        header: PackageHeader {
            party_id: party_id.to_string(),
            version,
            created_at: Utc::now(),
            kdf,
            salt: salt_hex,
        },
        payload: PackagePayload {
            ciphertext: BASE64.encode(&sealed.ciphertext),
            iv: BASE64.encode(sealed.iv),
            tag: BASE64.encode(sealed.tag),
        },
    })
}

/// Decrypt and parse a package with the presented passphrase.
pub fn open_package(
    package: &EncryptedActivationPackage,
    passphrase: &str,
) -> InheritResult<PackageContents> {
    let key = match package.header.version {
        PACKAGE_VERSION_LEGACY => derive_key_sha256(passphrase),
        PACKAGE_VERSION_V2 => {
            if package.header.kdf.as_deref() != Some(KDF_ARGON2ID) {
                return Err(InheritError::PackageInvalidOrCorrupt(
                    "v2 package missing argon2id kdf".to_string(),
                ));
            }
            let salt_hex = package.header.salt.as_deref().ok_or_else(|| {
                InheritError::PackageInvalidOrCorrupt("v2 package missing salt".to_string())
            })?;
            let salt = hex::decode(salt_hex)
                .map_err(|e| InheritError::PackageInvalidOrCorrupt(format!("bad salt: {e}")))?;
            derive_key_argon2id(passphrase, &salt)
                .map_err(|e| InheritError::PackageInvalidOrCorrupt(e.to_string()))?
        }
        other => {
            return Err(InheritError::PackageInvalidOrCorrupt(format!(
                "unsupported package version {other}"
            )))
        }
    };

    let boxed = decode_payload(&package.payload)?;
    let plaintext = open(&key, &boxed)
        .map_err(|_| InheritError::PackageInvalidOrCorrupt("decryption failed".to_string()))?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| InheritError::PackageInvalidOrCorrupt(format!("bad contents: {e}")))
}

fn decode_payload(payload: &PackagePayload) -> InheritResult<SealedBox> {
    let bad = |what: &str| InheritError::PackageInvalidOrCorrupt(format!("bad {what}"));

    let ciphertext = BASE64
        .decode(&payload.ciphertext)
        .map_err(|_| bad("ciphertext"))?;
    let iv: [u8; 12] = BASE64
        .decode(&payload.iv)
        .map_err(|_| bad("iv"))?
        .try_into()
        .map_err(|_| bad("iv"))?;
    let tag: [u8; 16] = BASE64
        .decode(&payload.tag)
        .map_err(|_| bad("tag"))?
        .try_into()
        .map_err(|_| bad("tag"))?;

    Ok(SealedBox {
        ciphertext,
        iv,
        tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::party::ActionCategory;
    use semblance_proto::ActionType;
    use serde_json::json;

    fn contents() -> PackageContents {
        PackageContents {
            requires_step_confirmation: false,
            actions: vec![InheritanceAction::new(
                "party-1",
                ActionCategory::Notification,
                1,
                ActionType::EmailSend,
                json!({"to": ["next@of.kin"], "subject": "instructions"}),
                "notify next of kin",
                false,
            )],
        }
    }

    #[test]
    fn test_v2_round_trip() {
        let pkg = seal_package("party-1", "correct horse", &contents(), PACKAGE_VERSION_V2)
            .expect("seal");
        assert_eq!(pkg.header.version, 2);
        assert_eq!(pkg.header.kdf.as_deref(), Some("argon2id"));
        assert!(pkg.header.salt.is_some());

        let opened = open_package(&pkg, "correct horse").expect("open");
        assert_eq!(opened.actions.len(), 1);
        assert_eq!(opened.actions[0].label, "notify next of kin");
    }

    #[test]
    fn test_legacy_v1_round_trip() {
        let pkg = seal_package("party-1", "correct horse", &contents(), PACKAGE_VERSION_LEGACY)
            .expect("seal");
        assert_eq!(pkg.header.version, 1);
        assert!(pkg.header.kdf.is_none());
        assert!(pkg.header.salt.is_none());

        let opened = open_package(&pkg, "correct horse").expect("open");
        assert_eq!(opened.actions.len(), 1);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let pkg = seal_package("party-1", "correct horse", &contents(), PACKAGE_VERSION_V2)
            .expect("seal");
        assert!(matches!(
            open_package(&pkg, "wrong horse"),
            Err(InheritError::PackageInvalidOrCorrupt(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut pkg = seal_package("party-1", "pass", &contents(), PACKAGE_VERSION_V2)
            .expect("seal");
        pkg.header.version = 3;
        assert!(matches!(
            open_package(&pkg, "pass"),
            Err(InheritError::PackageInvalidOrCorrupt(_))
        ));
        assert!(seal_package("party-1", "pass", &contents(), 7).is_err());
    }

    #[test]
    fn test_v2_without_salt_rejected() {
        let mut pkg = seal_package("party-1", "pass", &contents(), PACKAGE_VERSION_V2)
            .expect("seal");
        pkg.header.salt = None;
        assert!(open_package(&pkg, "pass").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let pkg = seal_package("party-1", "pass", &contents(), PACKAGE_VERSION_V2)
            .expect("seal");
        let mut raw = BASE64.decode(&pkg.payload.ciphertext).expect("decode");
        raw[0] ^= 0xff;
        let mut tampered = pkg.clone();
        tampered.payload.ciphertext = BASE64.encode(raw);

        assert!(matches!(
            open_package(&tampered, "pass"),
            Err(InheritError::PackageInvalidOrCorrupt(_))
        ));
    }

    #[test]
    fn test_header_stays_cleartext() {
        let pkg = seal_package("party-42", "pass", &contents(), PACKAGE_VERSION_V2)
            .expect("seal");
        let s = serde_json::to_string(&pkg).expect("serialize");
        assert!(s.contains(r#""partyId":"party-42""#), "got {s}");
        // Action content must not appear in the serialized package.
        assert!(!s.contains("next of kin"));
        assert!(!s.contains("instructions"));
    }
}
