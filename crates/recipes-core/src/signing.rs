//! Ed25519 signatures over canonical JSON.
//!
//! A [`Signature`] remembers the SHA-256 of the exact bytes it was computed
//! over. Read paths compare that hash against the current canonical form of
//! the signed object and treat a mismatch as "unsigned".

use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{RecipeError, Result};

// ---------------------------------------------------------------------------
// Canonical form
// ---------------------------------------------------------------------------

/// Rebuild `value` with every object's keys in lexicographic order.
fn sorted(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sorted(&map[k]));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted).collect())
        }
        other => other.clone(),
    }
}

/// Compact JSON with stable key ordering.
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    // Serialising a Value cannot fail.
    serde_json::to_vec(&sorted(value)).unwrap_or_default()
}

/// Lowercase hex SHA-256.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Base64 Ed25519 signature.
    pub signature: String,
    /// Base64 verifying key of the signer.
    pub public_key: String,
    pub timestamp: DateTime<Utc>,
    /// Hex SHA-256 of the canonical bytes that were signed.
    pub signed_input_hash: String,
}

impl Signature {
    /// True when the signature was computed over exactly `canonical`.
    pub fn matches(&self, canonical: &[u8]) -> bool {
        self.signed_input_hash == digest_hex(canonical)
    }

    /// Full check: input hash and the Ed25519 signature itself.
    pub fn verify(&self, canonical: &[u8]) -> bool {
        if !self.matches(canonical) {
            return false;
        }
        let Ok(key_bytes) = general_purpose::STANDARD.decode(&self.public_key) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = general_purpose::STANDARD.decode(&self.signature) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
            return false;
        };
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying_key.verify(canonical, &sig).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Signer
// ---------------------------------------------------------------------------

/// The service signing key.
pub struct Signer {
    key: SigningKey,
}

impl Signer {
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self {
            key: SigningKey::from_bytes(&secret),
        }
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| RecipeError::Signing(format!("invalid key encoding: {e}")))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| RecipeError::Signing("signing key must be 32 bytes".to_string()))?;
        Ok(Self {
            key: SigningKey::from_bytes(&secret),
        })
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.key.to_bytes())
    }

    pub fn public_key(&self) -> String {
        general_purpose::STANDARD.encode(self.key.verifying_key().as_bytes())
    }

    /// Load the key at `path`, generating and persisting a new one if absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            return Self::from_base64(&data);
        }
        let signer = Self::generate();
        crate::io::write_secret(path, signer.to_base64().as_bytes())?;
        tracing::info!(path = %path.display(), "generated new signing key");
        Ok(signer)
    }

    pub fn sign(&self, canonical: &[u8]) -> Signature {
        let sig = self.key.sign(canonical);
        Signature {
            signature: general_purpose::STANDARD.encode(sig.to_bytes()),
            public_key: self.public_key(),
            timestamp: Utc::now(),
            signed_input_hash: digest_hex(canonical),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
