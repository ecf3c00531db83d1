//! Key identifiers
//!
//! Format: lowercase hex of a 32 byte BLAKE3 digest.
//!
//! Public keys are identified by the plain BLAKE3 hash of their bytes.
//! Symmetric keys use a keyed derivation so the id never equals a hash an
//! attacker could compute from a guessed key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

const SYMMETRIC_KEY_ID_CONTEXT: &str = "parcelsync 2024 symmetric key id";

/// Opaque identifier naming a public or symmetric key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(String);

impl KeyId {
    /// Identify a public key by the BLAKE3 hash of its bytes.
    pub fn from_public_key(bytes: &[u8]) -> Self {
        KeyId(blake3::hash(bytes).to_hex().to_string())
    }

    /// Identify symmetric key material without revealing it.
    pub fn for_symmetric_key(key: &[u8]) -> Self {
        KeyId(hex::encode(blake3::derive_key(SYMMETRIC_KEY_ID_CONTEXT, key)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)
            .map_err(|e| SyncError::InvalidKey(format!("key id is not hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(SyncError::InvalidKey(format!(
                "key id must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(KeyId(s.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_id_is_deterministic() {
        let a = KeyId::from_public_key(&[1u8; 32]);
        let b = KeyId::from_public_key(&[1u8; 32]);
        let c = KeyId::from_public_key(&[2u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_symmetric_id_differs_from_plain_hash() {
        let key = [9u8; 32];
        assert_ne!(KeyId::for_symmetric_key(&key), KeyId::from_public_key(&key));
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = KeyId::from_public_key(b"some key");
        let parsed: KeyId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-hex".parse::<KeyId>().is_err());
        assert!("abcd".parse::<KeyId>().is_err());
    }

    #[test]
    fn test_short() {
        let id = KeyId::from_public_key(b"k");
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(id.short()));
    }
}
