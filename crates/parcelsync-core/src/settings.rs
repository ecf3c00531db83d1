//! Algorithm choices shared by every envelope and key derivation.
//!
//! `CryptoSettings` is passed explicitly into each envelope constructor. Readers
//! are constructed with the settings they accept and reject envelopes that were
//! packed with anything else, so a mismatch fails deterministically instead of
//! producing garbled plaintext.

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Symmetric key size in bits supported by both AEAD choices
pub const SYMMETRIC_KEY_BITS: u32 = 256;

/// Default PBKDF2 iteration count for account passwords
pub const DEFAULT_KDF_ITERATIONS: u32 = 20_000;

/// Signature algorithm used by signature and asymmetric envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Ed25519 over the raw signed data
    Ed25519,
    /// Ed25519 over the BLAKE3 digest of the signed data
    Ed25519Blake3,
}

/// Authenticated symmetric cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymmetricAlgorithm {
    /// ChaCha20-Poly1305 with a 12 byte nonce
    ChaCha20Poly1305,
    /// XChaCha20-Poly1305 with a 24 byte nonce
    XChaCha20Poly1305,
}

impl SymmetricAlgorithm {
    /// Nonce length in bytes
    pub fn nonce_len(&self) -> usize {
        match self {
            SymmetricAlgorithm::ChaCha20Poly1305 => 12,
            SymmetricAlgorithm::XChaCha20Poly1305 => 24,
        }
    }
}

/// Key agreement used to wrap per-message keys for a recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsymmetricAlgorithm {
    /// Ephemeral X25519 agreement, HKDF-SHA256 key derivation
    X25519HkdfSha256,
}

/// Password based key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    /// PBKDF2 with HMAC-SHA256
    Pbkdf2HmacSha256,
}

/// Algorithm configuration for envelopes and password derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoSettings {
    pub signature: SignatureAlgorithm,
    pub symmetric: SymmetricAlgorithm,
    pub asymmetric: AsymmetricAlgorithm,
    /// Symmetric key size in bits
    pub key_size: u32,
    pub kdf: KdfAlgorithm,
    pub kdf_iterations: u32,
}

impl CryptoSettings {
    /// Settings with a low iteration count, for tests and local demos.
    pub fn fast() -> Self {
        Self {
            kdf_iterations: 16,
            ..Self::default()
        }
    }

    /// Check that the combination is one this build can execute.
    pub fn validate(&self) -> SyncResult<()> {
        if self.key_size != SYMMETRIC_KEY_BITS {
            return Err(SyncError::Config(format!(
                "unsupported key size {} (only {} bits)",
                self.key_size, SYMMETRIC_KEY_BITS
            )));
        }
        if self.kdf_iterations == 0 {
            return Err(SyncError::Config(
                "kdf iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            signature: SignatureAlgorithm::Ed25519,
            symmetric: SymmetricAlgorithm::ChaCha20Poly1305,
            asymmetric: AsymmetricAlgorithm::X25519HkdfSha256,
            key_size: SYMMETRIC_KEY_BITS,
            kdf: KdfAlgorithm::Pbkdf2HmacSha256,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}
