//! Crypto provider and symmetric parcel encryption
//!
//! [`CryptoContext`] is the explicit handle for randomness and password key
//! derivation. It is created once and passed to every component that needs it;
//! nothing in this crate reaches for a process-wide crypto singleton.
//!
//! [`ParcelCrypto`] is shared symmetric key material for one logical message
//! exchange, using ChaCha20-Poly1305 or XChaCha20-Poly1305 AEAD.
//!
//! # Wire Format
//!
//! `ParcelCrypto::encrypt` returns the nonce and `ciphertext + auth_tag (16 bytes)`
//! separately; envelopes decide how to frame them.

use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};

use crate::error::{SyncError, SyncResult};
use crate::identity::KeyId;
use crate::settings::{CryptoSettings, KdfAlgorithm, SymmetricAlgorithm};

/// Symmetric key size in bytes
pub const KEY_SIZE: usize = 32;

/// AEAD authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Salt size for password derivation
pub const SALT_SIZE: usize = 32;

/// Explicit crypto provider handle.
///
/// Cloning is cheap; clones share the same CSPRNG.
#[derive(Clone)]
pub struct CryptoContext {
    rng: Arc<Mutex<StdRng>>,
}

impl CryptoContext {
    /// Create a provider seeded from the operating system RNG.
    pub fn new() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_os_rng())),
        }
    }

    /// Fill `buf` with cryptographically secure random bytes.
    pub fn fill_random(&self, buf: &mut [u8]) {
        self.rng.lock().fill_bytes(buf);
    }

    /// Return `len` random bytes.
    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill_random(&mut out);
        out
    }

    /// Generate a new random 32-byte symmetric key.
    pub fn generate_symmetric_key(&self) -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        self.fill_random(&mut key);
        key
    }

    /// Generate a fresh nonce sized for `algorithm`.
    pub fn generate_nonce(&self, algorithm: SymmetricAlgorithm) -> Vec<u8> {
        self.random_bytes(algorithm.nonce_len())
    }

    /// Generate a salt for password derivation.
    pub fn generate_salt(&self) -> [u8; SALT_SIZE] {
        let mut salt = [0u8; SALT_SIZE];
        self.fill_random(&mut salt);
        salt
    }

    /// Random identifier (hex of 16 random bytes).
    pub fn random_id(&self) -> String {
        hex::encode(self.random_bytes(16))
    }

    /// Derive a symmetric key from a password.
    pub fn derive_key(
        &self,
        password: &str,
        salt: &[u8],
        settings: &CryptoSettings,
    ) -> SyncResult<[u8; KEY_SIZE]> {
        settings.validate()?;
        let mut out = [0u8; KEY_SIZE];
        match settings.kdf {
            KdfAlgorithm::Pbkdf2HmacSha256 => pbkdf2::pbkdf2_hmac::<Sha256>(
                password.as_bytes(),
                salt,
                settings.kdf_iterations,
                &mut out,
            ),
        }
        Ok(out)
    }

    /// Derive the value a server stores for an account password: hex(SHA-256(kdf(password))).
    ///
    /// The server never sees the password or the derived key itself.
    pub fn derive_password_hash(
        &self,
        password: &str,
        salt: &[u8],
        settings: &CryptoSettings,
    ) -> SyncResult<String> {
        let key = self.derive_key(password, salt, settings)?;
        Ok(hex::encode(Sha256::digest(key)))
    }
}

impl Default for CryptoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext").finish_non_exhaustive()
    }
}

/// Shared symmetric key material for a single logical message exchange.
#[derive(Clone)]
pub struct ParcelCrypto {
    key_id: KeyId,
    key: [u8; KEY_SIZE],
    algorithm: SymmetricAlgorithm,
}

impl ParcelCrypto {
    /// Generate fresh key material using the symmetric algorithm from `settings`.
    pub fn generate(ctx: &CryptoContext, settings: &CryptoSettings) -> Self {
        Self::from_key(ctx.generate_symmetric_key(), settings.symmetric)
    }

    /// Wrap existing key material.
    pub fn from_key(key: [u8; KEY_SIZE], algorithm: SymmetricAlgorithm) -> Self {
        Self {
            key_id: KeyId::for_symmetric_key(&key),
            key,
            algorithm,
        }
    }

    /// Identifier of the key (never reveals the key).
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    /// Raw key bytes, for wrapping to a recipient.
    pub fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    ///
    /// Returns `(nonce, ciphertext)`; the nonce is freshly generated per call.
    pub fn encrypt(
        &self,
        ctx: &CryptoContext,
        plaintext: &[u8],
        aad: &[u8],
    ) -> SyncResult<(Vec<u8>, Vec<u8>)> {
        let nonce = ctx.generate_nonce(self.algorithm);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let key = Key::from_slice(&self.key);

        let ciphertext = match self.algorithm {
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(key).encrypt(Nonce::from_slice(&nonce), payload)
            }
            SymmetricAlgorithm::XChaCha20Poly1305 => {
                XChaCha20Poly1305::new(key).encrypt(XNonce::from_slice(&nonce), payload)
            }
        }
        .map_err(|e| SyncError::Crypto(format!("Encryption failed: {}", e)))?;

        Ok((nonce, ciphertext))
    }

    /// Decrypt `ciphertext` produced by [`ParcelCrypto::encrypt`] with the same `aad`.
    pub fn decrypt(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> SyncResult<Vec<u8>> {
        if nonce.len() != self.algorithm.nonce_len() {
            return Err(SyncError::Confidentiality(format!(
                "nonce has {} bytes, {:?} needs {}",
                nonce.len(),
                self.algorithm,
                self.algorithm.nonce_len()
            )));
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        let key = Key::from_slice(&self.key);

        match self.algorithm {
            SymmetricAlgorithm::ChaCha20Poly1305 => {
                ChaCha20Poly1305::new(key).decrypt(Nonce::from_slice(nonce), payload)
            }
            SymmetricAlgorithm::XChaCha20Poly1305 => {
                XChaCha20Poly1305::new(key).decrypt(XNonce::from_slice(nonce), payload)
            }
        }
        .map_err(|e| SyncError::Confidentiality(format!("Decryption failed: {}", e)))
    }
}

impl std::fmt::Debug for ParcelCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParcelCrypto")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}
