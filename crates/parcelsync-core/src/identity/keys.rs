//! Ed25519 signing key paired with an X25519 encryption secret

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::crypto::CryptoContext;
use crate::error::{SyncError, SyncResult};
use crate::identity::KeyId;
use crate::settings::SignatureAlgorithm;

/// Serialized length of [`IdentityKeys`]: two 32 byte seeds.
pub const IDENTITY_KEYS_LEN: usize = 64;

/// Private key material of one participant.
#[derive(Clone)]
pub struct IdentityKeys {
    signing: SigningKey,
    encryption: X25519StaticSecret,
}

impl IdentityKeys {
    /// Generate fresh keys from the context CSPRNG.
    pub fn generate(ctx: &CryptoContext) -> Self {
        let mut signing_seed = [0u8; 32];
        let mut encryption_seed = [0u8; 32];
        ctx.fill_random(&mut signing_seed);
        ctx.fill_random(&mut encryption_seed);
        Self::from_seeds(&signing_seed, encryption_seed)
    }

    pub fn from_seeds(signing_seed: &[u8; 32], encryption_seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(signing_seed),
            encryption: X25519StaticSecret::from(encryption_seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn encryption_public(&self) -> X25519PublicKey {
        X25519PublicKey::from(&self.encryption)
    }

    pub fn signing_key_id(&self) -> KeyId {
        KeyId::from_public_key(self.verifying_key().as_bytes())
    }

    pub fn encryption_key_id(&self) -> KeyId {
        KeyId::from_public_key(self.encryption_public().as_bytes())
    }

    pub(crate) fn encryption_secret(&self) -> &X25519StaticSecret {
        &self.encryption
    }

    /// Sign `data` with the given algorithm.
    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Vec<u8> {
        let input = signing_input(algorithm, data);
        self.signing.sign(&input).to_bytes().to_vec()
    }

    /// Format: `[ed25519_seed: 32][x25519_secret: 32]`
    pub fn to_bytes(&self) -> [u8; IDENTITY_KEYS_LEN] {
        let mut out = [0u8; IDENTITY_KEYS_LEN];
        out[..32].copy_from_slice(self.signing.as_bytes());
        out[32..].copy_from_slice(&self.encryption.to_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        if bytes.len() != IDENTITY_KEYS_LEN {
            return Err(SyncError::InvalidKey(format!(
                "identity keys must be {} bytes, got {}",
                IDENTITY_KEYS_LEN,
                bytes.len()
            )));
        }
        let mut signing_seed = [0u8; 32];
        let mut encryption_seed = [0u8; 32];
        signing_seed.copy_from_slice(&bytes[..32]);
        encryption_seed.copy_from_slice(&bytes[32..]);
        Ok(Self::from_seeds(&signing_seed, encryption_seed))
    }
}

impl std::fmt::Debug for IdentityKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeys")
            .field("signing_key_id", &self.signing_key_id().short().to_string())
            .field(
                "encryption_key_id",
                &self.encryption_key_id().short().to_string(),
            )
            .finish_non_exhaustive()
    }
}

/// Verify a signature produced by [`IdentityKeys::sign`].
pub fn verify_signature(
    key: &VerifyingKey,
    algorithm: SignatureAlgorithm,
    data: &[u8],
    signature: &[u8],
) -> SyncResult<()> {
    let signature = Signature::from_slice(signature)
        .map_err(|e| SyncError::Integrity(format!("malformed signature: {}", e)))?;
    let input = signing_input(algorithm, data);
    key.verify(&input, &signature)
        .map_err(|_| SyncError::Integrity("signature verification failed".to_string()))
}

fn signing_input(algorithm: SignatureAlgorithm, data: &[u8]) -> Vec<u8> {
    match algorithm {
        SignatureAlgorithm::Ed25519 => data.to_vec(),
        SignatureAlgorithm::Ed25519Blake3 => blake3::hash(data).as_bytes().to_vec(),
    }
}
