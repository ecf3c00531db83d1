//! Asymmetric envelope: per-message key wrapped to a recipient, signed by the sender
//!
//! ```text
//! 1. parcel key  = fresh (or reused) symmetric key
//! 2. ciphertext  = AEAD(parcel key, payload)
//! 3. shared      = x25519(ephemeral_sk, recipient_pk)
//! 4. wrap key    = HKDF-SHA256(shared, "parcelsync-asymmetric-v1" || ephemeral_pk || recipient_pk)
//! 5. wrapped key = AEAD(wrap key, parcel key)
//! 6. signature   = sign(sender, all of the above)
//! ```
//!
//! The reader verifies the signature before touching any ciphertext.

use std::sync::Arc;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use super::{EnvelopeReader, EnvelopeWriter, PackedEnvelope, SignedData};
use crate::crypto::{CryptoContext, ParcelCrypto, KEY_SIZE};
use crate::error::{SyncError, SyncResult};
use crate::identity::{ContactFinder, ContactPrivate, ContactPublic, KeyId};
use crate::settings::{AsymmetricAlgorithm, CryptoSettings, SignatureAlgorithm, SymmetricAlgorithm};

const DOMAIN: &[u8] = b"parcelsync-asymmetric-envelope";

/// Domain separation string for HKDF
const HKDF_INFO: &[u8] = b"parcelsync-asymmetric-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AsymmetricParcel {
    pub uid: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub symmetric_algorithm: SymmetricAlgorithm,
    pub asymmetric_algorithm: AsymmetricAlgorithm,
    pub sender_key_id: KeyId,
    pub recipient_key_id: KeyId,
    pub ephemeral_public: [u8; 32],
    pub wrapped_key_iv: Vec<u8>,
    pub wrapped_key: Vec<u8>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
}

impl AsymmetricParcel {
    fn signed_data(&self) -> Vec<u8> {
        SignedData::new(DOMAIN)
            .field(self.uid.as_bytes())
            .field(&[
                self.signature_algorithm as u8,
                self.symmetric_algorithm as u8,
                self.asymmetric_algorithm as u8,
            ])
            .field(self.sender_key_id.as_str().as_bytes())
            .field(self.recipient_key_id.as_str().as_bytes())
            .field(&self.ephemeral_public)
            .field(&self.wrapped_key_iv)
            .field(&self.wrapped_key)
            .field(&self.iv)
            .field(&self.ciphertext)
            .finish()
    }
}

/// Derive the key-wrapping key from an X25519 shared secret.
fn derive_wrap_key(
    shared_secret: &[u8],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> SyncResult<[u8; KEY_SIZE]> {
    let mut info = Vec::with_capacity(HKDF_INFO.len() + 64);
    info.extend_from_slice(HKDF_INFO);
    info.extend_from_slice(ephemeral_public);
    info.extend_from_slice(recipient_public);

    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut output = [0u8; KEY_SIZE];
    hkdf.expand(&info, &mut output)
        .map_err(|e| SyncError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(output)
}

pub struct AsymmetricWriter {
    ctx: CryptoContext,
    uid: String,
    settings: CryptoSettings,
    sender: ContactPrivate,
    recipient_key_id: KeyId,
    recipient_key: X25519PublicKey,
    parcel: ParcelCrypto,
}

impl AsymmetricWriter {
    /// Writer for `recipient`'s default encryption key with fresh parcel key material.
    pub fn new(
        ctx: CryptoContext,
        settings: CryptoSettings,
        sender: ContactPrivate,
        recipient: &ContactPublic,
    ) -> SyncResult<Self> {
        settings.validate()?;
        let (recipient_key_id, recipient_key) = recipient.default_encryption_key()?;
        let parcel = ParcelCrypto::generate(&ctx, &settings);
        Ok(Self {
            uid: ctx.random_id(),
            ctx,
            settings,
            sender,
            recipient_key_id,
            recipient_key,
            parcel,
        })
    }

    /// Reuse existing parcel key material instead of the generated one.
    pub fn with_parcel(mut self, parcel: ParcelCrypto) -> Self {
        self.parcel = parcel;
        self
    }

    /// Parcel key material, e.g. to read a symmetric reply to this message.
    pub fn parcel(&self) -> &ParcelCrypto {
        &self.parcel
    }
}

impl EnvelopeWriter for AsymmetricWriter {
    fn pack(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        let mut ephemeral_seed = [0u8; 32];
        self.ctx.fill_random(&mut ephemeral_seed);
        let ephemeral_secret = X25519StaticSecret::from(ephemeral_seed);
        let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

        let shared = ephemeral_secret.diffie_hellman(&self.recipient_key);
        let wrap_key = derive_wrap_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            self.recipient_key.as_bytes(),
        )?;
        let wrapper = ParcelCrypto::from_key(wrap_key, self.settings.symmetric);
        let (wrapped_key_iv, wrapped_key) = wrapper.encrypt(
            &self.ctx,
            self.parcel.key_bytes(),
            self.recipient_key_id.as_str().as_bytes(),
        )?;

        let payload_key = ParcelCrypto::from_key(*self.parcel.key_bytes(), self.settings.symmetric);
        let (iv, ciphertext) = payload_key.encrypt(&self.ctx, plaintext, self.uid.as_bytes())?;

        let mut parcel = AsymmetricParcel {
            uid: self.uid.clone(),
            signature_algorithm: self.settings.signature,
            symmetric_algorithm: self.settings.symmetric,
            asymmetric_algorithm: self.settings.asymmetric,
            sender_key_id: self.sender.signing_key_id(),
            recipient_key_id: self.recipient_key_id.clone(),
            ephemeral_public: *ephemeral_public.as_bytes(),
            wrapped_key_iv,
            wrapped_key,
            iv,
            ciphertext,
            signature: Vec::new(),
        };
        parcel.signature = self
            .sender
            .sign(parcel.signature_algorithm, &parcel.signed_data());
        PackedEnvelope::Asymmetric(parcel).to_bytes()
    }

    fn uid(&self) -> &str {
        &self.uid
    }
}

pub struct AsymmetricReader {
    settings: CryptoSettings,
    recipient: ContactPrivate,
    finder: Arc<dyn ContactFinder>,
    uid: Option<String>,
    sender: Option<KeyId>,
    parcel: Option<ParcelCrypto>,
}

impl AsymmetricReader {
    pub fn new(
        settings: CryptoSettings,
        recipient: ContactPrivate,
        finder: Arc<dyn ContactFinder>,
    ) -> Self {
        Self {
            settings,
            recipient,
            finder,
            uid: None,
            sender: None,
            parcel: None,
        }
    }

    /// Contact id of the verified sender of the last unpacked envelope.
    pub fn sender(&self) -> Option<&KeyId> {
        self.sender.as_ref()
    }

    /// Parcel key material recovered from the last unpacked envelope.
    pub fn parcel(&self) -> Option<&ParcelCrypto> {
        self.parcel.as_ref()
    }
}

impl EnvelopeReader for AsymmetricReader {
    fn unpack(&mut self, packed: &[u8]) -> SyncResult<Vec<u8>> {
        let parcel = match PackedEnvelope::from_bytes(packed)? {
            PackedEnvelope::Asymmetric(parcel) => parcel,
            other => {
                return Err(SyncError::Integrity(format!(
                    "expected asymmetric envelope, got {:?}",
                    other.kind()
                )))
            }
        };
        if parcel.signature_algorithm != self.settings.signature {
            return Err(SyncError::Integrity(format!(
                "signature algorithm {:?} does not match {:?}",
                parcel.signature_algorithm, self.settings.signature
            )));
        }
        if parcel.symmetric_algorithm != self.settings.symmetric
            || parcel.asymmetric_algorithm != self.settings.asymmetric
        {
            return Err(SyncError::Confidentiality(format!(
                "cipher suite {:?}/{:?} does not match {:?}/{:?}",
                parcel.symmetric_algorithm,
                parcel.asymmetric_algorithm,
                self.settings.symmetric,
                self.settings.asymmetric
            )));
        }

        let sender = self.finder.find(&parcel.sender_key_id).ok_or_else(|| {
            SyncError::Integrity(format!("unknown sender {}", parcel.sender_key_id.short()))
        })?;
        sender.public().verify(
            &parcel.sender_key_id,
            parcel.signature_algorithm,
            &parcel.signed_data(),
            &parcel.signature,
        )?;

        let secret = self
            .recipient
            .encryption_secret(&parcel.recipient_key_id)
            .ok_or_else(|| {
                SyncError::Confidentiality(format!(
                    "envelope is addressed to key {}",
                    parcel.recipient_key_id.short()
                ))
            })?;
        let recipient_public = X25519PublicKey::from(secret);
        let shared = secret.diffie_hellman(&X25519PublicKey::from(parcel.ephemeral_public));
        let wrap_key = derive_wrap_key(
            shared.as_bytes(),
            &parcel.ephemeral_public,
            recipient_public.as_bytes(),
        )?;

        let wrapper = ParcelCrypto::from_key(wrap_key, parcel.symmetric_algorithm);
        let key_bytes = wrapper.decrypt(
            &parcel.wrapped_key_iv,
            &parcel.wrapped_key,
            parcel.recipient_key_id.as_str().as_bytes(),
        )?;
        let key: [u8; KEY_SIZE] = key_bytes.as_slice().try_into().map_err(|_| {
            SyncError::Confidentiality(format!("unwrapped key has {} bytes", key_bytes.len()))
        })?;
        let payload_key = ParcelCrypto::from_key(key, parcel.symmetric_algorithm);
        let plaintext = payload_key.decrypt(&parcel.iv, &parcel.ciphertext, parcel.uid.as_bytes())?;

        debug!(uid = %parcel.uid, sender = %sender.id().short(), "Asymmetric envelope opened");
        self.uid = Some(parcel.uid);
        self.sender = Some(sender.id().clone());
        self.parcel = Some(payload_key);
        Ok(plaintext)
    }

    fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}
