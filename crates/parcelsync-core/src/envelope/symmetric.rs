//! Symmetric envelope: AEAD with shared parcel crypto
//!
//! The header fields (uid, key id, algorithm) are bound as associated data,
//! so relabelling a ciphertext fails decryption.

use serde::{Deserialize, Serialize};

use super::{EnvelopeReader, EnvelopeWriter, PackedEnvelope, SignedData};
use crate::crypto::{CryptoContext, ParcelCrypto};
use crate::error::{SyncError, SyncResult};
use crate::identity::KeyId;
use crate::settings::{CryptoSettings, SymmetricAlgorithm};

const DOMAIN: &[u8] = b"parcelsync-symmetric-envelope";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SymmetricParcel {
    pub uid: String,
    pub key_id: KeyId,
    pub algorithm: SymmetricAlgorithm,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

fn header_aad(uid: &str, key_id: &KeyId, algorithm: SymmetricAlgorithm) -> Vec<u8> {
    SignedData::new(DOMAIN)
        .field(uid.as_bytes())
        .field(key_id.as_str().as_bytes())
        .field(&[algorithm as u8])
        .finish()
}

pub struct SymmetricWriter {
    ctx: CryptoContext,
    uid: String,
    settings: CryptoSettings,
    parcel: ParcelCrypto,
}

impl SymmetricWriter {
    pub fn new(ctx: CryptoContext, settings: CryptoSettings, parcel: ParcelCrypto) -> Self {
        Self {
            uid: ctx.random_id(),
            ctx,
            settings,
            parcel,
        }
    }
}

impl EnvelopeWriter for SymmetricWriter {
    fn pack(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        if self.parcel.algorithm() != self.settings.symmetric {
            return Err(SyncError::Confidentiality(format!(
                "parcel key is {:?} but settings require {:?}",
                self.parcel.algorithm(),
                self.settings.symmetric
            )));
        }
        let aad = header_aad(&self.uid, self.parcel.key_id(), self.parcel.algorithm());
        let (iv, ciphertext) = self.parcel.encrypt(&self.ctx, plaintext, &aad)?;
        PackedEnvelope::Symmetric(SymmetricParcel {
            uid: self.uid.clone(),
            key_id: self.parcel.key_id().clone(),
            algorithm: self.parcel.algorithm(),
            iv,
            ciphertext,
        })
        .to_bytes()
    }

    fn uid(&self) -> &str {
        &self.uid
    }
}

pub struct SymmetricReader {
    settings: CryptoSettings,
    parcel: ParcelCrypto,
    uid: Option<String>,
}

impl SymmetricReader {
    pub fn new(settings: CryptoSettings, parcel: ParcelCrypto) -> Self {
        Self {
            settings,
            parcel,
            uid: None,
        }
    }
}

impl EnvelopeReader for SymmetricReader {
    fn unpack(&mut self, packed: &[u8]) -> SyncResult<Vec<u8>> {
        let parcel = match PackedEnvelope::from_bytes(packed)? {
            PackedEnvelope::Symmetric(parcel) => parcel,
            other => {
                return Err(SyncError::Confidentiality(format!(
                    "expected symmetric envelope, got {:?}",
                    other.kind()
                )))
            }
        };
        if parcel.algorithm != self.settings.symmetric {
            return Err(SyncError::Confidentiality(format!(
                "symmetric algorithm {:?} does not match {:?}",
                parcel.algorithm, self.settings.symmetric
            )));
        }
        if &parcel.key_id != self.parcel.key_id() {
            return Err(SyncError::Confidentiality(format!(
                "envelope encrypted for key {}, reader holds {}",
                parcel.key_id.short(),
                self.parcel.key_id().short()
            )));
        }

        let aad = header_aad(&parcel.uid, &parcel.key_id, parcel.algorithm);
        let plaintext = self.parcel.decrypt(&parcel.iv, &parcel.ciphertext, &aad)?;
        self.uid = Some(parcel.uid);
        Ok(plaintext)
    }

    fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ctx = CryptoContext::new();
        let settings = CryptoSettings::default();
        let parcel = ParcelCrypto::generate(&ctx, &settings);
        let writer = SymmetricWriter::new(ctx, settings, parcel.clone());

        let packed = writer.pack(b"confidential").unwrap();
        let mut reader = SymmetricReader::new(settings, parcel);
        assert_eq!(reader.unpack(&packed).unwrap(), b"confidential".to_vec());
        assert_eq!(reader.uid(), Some(writer.uid()));
    }

    #[test]
    fn test_wrong_key_is_confidentiality_error() {
        let ctx = CryptoContext::new();
        let settings = CryptoSettings::default();
        let writer = SymmetricWriter::new(
            ctx.clone(),
            settings,
            ParcelCrypto::generate(&ctx, &settings),
        );
        let packed = writer.pack(b"x").unwrap();

        let mut reader = SymmetricReader::new(settings, ParcelCrypto::generate(&ctx, &settings));
        assert!(matches!(
            reader.unpack(&packed),
            Err(SyncError::Confidentiality(_))
        ));
    }

    #[test]
    fn test_algorithm_mismatch_fails() {
        let ctx = CryptoContext::new();
        let settings = CryptoSettings::default();
        let parcel = ParcelCrypto::generate(&ctx, &settings);
        let packed = SymmetricWriter::new(ctx, settings, parcel.clone())
            .pack(b"x")
            .unwrap();

        let xchacha = CryptoSettings {
            symmetric: SymmetricAlgorithm::XChaCha20Poly1305,
            ..settings
        };
        let mut reader = SymmetricReader::new(xchacha, parcel);
        assert!(matches!(
            reader.unpack(&packed),
            Err(SyncError::Confidentiality(_))
        ));
    }

    #[test]
    fn test_every_byte_flip_is_detected() {
        let ctx = CryptoContext::new();
        let settings = CryptoSettings::default();
        let parcel = ParcelCrypto::generate(&ctx, &settings);
        let packed = SymmetricWriter::new(ctx, settings, parcel.clone())
            .pack(b"tamper evident")
            .unwrap();

        for i in 0..packed.len() {
            let mut tampered = packed.clone();
            tampered[i] ^= 0x01;
            let mut reader = SymmetricReader::new(settings, parcel.clone());
            assert!(reader.unpack(&tampered).is_err(), "flip at {} accepted", i);
        }
    }
}
