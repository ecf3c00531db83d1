//! Signature envelope: authenticity without confidentiality

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EnvelopeReader, EnvelopeWriter, PackedEnvelope, SignedData};
use crate::crypto::CryptoContext;
use crate::error::{SyncError, SyncResult};
use crate::identity::{ContactFinder, ContactPrivate, KeyId};
use crate::settings::{CryptoSettings, SignatureAlgorithm};

const DOMAIN: &[u8] = b"parcelsync-signature-envelope";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SignedParcel {
    pub uid: String,
    pub algorithm: SignatureAlgorithm,
    pub signer_key_id: KeyId,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedParcel {
    fn signed_data(&self) -> Vec<u8> {
        SignedData::new(DOMAIN)
            .field(self.uid.as_bytes())
            .field(&[self.algorithm as u8])
            .field(self.signer_key_id.as_str().as_bytes())
            .field(&self.payload)
            .finish()
    }
}

/// Signs payloads with the sender's signing key.
pub struct SignatureWriter {
    uid: String,
    settings: CryptoSettings,
    signer: ContactPrivate,
}

impl SignatureWriter {
    pub fn new(ctx: CryptoContext, settings: CryptoSettings, signer: ContactPrivate) -> Self {
        Self {
            uid: ctx.random_id(),
            settings,
            signer,
        }
    }
}

impl EnvelopeWriter for SignatureWriter {
    fn pack(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        let mut parcel = SignedParcel {
            uid: self.uid.clone(),
            algorithm: self.settings.signature,
            signer_key_id: self.signer.signing_key_id(),
            payload: plaintext.to_vec(),
            signature: Vec::new(),
        };
        parcel.signature = self.signer.sign(parcel.algorithm, &parcel.signed_data());
        PackedEnvelope::Signature(parcel).to_bytes()
    }

    fn uid(&self) -> &str {
        &self.uid
    }
}

/// Verifies a signature envelope against contacts resolved by the finder.
pub struct SignatureReader {
    settings: CryptoSettings,
    finder: Arc<dyn ContactFinder>,
    uid: Option<String>,
    signer: Option<KeyId>,
}

impl SignatureReader {
    pub fn new(settings: CryptoSettings, finder: Arc<dyn ContactFinder>) -> Self {
        Self {
            settings,
            finder,
            uid: None,
            signer: None,
        }
    }

    /// Contact id of the verified signer of the last unpacked envelope.
    pub fn signer(&self) -> Option<&KeyId> {
        self.signer.as_ref()
    }
}

impl EnvelopeReader for SignatureReader {
    fn unpack(&mut self, packed: &[u8]) -> SyncResult<Vec<u8>> {
        let parcel = match PackedEnvelope::from_bytes(packed)? {
            PackedEnvelope::Signature(parcel) => parcel,
            other => {
                return Err(SyncError::Integrity(format!(
                    "expected signature envelope, got {:?}",
                    other.kind()
                )))
            }
        };
        if parcel.algorithm != self.settings.signature {
            return Err(SyncError::Integrity(format!(
                "signature algorithm {:?} does not match {:?}",
                parcel.algorithm, self.settings.signature
            )));
        }

        let contact = self.finder.find(&parcel.signer_key_id).ok_or_else(|| {
            SyncError::Integrity(format!("unknown signer {}", parcel.signer_key_id.short()))
        })?;
        contact.public().verify(
            &parcel.signer_key_id,
            parcel.algorithm,
            &parcel.signed_data(),
            &parcel.signature,
        )?;

        debug!(uid = %parcel.uid, signer = %contact.id().short(), "Signature envelope verified");
        self.uid = Some(parcel.uid);
        self.signer = Some(contact.id().clone());
        Ok(parcel.payload)
    }

    fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}
