//! Composable envelope stack
//!
//! An envelope writer turns a payload into a packed, tamper-evident and/or
//! confidential blob; the matching reader turns it back. Writers and readers
//! stack: a writer may pack the output of another writer.
//!
//! | Envelope     | Authenticity       | Confidentiality            |
//! |--------------|--------------------|----------------------------|
//! | Signature    | sender signature   | none                       |
//! | Symmetric    | AEAD tag           | shared parcel key          |
//! | Asymmetric   | sender signature   | per-message key to recipient |
//!
//! ## Wire Format
//!
//! ```text
//! +----------+-----------------------------------------+
//! | version  | postcard(PackedEnvelope)                |
//! | (1 byte) | tagged: Signature | Symmetric | Asymmetric |
//! +----------+-----------------------------------------+
//! ```
//!
//! Trailing bytes after the encoded envelope are rejected.
//!
//! ## Example
//!
//! ```rust
//! use parcelsync_core::crypto::{CryptoContext, ParcelCrypto};
//! use parcelsync_core::envelope::{EnvelopeReader, EnvelopeWriter, SymmetricReader, SymmetricWriter};
//! use parcelsync_core::settings::CryptoSettings;
//!
//! let ctx = CryptoContext::new();
//! let settings = CryptoSettings::default();
//! let parcel = ParcelCrypto::generate(&ctx, &settings);
//!
//! let writer = SymmetricWriter::new(ctx.clone(), settings, parcel.clone());
//! let packed = writer.pack(b"payload").unwrap();
//!
//! let mut reader = SymmetricReader::new(settings, parcel);
//! assert_eq!(reader.unpack(&packed).unwrap(), b"payload".to_vec());
//! assert_eq!(reader.uid(), Some(writer.uid()));
//! ```

mod asymmetric;
mod signature;
mod symmetric;

pub use asymmetric::{AsymmetricReader, AsymmetricWriter};
pub use signature::{SignatureReader, SignatureWriter};
pub use symmetric::{SymmetricReader, SymmetricWriter};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

pub(crate) use asymmetric::AsymmetricParcel;
pub(crate) use signature::SignedParcel;
pub(crate) use symmetric::SymmetricParcel;

/// Current envelope wire version
pub const ENVELOPE_VERSION: u8 = 1;

/// Packs a payload.
pub trait EnvelopeWriter: Send + Sync {
    fn pack(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>>;

    /// Correlation id of the logical message this writer produces.
    fn uid(&self) -> &str;
}

/// Unpacks what the matching writer packed.
pub trait EnvelopeReader: Send {
    fn unpack(&mut self, packed: &[u8]) -> SyncResult<Vec<u8>>;

    /// The uid recovered by the last successful `unpack`.
    fn uid(&self) -> Option<&str>;
}

/// Which envelope variant a packed blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Signature,
    Symmetric,
    Asymmetric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum PackedEnvelope {
    Signature(SignedParcel),
    Symmetric(SymmetricParcel),
    Asymmetric(AsymmetricParcel),
}

impl PackedEnvelope {
    pub(crate) fn kind(&self) -> EnvelopeKind {
        match self {
            PackedEnvelope::Signature(_) => EnvelopeKind::Signature,
            PackedEnvelope::Symmetric(_) => EnvelopeKind::Symmetric,
            PackedEnvelope::Asymmetric(_) => EnvelopeKind::Asymmetric,
        }
    }

    pub(crate) fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        let body = postcard::to_allocvec(self)
            .map_err(|e| SyncError::Serialization(format!("Failed to encode envelope: {}", e)))?;
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(ENVELOPE_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        let (version, body) = bytes
            .split_first()
            .ok_or_else(|| SyncError::Serialization("empty envelope".to_string()))?;
        if *version != ENVELOPE_VERSION {
            return Err(SyncError::Serialization(format!(
                "unsupported envelope version {}",
                version
            )));
        }
        let (envelope, rest): (PackedEnvelope, &[u8]) = postcard::take_from_bytes(body)
            .map_err(|e| SyncError::Serialization(format!("Failed to decode envelope: {}", e)))?;
        if !rest.is_empty() {
            return Err(SyncError::Serialization(format!(
                "{} trailing bytes after envelope",
                rest.len()
            )));
        }
        Ok(envelope)
    }
}

/// Inspect a packed blob without opening it.
pub fn peek_kind(packed: &[u8]) -> SyncResult<EnvelopeKind> {
    Ok(PackedEnvelope::from_bytes(packed)?.kind())
}

/// Deterministic, length-prefixed encoding of the fields a signature covers.
pub(crate) struct SignedData(Vec<u8>);

impl SignedData {
    pub(crate) fn new(domain: &[u8]) -> Self {
        let mut data = Vec::new();
        data.push(ENVELOPE_VERSION);
        data.extend_from_slice(&(domain.len() as u32).to_le_bytes());
        data.extend_from_slice(domain);
        SignedData(data)
    }

    pub(crate) fn field(mut self, bytes: &[u8]) -> Self {
        self.0.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        self.0.extend_from_slice(bytes);
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.0
    }
}

/// Writers applied innermost first.
pub struct ChainedWriter {
    layers: Vec<Box<dyn EnvelopeWriter>>,
}

impl ChainedWriter {
    pub fn new(inner: Box<dyn EnvelopeWriter>) -> Self {
        Self {
            layers: vec![inner],
        }
    }

    /// Add an outer layer.
    pub fn wrap(mut self, outer: Box<dyn EnvelopeWriter>) -> Self {
        self.layers.push(outer);
        self
    }
}

impl EnvelopeWriter for ChainedWriter {
    fn pack(&self, plaintext: &[u8]) -> SyncResult<Vec<u8>> {
        let mut data = plaintext.to_vec();
        for layer in &self.layers {
            data = layer.pack(&data)?;
        }
        Ok(data)
    }

    fn uid(&self) -> &str {
        self.layers[0].uid()
    }
}

/// Readers applied outermost first.
pub struct ChainedReader {
    layers: Vec<Box<dyn EnvelopeReader>>,
}

impl ChainedReader {
    pub fn new(outer: Box<dyn EnvelopeReader>) -> Self {
        Self {
            layers: vec![outer],
        }
    }

    /// Add the next inner layer.
    pub fn then(mut self, inner: Box<dyn EnvelopeReader>) -> Self {
        self.layers.push(inner);
        self
    }
}

impl EnvelopeReader for ChainedReader {
    fn unpack(&mut self, packed: &[u8]) -> SyncResult<Vec<u8>> {
        let mut data = packed.to_vec();
        for layer in self.layers.iter_mut() {
            data = layer.unpack(&data)?;
        }
        Ok(data)
    }

    fn uid(&self) -> Option<&str> {
        self.layers.last().and_then(|layer| layer.uid())
    }
}
