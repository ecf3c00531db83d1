//! Command payloads and the envelopes that carry them
//!
//! | Command          | Envelope   | Check on receipt                                  |
//! |------------------|------------|---------------------------------------------------|
//! | `ContactRequest` | Signature  | signed by a key of the contact it carries         |
//! | `AccessGranted`  | Asymmetric | sender is a known contact and equals `contact_id` |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::access::AccessToken;
use crate::crypto::CryptoContext;
use crate::envelope::{
    AsymmetricReader, AsymmetricWriter, EnvelopeReader, EnvelopeWriter, PackedEnvelope,
    SignatureReader, SignatureWriter,
};
use crate::error::{SyncError, SyncResult};
use crate::identity::{Contact, ContactFinder, ContactPrivate, ContactPublic, KeyId};
use crate::remote::jobs::SendCommandJob;
use crate::settings::CryptoSettings;

/// A command delivered through a user's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingCommand {
    /// Sender introduces itself
    ContactRequest(ContactPublic),
    /// `contact_id` granted the receiver `token`
    AccessGranted { contact_id: KeyId, token: AccessToken },
}

impl IncomingCommand {
    pub fn name(&self) -> &'static str {
        match self {
            IncomingCommand::ContactRequest(_) => "ContactRequest",
            IncomingCommand::AccessGranted { .. } => "AccessGranted",
        }
    }

    pub fn to_payload(&self) -> SyncResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_payload(payload: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| SyncError::Protocol(format!("invalid command payload: {}", e)))
    }

    /// Pair the payload with the envelope this command travels in.
    ///
    /// Contact requests are only signed, so `recipient` may be unknown.
    pub fn seal(
        &self,
        ctx: &CryptoContext,
        settings: CryptoSettings,
        sender: &ContactPrivate,
        recipient: Option<&ContactPublic>,
    ) -> SyncResult<OutgoingCommand> {
        let writer: Box<dyn EnvelopeWriter> = match self {
            IncomingCommand::ContactRequest(_) => Box::new(SignatureWriter::new(
                ctx.clone(),
                settings,
                sender.clone(),
            )),
            IncomingCommand::AccessGranted { .. } => {
                let recipient = recipient.ok_or_else(|| {
                    SyncError::RequestConstruction("access grants need a recipient".to_string())
                })?;
                Box::new(AsymmetricWriter::new(
                    ctx.clone(),
                    settings,
                    sender.clone(),
                    recipient,
                )?)
            }
        };
        Ok(OutgoingCommand {
            payload: self.to_payload()?,
            writer,
        })
    }
}

/// A command ready to be posted with [`SendCommandJob`].
pub struct OutgoingCommand {
    payload: Vec<u8>,
    writer: Box<dyn EnvelopeWriter>,
}

impl OutgoingCommand {
    pub fn uid(&self) -> &str {
        self.writer.uid()
    }

    /// Envelope the payload now, e.g. to hand it over out of band.
    pub fn pack(&self) -> SyncResult<Vec<u8>> {
        self.writer.pack(&self.payload)
    }

    pub fn into_job(self, receiver: impl Into<String>) -> SendCommandJob {
        SendCommandJob::new(receiver, self.payload, self.writer)
    }
}

/// Resolves the contact a request claims to be, then falls back to known contacts.
struct ClaimedContact {
    claimed: ContactPublic,
    known: Arc<dyn ContactFinder>,
}

impl ContactFinder for ClaimedContact {
    fn find(&self, key_id: &KeyId) -> Option<Contact> {
        if self.claimed.has_key(key_id) {
            return Some(Contact::Public(self.claimed.clone()));
        }
        self.known.find(key_id)
    }

    fn find_by_address(&self, address: &str) -> Option<Contact> {
        if self.claimed.address() == Some(address) {
            return Some(Contact::Public(self.claimed.clone()));
        }
        self.known.find_by_address(address)
    }
}

/// Opens enveloped commands addressed to `me`.
#[derive(Clone)]
pub struct CommandDecoder {
    settings: CryptoSettings,
    me: ContactPrivate,
    contacts: Arc<dyn ContactFinder>,
}

impl CommandDecoder {
    pub fn new(settings: CryptoSettings, me: ContactPrivate, contacts: Arc<dyn ContactFinder>) -> Self {
        Self {
            settings,
            me,
            contacts,
        }
    }

    pub fn decode(&self, packed: &[u8]) -> SyncResult<IncomingCommand> {
        match PackedEnvelope::from_bytes(packed)? {
            PackedEnvelope::Signature(parcel) => self.decode_contact_request(packed, &parcel.payload),
            PackedEnvelope::Asymmetric(_) => self.decode_private(packed),
            PackedEnvelope::Symmetric(_) => Err(SyncError::Protocol(
                "commands are never sent in symmetric envelopes".to_string(),
            )),
        }
    }

    fn decode_contact_request(&self, packed: &[u8], unverified: &[u8]) -> SyncResult<IncomingCommand> {
        let IncomingCommand::ContactRequest(claimed) = IncomingCommand::from_payload(unverified)? else {
            return Err(SyncError::Integrity(
                "only contact requests may travel in signature envelopes".to_string(),
            ));
        };
        let finder = ClaimedContact {
            claimed: claimed.clone(),
            known: self.contacts.clone(),
        };
        let mut reader = SignatureReader::new(self.settings, Arc::new(finder));
        let payload = reader.unpack(packed)?;
        if reader.signer() != Some(claimed.id()) {
            return Err(SyncError::Integrity(
                "contact request not signed by the contact it introduces".to_string(),
            ));
        }
        debug!(contact = %claimed.id().short(), "Contact request verified");
        IncomingCommand::from_payload(&payload)
    }

    fn decode_private(&self, packed: &[u8]) -> SyncResult<IncomingCommand> {
        let mut reader = AsymmetricReader::new(self.settings, self.me.clone(), self.contacts.clone());
        let payload = reader.unpack(packed)?;
        let command = IncomingCommand::from_payload(&payload)?;
        match &command {
            IncomingCommand::AccessGranted { contact_id, .. } => {
                if reader.sender() != Some(contact_id) {
                    return Err(SyncError::Integrity(format!(
                        "access grant from {} claims to come from {}",
                        reader.sender().map(KeyId::short).unwrap_or("nobody"),
                        contact_id.short()
                    )));
                }
            }
            IncomingCommand::ContactRequest(_) => {
                return Err(SyncError::Protocol(
                    "contact requests travel in signature envelopes".to_string(),
                ));
            }
        }
        Ok(command)
    }
}

impl std::fmt::Debug for CommandDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDecoder")
            .field("me", &self.me.id().short())
            .finish_non_exhaustive()
    }
}
