//! Contacts and contact lookup
//!
//! A contact is a participant's set of known public keys. The private variant
//! additionally holds the matching [`IdentityKeys`]. Envelope readers never
//! keep a registry of their own; they resolve signers and recipients through
//! a caller-supplied [`ContactFinder`].

use std::collections::{BTreeMap, HashMap};

use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use super::keys::{verify_signature, IdentityKeys};
use crate::crypto::CryptoContext;
use crate::error::{SyncError, SyncResult};
use crate::identity::KeyId;
use crate::settings::SignatureAlgorithm;

/// Split an address of the form `user@server`.
pub fn parse_address(address: &str) -> SyncResult<(&str, &str)> {
    match address.rsplit_once('@') {
        Some((user, server)) if !user.is_empty() && !server.is_empty() => Ok((user, server)),
        _ => Err(SyncError::Config(format!(
            "invalid address '{}', expected user@server",
            address
        ))),
    }
}

pub fn format_address(user: &str, server: &str) -> String {
    format!("{}@{}", user, server)
}

/// Public half of a participant's identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPublic {
    id: KeyId,
    address: Option<String>,
    verification_keys: BTreeMap<KeyId, [u8; 32]>,
    encryption_keys: BTreeMap<KeyId, [u8; 32]>,
}

impl ContactPublic {
    /// Build a contact whose id is the id of its signing key.
    pub fn from_keys(
        verifying: &VerifyingKey,
        encryption: &X25519PublicKey,
        address: Option<String>,
    ) -> Self {
        let id = KeyId::from_public_key(verifying.as_bytes());
        let mut verification_keys = BTreeMap::new();
        verification_keys.insert(id.clone(), verifying.to_bytes());
        let mut encryption_keys = BTreeMap::new();
        encryption_keys.insert(
            KeyId::from_public_key(encryption.as_bytes()),
            *encryption.as_bytes(),
        );
        Self {
            id,
            address,
            verification_keys,
            encryption_keys,
        }
    }

    pub fn id(&self) -> &KeyId {
        &self.id
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        self.address = Some(address.into());
    }

    /// True if `key_id` names the contact or any of its keys.
    pub fn has_key(&self, key_id: &KeyId) -> bool {
        &self.id == key_id
            || self.verification_keys.contains_key(key_id)
            || self.encryption_keys.contains_key(key_id)
    }

    pub fn verification_key(&self, key_id: &KeyId) -> SyncResult<VerifyingKey> {
        let bytes = self.verification_keys.get(key_id).ok_or_else(|| {
            SyncError::Integrity(format!("contact {} has no key {}", self.id.short(), key_id))
        })?;
        VerifyingKey::from_bytes(bytes)
            .map_err(|e| SyncError::InvalidKey(format!("bad verification key: {}", e)))
    }

    /// Verify `signature` over `data` with the named signing key.
    pub fn verify(
        &self,
        key_id: &KeyId,
        algorithm: SignatureAlgorithm,
        data: &[u8],
        signature: &[u8],
    ) -> SyncResult<()> {
        let key = self.verification_key(key_id)?;
        verify_signature(&key, algorithm, data, signature)
    }

    pub fn encryption_key(&self, key_id: &KeyId) -> Option<X25519PublicKey> {
        self.encryption_keys
            .get(key_id)
            .map(|bytes| X25519PublicKey::from(*bytes))
    }

    /// The key senders should encrypt to.
    pub fn default_encryption_key(&self) -> SyncResult<(KeyId, X25519PublicKey)> {
        self.encryption_keys
            .iter()
            .next()
            .map(|(id, bytes)| (id.clone(), X25519PublicKey::from(*bytes)))
            .ok_or_else(|| {
                SyncError::InvalidKey(format!("contact {} has no encryption key", self.id.short()))
            })
    }
}

/// A participant we hold private keys for.
#[derive(Clone, Debug)]
pub struct ContactPrivate {
    public: ContactPublic,
    keys: IdentityKeys,
}

impl ContactPrivate {
    pub fn generate(ctx: &CryptoContext, address: Option<String>) -> Self {
        Self::from_keys(IdentityKeys::generate(ctx), address)
    }

    pub fn from_keys(keys: IdentityKeys, address: Option<String>) -> Self {
        let public =
            ContactPublic::from_keys(&keys.verifying_key(), &keys.encryption_public(), address);
        Self { public, keys }
    }

    pub fn id(&self) -> &KeyId {
        self.public.id()
    }

    pub fn public(&self) -> &ContactPublic {
        &self.public
    }

    pub fn keys(&self) -> &IdentityKeys {
        &self.keys
    }

    pub fn signing_key_id(&self) -> KeyId {
        self.keys.signing_key_id()
    }

    pub fn sign(&self, algorithm: SignatureAlgorithm, data: &[u8]) -> Vec<u8> {
        self.keys.sign(algorithm, data)
    }

    pub(crate) fn encryption_secret(&self, key_id: &KeyId) -> Option<&X25519StaticSecret> {
        if &self.keys.encryption_key_id() == key_id {
            Some(self.keys.encryption_secret())
        } else {
            None
        }
    }
}

/// A resolved contact.
#[derive(Clone, Debug)]
pub enum Contact {
    Public(ContactPublic),
    Private(ContactPrivate),
}

impl Contact {
    pub fn id(&self) -> &KeyId {
        self.public().id()
    }

    pub fn public(&self) -> &ContactPublic {
        match self {
            Contact::Public(public) => public,
            Contact::Private(private) => private.public(),
        }
    }

    pub fn as_private(&self) -> Option<&ContactPrivate> {
        match self {
            Contact::Private(private) => Some(private),
            Contact::Public(_) => None,
        }
    }
}

impl From<ContactPublic> for Contact {
    fn from(contact: ContactPublic) -> Self {
        Contact::Public(contact)
    }
}

impl From<ContactPrivate> for Contact {
    fn from(contact: ContactPrivate) -> Self {
        Contact::Private(contact)
    }
}

/// Resolve contacts by key id or address.
pub trait ContactFinder: Send + Sync {
    fn find(&self, key_id: &KeyId) -> Option<Contact>;

    fn find_by_address(&self, address: &str) -> Option<Contact>;
}

/// In-memory [`ContactFinder`].
#[derive(Debug, Default)]
pub struct ContactStore {
    contacts: RwLock<HashMap<KeyId, Contact>>,
}

impl ContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a contact. A private entry is never downgraded to public.
    pub fn add(&self, contact: impl Into<Contact>) {
        let contact = contact.into();
        let mut contacts = self.contacts.write();
        if let (Contact::Public(_), Some(Contact::Private(_))) =
            (&contact, contacts.get(contact.id()))
        {
            return;
        }
        tracing::debug!(contact = %contact.id().short(), "Contact stored");
        contacts.insert(contact.id().clone(), contact);
    }

    pub fn remove(&self, id: &KeyId) -> Option<Contact> {
        self.contacts.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.read().is_empty()
    }

    pub fn list(&self) -> Vec<Contact> {
        self.contacts.read().values().cloned().collect()
    }
}

impl ContactFinder for ContactStore {
    fn find(&self, key_id: &KeyId) -> Option<Contact> {
        let contacts = self.contacts.read();
        if let Some(contact) = contacts.get(key_id) {
            return Some(contact.clone());
        }
        contacts
            .values()
            .find(|c| c.public().has_key(key_id))
            .cloned()
    }

    fn find_by_address(&self, address: &str) -> Option<Contact> {
        self.contacts
            .read()
            .values()
            .find(|c| c.public().address() == Some(address))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("alice@localhost").unwrap(), ("alice", "localhost"));
        assert_eq!(
            parse_address("bob@mail@example.org").unwrap(),
            ("bob@mail", "example.org")
        );
        assert!(parse_address("nobody").is_err());
        assert!(parse_address("@server").is_err());
        assert!(parse_address("user@").is_err());
    }

    #[test]
    fn test_contact_verifies_own_signature() {
        let ctx = CryptoContext::new();
        let alice = ContactPrivate::generate(&ctx, Some("alice@server".into()));
        let sig = alice.sign(SignatureAlgorithm::Ed25519, b"hi");
        alice
            .public()
            .verify(&alice.signing_key_id(), SignatureAlgorithm::Ed25519, b"hi", &sig)
            .unwrap();
    }

    #[test]
    fn test_unknown_key_is_integrity_error() {
        let ctx = CryptoContext::new();
        let alice = ContactPrivate::generate(&ctx, None);
        let bob = ContactPrivate::generate(&ctx, None);
        let sig = bob.sign(SignatureAlgorithm::Ed25519, b"hi");
        let result =
            alice
                .public()
                .verify(&bob.signing_key_id(), SignatureAlgorithm::Ed25519, b"hi", &sig);
        assert!(matches!(result, Err(SyncError::Integrity(_))));
    }

    #[test]
    fn test_store_finds_by_any_key() {
        let ctx = CryptoContext::new();
        let alice = ContactPrivate::generate(&ctx, Some("alice@server".into()));
        let store = ContactStore::new();
        store.add(alice.public().clone());

        let enc_id = alice.keys().encryption_key_id();
        assert!(store.find(alice.id()).is_some());
        assert!(store.find(&enc_id).is_some());
        assert!(store.find_by_address("alice@server").is_some());
        assert!(store.find_by_address("bob@server").is_none());
    }

    #[test]
    fn test_store_keeps_private_entry() {
        let ctx = CryptoContext::new();
        let alice = ContactPrivate::generate(&ctx, None);
        let store = ContactStore::new();
        store.add(alice.clone());
        store.add(alice.public().clone());

        let found = store.find(alice.id()).unwrap();
        assert!(found.as_private().is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_public_contact_json_roundtrip() {
        let ctx = CryptoContext::new();
        let alice = ContactPrivate::generate(&ctx, Some("alice@server".into()));
        let json = serde_json::to_string(alice.public()).unwrap();
        let back: ContactPublic = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, alice.public());
    }
}
