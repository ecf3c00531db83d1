//! Identity: key ids, key material and contacts
//!
//! ## Overview
//!
//! - **IdentityKeys**: Ed25519 for signatures, X25519 for key agreement
//! - **KeyId**: hex BLAKE3 of a public key (or keyed hash of a symmetric key)
//! - **Contacts**: public/private participant identities, resolved through a
//!   [`ContactFinder`] supplied by the caller
//!
//! ## Example
//!
//! ```rust
//! use parcelsync_core::crypto::CryptoContext;
//! use parcelsync_core::identity::{ContactFinder, ContactPrivate, ContactStore};
//! use parcelsync_core::settings::SignatureAlgorithm;
//!
//! let ctx = CryptoContext::new();
//! let alice = ContactPrivate::generate(&ctx, Some("alice@localhost".into()));
//!
//! let store = ContactStore::new();
//! store.add(alice.public().clone());
//!
//! let sig = alice.sign(SignatureAlgorithm::Ed25519, b"hello");
//! let found = store.find(&alice.signing_key_id()).unwrap();
//! found
//!     .public()
//!     .verify(&alice.signing_key_id(), SignatureAlgorithm::Ed25519, b"hello", &sig)
//!     .unwrap();
//! ```

mod contact;
mod key_id;
mod keys;

pub use contact::{
    format_address, parse_address, Contact, ContactFinder, ContactPrivate, ContactPublic,
    ContactStore,
};
pub use key_id::KeyId;
pub use keys::{verify_signature, IdentityKeys, IDENTITY_KEYS_LEN};
