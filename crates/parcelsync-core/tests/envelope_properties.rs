//! Property-based tests for the envelope stack
//!
//! Every writer/reader pair must give back exactly what was packed, and any
//! single flipped bit in a packed envelope must be detected.

use std::sync::Arc;

use parcelsync_core::crypto::{CryptoContext, ParcelCrypto};
use parcelsync_core::envelope::{
    AsymmetricReader, AsymmetricWriter, ChainedReader, ChainedWriter, EnvelopeReader,
    EnvelopeWriter, SignatureReader, SignatureWriter, SymmetricReader, SymmetricWriter,
};
use parcelsync_core::identity::{ContactFinder, ContactPrivate, ContactStore};
use parcelsync_core::settings::CryptoSettings;
use proptest::prelude::*;

// ============================================================================
// Fixtures
// ============================================================================

struct Parties {
    ctx: CryptoContext,
    settings: CryptoSettings,
    alice: ContactPrivate,
    bob: ContactPrivate,
    /// What bob knows: alice
    bobs_contacts: Arc<dyn ContactFinder>,
}

fn parties() -> Parties {
    let ctx = CryptoContext::new();
    let alice = ContactPrivate::generate(&ctx, Some("alice@local".to_string()));
    let bob = ContactPrivate::generate(&ctx, Some("bob@local".to_string()));
    let store = Arc::new(ContactStore::new());
    store.add(alice.public().clone());
    Parties {
        ctx,
        settings: CryptoSettings::fast(),
        alice,
        bob,
        bobs_contacts: store,
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Signature,
    Symmetric,
    Asymmetric,
    SignedThenEncrypted,
}

fn kind_strategy() -> impl Strategy<Value = Kind> {
    prop_oneof![
        Just(Kind::Signature),
        Just(Kind::Symmetric),
        Just(Kind::Asymmetric),
        Just(Kind::SignedThenEncrypted),
    ]
}

fn pair(p: &Parties, kind: Kind) -> (Box<dyn EnvelopeWriter>, Box<dyn EnvelopeReader>) {
    let parcel = ParcelCrypto::generate(&p.ctx, &p.settings);
    match kind {
        Kind::Signature => (
            Box::new(SignatureWriter::new(p.ctx.clone(), p.settings, p.alice.clone())),
            Box::new(SignatureReader::new(p.settings, p.bobs_contacts.clone())),
        ),
        Kind::Symmetric => (
            Box::new(SymmetricWriter::new(p.ctx.clone(), p.settings, parcel.clone())),
            Box::new(SymmetricReader::new(p.settings, parcel)),
        ),
        Kind::Asymmetric => (
            Box::new(
                AsymmetricWriter::new(p.ctx.clone(), p.settings, p.alice.clone(), p.bob.public())
                    .unwrap(),
            ),
            Box::new(AsymmetricReader::new(
                p.settings,
                p.bob.clone(),
                p.bobs_contacts.clone(),
            )),
        ),
        Kind::SignedThenEncrypted => (
            Box::new(
                ChainedWriter::new(Box::new(SignatureWriter::new(
                    p.ctx.clone(),
                    p.settings,
                    p.alice.clone(),
                )))
                .wrap(Box::new(SymmetricWriter::new(
                    p.ctx.clone(),
                    p.settings,
                    parcel.clone(),
                ))),
            ),
            Box::new(
                ChainedReader::new(Box::new(SymmetricReader::new(p.settings, parcel)))
                    .then(Box::new(SignatureReader::new(p.settings, p.bobs_contacts.clone()))),
            ),
        ),
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Unpacking returns the packed payload and the writer's uid
    #[test]
    fn unpack_inverts_pack(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let p = parties();
        let (writer, mut reader) = pair(&p, kind);
        let packed = writer.pack(&payload).unwrap();
        prop_assert_eq!(reader.unpack(&packed).unwrap(), payload);
        prop_assert_eq!(reader.uid(), Some(writer.uid()));
    }

    /// Flipping any single bit makes unpacking fail
    #[test]
    fn single_bit_flip_is_detected(
        kind in kind_strategy(),
        payload in prop::collection::vec(any::<u8>(), 1..512),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let p = parties();
        let (writer, mut reader) = pair(&p, kind);
        let mut packed = writer.pack(&payload).unwrap();
        let at = position.index(packed.len());
        packed[at] ^= 1 << bit;
        prop_assert!(reader.unpack(&packed).is_err());
    }

    /// Confidential envelopes never carry the payload in the clear
    #[test]
    fn ciphertext_hides_payload(payload in prop::collection::vec(any::<u8>(), 32..256)) {
        let p = parties();
        for kind in [Kind::Symmetric, Kind::Asymmetric, Kind::SignedThenEncrypted] {
            let (writer, _) = pair(&p, kind);
            let packed = writer.pack(&payload).unwrap();
            prop_assert!(!packed.windows(payload.len()).any(|w| w == payload.as_slice()));
        }
    }

    /// A third party cannot open an asymmetric envelope addressed to bob
    #[test]
    fn asymmetric_only_opens_for_recipient(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let p = parties();
        let eve = ContactPrivate::generate(&p.ctx, None);
        let writer =
            AsymmetricWriter::new(p.ctx.clone(), p.settings, p.alice.clone(), p.bob.public())
                .unwrap();
        let packed = writer.pack(&payload).unwrap();
        let mut reader = AsymmetricReader::new(p.settings, eve, p.bobs_contacts.clone());
        prop_assert!(reader.unpack(&packed).is_err());
    }
}
