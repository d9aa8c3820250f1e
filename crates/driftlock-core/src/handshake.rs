//! 3-DH key agreement establishing the initial root key
//!
//! Each party publishes a [`PublicBundle`] out of band. The initiator adds a
//! fresh session ephemeral key and both sides perform three Diffie-Hellman
//! computations in a cross-pairing that yields the same concatenated secret:
//!
//! ```text
//! initiator                       responder
//! DH(identity,    their ephemeral)  ==  DH(ephemeral, their identity)
//! DH(session eph, their identity)   ==  DH(identity,  initiator eph)
//! DH(session eph, their ephemeral)  ==  DH(ephemeral, initiator eph)
//! ```
//!
//! Hashing the concatenation under a fixed domain prefix gives the initial
//! root key. The initiator's session ephemeral and the responder's long-term
//! ephemeral become the first ratchet key pairs.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::RatchetError;
use crate::suite::CipherSuite;

/// Domain separation prefix mixed into the initial root key hash
const ROOT_KEY_PREFIX: &[u8] = b"RootKey_";

/// The out-of-band handshake payload: a party's long-term public keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicBundle {
    /// Long-term identity public key
    pub identity: [u8; 32],
    /// Medium-term ephemeral public key, consumed by the handshake
    pub ephemeral: [u8; 32],
}

/// A Curve25519 key pair owned by one session.
pub(crate) struct KeyPair {
    pub(crate) secret: StaticSecret,
    pub(crate) public: PublicKey,
}

impl KeyPair {
    pub(crate) fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }
}

/// Diffie-Hellman with rejection of non-contributory results.
///
/// A low-order public key collapses the shared secret to all zeros; treating
/// that as [`RatchetError::KeyAgreementFailure`] keeps a malicious bundle
/// from pinning both directions to a known key.
pub(crate) fn agree(
    secret: &StaticSecret,
    public: &PublicKey,
) -> Result<Zeroizing<[u8; 32]>, RatchetError> {
    let shared = secret.diffie_hellman(public);
    if !shared.was_contributory() {
        return Err(RatchetError::KeyAgreementFailure {
            reason: "shared secret is all zeros (low-order public key)".to_string(),
        });
    }
    Ok(Zeroizing::new(*shared.as_bytes()))
}

/// The initiator's three DH computations, concatenated in protocol order.
pub(crate) fn initiator_shared_secret(
    identity: &KeyPair,
    session_ephemeral: &KeyPair,
    peer: &PublicBundle,
) -> Result<Zeroizing<Vec<u8>>, RatchetError> {
    let their_identity = PublicKey::from(peer.identity);
    let their_ephemeral = PublicKey::from(peer.ephemeral);

    let dh1 = agree(&identity.secret, &their_ephemeral)?;
    let dh2 = agree(&session_ephemeral.secret, &their_identity)?;
    let dh3 = agree(&session_ephemeral.secret, &their_ephemeral)?;

    Ok(concat_shared(&dh1, &dh2, &dh3))
}

/// The responder's mirrored pairing, producing the identical secret.
pub(crate) fn responder_shared_secret(
    identity: &KeyPair,
    ephemeral: &KeyPair,
    peer: &PublicBundle,
    initiator_ephemeral: &PublicKey,
) -> Result<Zeroizing<Vec<u8>>, RatchetError> {
    let their_identity = PublicKey::from(peer.identity);

    let dh1 = agree(&ephemeral.secret, &their_identity)?;
    let dh2 = agree(&identity.secret, initiator_ephemeral)?;
    let dh3 = agree(&ephemeral.secret, initiator_ephemeral)?;

    Ok(concat_shared(&dh1, &dh2, &dh3))
}

/// Hash the concatenated shared secret into the initial root key, truncated
/// to the suite's key size.
pub(crate) fn initial_root_key(suite: &dyn CipherSuite, shared: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut input = Zeroizing::new(Vec::with_capacity(ROOT_KEY_PREFIX.len() + shared.len()));
    input.extend_from_slice(ROOT_KEY_PREFIX);
    input.extend_from_slice(shared);

    let digest = Zeroizing::new(suite.hash(&input));
    let key_size = suite.key_size().min(digest.len());
    Zeroizing::new(digest[..key_size].to_vec())
}

fn concat_shared(dh1: &[u8; 32], dh2: &[u8; 32], dh3: &[u8; 32]) -> Zeroizing<Vec<u8>> {
    let mut shared = Zeroizing::new(Vec::with_capacity(96));
    shared.extend_from_slice(dh1);
    shared.extend_from_slice(dh2);
    shared.extend_from_slice(dh3);
    shared
}
