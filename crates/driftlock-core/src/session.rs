//! Ratchet session: the stateful protocol core
//!
//! A [`Session`] owns every piece of mutable protocol state: root key, the
//! per-direction chain keys and counters, the current ratchet key pairs, and
//! the skipped-key store. There is no ambient or static state; construct
//! sessions explicitly and serialize concurrent access externally.
//!
//! # Wire format
//!
//! ```text
//! ratchet_public_key (32) ‖ sequence_number (4, big-endian) ‖ AEAD ciphertext
//! ```
//!
//! The nonce carries the sequence number in its trailing 8 bytes; the AEAD
//! associated data binds the sender's ratchet public key and the low byte of
//! the sequence number.

use tracing::{debug, trace};
use x25519_dalek::PublicKey;
use zeroize::Zeroizing;

use crate::error::RatchetError;
use crate::handshake::{
    KeyPair, PublicBundle, agree, initial_root_key, initiator_shared_secret,
    responder_shared_secret,
};
use crate::kdf::{kdf_chain, kdf_root};
use crate::skipped::{MAX_SKIP, SkippedKeyStore};
use crate::suite::{CipherSuite, SuiteId};

/// Ratchet public key length on the wire
const RATCHET_KEY_SIZE: usize = 32;

/// Sequence number length on the wire
const SEQ_SIZE: usize = 4;

/// Fixed wire header: ratchet public key ‖ big-endian sequence number
const HEADER_SIZE: usize = RATCHET_KEY_SIZE + SEQ_SIZE;

/// Trailing nonce bytes carrying the big-endian sequence number
const NONCE_SEQ_SIZE: usize = 8;

/// A forward-secret messaging session between two parties.
///
/// Create one per party with [`Session::new`], exchange [`PublicBundle`]s out
/// of band, then run [`initiate`](Session::initiate) on one side and
/// [`accept`](Session::accept) on the other. Afterwards
/// [`encrypt`](Session::encrypt) and [`decrypt`](Session::decrypt) operate
/// independently on each side.
pub struct Session {
    suite: Box<dyn CipherSuite>,

    identity: KeyPair,
    ephemeral: KeyPair,

    ratchet: Option<KeyPair>,
    their_ratchet: Option<PublicKey>,

    root_key: Option<Zeroizing<Vec<u8>>>,
    send_chain: Option<Zeroizing<Vec<u8>>>,
    recv_chain: Option<Zeroizing<Vec<u8>>>,

    send_count: u32,
    recv_count: u32,

    skipped: SkippedKeyStore,
}

impl Session {
    /// Create a session with freshly generated identity and ephemeral key
    /// pairs, using the suite named by `suite_id`.
    pub fn new(suite_id: SuiteId) -> Self {
        Self {
            suite: suite_id.build(),
            identity: KeyPair::generate(),
            ephemeral: KeyPair::generate(),
            ratchet: None,
            their_ratchet: None,
            root_key: None,
            send_chain: None,
            recv_chain: None,
            send_count: 0,
            recv_count: 0,
            skipped: SkippedKeyStore::new(),
        }
    }

    /// This party's public keys, for out-of-band exchange before the
    /// handshake.
    pub fn bundle(&self) -> PublicBundle {
        PublicBundle {
            identity: *self.identity.public.as_bytes(),
            ephemeral: *self.ephemeral.public.as_bytes(),
        }
    }

    /// Run the handshake as the initiator against the peer's bundle.
    ///
    /// Generates a fresh session ephemeral key pair, derives the initial root
    /// key, and establishes the sending chain. Returns the session ephemeral
    /// public key, which must reach the responder alongside this party's
    /// bundle.
    ///
    /// # Errors
    ///
    /// [`RatchetError::KeyAgreementFailure`] if any DH computation is
    /// non-contributory; the session is left unestablished.
    pub fn initiate(&mut self, peer: &PublicBundle) -> Result<[u8; 32], RatchetError> {
        let session_ephemeral = KeyPair::generate();
        let shared = initiator_shared_secret(&self.identity, &session_ephemeral, peer)?;
        let root_key = initial_root_key(self.suite.as_ref(), &shared);

        // The session ephemeral doubles as the first ratchet key pair; the
        // peer's ephemeral is the first remote ratchet key.
        let their_ephemeral = PublicKey::from(peer.ephemeral);
        let dh_output = agree(&session_ephemeral.secret, &their_ephemeral)?;
        let (root_key, chain_key) = kdf_root(&root_key, dh_output.as_slice(), self.suite.key_size());

        let session_ephemeral_public = *session_ephemeral.public.as_bytes();
        self.ratchet = Some(session_ephemeral);
        self.their_ratchet = Some(their_ephemeral);
        self.root_key = Some(root_key);
        self.send_chain = Some(chain_key);
        self.send_count = 0;

        debug!(suite = self.suite.name(), "session established as initiator");
        Ok(session_ephemeral_public)
    }

    /// Run the handshake as the responder, given the peer's bundle and the
    /// initiator's session ephemeral public key.
    ///
    /// Derives the same root key as the initiator and establishes the
    /// receiving chain that mirrors the initiator's sending chain. This
    /// party's long-term ephemeral key pair becomes its ratchet key pair.
    ///
    /// # Errors
    ///
    /// [`RatchetError::KeyAgreementFailure`] if any DH computation is
    /// non-contributory; the session is left unestablished.
    pub fn accept(
        &mut self,
        peer: &PublicBundle,
        initiator_ephemeral: &[u8; 32],
    ) -> Result<(), RatchetError> {
        let initiator_ephemeral = PublicKey::from(*initiator_ephemeral);
        let shared =
            responder_shared_secret(&self.identity, &self.ephemeral, peer, &initiator_ephemeral)?;
        let root_key = initial_root_key(self.suite.as_ref(), &shared);

        let dh_output = agree(&self.ephemeral.secret, &initiator_ephemeral)?;
        let (root_key, chain_key) = kdf_root(&root_key, dh_output.as_slice(), self.suite.key_size());

        self.ratchet = Some(KeyPair {
            secret: self.ephemeral.secret.clone(),
            public: self.ephemeral.public,
        });
        self.their_ratchet = Some(initiator_ephemeral);
        self.root_key = Some(root_key);
        self.recv_chain = Some(chain_key);
        self.recv_count = 0;

        debug!(suite = self.suite.name(), "session established as responder");
        Ok(())
    }

    /// Encrypt an application payload, advancing the sending chain one step.
    ///
    /// The first send after a direction switch triggers a DH ratchet: a fresh
    /// ratchet key pair replaces the old one and the send counter resets to
    /// zero. That happens at most once per direction per session lifetime.
    ///
    /// # Errors
    ///
    /// - [`RatchetError::NotEstablished`] before the handshake completes
    /// - [`RatchetError::KeyAgreementFailure`] if the ratchet step fails
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, RatchetError> {
        if self.root_key.is_none() {
            return Err(RatchetError::NotEstablished { reason: "handshake not completed" });
        }
        if self.send_chain.is_none() {
            self.establish_send_chain()?;
        }

        let key_size = self.suite.key_size();
        let Some(chain_key) = self.send_chain.as_ref() else {
            unreachable!("sending chain was established above");
        };
        let (next_chain_key, message_key) = kdf_chain(chain_key, key_size);
        self.send_chain = Some(next_chain_key);
        let seq = self.send_count;
        self.send_count += 1;

        let Some(ratchet) = self.ratchet.as_ref() else {
            unreachable!("handshake sets the ratchet key pair");
        };
        let ratchet_public = *ratchet.public.as_bytes();

        let nonce = self.build_nonce(seq);
        let aad = build_aad(&ratchet_public, seq);
        let ciphertext = self.suite.aead_encrypt(&message_key, &nonce, plaintext, &aad)?;

        let mut message = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        message.extend_from_slice(&ratchet_public);
        message.extend_from_slice(&seq.to_be_bytes());
        message.extend_from_slice(&ciphertext);

        trace!(seq, len = message.len(), "encrypted message");
        Ok(message)
    }

    /// Decrypt a wire message, advancing receive state as needed.
    ///
    /// A header carrying an unseen ratchet public key triggers a DH ratchet
    /// before key resolution. Messages ahead of the receive counter park the
    /// intermediate keys in the skipped-key store; messages whose keys were
    /// parked earlier consume them.
    ///
    /// Chain advancement and skipped-key insertion performed before an
    /// authentication failure are not rolled back. The session still decrypts
    /// subsequent, correctly ordered messages.
    ///
    /// # Errors
    ///
    /// - [`RatchetError::MalformedMessage`] if shorter than the header
    /// - [`RatchetError::NotEstablished`] before the handshake completes
    /// - [`RatchetError::SkipLimitExceeded`] if the message skips too far
    /// - [`RatchetError::AuthenticationFailure`] if the AEAD tag fails
    pub fn decrypt(&mut self, message: &[u8]) -> Result<Vec<u8>, RatchetError> {
        if message.len() < HEADER_SIZE {
            return Err(RatchetError::MalformedMessage { len: message.len(), min: HEADER_SIZE });
        }
        if self.root_key.is_none() {
            return Err(RatchetError::NotEstablished { reason: "handshake not completed" });
        }

        let mut sender_key = [0u8; RATCHET_KEY_SIZE];
        sender_key.copy_from_slice(&message[..RATCHET_KEY_SIZE]);
        let seq = u32::from_be_bytes([message[32], message[33], message[34], message[35]]);
        let ciphertext = &message[HEADER_SIZE..];

        if self.their_ratchet.map(|key| *key.as_bytes()) != Some(sender_key) {
            self.dh_ratchet(sender_key)?;
        }

        let message_key = self.resolve_message_key(sender_key, seq)?;
        let nonce = self.build_nonce(seq);
        let aad = build_aad(&sender_key, seq);
        let plaintext = self.suite.aead_decrypt(&message_key, &nonce, ciphertext, &aad)?;

        trace!(seq, "decrypted message");
        Ok(plaintext)
    }

    /// The most recently observed remote ratchet public key.
    pub fn remote_ratchet_key(&self) -> Option<[u8; 32]> {
        self.their_ratchet.map(|key| *key.as_bytes())
    }

    /// Number of message keys currently parked for out-of-order delivery.
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }

    /// Messages produced on the current sending chain.
    pub fn send_count(&self) -> u32 {
        self.send_count
    }

    /// Messages consumed on the current receiving chain.
    pub fn recv_count(&self) -> u32 {
        self.recv_count
    }

    /// First send on this session: generate a fresh ratchet key pair and
    /// derive the sending chain from the current root key.
    fn establish_send_chain(&mut self) -> Result<(), RatchetError> {
        let Some(their_ratchet) = self.their_ratchet else {
            return Err(RatchetError::NotEstablished { reason: "no remote ratchet key" });
        };
        let ratchet = KeyPair::generate();
        let dh_output = agree(&ratchet.secret, &their_ratchet)?;

        let Some(root_key) = self.root_key.as_ref() else {
            unreachable!("checked by encrypt before establishing the send chain");
        };
        let (root_key, chain_key) = kdf_root(root_key, dh_output.as_slice(), self.suite.key_size());

        self.ratchet = Some(ratchet);
        self.root_key = Some(root_key);
        self.send_chain = Some(chain_key);
        self.send_count = 0;

        debug!("DH ratchet: established sending chain");
        Ok(())
    }

    /// The sender rotated its ratchet key: derive a new receiving chain and
    /// reset the receive counter.
    fn dh_ratchet(&mut self, new_remote_key: [u8; RATCHET_KEY_SIZE]) -> Result<(), RatchetError> {
        let remote = PublicKey::from(new_remote_key);
        let Some(ratchet) = self.ratchet.as_ref() else {
            return Err(RatchetError::NotEstablished { reason: "no local ratchet key pair" });
        };
        let dh_output = agree(&ratchet.secret, &remote)?;

        let Some(root_key) = self.root_key.as_ref() else {
            unreachable!("checked by decrypt before the ratchet step");
        };
        let (root_key, chain_key) = kdf_root(root_key, dh_output.as_slice(), self.suite.key_size());

        self.their_ratchet = Some(remote);
        self.root_key = Some(root_key);
        self.recv_chain = Some(chain_key);
        self.recv_count = 0;

        debug!("DH ratchet: established receiving chain");
        Ok(())
    }

    /// Find the message key for `seq` on the chain identified by
    /// `sender_key`: either a parked skipped key, or the result of advancing
    /// the receiving chain, parking every intermediate key on the way.
    fn resolve_message_key(
        &mut self,
        sender_key: [u8; RATCHET_KEY_SIZE],
        seq: u32,
    ) -> Result<Zeroizing<Vec<u8>>, RatchetError> {
        if let Some(message_key) = self.skipped.take(&sender_key, seq) {
            trace!(seq, "consumed parked skipped key");
            return Ok(message_key);
        }

        if seq > self.recv_count && seq - self.recv_count > MAX_SKIP {
            return Err(RatchetError::SkipLimitExceeded {
                current: self.recv_count,
                requested: seq,
            });
        }

        let key_size = self.suite.key_size();
        while self.recv_count < seq {
            let Some(chain_key) = self.recv_chain.as_ref() else {
                return Err(RatchetError::NotEstablished { reason: "no receiving chain" });
            };
            let (next_chain_key, skipped_key) = kdf_chain(chain_key, key_size);
            self.recv_chain = Some(next_chain_key);
            self.skipped.insert(sender_key, self.recv_count, skipped_key);
            trace!(counter = self.recv_count, "parked skipped message key");
            self.recv_count += 1;
        }

        let Some(chain_key) = self.recv_chain.as_ref() else {
            return Err(RatchetError::NotEstablished { reason: "no receiving chain" });
        };
        let (next_chain_key, message_key) = kdf_chain(chain_key, key_size);
        self.recv_chain = Some(next_chain_key);
        self.recv_count += 1;
        Ok(message_key)
    }

    /// Nonce of the suite's advertised length; trailing 8 bytes hold the
    /// big-endian sequence number, leading bytes are zero.
    fn build_nonce(&self, seq: u32) -> Vec<u8> {
        let mut nonce = vec![0u8; self.suite.nonce_size()];
        let offset = nonce.len() - NONCE_SEQ_SIZE;
        nonce[offset..].copy_from_slice(&u64::from(seq).to_be_bytes());
        nonce
    }
}

/// Associated data: the sender's ratchet public key plus the low byte of the
/// sequence number.
fn build_aad(ratchet_key: &[u8; RATCHET_KEY_SIZE], seq: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(RATCHET_KEY_SIZE + 1);
    aad.extend_from_slice(ratchet_key);
    aad.push(seq as u8);
    aad
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn established_pair(suite_id: SuiteId) -> (Session, Session) {
        let mut alice = Session::new(suite_id);
        let mut bob = Session::new(suite_id);

        let ephemeral = alice.initiate(&bob.bundle()).unwrap();
        bob.accept(&alice.bundle(), &ephemeral).unwrap();
        (alice, bob)
    }

    #[test]
    fn handshake_symmetry() {
        let (alice, bob) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        assert_eq!(
            alice.root_key.as_ref().unwrap().as_slice(),
            bob.root_key.as_ref().unwrap().as_slice(),
            "root keys must match after the handshake"
        );
        assert_eq!(
            alice.send_chain.as_ref().unwrap().as_slice(),
            bob.recv_chain.as_ref().unwrap().as_slice(),
            "initiator send chain must equal responder recv chain"
        );
    }

    #[test]
    fn reverse_direction_chains_start_unestablished() {
        let (alice, bob) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        assert!(alice.recv_chain.is_none());
        assert!(bob.send_chain.is_none());
    }

    #[test]
    fn handshake_symmetry_on_every_suite() {
        for id in [
            SuiteId::ChaCha20Poly1305Sha256,
            SuiteId::SecretBoxSha256,
            SuiteId::ChaCha20Poly1305Sha512,
        ] {
            let (alice, bob) = established_pair(id);
            assert_eq!(
                alice.root_key.as_ref().unwrap().as_slice(),
                bob.root_key.as_ref().unwrap().as_slice(),
            );
        }
    }

    #[test]
    fn encrypt_advances_chain_and_counter() {
        let (mut alice, _) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        let chain_before = alice.send_chain.as_ref().unwrap().clone();
        let first = alice.encrypt(b"same plaintext").unwrap();
        let chain_after = alice.send_chain.as_ref().unwrap().clone();
        let second = alice.encrypt(b"same plaintext").unwrap();

        assert_ne!(chain_before.as_slice(), chain_after.as_slice());
        assert_ne!(first, second, "repeated plaintext must not repeat ciphertext");
        assert_eq!(alice.send_count(), 2);
    }

    #[test]
    fn sequence_numbers_appear_big_endian_in_header() {
        let (mut alice, _) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        let first = alice.encrypt(b"a").unwrap();
        let second = alice.encrypt(b"b").unwrap();

        assert_eq!(&first[32..36], &[0, 0, 0, 0]);
        assert_eq!(&second[32..36], &[0, 0, 0, 1]);
        assert_eq!(&first[..32], alice.ratchet.as_ref().unwrap().public.as_bytes());
    }

    #[test]
    fn responder_first_send_performs_one_dh_ratchet() {
        let (mut alice, mut bob) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        let to_bob = alice.encrypt(b"ping").unwrap();
        bob.decrypt(&to_bob).unwrap();

        let remote_before = alice.remote_ratchet_key();
        let reply = bob.encrypt(b"pong").unwrap();
        alice.decrypt(&reply).unwrap();
        let remote_after = alice.remote_ratchet_key();

        assert_ne!(remote_before, remote_after, "reply must carry a fresh ratchet key");

        // A second reply reuses the same ratchet key: no further DH ratchet
        let reply2 = bob.encrypt(b"pong pong").unwrap();
        alice.decrypt(&reply2).unwrap();
        assert_eq!(alice.remote_ratchet_key(), remote_after);
    }

    #[test]
    fn decrypt_before_handshake_fails() {
        let mut session = Session::new(SuiteId::ChaCha20Poly1305Sha256);
        let result = session.decrypt(&[0u8; 64]);
        assert!(matches!(result, Err(RatchetError::NotEstablished { .. })));
    }

    #[test]
    fn encrypt_before_handshake_fails() {
        let mut session = Session::new(SuiteId::ChaCha20Poly1305Sha256);
        let result = session.encrypt(b"too early");
        assert!(matches!(result, Err(RatchetError::NotEstablished { .. })));
    }

    #[test]
    fn short_message_is_malformed() {
        let (_, mut bob) = established_pair(SuiteId::ChaCha20Poly1305Sha256);
        let result = bob.decrypt(&[0u8; HEADER_SIZE - 1]);
        assert!(matches!(
            result,
            Err(RatchetError::MalformedMessage { len: 35, min: HEADER_SIZE })
        ));
    }

    #[test]
    fn skip_limit_is_enforced() {
        let (mut alice, mut bob) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        // Rewrite the sequence number far past the skip bound
        let mut message = alice.encrypt(b"x").unwrap();
        message[32..36].copy_from_slice(&5000u32.to_be_bytes());

        let result = bob.decrypt(&message);
        assert!(matches!(
            result,
            Err(RatchetError::SkipLimitExceeded { current: 0, requested: 5000 })
        ));
        assert_eq!(bob.skipped_key_count(), 0, "rejected skip must not park keys");
    }

    #[test]
    fn failed_decrypt_leaves_session_usable() {
        let (mut alice, mut bob) = established_pair(SuiteId::ChaCha20Poly1305Sha256);

        let mut tampered = alice.encrypt(b"first").unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(bob.decrypt(&tampered), Err(RatchetError::AuthenticationFailure)));

        // The chain advanced past the consumed key, so the next message still
        // decrypts in order.
        let next = alice.encrypt(b"second").unwrap();
        assert_eq!(bob.decrypt(&next).unwrap(), b"second");
    }

    #[test]
    fn session_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Session>();
    }

    #[test]
    fn nonce_embeds_sequence_number() {
        let (alice, _) = established_pair(SuiteId::SecretBoxSha256);
        let nonce = alice.build_nonce(0x0102_0304);

        assert_eq!(nonce.len(), 24);
        assert_eq!(&nonce[..16], &[0u8; 16]);
        assert_eq!(&nonce[16..], &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn aad_binds_ratchet_key_and_low_seq_byte() {
        let aad = build_aad(&[7u8; 32], 0x0102_0388);
        assert_eq!(aad.len(), 33);
        assert_eq!(&aad[..32], &[7u8; 32]);
        assert_eq!(aad[32], 0x88);
    }
}
