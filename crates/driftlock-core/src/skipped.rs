//! Skipped message key store for out-of-order delivery
//!
//! When a receiving chain is advanced past messages that have not arrived
//! yet, each intermediate message key is parked here so the late message can
//! still be decrypted. Entries are consumed exactly once.

use std::collections::HashMap;

use zeroize::Zeroizing;

/// Longest run of undelivered messages a receiving chain may advance past.
/// Bounds memory growth from a malicious or buggy sender.
pub(crate) const MAX_SKIP: u32 = 1000;

/// Composite lookup key: the sender's ratchet public key plus the message
/// sequence number on that chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SkippedKeyId {
    ratchet_key: [u8; 32],
    seq: u32,
}

/// Message keys derived while skipping ahead in a receiving chain.
#[derive(Default)]
pub(crate) struct SkippedKeyStore {
    keys: HashMap<SkippedKeyId, Zeroizing<Vec<u8>>>,
}

impl SkippedKeyStore {
    pub(crate) fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    /// Park a derived message key until its message arrives.
    pub(crate) fn insert(&mut self, ratchet_key: [u8; 32], seq: u32, key: Zeroizing<Vec<u8>>) {
        self.keys.insert(SkippedKeyId { ratchet_key, seq }, key);
    }

    /// Remove and return the key for `(ratchet_key, seq)`, if one was parked.
    pub(crate) fn take(&mut self, ratchet_key: &[u8; 32], seq: u32) -> Option<Zeroizing<Vec<u8>>> {
        self.keys.remove(&SkippedKeyId { ratchet_key: *ratchet_key, seq })
    }

    /// Number of parked keys.
    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}
