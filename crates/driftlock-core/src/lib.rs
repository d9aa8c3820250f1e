//! Driftlock protocol core
//!
//! Forward-secret, session-based message encryption between an initiator and
//! a responder. A three-message Diffie-Hellman handshake (3-DH) agrees on an
//! initial root key, a symmetric chain ratchet advances once per message, and
//! a DH ratchet re-keys a direction the first time a party sends on it.
//! Out-of-order delivery is absorbed by a skipped-key store.
//!
//! # Key lifecycle
//!
//! ```text
//! 3-DH Handshake
//!        │
//!        ▼
//! Root Key ── KDF-Root ──► Chain Key (per direction)
//!                               │
//!                               ▼ KDF-Chain, once per message
//!                          Message Key
//!                               │
//!                               ▼
//!                   AEAD ──► Wire Message
//! ```
//!
//! A message key is derived from a chain key exactly once, and the chain key
//! that produced it is replaced immediately. Compromise of later chain state
//! therefore never reveals earlier message keys.
//!
//! # Concurrency
//!
//! A [`Session`] is logically single-threaded: encrypt and decrypt mutate
//! chain keys, counters, and the skipped-key store, so concurrent use of one
//! session requires external serialization (one mutex per session suffices).
//! Independent sessions share no state. No operation blocks or performs I/O.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod handshake;
pub mod kdf;
pub mod session;
mod skipped;
pub mod suite;

pub use error::RatchetError;
pub use handshake::PublicBundle;
pub use session::Session;
pub use suite::{CipherSuite, SuiteId};
