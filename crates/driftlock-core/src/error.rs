//! Error types for ratchet session operations

use thiserror::Error;

/// Errors surfaced by handshake, encrypt, and decrypt operations.
///
/// Nothing is retried internally; resend policy belongs to the transport.
#[derive(Debug, Error)]
pub enum RatchetError {
    /// Incoming message is shorter than the fixed wire header
    #[error("malformed message: {len} bytes, need at least {min} for the header")]
    MalformedMessage {
        /// Length of the rejected message
        len: usize,
        /// Minimum length the wire format requires
        min: usize,
    },

    /// AEAD tag verification failed (corruption or wrong key material)
    #[error("authentication failure: AEAD tag did not verify")]
    AuthenticationFailure,

    /// Key agreement produced unusable output, fatal to the handshake attempt
    #[error("key agreement failure: {reason}")]
    KeyAgreementFailure {
        /// What the underlying suite reported
        reason: String,
    },

    /// Receiving chain would have to skip more slots than the store allows
    #[error("skip limit exceeded: at counter {current}, message needs {requested}")]
    SkipLimitExceeded {
        /// Current receive counter
        current: u32,
        /// Sequence number the message asked for
        requested: u32,
    },

    /// Operation requires handshake state the session does not have yet
    #[error("session not established: {reason}")]
    NotEstablished {
        /// Which precondition was missing
        reason: &'static str,
    },
}

impl RatchetError {
    /// Returns true if this error is fatal to the session.
    ///
    /// Fatal errors indicate a protocol violation or a caller bug. Transient
    /// errors leave the session able to process subsequent, well-formed
    /// messages.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::KeyAgreementFailure { .. } => true,
            Self::NotEstablished { .. } => true,

            // Transport-level garbage; the session survives
            Self::MalformedMessage { .. } => false,
            Self::AuthenticationFailure => false,
            Self::SkipLimitExceeded { .. } => false,
        }
    }
}
