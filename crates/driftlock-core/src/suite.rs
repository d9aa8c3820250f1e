//! Cipher suite capability bundle
//!
//! A suite packages key agreement sizing, AEAD encryption, hashing, and
//! suite-level key stretching behind one object-safe trait so ratchet logic
//! never names a concrete algorithm. Suite selection is an out-of-band
//! agreement; nothing on the wire negotiates it.

use chacha20poly1305::{
    ChaCha20Poly1305, XChaCha20Poly1305,
    aead::{Aead, AeadCore, KeyInit, Payload, generic_array::GenericArray, generic_array::typenum::Unsigned},
};
use sha2::{Digest, Sha256, Sha512};

use crate::error::RatchetError;

/// PBKDF2 iteration count for suite-level key stretching
const PBKDF2_ROUNDS: u32 = 10_000;

/// Configuration value selecting a concrete cipher suite at session
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuiteId {
    /// Curve25519 with ChaCha20-Poly1305 (12-byte nonce) and SHA-256
    ChaCha20Poly1305Sha256,
    /// Curve25519 with a NaCl-style secret box: XChaCha20-Poly1305 with a
    /// 24-byte nonce, and SHA-256
    SecretBoxSha256,
    /// Curve25519 with ChaCha20-Poly1305 and a 512-bit hash
    ChaCha20Poly1305Sha512,
}

impl SuiteId {
    /// Construct the suite this identifier names.
    pub fn build(self) -> Box<dyn CipherSuite> {
        match self {
            Self::ChaCha20Poly1305Sha256 => Box::new(ChaCha20Suite),
            Self::SecretBoxSha256 => Box::new(SecretBoxSuite),
            Self::ChaCha20Poly1305Sha512 => Box::new(Sha512Suite),
        }
    }
}

/// Primitive operations a ratchet session needs from its cipher suite.
///
/// Handshake and session code size every buffer from the advertised
/// `dh_size`, `key_size`, and `nonce_size`, so implementations must report
/// them accurately even when sharing an AEAD engine.
pub trait CipherSuite: Send + Sync {
    /// Stable suite label, e.g. `"X25519_CHACHA20POLY1305_SHA256"`.
    fn name(&self) -> &'static str;

    /// Diffie-Hellman public key and shared secret length in bytes.
    fn dh_size(&self) -> usize;

    /// Symmetric key length in bytes for chain, root, and message keys.
    fn key_size(&self) -> usize;

    /// AEAD nonce length in bytes. Must be at least 8: the trailing 8 nonce
    /// bytes carry the message sequence number.
    fn nonce_size(&self) -> usize;

    /// Hash `data` with the suite's digest.
    fn hash(&self, data: &[u8]) -> Vec<u8>;

    /// Stretch `secret` into a `key_size` key under a context label.
    ///
    /// Used only for suite-level key material, independent of the ratchet's
    /// own KDF chain.
    fn derive_key(&self, secret: &[u8], label: &str) -> Vec<u8>;

    /// AEAD-encrypt `plaintext` bound to `aad`.
    fn aead_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError>;

    /// AEAD-decrypt `ciphertext`, verifying its tag against `aad`.
    ///
    /// Fails with [`RatchetError::AuthenticationFailure`] when the tag does
    /// not verify or the key/nonce length is wrong.
    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError>;
}

fn seal<A: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    if nonce.len() != <A as AeadCore>::NonceSize::USIZE {
        return Err(RatchetError::AuthenticationFailure);
    }
    let cipher = A::new_from_slice(key).map_err(|_| RatchetError::AuthenticationFailure)?;
    cipher
        .encrypt(GenericArray::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| RatchetError::AuthenticationFailure)
}

fn open<A: Aead + KeyInit>(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, RatchetError> {
    if nonce.len() != <A as AeadCore>::NonceSize::USIZE {
        return Err(RatchetError::AuthenticationFailure);
    }
    let cipher = A::new_from_slice(key).map_err(|_| RatchetError::AuthenticationFailure)?;
    cipher
        .decrypt(GenericArray::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| RatchetError::AuthenticationFailure)
}

fn stretch_sha256(secret: &[u8], label: &str, key_size: usize) -> Vec<u8> {
    let mut key = vec![0u8; key_size];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, label.as_bytes(), PBKDF2_ROUNDS, &mut key);
    key
}

/// Curve25519 + ChaCha20-Poly1305 + SHA-256.
pub struct ChaCha20Suite;

impl CipherSuite for ChaCha20Suite {
    fn name(&self) -> &'static str {
        "X25519_CHACHA20POLY1305_SHA256"
    }

    fn dh_size(&self) -> usize {
        32
    }

    fn key_size(&self) -> usize {
        32
    }

    fn nonce_size(&self) -> usize {
        12
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn derive_key(&self, secret: &[u8], label: &str) -> Vec<u8> {
        stretch_sha256(secret, label, self.key_size())
    }

    fn aead_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        seal::<ChaCha20Poly1305>(key, nonce, plaintext, aad)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        open::<ChaCha20Poly1305>(key, nonce, ciphertext, aad)
    }
}

/// Curve25519 + NaCl-style secret box + SHA-256.
///
/// Uses XChaCha20-Poly1305 as the box engine; the 24-byte nonce matches the
/// NaCl construction and is the size the ratchet will allocate.
pub struct SecretBoxSuite;

impl CipherSuite for SecretBoxSuite {
    fn name(&self) -> &'static str {
        "X25519_XCHACHA20POLY1305_SHA256"
    }

    fn dh_size(&self) -> usize {
        32
    }

    fn key_size(&self) -> usize {
        32
    }

    fn nonce_size(&self) -> usize {
        24
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn derive_key(&self, secret: &[u8], label: &str) -> Vec<u8> {
        stretch_sha256(secret, label, self.key_size())
    }

    fn aead_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        seal::<XChaCha20Poly1305>(key, nonce, plaintext, aad)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        open::<XChaCha20Poly1305>(key, nonce, ciphertext, aad)
    }
}

/// Curve25519 + ChaCha20-Poly1305 + SHA-512.
///
/// Shares the ChaCha20 AEAD engine but hashes and stretches with SHA-512,
/// giving a 64-byte digest for root key material before truncation.
pub struct Sha512Suite;

impl CipherSuite for Sha512Suite {
    fn name(&self) -> &'static str {
        "X25519_CHACHA20POLY1305_SHA512"
    }

    fn dh_size(&self) -> usize {
        32
    }

    fn key_size(&self) -> usize {
        32
    }

    fn nonce_size(&self) -> usize {
        12
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        Sha512::digest(data).to_vec()
    }

    fn derive_key(&self, secret: &[u8], label: &str) -> Vec<u8> {
        let mut key = vec![0u8; self.key_size()];
        pbkdf2::pbkdf2_hmac::<Sha512>(secret, label.as_bytes(), PBKDF2_ROUNDS, &mut key);
        key
    }

    fn aead_encrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        seal::<ChaCha20Poly1305>(key, nonce, plaintext, aad)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        open::<ChaCha20Poly1305>(key, nonce, ciphertext, aad)
    }
}
