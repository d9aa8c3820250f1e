//! Key derivation for the root and chain ratchets
//!
//! Both functions are deterministic and side-effect free. All randomness in
//! the protocol enters through key-pair generation, never through the KDFs.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Expand info for the next root key
const ROOT_INFO: &[u8] = b"RootKey";

/// Expand info for the new chain key
const CHAIN_INFO: &[u8] = b"ChainKey";

/// Label for deriving a message key from a chain key
const MESSAGE_LABEL: &[u8] = b"MessageKey";

/// Label for deriving the next chain key
const NEXT_CHAIN_LABEL: &[u8] = b"NextChain";

/// Derive a new root key and chain key from a DH ratchet output.
///
/// Extract-then-expand: `prk = HMAC-SHA256(root_key, dh_output)`, then one
/// HKDF expand block per label, truncated to the suite's key size. Runs at
/// handshake completion and on every DH ratchet step.
pub fn kdf_root(
    root_key: &[u8],
    dh_output: &[u8],
    key_size: usize,
) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output);

    let mut new_root_key = Zeroizing::new(vec![0u8; key_size]);
    let Ok(()) = hkdf.expand(ROOT_INFO, &mut new_root_key) else {
        unreachable!("suite key size is a valid HKDF-SHA256 output length");
    };

    let mut new_chain_key = Zeroizing::new(vec![0u8; key_size]);
    let Ok(()) = hkdf.expand(CHAIN_INFO, &mut new_chain_key) else {
        unreachable!("suite key size is a valid HKDF-SHA256 output length");
    };

    (new_root_key, new_chain_key)
}

/// Advance a chain key one step, yielding the next chain key and the message
/// key for the current position.
///
/// The caller must replace its stored chain key with the returned one; the
/// message key is not re-derivable once that happens.
pub fn kdf_chain(chain_key: &[u8], key_size: usize) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
    let message_key = mac_label(chain_key, MESSAGE_LABEL, key_size);
    let next_chain_key = mac_label(chain_key, NEXT_CHAIN_LABEL, key_size);
    (next_chain_key, message_key)
}

fn mac_label(key: &[u8], label: &[u8], key_size: usize) -> Zeroizing<Vec<u8>> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let digest = mac.finalize().into_bytes();
    Zeroizing::new(digest[..key_size.min(digest.len())].to_vec())
}
