//! HKDF-SHA256 helpers shared by the handshake and the blob cipher.

use hkdf::Hkdf;
use sha2::Sha256;

/// Output size of the hash underlying every derivation.
pub const HASH_LEN: usize = 32;

/// One chaining step: mix `ikm` into `chaining_key`, producing the next
/// chaining key and a fresh cipher key.
pub(crate) fn chain(chaining_key: &[u8; HASH_LEN], ikm: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let hk = Hkdf::<Sha256>::new(Some(chaining_key), ikm);
    let mut okm = [0u8; HASH_LEN * 2];
    // 64 bytes is always a valid HKDF-SHA256 output length.
    hk.expand(&[], &mut okm)
        .unwrap_or_else(|_| unreachable!("HKDF output length fixed at 64 bytes"));
    let mut ck = [0u8; HASH_LEN];
    let mut key = [0u8; HASH_LEN];
    ck.copy_from_slice(&okm[..HASH_LEN]);
    key.copy_from_slice(&okm[HASH_LEN..]);
    (ck, key)
}

/// Expand `key` under a context `label` into `out`.
///
/// Distinct labels yield independent keys; callers use this to split one
/// secret into per-direction or per-purpose material.
pub(crate) fn expand_labeled(key: &[u8], label: &[u8], out: &mut [u8]) {
    let hk = Hkdf::<Sha256>::new(None, key);
    hk.expand(label, out)
        .unwrap_or_else(|_| unreachable!("expansion lengths are small fixed constants"));
}
