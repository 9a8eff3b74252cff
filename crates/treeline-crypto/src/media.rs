//! Self-contained encryption for media blobs.
//!
//! Attachments are sealed once under a random per-blob key and fetched out
//! of band, so there is no counter or session state here. The blob key is
//! expanded with a kind-specific label into an IV, a cipher key, and a MAC
//! key; the recipient gets the 32-byte blob key through an encrypted message
//! and re-derives everything else.
//!
//! Blob layout: `aes-256-cbc ciphertext || mac(10)`. The MAC is a truncated
//! HMAC-SHA-256 over the IV followed by the ciphertext.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::errors::CipherError;
use crate::kdf;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Length of a blob key.
pub const BLOB_KEY_LEN: usize = 32;
/// Truncated MAC length appended to each sealed blob.
pub const BLOB_MAC_LEN: usize = 10;

const IV_LEN: usize = 16;

/// What kind of media a blob carries. Each kind derives distinct keys from
/// the same blob key, so a blob cannot be replayed as a different kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Voice note or audio file.
    Audio,
    /// Any other attachment.
    Document,
}

impl BlobKind {
    fn label(self) -> &'static [u8] {
        match self {
            Self::Image => b"treeline blob image",
            Self::Video => b"treeline blob video",
            Self::Audio => b"treeline blob audio",
            Self::Document => b"treeline blob document",
        }
    }
}

struct BlobKeys {
    iv: [u8; IV_LEN],
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
}

impl BlobKeys {
    fn derive(blob_key: &[u8; BLOB_KEY_LEN], kind: BlobKind) -> Self {
        let mut okm = [0u8; IV_LEN + 64];
        kdf::expand_labeled(blob_key, kind.label(), &mut okm);
        let mut keys = Self { iv: [0; IV_LEN], cipher_key: [0; 32], mac_key: [0; 32] };
        keys.iv.copy_from_slice(&okm[..IV_LEN]);
        keys.cipher_key.copy_from_slice(&okm[IV_LEN..IV_LEN + 32]);
        keys.mac_key.copy_from_slice(&okm[IV_LEN + 32..]);
        okm.zeroize();
        keys
    }
}

impl Drop for BlobKeys {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
    }
}

/// Draw a fresh blob key from the system RNG.
#[must_use]
pub fn generate_blob_key() -> [u8; BLOB_KEY_LEN] {
    let mut key = [0u8; BLOB_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

/// Seal a media blob under `blob_key`.
#[must_use]
pub fn seal_blob(blob_key: &[u8; BLOB_KEY_LEN], kind: BlobKind, plaintext: &[u8]) -> Vec<u8> {
    let keys = BlobKeys::derive(blob_key, kind);
    let ciphertext = Aes256CbcEnc::new((&keys.cipher_key).into(), (&keys.iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mac = mac_over(&keys, &ciphertext);
    let mut blob = ciphertext;
    blob.extend_from_slice(&mac.finalize().into_bytes()[..BLOB_MAC_LEN]);
    blob
}

/// Verify and decrypt a sealed media blob.
pub fn open_blob(
    blob_key: &[u8; BLOB_KEY_LEN],
    kind: BlobKind,
    blob: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let min = 16 + BLOB_MAC_LEN;
    if blob.len() < min {
        return Err(CipherError::Truncated { len: blob.len(), min });
    }
    let keys = BlobKeys::derive(blob_key, kind);
    let (ciphertext, tag) = blob.split_at(blob.len() - BLOB_MAC_LEN);

    let mac = mac_over(&keys, ciphertext);
    let expected = mac.finalize().into_bytes();
    if expected[..BLOB_MAC_LEN].ct_eq(tag).unwrap_u8() == 0 {
        return Err(CipherError::AuthenticationFailed);
    }

    Aes256CbcDec::new((&keys.cipher_key).into(), (&keys.iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::AuthenticationFailed)
}

fn mac_over(keys: &BlobKeys, ciphertext: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(&keys.mac_key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(&keys.iv);
    mac.update(ciphertext);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trips() {
        let key = generate_blob_key();
        let media = vec![0xA5u8; 4096];
        let blob = seal_blob(&key, BlobKind::Image, &media);
        assert_eq!(open_blob(&key, BlobKind::Image, &blob).unwrap(), media);
    }

    #[test]
    fn kind_mismatch_fails() {
        let key = generate_blob_key();
        let blob = seal_blob(&key, BlobKind::Image, b"picture bytes");
        assert_eq!(
            open_blob(&key, BlobKind::Video, &blob),
            Err(CipherError::AuthenticationFailed)
        );
    }

    #[test]
    fn wrong_key_fails() {
        let blob = seal_blob(&generate_blob_key(), BlobKind::Document, b"contract");
        assert_eq!(
            open_blob(&generate_blob_key(), BlobKind::Document, &blob),
            Err(CipherError::AuthenticationFailed)
        );
    }

    #[test]
    fn corrupted_blob_fails() {
        let key = generate_blob_key();
        let mut blob = seal_blob(&key, BlobKind::Audio, b"voice note");
        blob[0] ^= 0xFF;
        assert_eq!(
            open_blob(&key, BlobKind::Audio, &blob),
            Err(CipherError::AuthenticationFailed)
        );
    }

    #[test]
    fn short_blob_is_truncated() {
        let key = generate_blob_key();
        assert!(matches!(
            open_blob(&key, BlobKind::Image, &[0u8; 5]),
            Err(CipherError::Truncated { .. })
        ));
    }
}
