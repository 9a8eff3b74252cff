//! Record layer: per-frame authenticated encryption.
//!
//! Wire layout of an encrypted frame payload:
//!
//! ```text
//! iv(16) || aes-256-cbc ciphertext || hmac-sha256 tag(32)
//! ```
//!
//! The IV is not random: it is derived from the direction's MAC key and a
//! 32-bit frame counter, and carried on the wire so the receiver can detect
//! loss, reordering, or replay before touching the ciphertext. The tag
//! covers `iv || ciphertext`; verification happens before decryption.
//! Counters never reset within a session, so frames must be sealed and
//! opened in order.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::CipherError;
use crate::keys::{DirectionKeys, SessionKeys};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// IV length carried at the front of each frame.
pub const IV_LEN: usize = 16;
/// Full HMAC-SHA-256 tag length at the end of each frame.
pub const TAG_LEN: usize = 32;
/// Smallest well-formed encrypted frame: an IV, one cipher block, a tag.
pub const MIN_FRAME_LEN: usize = IV_LEN + 16 + TAG_LEN;

const IV_CONTEXT: &[u8] = b"treeline frame iv";

fn keyed_mac(key: &[u8; 32]) -> HmacSha256 {
    HmacSha256::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"))
}

/// One direction's cipher state: keys plus the frame counter.
struct DirectionState {
    keys: DirectionKeys,
    counter: u32,
}

impl DirectionState {
    fn new(keys: DirectionKeys) -> Self {
        Self { keys, counter: 0 }
    }

    fn derive_iv(&self, counter: u32) -> [u8; IV_LEN] {
        let mut mac = keyed_mac(&self.keys.mac_key);
        mac.update(IV_CONTEXT);
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&digest[..IV_LEN]);
        iv
    }

    fn advance(&mut self) -> Result<u32, CipherError> {
        // Exhausting the 32-bit counter space would force IV reuse; treat it
        // as a desynchronization and require a fresh handshake.
        let current = self.counter;
        self.counter = current.checked_add(1).ok_or(CipherError::CounterDesync)?;
        Ok(current)
    }

    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let counter = self.advance()?;
        let iv = self.derive_iv(counter);
        let ciphertext = Aes256CbcEnc::new((&self.keys.cipher_key).into(), (&iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut frame = Vec::with_capacity(IV_LEN + ciphertext.len() + TAG_LEN);
        frame.extend_from_slice(&iv);
        frame.extend_from_slice(&ciphertext);
        let mut mac = keyed_mac(&self.keys.mac_key);
        mac.update(&frame);
        frame.extend_from_slice(&mac.finalize().into_bytes());
        Ok(frame)
    }

    fn open(&mut self, frame: &[u8]) -> Result<Vec<u8>, CipherError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(CipherError::Truncated { len: frame.len(), min: MIN_FRAME_LEN });
        }
        let (body, tag) = frame.split_at(frame.len() - TAG_LEN);
        let (iv, ciphertext) = body.split_at(IV_LEN);

        // A wrong IV means the peer is at a different counter position. Check
        // it first so desync and forgery are reported distinctly.
        let expected_iv = self.derive_iv(self.counter);
        if iv.ct_eq(&expected_iv).unwrap_u8() == 0 {
            return Err(CipherError::CounterDesync);
        }

        let mut mac = keyed_mac(&self.keys.mac_key);
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| CipherError::AuthenticationFailed)?;

        // The tag covers the padding, so a padding failure here means the
        // peer produced a malformed frame rather than an attack.
        let plaintext = Aes256CbcDec::new((&self.keys.cipher_key).into(), (&expected_iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::AuthenticationFailed)?;

        self.advance()?;
        Ok(plaintext)
    }
}

/// Bidirectional record cipher for one established session.
///
/// Consumes the [`SessionKeys`] from a completed handshake. Sealing uses the
/// send direction, opening the receive direction; the two counters advance
/// independently.
pub struct FrameCipher {
    send: DirectionState,
    recv: DirectionState,
}

impl FrameCipher {
    /// Build the record cipher from freshly derived session keys.
    #[must_use]
    pub fn new(keys: SessionKeys) -> Self {
        Self { send: DirectionState::new(keys.send), recv: DirectionState::new(keys.recv) }
    }

    /// Encrypt and authenticate one outbound frame payload.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.send.seal(plaintext)
    }

    /// Verify and decrypt one inbound frame payload.
    ///
    /// The counter only advances on success, so a frame that fails
    /// verification does not shift the window for subsequent frames.
    pub fn open(&mut self, frame: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.recv.open(frame)
    }

    /// Frames sealed so far (diagnostics).
    #[must_use]
    pub fn frames_sealed(&self) -> u32 {
        self.send.counter
    }

    /// Frames opened so far (diagnostics).
    #[must_use]
    pub fn frames_opened(&self) -> u32 {
        self.recv.counter
    }
}
