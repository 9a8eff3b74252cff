//! Mutually-authenticating key exchange.
//!
//! Three-message XX pattern over X25519. A running SHA-256 transcript hash
//! covers every byte either side has sent; static public keys travel
//! encrypted under AES-256-GCM with the transcript as associated data, so a
//! forged or replayed message fails tag verification instead of producing
//! divergent keys. The first message carries an explicit version byte which
//! is itself part of the transcript.
//!
//! Message layout (lengths in bytes):
//!
//! ```text
//! hello   (initiator -> responder): version(1) || e_pub(32)
//! accept  (responder -> initiator): e_pub(32) || enc(s_pub)(48) || enc(empty)(16)
//! finish  (initiator -> responder): enc(s_pub)(48) || enc(empty)(16)
//! ```

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};
use x25519_dalek::PublicKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::HandshakeError;
use crate::kdf::{self, HASH_LEN};
use crate::keys::{EphemeralKeypair, KEY_LEN, SessionKeys, StaticKeypair};

/// Wire protocol version carried in the hello message.
pub const PROTOCOL_VERSION: u8 = 1;

const PROTOCOL_NAME: &[u8] = b"TREELINE/1 X25519-AESGCM-SHA256";
const GCM_TAG_LEN: usize = 16;
const ENC_KEY_LEN: usize = KEY_LEN + GCM_TAG_LEN;

const HELLO_LEN: usize = 1 + KEY_LEN;
const ACCEPT_LEN: usize = KEY_LEN + ENC_KEY_LEN + GCM_TAG_LEN;
const FINISH_LEN: usize = ENC_KEY_LEN + GCM_TAG_LEN;

/// Which side of the handshake this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the hello message; the client side.
    Initiator,
    /// Answers a hello; the server side.
    Responder,
}

/// Result of feeding one peer message to the engine.
pub enum HandshakeOutcome {
    /// Send this message and wait for the peer's next one.
    Reply(Vec<u8>),
    /// The channel is established. Send `reply` first if present.
    Established {
        /// Final outbound handshake message, if this side sends one.
        reply: Option<Vec<u8>>,
        /// Directional keys for the record layer.
        keys: Box<SessionKeys>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Init,
    SentHello,
    AwaitFinish,
    Established,
    Failed,
}

/// Transcript hash plus the evolving chaining key and handshake cipher key.
#[derive(Zeroize, ZeroizeOnDrop)]
struct Transcript {
    hash: [u8; HASH_LEN],
    chaining_key: [u8; HASH_LEN],
    cipher_key: Option<[u8; KEY_LEN]>,
    #[zeroize(skip)]
    nonce: u64,
}

impl Transcript {
    fn new() -> Self {
        let hash: [u8; HASH_LEN] = Sha256::digest(PROTOCOL_NAME).into();
        Self { hash, chaining_key: hash, cipher_key: None, nonce: 0 }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn mix_key(&mut self, ikm: &[u8]) {
        let (ck, key) = kdf::chain(&self.chaining_key, ikm);
        self.chaining_key = ck;
        self.cipher_key = Some(key);
        self.nonce = 0;
    }

    fn take_nonce(&mut self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&self.nonce.to_be_bytes());
        self.nonce += 1;
        bytes
    }

    /// Encrypt under the current handshake key with the transcript as AAD,
    /// then absorb the ciphertext.
    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let key = self
            .cipher_key
            .ok_or(HandshakeError::InvalidState("no handshake key mixed yet"))?;
        let aead = Aes256Gcm::new((&key).into());
        let nonce = self.take_nonce();
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &self.hash })
            .map_err(|_| HandshakeError::AuthenticationMismatch)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// Verify and decrypt against the transcript, then absorb the ciphertext.
    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let key = self
            .cipher_key
            .ok_or(HandshakeError::InvalidState("no handshake key mixed yet"))?;
        let aead = Aes256Gcm::new((&key).into());
        let nonce = self.take_nonce();
        let plaintext = aead
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: &self.hash })
            .map_err(|_| HandshakeError::AuthenticationMismatch)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }
}

/// Drives one handshake attempt from hello to established keys.
///
/// Single use: [`HandshakeEngine::start`] once, then
/// [`HandshakeEngine::consume`] for each inbound message until an
/// [`HandshakeOutcome::Established`] emerges. Any error poisons the engine;
/// a retry needs a new engine (and with it a fresh ephemeral key).
pub struct HandshakeEngine {
    role: Role,
    step: Step,
    transcript: Transcript,
    local_static: StaticKeypair,
    local_ephemeral: EphemeralKeypair,
    remote_static: Option<PublicKey>,
}

impl HandshakeEngine {
    /// Create an engine for `role` authenticating as `local_static`.
    ///
    /// A fresh ephemeral keypair is drawn from the system RNG.
    #[must_use]
    pub fn new(role: Role, local_static: StaticKeypair) -> Self {
        let mut transcript = Transcript::new();
        transcript.mix_hash(&[PROTOCOL_VERSION]);
        Self {
            role,
            step: Step::Init,
            transcript,
            local_static,
            local_ephemeral: EphemeralKeypair::generate(),
            remote_static: None,
        }
    }

    /// Begin the handshake.
    ///
    /// The initiator gets its hello message back; the responder gets `None`
    /// and waits for the peer's hello via [`HandshakeEngine::consume`].
    pub fn start(&mut self) -> Result<Option<Vec<u8>>, HandshakeError> {
        if self.step != Step::Init {
            return Err(self.poison(HandshakeError::InvalidState("start called twice")));
        }
        match self.role {
            Role::Initiator => {
                let mut hello = Vec::with_capacity(HELLO_LEN);
                hello.push(PROTOCOL_VERSION);
                hello.extend_from_slice(&self.local_ephemeral.public_bytes());
                self.transcript.mix_hash(&hello);
                self.step = Step::SentHello;
                Ok(Some(hello))
            }
            Role::Responder => {
                self.step = Step::SentHello;
                Ok(None)
            }
        }
    }

    /// Feed one inbound handshake message.
    pub fn consume(&mut self, message: &[u8]) -> Result<HandshakeOutcome, HandshakeError> {
        match (self.role, self.step) {
            (Role::Responder, Step::SentHello) => {
                self.read_hello(message).map_err(|e| self.poison(e))
            }
            (Role::Initiator, Step::SentHello) => {
                self.read_accept(message).map_err(|e| self.poison(e))
            }
            (Role::Responder, Step::AwaitFinish) => {
                self.read_finish(message).map_err(|e| self.poison(e))
            }
            _ => Err(self.poison(HandshakeError::InvalidState("unexpected handshake message"))),
        }
    }

    /// The peer's authenticated static public key, once it has been received
    /// and verified. Useful for pinning the server identity.
    #[must_use]
    pub fn remote_static(&self) -> Option<[u8; KEY_LEN]> {
        self.remote_static.map(|key| key.to_bytes())
    }

    fn poison(&mut self, error: HandshakeError) -> HandshakeError {
        self.step = Step::Failed;
        error
    }

    /// Responder: process the hello, answer with the accept message.
    fn read_hello(&mut self, message: &[u8]) -> Result<HandshakeOutcome, HandshakeError> {
        if message.len() != HELLO_LEN {
            return Err(HandshakeError::Malformed("hello length"));
        }
        if message[0] != PROTOCOL_VERSION {
            return Err(HandshakeError::UnsupportedVersion(message[0]));
        }
        let remote_ephemeral = public_key(&message[1..])?;
        self.transcript.mix_hash(message);

        let mut accept = Vec::with_capacity(ACCEPT_LEN);
        accept.extend_from_slice(&self.local_ephemeral.public_bytes());
        self.transcript.mix_hash(&self.local_ephemeral.public_bytes());
        self.transcript
            .mix_key(self.local_ephemeral.diffie_hellman(&remote_ephemeral).as_bytes());
        let enc_static = self.transcript.encrypt_and_hash(&self.local_static.public_bytes())?;
        accept.extend_from_slice(&enc_static);
        self.transcript
            .mix_key(self.local_static.diffie_hellman(&remote_ephemeral).as_bytes());
        let enc_empty = self.transcript.encrypt_and_hash(&[])?;
        accept.extend_from_slice(&enc_empty);

        self.step = Step::AwaitFinish;
        Ok(HandshakeOutcome::Reply(accept))
    }

    /// Initiator: process the accept, produce the finish message and the
    /// session keys in one step.
    fn read_accept(&mut self, message: &[u8]) -> Result<HandshakeOutcome, HandshakeError> {
        if message.len() != ACCEPT_LEN {
            return Err(HandshakeError::Malformed("accept length"));
        }
        let remote_ephemeral = public_key(&message[..KEY_LEN])?;
        self.transcript.mix_hash(&message[..KEY_LEN]);
        self.transcript
            .mix_key(self.local_ephemeral.diffie_hellman(&remote_ephemeral).as_bytes());
        let static_bytes = self
            .transcript
            .decrypt_and_hash(&message[KEY_LEN..KEY_LEN + ENC_KEY_LEN])?;
        let remote_static = public_key(&static_bytes)?;
        self.transcript
            .mix_key(self.local_ephemeral.diffie_hellman(&remote_static).as_bytes());
        let payload = self.transcript.decrypt_and_hash(&message[KEY_LEN + ENC_KEY_LEN..])?;
        if !payload.is_empty() {
            return Err(HandshakeError::Malformed("accept payload"));
        }

        let mut finish = Vec::with_capacity(FINISH_LEN);
        let enc_static = self.transcript.encrypt_and_hash(&self.local_static.public_bytes())?;
        finish.extend_from_slice(&enc_static);
        self.transcript
            .mix_key(self.local_static.diffie_hellman(&remote_ephemeral).as_bytes());
        let enc_empty = self.transcript.encrypt_and_hash(&[])?;
        finish.extend_from_slice(&enc_empty);

        self.remote_static = Some(remote_static);
        self.step = Step::Established;
        let keys = SessionKeys::derive(&self.transcript.chaining_key, true);
        Ok(HandshakeOutcome::Established { reply: Some(finish), keys: Box::new(keys) })
    }

    /// Responder: verify the finish message and derive the session keys.
    fn read_finish(&mut self, message: &[u8]) -> Result<HandshakeOutcome, HandshakeError> {
        if message.len() != FINISH_LEN {
            return Err(HandshakeError::Malformed("finish length"));
        }
        let static_bytes = self.transcript.decrypt_and_hash(&message[..ENC_KEY_LEN])?;
        let remote_static = public_key(&static_bytes)?;
        self.transcript
            .mix_key(self.local_ephemeral.diffie_hellman(&remote_static).as_bytes());
        let payload = self.transcript.decrypt_and_hash(&message[ENC_KEY_LEN..])?;
        if !payload.is_empty() {
            return Err(HandshakeError::Malformed("finish payload"));
        }

        self.remote_static = Some(remote_static);
        self.step = Step::Established;
        let keys = SessionKeys::derive(&self.transcript.chaining_key, false);
        Ok(HandshakeOutcome::Established { reply: None, keys: Box::new(keys) })
    }
}

fn public_key(bytes: &[u8]) -> Result<PublicKey, HandshakeError> {
    let array: [u8; KEY_LEN] =
        bytes.try_into().map_err(|_| HandshakeError::Malformed("public key length"))?;
    Ok(PublicKey::from(array))
}
