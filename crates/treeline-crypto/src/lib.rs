//! Cryptography for the Treeline protocol.
//!
//! Two independent pipelines live here:
//!
//! - [`HandshakeEngine`]: a mutually-authenticating XX-pattern key exchange
//!   over X25519 with a SHA-256 transcript hash. Both sides prove possession
//!   of their long-term static key; every handshake message is bound into
//!   every subsequent key derivation through the running transcript. The
//!   engine produces a pair of directional [`SessionKeys`] and is then
//!   discarded; it is never reused across connections.
//!
//! - [`FrameCipher`]: authenticated encryption of each post-handshake frame.
//!   AES-256-CBC with an HMAC-SHA-256 tag over `IV || ciphertext`, IV derived
//!   deterministically from a per-direction monotonic counter. Frames must be
//!   processed in arrival order; a counter mismatch means the channel is
//!   desynchronized and only a fresh handshake can recover it.
//!
//! A third, counter-free variant ([`media`]) seals self-contained blobs
//! (attachments) under per-blob random keys with a truncated MAC.

pub mod cipher;
pub mod errors;
pub mod handshake;
pub mod kdf;
pub mod keys;
pub mod media;

pub use cipher::FrameCipher;
pub use errors::{CipherError, HandshakeError};
pub use handshake::{HandshakeEngine, HandshakeOutcome, Role};
pub use keys::{DirectionKeys, EphemeralKeypair, SessionKeys, StaticKeypair};
