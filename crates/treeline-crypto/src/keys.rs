//! Key material: long-term identities, handshake ephemerals, and the
//! directional session keys the handshake produces.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::kdf;

/// Byte length of every key in this module.
pub const KEY_LEN: usize = 32;

/// A long-term X25519 identity keypair.
///
/// The secret half is the device credential; it persists across connections
/// and is what the peer authenticates during the handshake.
#[derive(Clone)]
pub struct StaticKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl StaticKeypair {
    /// Generate a fresh identity from the system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct an identity from stored secret bytes.
    #[must_use]
    pub fn from_secret_bytes(bytes: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half, as sent to the peer during the handshake.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// Secret half, for credential storage only.
    #[must_use]
    pub fn secret_bytes(&self) -> [u8; KEY_LEN] {
        self.secret.to_bytes()
    }

    pub(crate) fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(peer)
    }
}

impl std::fmt::Debug for StaticKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half.
        f.debug_struct("StaticKeypair")
            .field("public", &self.public_bytes())
            .finish_non_exhaustive()
    }
}

/// A per-handshake X25519 keypair, generated fresh for every attempt and
/// discarded with the engine.
///
/// Backed by [`StaticSecret`] because the XX pattern performs two separate
/// DH operations with the same ephemeral.
pub struct EphemeralKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a fresh ephemeral from the system RNG.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half, transmitted in the clear.
    #[must_use]
    pub fn public_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    pub(crate) fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(peer)
    }
}

/// Keys for one direction of an established channel.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DirectionKeys {
    /// AES-256 key for the frame body.
    pub cipher_key: [u8; KEY_LEN],
    /// HMAC-SHA-256 key for the frame tag and IV derivation.
    pub mac_key: [u8; KEY_LEN],
}

impl DirectionKeys {
    fn derive(secret: &[u8; KEY_LEN], label: &[u8]) -> Self {
        let mut okm = [0u8; KEY_LEN * 2];
        kdf::expand_labeled(secret, label, &mut okm);
        let mut cipher_key = [0u8; KEY_LEN];
        let mut mac_key = [0u8; KEY_LEN];
        cipher_key.copy_from_slice(&okm[..KEY_LEN]);
        mac_key.copy_from_slice(&okm[KEY_LEN..]);
        okm.zeroize();
        Self { cipher_key, mac_key }
    }
}

impl std::fmt::Debug for DirectionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionKeys").finish_non_exhaustive()
    }
}

/// The pair of directional keys a completed handshake yields.
///
/// `send` seals frames we write; `recv` opens frames the peer writes. The
/// two sides of a handshake end up with mirrored pairs.
#[derive(Debug)]
pub struct SessionKeys {
    /// Keys for the outbound direction.
    pub send: DirectionKeys,
    /// Keys for the inbound direction.
    pub recv: DirectionKeys,
}

impl SessionKeys {
    /// Split the final chaining key into two independent directions.
    ///
    /// Labels are fixed by wire role so that the initiator's `send` keys
    /// equal the responder's `recv` keys and vice versa.
    pub(crate) fn derive(chaining_key: &[u8; KEY_LEN], initiator: bool) -> Self {
        let to_responder = DirectionKeys::derive(chaining_key, b"treeline stream i2r");
        let to_initiator = DirectionKeys::derive(chaining_key, b"treeline stream r2i");
        if initiator {
            Self { send: to_responder, recv: to_initiator }
        } else {
            Self { send: to_initiator, recv: to_responder }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_keypair_round_trips_through_bytes() {
        let pair = StaticKeypair::generate();
        let restored = StaticKeypair::from_secret_bytes(pair.secret_bytes());
        assert_eq!(pair.public_bytes(), restored.public_bytes());
    }

    #[test]
    fn session_keys_mirror_across_roles() {
        let ck = [9u8; KEY_LEN];
        let initiator = SessionKeys::derive(&ck, true);
        let responder = SessionKeys::derive(&ck, false);
        assert_eq!(initiator.send.cipher_key, responder.recv.cipher_key);
        assert_eq!(initiator.recv.mac_key, responder.send.mac_key);
        assert_ne!(initiator.send.cipher_key, initiator.recv.cipher_key);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let pair = StaticKeypair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&hex::encode(pair.secret_bytes())));
    }
}
