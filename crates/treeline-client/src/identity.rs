//! Device credentials and where they live between runs.
//!
//! A device identity is the long-term X25519 secret plus the server-issued
//! login token; the server-assigned JID is remembered once the first login
//! succeeds. Stored credentials are CBOR on disk; the in-memory store exists
//! for tests and throwaway sessions.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use treeline_crypto::StaticKeypair;
use treeline_proto::Jid;

/// Everything a device needs to log in.
#[derive(Clone)]
pub struct Credentials {
    secret_key: [u8; 32],
    /// Server-issued credential token.
    pub token: String,
    /// Address assigned on a previous login, if any.
    pub jid: Option<Jid>,
}

impl Credentials {
    /// Mint a fresh identity for first registration.
    #[must_use]
    pub fn generate(token: impl Into<String>) -> Self {
        Self {
            secret_key: StaticKeypair::generate().secret_bytes(),
            token: token.into(),
            jid: None,
        }
    }

    /// The identity keypair used to authenticate handshakes.
    #[must_use]
    pub fn keypair(&self) -> StaticKeypair {
        StaticKeypair::from_secret_bytes(self.secret_key)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("jid", &self.jid).finish_non_exhaustive()
    }
}

/// On-disk shape. Kept separate so [`Jid`] stays serde-free.
#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    secret_key: [u8; 32],
    token: String,
    jid: Option<String>,
}

impl From<&Credentials> for StoredCredentials {
    fn from(credentials: &Credentials) -> Self {
        Self {
            secret_key: credentials.secret_key,
            token: credentials.token.clone(),
            jid: credentials.jid.as_ref().map(ToString::to_string),
        }
    }
}

impl TryFrom<StoredCredentials> for Credentials {
    type Error = StoreError;

    fn try_from(stored: StoredCredentials) -> Result<Self, StoreError> {
        let jid = match stored.jid {
            Some(text) => {
                Some(text.parse().map_err(|_| StoreError::Corrupt("unparseable jid"))?)
            }
            None => None,
        };
        Ok(Self { secret_key: stored.secret_key, token: stored.token, jid })
    }
}

/// A credential store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The stored blob could not be encoded or decoded.
    #[error("credential encoding: {0}")]
    Encoding(String),

    /// The stored blob decoded but its contents make no sense.
    #[error("corrupt credentials: {0}")]
    Corrupt(&'static str),
}

/// Persistence for device credentials.
pub trait CredentialStore: Send + Sync {
    /// Load credentials, `None` if the device has never registered.
    fn load(&self) -> Result<Option<Credentials>, StoreError>;

    /// Persist credentials, replacing any previous ones.
    fn save(&self, credentials: &Credentials) -> Result<(), StoreError>;

    /// Forget stored credentials.
    fn clear(&self) -> Result<(), StoreError>;
}

/// Volatile store for tests and one-off sessions.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, StoreError> {
        Ok(self.slot.lock().map_err(|_| StoreError::Corrupt("poisoned store"))?.clone())
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        *self.slot.lock().map_err(|_| StoreError::Corrupt("poisoned store"))? =
            Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().map_err(|_| StoreError::Corrupt("poisoned store"))? = None;
        Ok(())
    }
}

/// CBOR file store.
///
/// Writes go to a sibling temp file first and rename into place, so a crash
/// mid-save never leaves truncated credentials behind.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// A store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let stored: StoredCredentials = ciborium::from_reader(bytes.as_slice())
            .map_err(|error| StoreError::Encoding(error.to_string()))?;
        Ok(Some(stored.try_into()?))
    }

    fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(&StoredCredentials::from(credentials), &mut bytes)
            .map_err(|error| StoreError::Encoding(error.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryCredentialStore::new();
        assert!(store.load().unwrap().is_none());

        let mut credentials = Credentials::generate("tok");
        credentials.jid = Some("123456@tl.net".parse().unwrap());
        store.save(&credentials).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "tok");
        assert_eq!(loaded.jid, credentials.jid);
        assert_eq!(loaded.keypair().public_bytes(), credentials.keypair().public_bytes());

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.cbor"));
        assert!(store.load().unwrap().is_none());

        let mut credentials = Credentials::generate("file-tok");
        credentials.jid = Some("5551234.2:1@tl.net".parse().unwrap());
        store.save(&credentials).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.token, "file-tok");
        assert_eq!(loaded.jid.unwrap().to_string(), "5551234.2:1@tl.net");

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
