//! Passphrase-encrypted credential file for hosts without a usable keychain.
//!
//! The token map is serialized to JSON and sealed with ChaCha20-Poly1305.
//! The key is derived from the passphrase with Argon2; the salt lives in
//! the file header and a fresh nonce is drawn on every write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{CredentialStore, StoreError, StoreResult, AUTH_KEYS};

/// Credential file name in the data directory
pub const CREDENTIALS_FILE: &str = "credentials.enc.json";

const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct SealedFile {
    version: u8,
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

pub struct EncryptedFileCredentialStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    // Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl EncryptedFileCredentialStore {
    /// Open (or prepare to create) the credential file at `path`.
    ///
    /// An existing file's salt is reused so its contents stay readable.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> StoreResult<Self> {
        let path = path.into();
        let salt: [u8; SALT_LEN] = match read_sealed(&path)? {
            Some(sealed) => sealed
                .salt
                .as_slice()
                .try_into()
                .map_err(|_| StoreError::Corrupt("invalid salt length".to_string()))?,
            None => {
                let mut salt = [0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                salt
            }
        };

        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;

        Ok(Self {
            path,
            salt,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            lock: Mutex::new(()),
        })
    }

    /// Open `credentials.enc.json` inside `dir`
    pub fn in_dir(dir: &Path, passphrase: &str) -> StoreResult<Self> {
        Self::open(dir.join(CREDENTIALS_FILE), passphrase)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> StoreResult<HashMap<String, String>> {
        let Some(sealed) = read_sealed(&self.path)? else {
            return Ok(HashMap::new());
        };
        if sealed.version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported format version {}",
                sealed.version
            )));
        }
        if sealed.nonce.len() != NONCE_LEN {
            return Err(StoreError::Corrupt("invalid nonce length".to_string()));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| StoreError::Crypto)?;

        serde_json::from_slice(&plaintext).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn write_map(&self, map: &HashMap<String, String>) -> StoreResult<()> {
        if map.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let plaintext =
            serde_json::to_vec(map).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| StoreError::Crypto)?;

        let sealed = SealedFile {
            version: FORMAT_VERSION,
            salt: self.salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        };
        let contents =
            serde_json::to_vec(&sealed).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for EncryptedFileCredentialStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)?;
        debug!(path = %self.path.display(), key = key, "Stored credential");
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            return Ok(());
        }
        let mut map = self.read_map()?;
        for key in AUTH_KEYS {
            map.remove(key);
        }
        self.write_map(&map)
    }
}

fn read_sealed(path: &Path) -> StoreResult<Option<SealedFile>> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> StoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> StoreResult<()> {
    Ok(())
}
