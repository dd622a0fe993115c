use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keyring::Entry;
use thiserror::Error;
use tracing::debug;

/// Default keychain service name
pub const SERVICE_NAME: &str = "cyber-hunter";

/// Storage key for the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Every key owned by the session. `clear` removes exactly these.
pub const AUTH_KEYS: [&str; 2] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential file is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to decrypt credential file - wrong passphrase?")]
    Crypto,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable key/value storage for session tokens.
///
/// Writes are atomic per key. `clear` must succeed when the keys are
/// already absent, since sign-out flows elsewhere may have removed them.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove every auth key
    fn clear(&self) -> StoreResult<()>;
}

/// Token storage in the OS keychain (Keychain, Credential Manager, kernel keyring).
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> StoreResult<Entry> {
        Ok(Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        debug!(service = %self.service, key = key, "Storing credential in keychain");
        self.entry(key)?.set_password(value)?;
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        for key in AUTH_KEYS {
            match self.entry(key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(service = %self.service, "Cleared keychain credentials");
        Ok(())
    }
}

/// In-process token storage for tests and ephemeral sessions.
///
/// `set_unavailable(true)` makes every operation fail, simulating a locked
/// keychain or a storage outage.
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding both tokens
    pub fn with_tokens(access_token: &str, refresh_token: &str) -> Self {
        let store = Self::new();
        {
            let mut values = store.values();
            values.insert(ACCESS_TOKEN_KEY.to_string(), access_token.to_string());
            values.insert(REFRESH_TOKEN_KEY.to_string(), refresh_token.to_string());
        }
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_available()?;
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        self.check_available()?;
        let mut values = self.values();
        for key in AUTH_KEYS {
            values.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_clear_is_idempotent() {
        let store = MemoryCredentialStore::new();
        assert!(store.clear().is_ok());
        assert!(store.clear().is_ok());

        store.set(ACCESS_TOKEN_KEY, "a").unwrap();
        store.clear().unwrap();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_memory_store_clear_leaves_unrelated_keys() {
        let store = MemoryCredentialStore::with_tokens("a", "r");
        store.set("theme", "dark").unwrap();
        store.clear().unwrap();

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("dark"));
    }

    #[test]
    fn test_memory_store_unavailable() {
        let store = MemoryCredentialStore::with_tokens("a", "r");
        store.set_unavailable(true);
        assert!(matches!(store.get(ACCESS_TOKEN_KEY), Err(StoreError::Unavailable(_))));
        assert!(store.set(ACCESS_TOKEN_KEY, "b").is_err());
        assert!(store.clear().is_err());

        store.set_unavailable(false);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a"));
    }
}
