//! Authentication state and credential persistence.
//!
//! This module provides:
//! - `Session`: the access/refresh token pair held by the client
//! - `CredentialStore`: durable storage for the two tokens, with keychain,
//!   encrypted-file and in-memory implementations
//!
//! A session is either fully present or fully absent; rehydration refuses
//! to resume from a store holding only one of the two tokens.

pub mod credentials;
pub mod encrypted;
pub mod session;

pub use credentials::{
    CredentialStore, KeyringCredentialStore, MemoryCredentialStore, StoreError, StoreResult,
    ACCESS_TOKEN_KEY, AUTH_KEYS, REFRESH_TOKEN_KEY,
};
pub use encrypted::EncryptedFileCredentialStore;
pub use session::Session;
