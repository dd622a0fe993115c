//! Core library for the Cyber Hunter community client.
//!
//! - `api`: session-aware HTTP client with single-flight token refresh,
//!   plus typed wrappers for the Cyber Hunter REST API
//! - `auth`: session tokens and credential stores (keychain, encrypted file, memory)
//! - `models`: profiles, teams, projects, notifications, leaderboard
//! - `config`: persisted client configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiError, ClientConfig, CyberHunterApi, SessionClient};
pub use auth::{CredentialStore, Session};
pub use config::Config;
