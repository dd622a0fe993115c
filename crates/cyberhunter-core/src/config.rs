//! Application configuration management.
//!
//! This module handles loading and saving the client configuration, which
//! includes the API base URL, timeouts, the credential backend and the last
//! used email address.
//!
//! Configuration is stored at `~/.config/cyber-hunter/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::{ClientConfig, DEFAULT_API_BASE_URL};

/// Application name used for config/data directory paths
const APP_NAME: &str = "cyber-hunter";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Where session tokens are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted file in the data directory
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub refresh_timeout_secs: Option<u64>,
    #[serde(default)]
    pub credential_backend: CredentialBackend,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for locally persisted client data (the encrypted credential file)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Build the session client configuration, applying any overrides
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(self.base_url())
            .with_context(|| format!("Invalid API base URL: {}", self.base_url()))?;
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.refresh_timeout_secs {
            config = config.with_refresh_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
        assert_eq!(config.base_url(), DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            api_base_url: Some("http://localhost:5000/api".to_string()),
            credential_backend: CredentialBackend::File,
            last_email: Some("ada@example.com".to_string()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.credential_backend, CredentialBackend::File);
        assert_eq!(loaded.last_email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_client_config_overrides() {
        let config = Config {
            api_base_url: Some("http://localhost:5000/api".to_string()),
            refresh_timeout_secs: Some(2),
            ..Default::default()
        };
        let client_config = config.client_config().unwrap();
        assert_eq!(client_config.base_url.as_str(), "http://localhost:5000/api/");
        assert_eq!(client_config.refresh_timeout, Duration::from_secs(2));
        assert_eq!(client_config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_client_config_rejects_bad_url() {
        let config = Config {
            api_base_url: Some("::nope".to_string()),
            ..Default::default()
        };
        assert!(config.client_config().is_err());
    }

    #[test]
    fn test_parse_backend_name() {
        let config: Config = serde_json::from_str(r#"{"credential_backend": "file"}"#).unwrap();
        assert_eq!(config.credential_backend, CredentialBackend::File);
    }
}
