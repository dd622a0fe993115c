use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::{CredentialStore, StoreResult, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// The token pair held by an authenticated client.
///
/// Both tokens are always present; "no session" is `Option<Session>::None`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Session after a refresh. Servers that don't rotate refresh tokens
    /// omit it, in which case the current one stays valid.
    pub fn rotated(&self, access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
        }
    }

    /// Rehydrate from the store.
    ///
    /// A store holding only one token is not a valid resting state; the
    /// leftover is cleared and no session is returned.
    pub fn load(store: &dyn CredentialStore) -> StoreResult<Option<Session>> {
        let access = store.get(ACCESS_TOKEN_KEY)?;
        let refresh = store.get(REFRESH_TOKEN_KEY)?;

        match (access, refresh) {
            (Some(access), Some(refresh)) => {
                debug!("Session restored from credential store");
                Ok(Some(Session::new(access, refresh)))
            }
            (None, None) => Ok(None),
            (access, _) => {
                warn!(
                    has_access = access.is_some(),
                    "Partial session in credential store, clearing"
                );
                store.clear()?;
                Ok(None)
            }
        }
    }

    /// Persist both tokens
    pub fn save(&self, store: &dyn CredentialStore) -> StoreResult<()> {
        store.set(REFRESH_TOKEN_KEY, &self.refresh_token)?;
        store.set(ACCESS_TOKEN_KEY, &self.access_token)?;
        Ok(())
    }
}

// Tokens never reach logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}
