use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A community member's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub points: i64,
    pub team_id: Option<String>,
    pub github_url: Option<String>,
    pub linkedin_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Handle for display: `@username` when set, otherwise the name
    pub fn display_handle(&self) -> String {
        match self.username.as_deref() {
            Some(username) if !username.is_empty() => format!("@{}", username),
            _ => self.name.clone(),
        }
    }

    pub fn has_team(&self) -> bool {
        self.team_id.is_some()
    }
}

/// Partial profile update; unset fields are left untouched server-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin_url: Option<String>,
}
