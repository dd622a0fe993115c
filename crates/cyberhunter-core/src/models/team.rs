use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Leader,
    #[default]
    Member,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub role: TeamRole,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Team {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
    pub max_members: Option<u32>,
    #[serde(default)]
    pub points: i64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Team {
    pub fn leader(&self) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.role == TeamRole::Leader)
    }

    pub fn is_full(&self) -> bool {
        self.max_members
            .is_some_and(|max| self.members.len() >= max as usize)
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn display_member_count(&self) -> String {
        match self.max_members {
            Some(max) => format!("{}/{} members", self.members.len(), max),
            None => format!("{} members", self.members.len()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct NewTeam {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
