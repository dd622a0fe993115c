use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TeamInvite,
    TeamUpdate,
    ProjectUpdate,
    Achievement,
    Announcement,
    #[default]
    #[serde(other)]
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(alias = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, alias = "isRead")]
    pub read: bool,
    pub link: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

pub fn unread_count(notifications: &[Notification]) -> usize {
    notifications.iter().filter(|n| !n.read).count()
}
