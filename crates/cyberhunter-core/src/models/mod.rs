//! Data models for Cyber Hunter resources.
//!
//! Wire names are camelCase, matching the REST API. With the `ts` feature
//! enabled every model also derives `ts_rs::TS` so the mobile front end can
//! share the definitions.
//!
//! - `UserProfile`, `ProfileUpdate`: member profiles
//! - `Team`, `TeamMember`, `NewTeam`: team formation
//! - `Project`, `NewProject`: project showcase
//! - `Notification`, `NotificationKind`: in-app notifications
//! - `LeaderboardEntry`: ranked standings
//! - `LoginRequest`, `NewAccount`, `AuthResponse`: auth exchanges

pub mod auth;
pub mod leaderboard;
pub mod notification;
pub mod project;
pub mod team;
pub mod user;

pub use auth::{AuthResponse, LoginRequest, NewAccount};
pub use leaderboard::{sort_by_rank, LeaderboardEntry};
pub use notification::{unread_count, Notification, NotificationKind};
pub use project::{NewProject, Project};
pub use team::{NewTeam, Team, TeamMember, TeamRole};
pub use user::{ProfileUpdate, UserProfile};
