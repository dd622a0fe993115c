//! Typed calls for the Cyber Hunter REST API.
//!
//! Each method is a thin wrapper over `SessionClient`; credential handling
//! and session refresh happen underneath.

use std::borrow::Cow;
use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info};

use super::client::SessionClient;
use super::error::ApiError;
use super::request::ApiRequest;
use crate::auth::Session;
use crate::models::{
    sort_by_rank, AuthResponse, LeaderboardEntry, LoginRequest, NewAccount, NewProject, NewTeam,
    Notification, ProfileUpdate, Project, Team, UserProfile,
};

const LOGIN_PATH: &str = "auth/login";
const SIGNUP_PATH: &str = "auth/signup";

/// Encode an id for use as a single path segment.
///
/// Dot segments are rejected since URL resolution would climb out of the
/// resource collection with them.
fn segment(id: &str) -> Result<Cow<'_, str>, ApiError> {
    if id.is_empty() || id == "." || id == ".." {
        return Err(ApiError::InvalidUrl(format!("invalid resource id: {:?}", id)));
    }
    Ok(urlencoding::encode(id))
}

/// Result of a successful login or signup
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: Option<UserProfile>,
}

/// Data for the home screen, fetched in one concurrent fan-out
#[derive(Debug, Clone)]
pub struct Overview {
    pub profile: UserProfile,
    pub notifications: Vec<Notification>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// API client for Cyber Hunter.
/// Clone is cheap - every clone shares the same session client.
#[derive(Clone)]
pub struct CyberHunterApi {
    client: Arc<SessionClient>,
}

impl CyberHunterApi {
    pub fn new(client: Arc<SessionClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<SessionClient> {
        &self.client
    }

    // ===== Authentication =====

    /// Log in with email and password and establish the session
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthOutcome, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.authenticate(LOGIN_PATH, &body).await
    }

    /// Create an account and establish the session
    pub async fn signup(&self, account: &NewAccount) -> Result<AuthOutcome, ApiError> {
        self.authenticate(SIGNUP_PATH, account).await
    }

    async fn authenticate<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<AuthOutcome, ApiError> {
        let request = ApiRequest::post(path).json(body)?;
        let response = self.client.send_unauthenticated(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.text()));
        }

        let auth: AuthResponse = response.json()?;
        self.client
            .set_session(Session::new(auth.access_token, auth.refresh_token))?;
        info!(path = path, has_user = auth.user.is_some(), "Authenticated");
        Ok(AuthOutcome { user: auth.user })
    }

    /// End the session locally
    pub fn sign_out(&self) -> Result<(), ApiError> {
        self.client.sign_out()
    }

    // ===== Profiles =====

    pub async fn fetch_profile(&self) -> Result<UserProfile, ApiError> {
        self.client.get_json("users/me").await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        self.client.patch_json("users/me", update).await
    }

    pub async fn fetch_user(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        self.client.get_json(&format!("users/{}", segment(user_id)?)).await
    }

    // ===== Teams =====

    pub async fn fetch_teams(&self) -> Result<Vec<Team>, ApiError> {
        self.client.get_json("teams").await
    }

    pub async fn fetch_team(&self, team_id: &str) -> Result<Team, ApiError> {
        self.client.get_json(&format!("teams/{}", segment(team_id)?)).await
    }

    pub async fn create_team(&self, team: &NewTeam) -> Result<Team, ApiError> {
        self.client.post_json("teams", team).await
    }

    pub async fn join_team(&self, team_id: &str) -> Result<(), ApiError> {
        self.client
            .send_discarding(Method::POST, &format!("teams/{}/join", segment(team_id)?))
            .await
    }

    pub async fn leave_team(&self, team_id: &str) -> Result<(), ApiError> {
        self.client
            .send_discarding(Method::POST, &format!("teams/{}/leave", segment(team_id)?))
            .await
    }

    // ===== Projects =====

    pub async fn fetch_projects(&self) -> Result<Vec<Project>, ApiError> {
        self.client.get_json("projects").await
    }

    pub async fn fetch_project(&self, project_id: &str) -> Result<Project, ApiError> {
        self.client.get_json(&format!("projects/{}", segment(project_id)?)).await
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ApiError> {
        self.client.post_json("projects", project).await
    }

    // ===== Notifications =====

    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.client.get_json("notifications").await
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<(), ApiError> {
        self.client
            .send_discarding(
                Method::PATCH,
                &format!("notifications/{}/read", segment(notification_id)?),
            )
            .await
    }

    // ===== Leaderboard =====

    /// Standings, ordered by rank
    pub async fn fetch_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let mut entries: Vec<LeaderboardEntry> = self.client.get_json("leaderboard").await?;
        sort_by_rank(&mut entries);
        debug!("Fetched {} leaderboard entries", entries.len());
        Ok(entries)
    }

    /// Fetch profile, notifications and leaderboard concurrently
    pub async fn fetch_overview(&self) -> Result<Overview, ApiError> {
        let (profile, notifications, leaderboard) = futures::try_join!(
            self.fetch_profile(),
            self.fetch_notifications(),
            self.fetch_leaderboard(),
        )?;
        Ok(Overview {
            profile,
            notifications,
            leaderboard,
        })
    }
}
