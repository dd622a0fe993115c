//! Session-aware HTTP client for the Cyber Hunter REST API.
//!
//! Every request carries the current access token. When the server answers
//! 401, the first affected request refreshes the session and every other
//! request failing in the meantime waits for that same refresh, then each
//! reissues its own call once with the new token.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::refresh::{ClientState, RefreshOutcome, UnauthorizedAction};
use super::request::{ApiRequest, PendingRequest, Response};
use super::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::auth::{CredentialStore, Session};

// ============================================================================
// Constants
// ============================================================================

/// Base URL for all API endpoints
pub const DEFAULT_API_BASE_URL: &str = "https://api.cyberhunter.club/api/";

/// Refresh endpoint, relative to the base URL
pub const REFRESH_PATH: &str = "auth/refresh";

/// HTTP request timeout in seconds for ordinary calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on a token refresh exchange. Waiters are held for at most this long.
const REFRESH_TIMEOUT_SECS: u64 = 5;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub refresh_path: String,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
    pub max_rate_limit_retries: u32,
    pub initial_backoff: Duration,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        // Without the trailing slash, joining would replace the last path segment
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        Ok(Self {
            base_url,
            refresh_path: REFRESH_PATH.to_string(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            refresh_timeout: Duration::from_secs(REFRESH_TIMEOUT_SECS),
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_rate_limit_retries(mut self, retries: u32, initial_backoff: Duration) -> Self {
        self.max_rate_limit_retries = retries;
        self.initial_backoff = initial_backoff;
        self
    }

    /// Resolve an absolute URL or a path relative to the base URL
    pub fn resolve(&self, url: &str) -> Result<Url, ApiError> {
        let resolved = if url.starts_with("http://") || url.starts_with("https://") {
            Url::parse(url)
        } else {
            self.base_url.join(url.trim_start_matches('/'))
        };
        resolved.map_err(|e| ApiError::InvalidUrl(format!("{}: {}", url, e)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    access_token: String,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
}

/// Session-aware API client. Share it behind an `Arc`; all clones of the
/// `Arc` observe the same session and the same refresh operation.
pub struct SessionClient {
    config: ClientConfig,
    refresh_url: Url,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    state: Mutex<ClientState>,
    /// Serializes credential store I/O and the session changes tied to it.
    /// Taken before `state`; `state` is never held across store I/O.
    persist: Mutex<()>,
}

impl SessionClient {
    /// Create a client using the default reqwest transport
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Self::with_transport(config, Arc::new(transport), store)
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let refresh_url = config.resolve(&config.refresh_path)?;
        Ok(Self {
            config,
            refresh_url,
            transport,
            store,
            state: Mutex::new(ClientState::default()),
            persist: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    // ===== Session lifecycle =====

    /// Rehydrate the session from the credential store (cold start).
    /// Returns whether a session was found.
    pub fn restore(&self) -> Result<bool, ApiError> {
        let _persist = self.lock_persist();
        let session = Session::load(self.store.as_ref())?;
        let found = session.is_some();
        self.lock_state().session = session;
        debug!(found, "Session rehydration finished");
        Ok(found)
    }

    /// Establish a session, e.g. after login or signup
    pub fn set_session(&self, session: Session) -> Result<(), ApiError> {
        let _persist = self.lock_persist();
        session.save(self.store.as_ref())?;
        self.lock_state().session = Some(session);
        info!("Session established");
        Ok(())
    }

    /// Drop the session and every stored token. Safe to call when signed out.
    pub fn sign_out(&self) -> Result<(), ApiError> {
        let _persist = self.lock_persist();
        self.lock_state().session = None;
        self.store.clear()?;
        info!("Signed out");
        Ok(())
    }

    pub fn session(&self) -> Option<Session> {
        self.lock_state().session.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().session.is_some()
    }

    // ===== Requests =====

    /// Issue a request with transparent credential attachment.
    ///
    /// Responses are returned unchanged, including non-2xx statuses. The one
    /// exception is a first-attempt 401 on a credentialed request, which
    /// refreshes the session and replays the request once. If the session
    /// cannot be refreshed, or the replay is rejected too, the session is
    /// cleared and the call fails with `ApiError::SessionExpired`.
    pub async fn request(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let url = self.config.resolve(&request.url)?;
        let pending = PendingRequest::new(request);
        let token = self.lock_state().access_token();
        let response = self.send_attempt(&pending, &url, token.as_deref()).await?;

        let Some(sent_with) = self.recoverable_token(&pending, &url, &response, token) else {
            return Ok(response);
        };

        let pending = pending.retry();
        let fresh = self.fresh_token_after(&sent_with).await?;
        let response = self.send_attempt(&pending, &url, Some(&fresh)).await?;
        if response.status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Request still unauthorized after session refresh");
            self.expire_session(Some(&fresh));
            return Err(ApiError::SessionExpired);
        }
        Ok(response)
    }

    /// Issue a request without credentials or refresh handling
    pub async fn send_unauthenticated(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let url = self.config.resolve(&request.url)?;
        self.send_attempt(&PendingRequest::new(request), &url, None).await
    }

    /// Issue a request and require a 2xx response.
    /// Retries rate-limited (429) responses with exponential backoff.
    pub async fn send_checked(&self, request: ApiRequest) -> Result<Response, ApiError> {
        let mut retries = 0;
        let mut backoff = self.config.initial_backoff;

        loop {
            let response = self.request(request.clone()).await?;
            if response.is_success() {
                return Ok(response);
            }

            if response.status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > self.config.max_rate_limit_retries {
                    return Err(ApiError::RateLimited);
                }
                warn!(
                    url = %request.url,
                    retry = retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                continue;
            }

            return Err(ApiError::from_status(response.status, &response.text()));
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send_checked(ApiRequest::get(url)).await?;
        Ok(response.json()?)
    }

    pub async fn post_json<T, B>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send_checked(ApiRequest::post(url).json(body)?).await?;
        Ok(response.json()?)
    }

    pub async fn patch_json<T, B>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send_checked(ApiRequest::patch(url).json(body)?).await?;
        Ok(response.json()?)
    }

    pub async fn delete(&self, url: &str) -> Result<(), ApiError> {
        self.send_discarding(Method::DELETE, url).await
    }

    /// Send a request whose response body is irrelevant
    pub async fn send_discarding(&self, method: Method, url: &str) -> Result<(), ApiError> {
        self.send_checked(ApiRequest::new(method, url)).await?;
        Ok(())
    }

    // ===== Internals =====

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_persist(&self) -> MutexGuard<'_, ()> {
        self.persist.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_refresh_endpoint(&self, url: &Url) -> bool {
        let target = &self.refresh_url;
        url.scheme() == target.scheme()
            && url.host_str() == target.host_str()
            && url.port_or_known_default() == target.port_or_known_default()
            && url.path().trim_end_matches('/') == target.path().trim_end_matches('/')
    }

    /// The token a 401 was sent with, if that 401 may be recovered by refreshing
    fn recoverable_token(
        &self,
        pending: &PendingRequest,
        url: &Url,
        response: &Response,
        sent_with: Option<String>,
    ) -> Option<String> {
        if response.status != StatusCode::UNAUTHORIZED || pending.retried {
            return None;
        }
        if self.is_refresh_endpoint(url) {
            debug!(url = %url, "401 from refresh endpoint, passing through");
            return None;
        }
        sent_with
    }

    async fn send_attempt(
        &self,
        pending: &PendingRequest,
        url: &Url,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let request = &pending.request;
        let mut headers = request.headers.clone();
        if !headers.contains_key(header::ACCEPT) {
            headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ApiError::InvalidHeader("access token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        debug!(
            method = %request.method,
            url = %url,
            authenticated = token.is_some(),
            retried = pending.retried,
            "Sending request"
        );

        let response = self
            .transport
            .send(TransportRequest {
                method: request.method.clone(),
                url: url.clone(),
                headers,
                body: request.body.clone(),
            })
            .await?;
        Ok(response)
    }

    /// Obtain the access token to replay with after a 401 on `sent_with`.
    async fn fresh_token_after(&self, sent_with: &str) -> Result<String, ApiError> {
        loop {
            let action = self.lock_state().on_unauthorized(sent_with);
            match action {
                UnauthorizedAction::Replay(token) => {
                    debug!("Session was refreshed while the request was in flight, replaying");
                    return Ok(token);
                }
                UnauthorizedAction::Refresh(refresh_token) => {
                    return match self.refresh_as_owner(refresh_token).await {
                        RefreshOutcome::Refreshed(token) => Ok(token),
                        RefreshOutcome::Expired => Err(ApiError::SessionExpired),
                    };
                }
                UnauthorizedAction::Wait(rx) => match rx.await {
                    Ok(RefreshOutcome::Refreshed(token)) => return Ok(token),
                    Ok(RefreshOutcome::Expired) => return Err(ApiError::SessionExpired),
                    // The owner was cancelled before finishing; decide again
                    Err(_) => debug!("Refresh abandoned by its owner, re-evaluating"),
                },
                UnauthorizedAction::Expired => {
                    self.expire_session(None);
                    return Err(ApiError::SessionExpired);
                }
            }
        }
    }

    /// Run the refresh exchange as the owner of the current operation.
    async fn refresh_as_owner(&self, refresh_token: String) -> RefreshOutcome {
        let guard = OwnerGuard {
            state: &self.state,
            armed: true,
        };
        info!("Access token rejected, refreshing session");

        let exchanged = tokio::time::timeout(
            self.config.refresh_timeout,
            self.exchange_refresh_token(&refresh_token),
        )
        .await;
        let tokens = match exchanged {
            Ok(Ok(tokens)) => Some(tokens),
            Ok(Err(e)) => {
                warn!(error = %e, "Token refresh failed");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.refresh_timeout.as_millis() as u64,
                    "Token refresh timed out"
                );
                None
            }
        };

        let (outcome, operation) = {
            // Sign-out and login wait on `persist` until the write below is done
            let _persist = self.lock_persist();
            let current = {
                let state = self.lock_state();
                state
                    .session
                    .clone()
                    .filter(|_| state.holds_refresh_token(&refresh_token))
            };

            let mut refreshed = None;
            match current {
                Some(current) => {
                    if let Some(tokens) = tokens {
                        let session = current.rotated(tokens.access_token, tokens.refresh_token);
                        match session.save(self.store.as_ref()) {
                            Ok(()) => refreshed = Some(session),
                            Err(e) => warn!(error = %e, "Failed to persist refreshed session"),
                        }
                    }
                    if refreshed.is_none() {
                        self.clear_store();
                    }
                }
                None => debug!("Session changed during refresh, discarding exchange result"),
            }
            self.lock_state().complete(&refresh_token, refreshed)
        };
        guard.disarm();

        let notified = operation.map_or(0, |op| op.resolve(outcome.clone()));
        match &outcome {
            RefreshOutcome::Refreshed(_) => info!(waiters = notified, "Session refreshed"),
            RefreshOutcome::Expired => {
                warn!(waiters = notified, "Session expired, stored credentials cleared")
            }
        }
        outcome
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let body = serde_json::to_vec(&RefreshRequest { refresh_token })?;

        let response = self
            .transport
            .send(TransportRequest {
                method: Method::POST,
                url: self.refresh_url.clone(),
                headers,
                body: Some(body),
            })
            .await?;

        if !response.is_success() {
            return Err(ApiError::from_status(response.status, &response.text()));
        }
        Ok(response.json()?)
    }

    /// Drop the session after an unrecoverable 401 and clear the store, so
    /// later calls go out unauthenticated instead of refreshing again.
    ///
    /// `rejected` is the access token the server refused. A session holding
    /// a different token was established meanwhile and is kept.
    fn expire_session(&self, rejected: Option<&str>) {
        let _persist = self.lock_persist();
        {
            let mut state = self.lock_state();
            match (&state.session, rejected) {
                (None, _) => {}
                (Some(session), Some(token)) if session.access_token == token => {
                    state.session = None;
                }
                (Some(_), _) => {
                    debug!("A newer session is active, keeping stored credentials");
                    return;
                }
            }
        }
        self.clear_store();
        info!("Session expired, stored credentials cleared");
    }

    /// Clear stored credentials on the expiry path. Failures are logged;
    /// the in-memory session is already gone either way.
    /// Callers hold `persist`.
    fn clear_store(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear credential store");
        }
    }
}

/// Releases waiters if the refresh owner is dropped mid-exchange.
///
/// Dropping the operation closes every waiter's channel; each waiter then
/// re-evaluates and one of them takes over the refresh.
struct OwnerGuard<'a> {
    state: &'a Mutex<ClientState>,
    armed: bool,
}

impl OwnerGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let operation = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh
            .take();
        if let Some(operation) = operation {
            debug!(waiters = operation.waiter_count(), "Refresh owner dropped, releasing waiters");
        }
    }
}
