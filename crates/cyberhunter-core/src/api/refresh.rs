//! Single-flight coordination for token refresh.
//!
//! At most one `RefreshOperation` exists per client. The first request to
//! see a 401 while none is outstanding becomes its owner and performs the
//! exchange; every later 401 subscribes as a waiter and is resolved, in
//! subscription order, with the result of that same exchange.

use tokio::sync::oneshot;
use tracing::debug;

use crate::auth::Session;

/// What a waiter learns when the operation resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefreshOutcome {
    Refreshed(String),
    Expired,
}

/// An outstanding refresh exchange and the requests waiting on it.
#[derive(Debug, Default)]
pub(crate) struct RefreshOperation {
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

impl RefreshOperation {
    pub fn subscribe(&mut self) -> oneshot::Receiver<RefreshOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    /// Resolve every waiter, oldest first. Returns how many were notified.
    pub fn resolve(self, outcome: RefreshOutcome) -> usize {
        let mut notified = 0;
        for waiter in self.waiters {
            // A waiter whose caller gave up has dropped its receiver
            if waiter.send(outcome.clone()).is_ok() {
                notified += 1;
            }
        }
        notified
    }
}

/// Mutable state shared by all requests of one client.
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    pub session: Option<Session>,
    pub refresh: Option<RefreshOperation>,
}

/// Next step for a request that received a recoverable 401
#[derive(Debug)]
pub(crate) enum UnauthorizedAction {
    /// A refresh already completed since this request was sent; replay with this token
    Replay(String),
    /// A refresh is outstanding; wait for its outcome
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// This request now owns a new refresh operation using this refresh token
    Refresh(String),
    /// No session left to refresh
    Expired,
}

impl ClientState {
    pub fn access_token(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.access_token.clone())
    }

    /// Decide what a request that was sent with `sent_with` does after a 401.
    pub fn on_unauthorized(&mut self, sent_with: &str) -> UnauthorizedAction {
        if let Some(operation) = self.refresh.as_mut() {
            let rx = operation.subscribe();
            debug!(waiters = operation.waiter_count(), "Refresh in progress, queued request");
            return UnauthorizedAction::Wait(rx);
        }

        match &self.session {
            None => UnauthorizedAction::Expired,
            Some(session) if session.access_token != sent_with => {
                UnauthorizedAction::Replay(session.access_token.clone())
            }
            Some(session) => {
                let refresh_token = session.refresh_token.clone();
                self.refresh = Some(RefreshOperation::default());
                UnauthorizedAction::Refresh(refresh_token)
            }
        }
    }

    /// Whether the session still holds the refresh token an exchange started from.
    ///
    /// A sign-out or new login during the exchange replaces it, and the
    /// exchange result must then be discarded.
    pub fn holds_refresh_token(&self, refresh_token: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.refresh_token == refresh_token)
    }

    /// Install the exchange result (`None` on failure) and tear down the
    /// operation. Waiters are resolved against whatever session is current.
    pub fn complete(
        &mut self,
        used_refresh_token: &str,
        refreshed: Option<Session>,
    ) -> (RefreshOutcome, Option<RefreshOperation>) {
        if self.holds_refresh_token(used_refresh_token) {
            self.session = refreshed;
        }
        (self.current_outcome(), self.refresh.take())
    }

    fn current_outcome(&self) -> RefreshOutcome {
        match &self.session {
            Some(session) => RefreshOutcome::Refreshed(session.access_token.clone()),
            None => RefreshOutcome::Expired,
        }
    }
}
