//! REST API client module for the Cyber Hunter service.
//!
//! `SessionClient` is the session-aware HTTP client: it attaches the bearer
//! token, recovers from access-token expiry with a single refresh shared by
//! every concurrently failing request, and reports `SessionExpired` when the
//! session cannot be recovered. `CyberHunterApi` layers typed resource calls
//! (auth, profiles, teams, projects, notifications, leaderboard) on top.

pub mod client;
pub mod error;
pub mod refresh;
pub mod request;
pub mod resources;
pub mod transport;

pub use client::{ClientConfig, SessionClient, DEFAULT_API_BASE_URL};
pub use error::ApiError;
pub use request::{ApiRequest, Response};
pub use resources::{AuthOutcome, CyberHunterApi, Overview};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest};
