//! Request and response values passed through the session client.

use std::borrow::Cow;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A logical API call: everything needed to issue (and reissue) it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Absolute, or relative to the configured base URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        self.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(self)
    }
}

/// A request that is being attempted, with its retry budget.
///
/// Retrying produces a new value instead of flagging the shared request,
/// so concurrent retries never alias each other's state.
#[derive(Debug, Clone)]
pub(crate) struct PendingRequest {
    pub request: ApiRequest,
    pub retried: bool,
}

impl PendingRequest {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            retried: false,
        }
    }

    pub fn retry(self) -> Self {
        Self {
            request: self.request,
            retried: true,
        }
    }
}

/// The transport's response, passed to callers unchanged.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Decode the JSON body, unwrapping a `{ "data": ... }` envelope if present
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(&self.body)?;
        match value {
            serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
                serde_json::from_value(map.remove("data").unwrap_or_default())
            }
            other => serde_json::from_value(other),
        }
    }
}
