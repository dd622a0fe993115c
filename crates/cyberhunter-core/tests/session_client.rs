use std::sync::Arc;
use std::time::Duration;

use cyberhunter_core::api::{ApiError, ApiRequest, ClientConfig, CyberHunterApi, SessionClient};
use cyberhunter_core::auth::{
    CredentialStore, MemoryCredentialStore, Session, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(&format!("{}/api/", server.uri()))
        .unwrap()
        .with_rate_limit_retries(3, Duration::from_millis(10))
}

fn client_with(server: &MockServer, store: Arc<MemoryCredentialStore>) -> SessionClient {
    let client = SessionClient::new(config(server), store).unwrap();
    client.restore().unwrap();
    client
}

async fn mount_get(server: &MockServer, route: &str, token: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"route": route})))
        .mount(server)
        .await;
}

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(response)
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn refreshed(access: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "accessToken": access }))
}

async fn authorization_headers(server: &MockServer, route: &str) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .map(|r| {
            r.headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}

#[tokio::test]
async fn concurrent_401s_share_a_single_refresh() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/items", "T1", 401).await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "R1" })))
        .respond_with(refreshed("T2").set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store.clone());

    let results = join_all((0..3).map(|_| client.request(ApiRequest::get("items")))).await;
    for result in results {
        assert_eq!(result.expect("request succeeds").status, 200);
    }

    assert_eq!(client.session(), Some(Session::new("T2", "R1")));
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T2"));
    // The server did not rotate the refresh token, so the old one stays
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
}

#[tokio::test]
async fn rejected_refresh_expires_session_and_clears_store() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/items", "T1", 401).await;
    mount_refresh(&server, ResponseTemplate::new(401), 1).await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store.clone());

    let result = client.request(ApiRequest::get("items")).await;
    assert!(matches!(result, Err(ApiError::SessionExpired)));
    assert!(client.session().is_none());
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
}

#[tokio::test]
async fn failed_refresh_rejects_every_waiter_and_drops_credentials() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/items", "T1", 401).await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401).set_delay(Duration::from_millis(200)),
        1,
    )
    .await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store.clone());

    let results = join_all((0..3).map(|_| client.request(ApiRequest::get("items")))).await;
    for result in results {
        assert!(matches!(result, Err(ApiError::SessionExpired)));
    }

    // With the session gone, the next call goes out bare and its 401 passes through
    let response = client.request(ApiRequest::get("items")).await.unwrap();
    assert_eq!(response.status, 401);

    let headers = authorization_headers(&server, "/api/items").await;
    assert_eq!(headers.len(), 4);
    assert_eq!(headers.last(), Some(&None));
    assert!(store.is_empty());
}

#[tokio::test]
async fn rejected_replay_expires_session_without_second_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, refreshed("T2"), 1).await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store.clone());

    let result = client.request(ApiRequest::get("items")).await;
    assert!(matches!(result, Err(ApiError::SessionExpired)));

    let headers = authorization_headers(&server, "/api/items").await;
    assert_eq!(
        headers,
        vec![Some("Bearer T1".to_string()), Some("Bearer T2".to_string())]
    );
    assert!(client.session().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn calls_after_rejected_replay_skip_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(3)
        .mount(&server)
        .await;
    mount_refresh(&server, refreshed("T2"), 1).await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let api = CyberHunterApi::new(Arc::new(client_with(&server, store.clone())));

    let first = api.fetch_profile().await;
    assert!(matches!(first, Err(ApiError::SessionExpired)));

    // Signed out now: the call goes out bare and its 401 is a plain rejection
    let second = api.fetch_profile().await;
    assert!(matches!(second, Err(ApiError::Unauthorized)));

    let headers = authorization_headers(&server, "/api/users/me").await;
    assert_eq!(headers.last(), Some(&None));
    assert!(!api.client().is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn credentials_attached_only_when_session_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .mount(&server)
        .await;

    let signed_in = client_with(
        &server,
        Arc::new(MemoryCredentialStore::with_tokens("T1", "R1")),
    );
    signed_in.request(ApiRequest::get("users/me")).await.unwrap();

    let signed_out = client_with(&server, Arc::new(MemoryCredentialStore::new()));
    signed_out.request(ApiRequest::get("/users/me")).await.unwrap();

    let headers = authorization_headers(&server, "/api/users/me").await;
    assert_eq!(headers, vec![Some("Bearer T1".to_string()), None]);
}

#[tokio::test]
async fn sign_out_without_session_is_ok() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    let client = client_with(&server, store.clone());

    assert!(client.sign_out().is_ok());
    assert!(client.sign_out().is_ok());
    assert!(store.clear().is_ok());
}

#[tokio::test]
async fn unauthenticated_401_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(401).set_body_string("login required"))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, refreshed("T2"), 0).await;

    let client = client_with(&server, Arc::new(MemoryCredentialStore::new()));
    let response = client.request(ApiRequest::get("items")).await.unwrap();

    assert_eq!(response.status, 401);
    assert_eq!(response.text(), "login required");
    assert_eq!(authorization_headers(&server, "/api/items").await, vec![None]);
}

#[tokio::test]
async fn refresh_endpoint_401_is_not_intercepted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, refreshed("T2"), 0).await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store);

    let response = client.request(ApiRequest::get("auth/refresh")).await.unwrap();
    assert_eq!(response.status, 401);
    assert_eq!(client.session(), Some(Session::new("T1", "R1")));
}

#[tokio::test]
async fn stale_401_replays_with_current_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(400)))
        .mount(&server)
        .await;
    mount_get(&server, "/api/fast", "T1", 401).await;
    mount_get(&server, "/api/slow", "T2", 200).await;
    mount_get(&server, "/api/fast", "T2", 200).await;
    mount_refresh(&server, refreshed("T2"), 1).await;

    let client = client_with(
        &server,
        Arc::new(MemoryCredentialStore::with_tokens("T1", "R1")),
    );

    let (slow, fast) = tokio::join!(
        client.request(ApiRequest::get("slow")),
        client.request(ApiRequest::get("fast")),
    );
    assert_eq!(slow.unwrap().status, 200);
    assert_eq!(fast.unwrap().status, 200);
}

#[tokio::test]
async fn refresh_timeout_is_treated_as_failure() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/items", "T1", 401).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .respond_with(refreshed("T2").set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = SessionClient::new(
        config(&server).with_refresh_timeout(Duration::from_millis(100)),
        store.clone(),
    )
    .unwrap();
    client.restore().unwrap();

    let results = join_all((0..2).map(|_| client.request(ApiRequest::get("items")))).await;
    for result in results {
        assert!(matches!(result, Err(ApiError::SessionExpired)));
    }
    assert!(client.session().is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn partial_store_is_not_rehydrated() {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryCredentialStore::new());
    store.set(REFRESH_TOKEN_KEY, "R1").unwrap();

    let client = SessionClient::new(config(&server), store.clone()).unwrap();
    assert!(!client.restore().unwrap());
    assert!(!client.is_authenticated());
    assert!(store.is_empty());
}

#[tokio::test]
async fn rotated_refresh_token_is_persisted() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/items", "T1", 401).await;
    mount_get(&server, "/api/items", "T2", 200).await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "data": { "access_token": "T2", "refresh_token": "R2" } })),
        1,
    )
    .await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store.clone());

    let response = client.request(ApiRequest::get("items")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T2"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
}

#[tokio::test]
async fn store_failure_during_refresh_expires_session() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/items", "T1", 401).await;
    mount_refresh(&server, refreshed("T2"), 1).await;

    let store = Arc::new(MemoryCredentialStore::with_tokens("T1", "R1"));
    let client = client_with(&server, store.clone());
    store.set_unavailable(true);

    let result = client.request(ApiRequest::get("items")).await;
    assert!(matches!(result, Err(ApiError::SessionExpired)));
    assert!(client.session().is_none());
}

#[tokio::test]
async fn cancelled_refresh_owner_hands_over_to_waiter() {
    let server = MockServer::start().await;
    mount_get(&server, "/api/a", "T1", 401).await;
    Mock::given(method("GET"))
        .and(path("/api/b"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;
    mount_get(&server, "/api/b", "T2", 200).await;
    mount_refresh(
        &server,
        refreshed("T2").set_delay(Duration::from_millis(300)),
        2,
    )
    .await;

    let client = client_with(
        &server,
        Arc::new(MemoryCredentialStore::with_tokens("T1", "R1")),
    );

    let owner = tokio::time::timeout(
        Duration::from_millis(150),
        client.request(ApiRequest::get("a")),
    );
    let waiter = client.request(ApiRequest::get("b"));
    let (owner, waiter) = tokio::join!(owner, waiter);

    assert!(owner.is_err(), "owner should have been cancelled");
    assert_eq!(waiter.unwrap().status, 200);
    assert_eq!(client.session(), Some(Session::new("T2", "R1")));
}

#[tokio::test]
async fn transport_failure_is_network_error() {
    // Nothing listens on port 1
    let config = ClientConfig::new("http://127.0.0.1:1/api/").unwrap();
    let client = SessionClient::new(config, Arc::new(MemoryCredentialStore::new())).unwrap();
    let result = client.request(ApiRequest::get("items")).await;
    assert!(matches!(result, Err(ApiError::Network(_))));
}
