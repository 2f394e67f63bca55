// Integration tests for the credential-refresh pipeline
//
// These run the full stack against mock backends: credential attachment,
// 401 classification, single-flight refresh with fan-out, replay, and
// session teardown.

use std::sync::{Arc, Mutex};

use mockito::Matcher;
use serde_json::json;

use storefront_client::auth::{MemoryKeyValueStore, Navigator};
use storefront_client::{ClientConfig, StorefrontClient};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

struct RecordingNavigator {
    path: Mutex<String>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    fn at(path: &str) -> Arc<Self> {
        Arc::new(Self {
            path: Mutex::new(path.to_string()),
            redirects: Mutex::new(Vec::new()),
        })
    }

    fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn current_path(&self) -> String {
        self.path.lock().unwrap().clone()
    }

    fn redirect(&self, path: &str) {
        self.redirects.lock().unwrap().push(path.to_string());
    }
}

struct Harness {
    client: StorefrontClient,
    kv: Arc<MemoryKeyValueStore>,
    navigator: Arc<RecordingNavigator>,
}

fn harness(server: &mockito::ServerGuard, current_path: &str) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("storefront_client=debug")
        .try_init();

    let kv = Arc::new(MemoryKeyValueStore::new());
    let navigator = RecordingNavigator::at(current_path);
    let config = ClientConfig {
        base_url: server.url(),
        ..ClientConfig::default()
    };
    let client = StorefrontClient::new(config, kv.clone(), navigator.clone())
        .expect("Failed to create client");

    Harness {
        client,
        kv,
        navigator,
    }
}

fn credential(kv: &MemoryKeyValueStore) -> Option<String> {
    use storefront_client::auth::KeyValueStore;
    kv.get("access_token").unwrap()
}

fn seed_credential(kv: &MemoryKeyValueStore, value: &str) {
    use storefront_client::auth::KeyValueStore;
    kv.set("access_token", value).unwrap();
}

fn status_of(result: &Result<reqwest::Response, storefront_client::ClientError>) -> Option<u16> {
    match result {
        Ok(response) => Some(response.status().as_u16()),
        Err(error) => error.status(),
    }
}

// ==================================================================================================
// Credential attachment
// ==================================================================================================

#[tokio::test]
async fn attaches_stored_credential_as_bearer_header() {
    let mut server = mockito::Server::new_async().await;
    let profile = server
        .mock("GET", "/profile")
        .match_header("authorization", "Bearer T1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"name": "Ada"}"#)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server, "/account");
    seed_credential(&h.kv, "T1");

    let response = h.client.get("/profile").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    profile.assert_async().await;
}

#[tokio::test]
async fn anonymous_requests_are_sent_without_header() {
    let mut server = mockito::Server::new_async().await;
    let products = server
        .mock("GET", "/products")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server, "/products");

    let response = h.client.get("/products").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    products.assert_async().await;
}

// ==================================================================================================
// Scenario: concurrent 401s collapse into one refresh, everyone replays
// ==================================================================================================

#[tokio::test]
async fn concurrent_401s_share_one_refresh_and_all_replay() {
    let mut server = mockito::Server::new_async().await;

    let stale = server
        .mock("GET", "/orders")
        .match_header("authorization", "Bearer T1")
        .with_status(401)
        .expect(3)
        .create_async()
        .await;

    // Slow refresh so every 401 arrives and enqueues before the episode
    // settles
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_header("content-type", "application/json")
        .with_chunked_body(|writer| {
            std::thread::sleep(std::time::Duration::from_millis(200));
            writer.write_all(br#"{"accessToken": "T2"}"#)
        })
        .expect(1)
        .create_async()
        .await;

    let fresh = server
        .mock("GET", "/orders")
        .match_header("authorization", "Bearer T2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(3)
        .create_async()
        .await;

    let h = harness(&server, "/account/orders");
    seed_credential(&h.kv, "T1");

    let (a, b, c) = tokio::join!(
        h.client.get("/orders"),
        h.client.get("/orders"),
        h.client.get("/orders"),
    );

    // Fan-out completeness: every caller settles, all with the replay result
    assert_eq!(status_of(&a), Some(200));
    assert_eq!(status_of(&b), Some(200));
    assert_eq!(status_of(&c), Some(200));

    assert_eq!(credential(&h.kv), Some("T2".to_string()));
    assert!(h.navigator.redirects().is_empty());

    stale.assert_async().await;
    refresh.assert_async().await;
    fresh.assert_async().await;
}

// ==================================================================================================
// Scenario: refresh failure tears the session down
// ==================================================================================================

#[tokio::test]
async fn failed_refresh_clears_session_and_bookmarks_return_path() {
    let mut server = mockito::Server::new_async().await;

    let orders = server
        .mock("GET", "/orders")
        .match_header("authorization", "Bearer T1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(500)
        .with_body("refresh token revoked")
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server, "/account/orders");
    seed_credential(&h.kv, "T1");

    let result = h.client.get("/orders").await;

    // The caller sees their own request's 401, not the refresh call's 500
    assert_eq!(status_of(&result), Some(401));

    assert_eq!(credential(&h.kv), None);
    {
        use storefront_client::auth::KeyValueStore;
        assert_eq!(
            h.kv.get("return_path").unwrap(),
            Some("/account/orders".to_string())
        );
    }
    assert_eq!(h.navigator.redirects(), vec!["/login".to_string()]);

    orders.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn failed_refresh_on_login_page_does_not_bookmark() {
    let mut server = mockito::Server::new_async().await;

    let _orders = server
        .mock("GET", "/orders")
        .with_status(401)
        .create_async()
        .await;
    let _refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(500)
        .create_async()
        .await;

    let h = harness(&server, "/login");
    seed_credential(&h.kv, "T1");

    let result = h.client.get("/orders").await;
    assert_eq!(status_of(&result), Some(401));

    use storefront_client::auth::KeyValueStore;
    assert_eq!(h.kv.get("return_path").unwrap(), None);
    assert_eq!(h.navigator.redirects(), vec!["/login".to_string()]);
}

// ==================================================================================================
// Scenario: 401 with no stored credential short-circuits
// ==================================================================================================

#[tokio::test]
async fn missing_credential_short_circuits_without_refresh() {
    let mut server = mockito::Server::new_async().await;

    let orders = server
        .mock("GET", "/orders")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server, "/account/orders");

    let result = h.client.get("/orders").await;
    assert_eq!(status_of(&result), Some(401));

    // Unrecoverable: the session is gone, user is routed to login
    assert_eq!(h.navigator.redirects(), vec!["/login".to_string()]);

    orders.assert_async().await;
    refresh.assert_async().await;
}

// ==================================================================================================
// Scenario: 401 on a public path bypasses the refresh flow
// ==================================================================================================

#[tokio::test]
async fn public_path_401_never_triggers_refresh() {
    let mut server = mockito::Server::new_async().await;

    let reviews = server
        .mock("GET", "/reviews/public/recent")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server, "/reviews");
    seed_credential(&h.kv, "T1");

    let result = h.client.get("/reviews/public/recent").await;
    assert_eq!(status_of(&result), Some(401));

    // Credential untouched, session intact
    assert_eq!(credential(&h.kv), Some("T1".to_string()));
    assert!(h.navigator.redirects().is_empty());

    reviews.assert_async().await;
    refresh.assert_async().await;
}

// ==================================================================================================
// Scenario: a replayed request that fails again does not loop
// ==================================================================================================

#[tokio::test]
async fn permanently_rejecting_endpoint_refreshes_once_and_gives_up() {
    let mut server = mockito::Server::new_async().await;

    // Rejects whatever credential it is shown
    let orders = server
        .mock("GET", "/orders")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken": "T2"}"#)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server, "/account/orders");
    seed_credential(&h.kv, "T1");

    let result = h.client.get("/orders").await;
    assert_eq!(status_of(&result), Some(401));

    // Exactly one refresh, exactly one replay, then the failure surfaces
    orders.assert_async().await;
    refresh.assert_async().await;
}

// ==================================================================================================
// Replay with a request body
// ==================================================================================================

#[tokio::test]
async fn post_body_is_replayed_intact_after_refresh() {
    let mut server = mockito::Server::new_async().await;

    let stale = server
        .mock("POST", "/cart")
        .match_header("authorization", "Bearer T1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "T2"}"#)
        .expect(1)
        .create_async()
        .await;

    let fresh = server
        .mock("POST", "/cart")
        .match_header("authorization", "Bearer T2")
        .match_body(Matcher::Json(json!({"product_id": 42, "quantity": 1})))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok": true}"#)
        .expect(1)
        .create_async()
        .await;

    let h = harness(&server, "/products/42");
    seed_credential(&h.kv, "T1");

    let result = h
        .client
        .post_json("/cart", &json!({"product_id": 42, "quantity": 1}))
        .await;
    assert_eq!(status_of(&result), Some(201));
    assert_eq!(credential(&h.kv), Some("T2".to_string()));

    stale.assert_async().await;
    refresh.assert_async().await;
    fresh.assert_async().await;
}

// ==================================================================================================
// Non-auth failures pass through untouched
// ==================================================================================================

#[tokio::test]
async fn non_auth_errors_propagate_without_refresh() {
    let mut server = mockito::Server::new_async().await;

    let _orders = server
        .mock("GET", "/orders")
        .with_status(503)
        .with_body("maintenance")
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let h = harness(&server, "/account/orders");
    seed_credential(&h.kv, "T1");

    let result = h.client.get("/orders").await;
    assert_eq!(status_of(&result), Some(503));
    assert_eq!(credential(&h.kv), Some("T1".to_string()));
    assert!(h.navigator.redirects().is_empty());

    refresh.assert_async().await;
}
