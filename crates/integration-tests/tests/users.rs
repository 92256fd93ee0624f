//! Sign-in identity flows through `/users/*`.

use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde_json::json;

use replica_chat_core::{Email, UserId};
use replica_chat_integration_tests::{Endpoint, Gateway, MockUpstream, Reply, fast_resilience};

fn derived(email: &str) -> String {
    UserId::derive(&Email::parse(email).expect("valid email")).into_inner()
}

#[tokio::test]
async fn test_check_creates_user_then_answers_from_cache() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(&upstream, fast_resilience()).await;
    let body = json!({ "email": "ada@example.com" });

    let (status, first) = gateway.post_json("/users/check", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["exists"], false);
    assert_eq!(first["user"]["id"], derived("ada@example.com"));
    assert_eq!(first["user"]["email"], "ada@example.com");
    assert!(first.get("verified").is_none());

    let (status, second) = gateway.post_json("/users/check", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["exists"], true);
    assert_eq!(second["verified"], true);
    assert_eq!(second["user"]["id"], first["user"]["id"]);

    assert_eq!(upstream.hits(Endpoint::CreateUser), 1);
}

#[tokio::test]
async fn test_check_cache_lookup_ignores_case() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    gateway
        .post_json("/users/check", &json!({ "email": "grace@example.com" }))
        .await;
    let (_, again) = gateway
        .post_json("/users/check", &json!({ "email": "Grace@Example.COM" }))
        .await;

    assert_eq!(again["exists"], true);
    assert_eq!(again["verified"], true);
    assert_eq!(upstream.hits(Endpoint::CreateUser), 1);
}

#[tokio::test]
async fn test_check_adopts_upstream_id_on_conflict() {
    let upstream = MockUpstream::start().await;
    upstream.add_user("legacy-42", "ada@example.com");
    upstream.enqueue(Endpoint::CreateUser, Reply::json(409, json!({ "error": "User already exists" })));
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["user"]["id"], "legacy-42");
    assert_eq!(upstream.hits(Endpoint::CreateUser), 1);
    assert_eq!(upstream.hits(Endpoint::ListUsers), 1);

    let cached = gateway
        .cache()
        .get(&Email::parse("ada@example.com").expect("valid email"))
        .await
        .expect("user cached");
    assert_eq!(cached.id.as_str(), "legacy-42");
}

#[tokio::test]
async fn test_check_adopts_upstream_id_despite_malformed_sibling_entries() {
    let upstream = MockUpstream::start().await;
    upstream.add_user("legacy-42", "ada@example.com");
    upstream.add_raw_user(json!({ "id": "bob-1", "email": "bob@example.com", "createdAt": "" }));
    upstream.add_raw_user(json!({ "email": "no-id@example.com" }));
    upstream.enqueue(Endpoint::CreateUser, Reply::json(409, json!({ "error": "User already exists" })));
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["user"]["id"], "legacy-42");

    let (status, synced) = gateway
        .post_json("/users/sync", &json!({ "email": "bob@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(synced["found"], true);
    assert_eq!(synced["user"]["id"], "bob-1");
}

#[tokio::test]
async fn test_check_keeps_derived_id_when_conflict_has_no_listed_user() {
    let upstream = MockUpstream::start().await;
    upstream.add_user("someone-else", "other@example.com");
    upstream.enqueue(Endpoint::CreateUser, Reply::json(409, json!({ "error": "User already exists" })));
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["user"]["id"], derived("ada@example.com"));
}

#[tokio::test]
async fn test_check_falls_back_when_upstream_keeps_failing() {
    let upstream = MockUpstream::start().await;
    upstream.always(Endpoint::CreateUser, Reply::json(500, json!({ "error": "boom" })));
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let started = Instant::now();
    let (status, body) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
    assert_eq!(body["user"]["id"], derived("ada@example.com"));
    assert_eq!(upstream.hits(Endpoint::CreateUser), 3);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The fallback identity is cached like any other.
    assert_eq!(gateway.cache().all().await.len(), 1);
}

#[tokio::test]
async fn test_check_falls_back_when_upstream_hangs() {
    let upstream = MockUpstream::start().await;
    upstream.always(
        Endpoint::CreateUser,
        Reply::json(201, json!({})).after(Duration::from_secs(10)),
    );
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let started = Instant::now();
    let (status, body) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;

    // 3 attempts of 300ms with 20ms between them
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
    assert_eq!(body["user"]["id"], derived("ada@example.com"));
    assert_eq!(upstream.hits(Endpoint::CreateUser), 3);
}

#[tokio::test]
async fn test_check_recovers_after_transient_failure() {
    let upstream = MockUpstream::start().await;
    upstream.enqueue(Endpoint::CreateUser, Reply::json(503, json!({ "error": "unavailable" })));
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (_, body) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;

    assert_eq!(body["exists"], false);
    assert_eq!(upstream.hits(Endpoint::CreateUser), 2);
}

#[tokio::test]
async fn test_check_rejects_missing_or_invalid_email() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway.post_json("/users/check", &json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Email is required");

    let (status, body) = gateway
        .post_json("/users/check", &json!({ "email": "not-an-email" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().starts_with("Invalid email"));

    assert_eq!(upstream.hits(Endpoint::CreateUser), 0);
}

#[tokio::test]
async fn test_malformed_json_body_is_a_json_400() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let response = gateway
        .http()
        .post(gateway.url("/users/check"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("Gateway request failed");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("JSON error body");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_create_answers_conflict_with_request_body() {
    let upstream = MockUpstream::start().await;
    upstream.add_user("ada-1", "ada@example.com");
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway
        .post_json("/users", &json!({ "id": "ada-1", "email": "ada@example.com" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": "ada-1", "email": "ada@example.com", "exists": true }));
}

#[tokio::test]
async fn test_verify_reports_existence() {
    let upstream = MockUpstream::start().await;
    upstream.add_user("ada-1", "ada@example.com");
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway.get_json("/users/verify?userId=ada-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["user"]["email"], "ada@example.com");

    let (status, body) = gateway.get_json("/users/verify?userId=nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "exists": false, "error": "User not found" }));

    let (status, body) = gateway.get_json("/users/verify").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "User ID is required");
}

#[tokio::test]
async fn test_ensure_creates_missing_user_once() {
    let upstream = MockUpstream::start().await;
    let gateway = Gateway::start(&upstream, fast_resilience()).await;
    let body = json!({ "userId": "ada-1", "email": "ada@example.com" });

    let (status, first) = gateway.post_json("/users/verify", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["exists"], false);
    assert_eq!(first["created"], true);

    let (status, second) = gateway.post_json("/users/verify", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["exists"], true);
    assert!(second.get("created").is_none());

    assert_eq!(upstream.hits(Endpoint::CreateUser), 1);

    let (status, missing) = gateway
        .post_json("/users/verify", &json!({ "userId": "ada-1" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(missing["error"], "User ID and email are required");
}

#[tokio::test]
async fn test_sync_mirrors_upstream_user_into_cache() {
    let upstream = MockUpstream::start().await;
    upstream.add_user("legacy-7", "ada@example.com");
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway
        .post_json("/users/sync", &json!({ "email": "ada@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], true);
    assert_eq!(body["user"]["id"], "legacy-7");
    assert_eq!(body["user"]["linkedAccounts"], json!([]));

    // Sign-in now resolves from the cache without touching upstream.
    let (_, check) = gateway
        .post_json("/users/check", &json!({ "email": "ada@example.com" }))
        .await;
    assert_eq!(check["user"]["id"], "legacy-7");
    assert_eq!(check["verified"], true);
    assert_eq!(upstream.hits(Endpoint::CreateUser), 0);

    let (status, body) = gateway
        .post_json("/users/sync", &json!({ "email": "nobody@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["found"], false);
}

#[tokio::test]
async fn test_sync_reports_upstream_failure() {
    let upstream = MockUpstream::start().await;
    upstream.always(Endpoint::ListUsers, Reply::json(503, json!({ "error": "down" })));
    let gateway = Gateway::start(&upstream, fast_resilience()).await;

    let (status, body) = gateway
        .post_json("/users/sync", &json!({ "email": "ada@example.com" }))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to fetch users from upstream");
    assert_eq!(body["details"], r#"API returned 503: {"error":"down"}"#);
}
