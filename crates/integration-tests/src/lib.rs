//! End-to-end tests for the Replica Chat gateway.
//!
//! The gateway runs in-process against [`MockUpstream`], a scriptable
//! stand-in for the hosted replica platform. Each test gets its own mock,
//! its own gateway, and its own user cache in a temporary directory.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p replica-chat-integration-tests
//!
//! # Including the test against the real platform
//! UPSTREAM_API_URL=... UPSTREAM_ORG_SECRET=... cargo test -p replica-chat-integration-tests -- --ignored
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, RawQuery, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use url::Url;

use replica_chat_server::config::{ResilienceConfig, ServerConfig, UpstreamConfig};
use replica_chat_server::routes;
use replica_chat_server::state::AppState;
use replica_chat_server::store::UserCache;
use replica_chat_server::upstream::{RetryPolicy, UpstreamClient};

/// Organization secret the mock accepts.
pub const ORG_SECRET: &str = "9c1e5a7f3b2d8e4c6a0f1b3d5e7c9a2b";

/// Upstream endpoints the mock serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CreateUser,
    GetUser,
    ListUsers,
    CreateReplica,
    ListReplicas,
    DeleteReplica,
    ChatCompletion,
    ChatHistory,
}

/// A canned upstream answer.
#[derive(Debug, Clone)]
pub struct Reply {
    status: StatusCode,
    body: Value,
    delay: Duration,
}

impl Reply {
    /// Answer `status` with a JSON body.
    ///
    /// # Panics
    ///
    /// Panics if `status` is not a valid HTTP status code.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).expect("valid status code"),
            body,
            delay: Duration::ZERO,
        }
    }

    /// Hold the answer back for `delay`.
    #[must_use]
    pub const fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn send(self) -> Response {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Default)]
struct Script {
    queued: HashMap<Endpoint, VecDeque<Reply>>,
    fallback: HashMap<Endpoint, Reply>,
    hits: HashMap<Endpoint, usize>,
    queries: HashMap<Endpoint, Option<String>>,
    user_headers: HashMap<Endpoint, Option<String>>,
    users: Vec<Value>,
    replicas: Vec<Value>,
    history: Vec<Value>,
}

#[derive(Clone, Default)]
struct Shared(Arc<Mutex<Script>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().expect("mock upstream state poisoned")
    }

    /// Count a hit and take the scripted reply for `endpoint`, if any.
    fn scripted(&self, endpoint: Endpoint) -> Option<Reply> {
        let mut script = self.lock();
        *script.hits.entry(endpoint).or_default() += 1;
        if let Some(reply) = script.queued.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            return Some(reply);
        }
        script.fallback.get(&endpoint).cloned()
    }
}

/// In-process mock of the hosted replica platform's `/v1` API.
///
/// Unscripted calls get a plausible default answer backed by the mock's own
/// users, replicas, and chat history.
pub struct MockUpstream {
    url: Url,
    shared: Shared,
}

impl MockUpstream {
    /// Bind to an ephemeral port and start serving.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let shared = Shared::default();

        let app = Router::new()
            .route("/v1/users", get(list_users).post(create_user))
            .route("/v1/users/{id}", get(get_user))
            .route("/v1/replicas", get(list_replicas).post(create_replica))
            .route("/v1/replicas/{uuid}", delete(delete_replica))
            .route("/v1/replicas/{uuid}/chat/completions", post(chat_completion))
            .route("/v1/replicas/{uuid}/chat/history/web", get(chat_history))
            .layer(middleware::from_fn(require_org_secret))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock upstream");
        let addr = listener.local_addr().expect("Mock upstream has no address");
        tokio::spawn(async move { axum::serve(listener, app).await });

        Self {
            url: Url::parse(&format!("http://{addr}/")).expect("valid mock url"),
            shared,
        }
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Answer the next call to `endpoint` with `reply`. Queued replies are
    /// used in order before any fallback.
    pub fn enqueue(&self, endpoint: Endpoint, reply: Reply) {
        self.shared
            .lock()
            .queued
            .entry(endpoint)
            .or_default()
            .push_back(reply);
    }

    /// Answer every call to `endpoint` with `reply` once the queue is empty.
    pub fn always(&self, endpoint: Endpoint, reply: Reply) {
        self.shared.lock().fallback.insert(endpoint, reply);
    }

    /// How many times `endpoint` was called.
    #[must_use]
    pub fn hits(&self, endpoint: Endpoint) -> usize {
        self.shared.lock().hits.get(&endpoint).copied().unwrap_or(0)
    }

    /// Query string of the last call to `endpoint`.
    #[must_use]
    pub fn last_query(&self, endpoint: Endpoint) -> Option<String> {
        self.shared.lock().queries.get(&endpoint).cloned().flatten()
    }

    /// `X-USER-ID` header of the last call to `endpoint`.
    #[must_use]
    pub fn last_user_header(&self, endpoint: Endpoint) -> Option<String> {
        self.shared.lock().user_headers.get(&endpoint).cloned().flatten()
    }

    /// Register a user upstream.
    pub fn add_user(&self, id: &str, email: &str) {
        self.shared.lock().users.push(json!({
            "id": id,
            "email": email,
            "createdAt": "2025-01-15T10:00:00Z",
            "linkedAccounts": [],
        }));
    }

    /// Register a user record exactly as given.
    pub fn add_raw_user(&self, user: Value) {
        self.shared.lock().users.push(user);
    }

    /// Register a replica upstream.
    pub fn add_replica(&self, uuid: &str, name: &str, owner: &str) {
        self.shared.lock().replicas.push(json!({
            "uuid": uuid,
            "name": name,
            "ownerID": owner,
        }));
    }

    /// Replace the web chat history served for every replica.
    pub fn set_history(&self, items: Vec<Value>) {
        self.shared.lock().history = items;
    }

    /// Replicas currently registered.
    #[must_use]
    pub fn replicas(&self) -> Vec<Value> {
        self.shared.lock().replicas.clone()
    }
}

async fn require_org_secret(request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get("X-ORGANIZATION-SECRET")
        .and_then(|v| v.to_str().ok())
        == Some(ORG_SECRET);
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid organization secret" })),
        )
            .into_response();
    }
    next.run(request).await
}

fn user_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-USER-ID")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn create_user(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
    if let Some(reply) = shared.scripted(Endpoint::CreateUser) {
        return reply.send().await;
    }

    let mut script = shared.lock();
    let id = body.get("id").cloned().unwrap_or(Value::Null);
    if script.users.iter().any(|u| u.get("id") == Some(&id)) {
        return (StatusCode::CONFLICT, Json(json!({ "error": "User already exists" }))).into_response();
    }
    let user = json!({
        "id": id,
        "email": body.get("email").cloned().unwrap_or(Value::Null),
        "createdAt": "2025-06-01T09:00:00Z",
        "linkedAccounts": [],
    });
    script.users.push(user.clone());
    (StatusCode::CREATED, Json(user)).into_response()
}

async fn get_user(State(shared): State<Shared>, Path(id): Path<String>) -> Response {
    if let Some(reply) = shared.scripted(Endpoint::GetUser) {
        return reply.send().await;
    }

    let script = shared.lock();
    match script.users.iter().find(|u| u["id"] == id.as_str()) {
        Some(user) => Json(user.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "User not found" }))).into_response(),
    }
}

async fn list_users(State(shared): State<Shared>) -> Response {
    if let Some(reply) = shared.scripted(Endpoint::ListUsers) {
        return reply.send().await;
    }
    let users = shared.lock().users.clone();
    Json(json!({ "success": true, "items": users })).into_response()
}

async fn create_replica(State(shared): State<Shared>, Json(body): Json<Value>) -> Response {
    if let Some(reply) = shared.scripted(Endpoint::CreateReplica) {
        return reply.send().await;
    }

    let mut script = shared.lock();
    let uuid = format!("replica-{}", script.replicas.len() + 1);
    let mut replica = body;
    if let Value::Object(fields) = &mut replica {
        fields.insert("uuid".to_string(), Value::String(uuid.clone()));
    }
    script.replicas.push(replica);
    Json(json!({ "success": true, "uuid": uuid })).into_response()
}

async fn list_replicas(State(shared): State<Shared>, RawQuery(query): RawQuery) -> Response {
    shared.lock().queries.insert(Endpoint::ListReplicas, query);
    if let Some(reply) = shared.scripted(Endpoint::ListReplicas) {
        return reply.send().await;
    }
    let replicas = shared.lock().replicas.clone();
    Json(json!({ "success": true, "items": replicas, "total": replicas.len() })).into_response()
}

async fn delete_replica(State(shared): State<Shared>, Path(uuid): Path<String>) -> Response {
    if let Some(reply) = shared.scripted(Endpoint::DeleteReplica) {
        return reply.send().await;
    }

    let mut script = shared.lock();
    let before = script.replicas.len();
    script.replicas.retain(|r| r["uuid"] != uuid.as_str());
    if script.replicas.len() == before {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Replica not found" }))).into_response();
    }
    Json(json!({ "success": true })).into_response()
}

async fn chat_completion(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    shared
        .lock()
        .user_headers
        .insert(Endpoint::ChatCompletion, user_header(&headers));
    if let Some(reply) = shared.scripted(Endpoint::ChatCompletion) {
        return reply.send().await;
    }

    let content = body["content"].as_str().unwrap_or_default();
    Json(json!({ "success": true, "content": format!("echo: {content}") })).into_response()
}

async fn chat_history(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    shared
        .lock()
        .user_headers
        .insert(Endpoint::ChatHistory, user_header(&headers));
    if let Some(reply) = shared.scripted(Endpoint::ChatHistory) {
        return reply.send().await;
    }
    let items = shared.lock().history.clone();
    Json(json!({ "success": true, "type": "web", "items": items })).into_response()
}

/// Short retry policies so failure paths finish in well under a second.
#[must_use]
pub const fn fast_resilience() -> ResilienceConfig {
    ResilienceConfig {
        user_create: RetryPolicy::new(3, Duration::from_millis(300), Duration::from_millis(20)),
        replica_create: RetryPolicy::new(3, Duration::from_millis(300), Duration::from_millis(20)),
        request_timeout: Duration::from_secs(2),
    }
}

/// Upstream settings pointing at `mock`.
#[must_use]
pub fn upstream_config(mock: &MockUpstream) -> UpstreamConfig {
    UpstreamConfig {
        base_url: mock.url().clone(),
        org_secret: SecretString::from(ORG_SECRET),
        api_version: "2025-03-25".to_string(),
    }
}

/// Upstream client pointing at `mock`.
///
/// # Panics
///
/// Panics if the client cannot be built.
#[must_use]
pub fn upstream_client(mock: &MockUpstream) -> UpstreamClient {
    UpstreamClient::new(&upstream_config(mock)).expect("Failed to build upstream client")
}

/// The gateway served in-process on an ephemeral port.
pub struct Gateway {
    base: String,
    http: reqwest::Client,
    cache_path: PathBuf,
    _dir: TempDir,
}

impl Gateway {
    /// Start a gateway in front of `upstream` with a fresh user cache.
    ///
    /// # Panics
    ///
    /// Panics if the gateway cannot be built or bound.
    pub async fn start(upstream: &MockUpstream, resilience: ResilienceConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let cache_path = dir.path().join("data").join("users.json");

        let config = ServerConfig {
            host: "127.0.0.1".parse().expect("valid host"),
            port: 0,
            user_cache_path: cache_path.clone(),
            cors_allow_origin: None,
            upstream: upstream_config(upstream),
            resilience,
            sentry_dsn: None,
            sentry_environment: None,
        };
        let state = AppState::new(config).expect("Failed to build app state");
        let app = routes::router(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind gateway");
        let addr = listener.local_addr().expect("Gateway has no address");
        tokio::spawn(async move { axum::serve(listener, app).await });

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            cache_path,
            _dir: dir,
        }
    }

    /// Absolute URL of a gateway path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// A handle on the gateway's user cache file.
    #[must_use]
    pub fn cache(&self) -> UserCache {
        UserCache::new(&self.cache_path)
    }

    /// `POST` a JSON body and return the status and JSON answer.
    ///
    /// # Panics
    ///
    /// Panics if the request fails or the answer is not JSON.
    pub async fn post_json(&self, path: &str, body: &Value) -> (reqwest::StatusCode, Value) {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Gateway request failed");
        let status = response.status();
        (status, response.json().await.expect("Gateway answer is not JSON"))
    }

    /// `GET` a path and return the status and JSON answer.
    ///
    /// # Panics
    ///
    /// Panics if the request fails or the answer is not JSON.
    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .expect("Gateway request failed");
        let status = response.status();
        (status, response.json().await.expect("Gateway answer is not JSON"))
    }
}
