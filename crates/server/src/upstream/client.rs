//! Single-call HTTP client for the upstream platform.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use replica_chat_core::{Email, Message, NewReplica, ReplicaId, UserId};

use super::types::{HistoryItem, UpstreamUser, normalize_list};
use super::{API_VERSION_HEADER, ORG_SECRET_HEADER, USER_ID_HEADER, UpstreamError};
use crate::config::UpstreamConfig;

/// Page size requested when listing replicas for bulk operations.
pub const REPLICA_PAGE_SIZE: u32 = 100;

/// An upstream answer, whatever its status.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Parsed JSON body; `Null` when the body was empty.
    pub body: Value,
}

impl UpstreamResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Turn a non-2xx response into [`UpstreamError::Status`].
    ///
    /// # Errors
    ///
    /// Returns the response as an error when its status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, UpstreamError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(UpstreamError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }

    /// Deserialize the body.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::UnexpectedShape`] if the body does not match `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T, UpstreamError> {
        serde_json::from_value(self.body).map_err(|e| UpstreamError::UnexpectedShape(e.to_string()))
    }
}

/// Client for the upstream replica platform.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct UpstreamClient {
    inner: Arc<UpstreamClientInner>,
}

struct UpstreamClientInner {
    client: reqwest::Client,
    base_url: Url,
}

impl UpstreamClient {
    /// Create a new upstream client.
    ///
    /// # Errors
    ///
    /// Returns error if a header value is invalid or the HTTP client fails to
    /// build.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();

        let mut secret = HeaderValue::from_str(config.org_secret.expose_secret())
            .map_err(|e| UpstreamError::Config(format!("invalid organization secret: {e}")))?;
        secret.set_sensitive(true);
        headers.insert(ORG_SECRET_HEADER, secret);

        headers.insert(
            API_VERSION_HEADER,
            HeaderValue::from_str(&config.api_version)
                .map_err(|e| UpstreamError::Config(format!("invalid API version: {e}")))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        if config.base_url.cannot_be_a_base() {
            return Err(UpstreamError::Config(format!(
                "{} cannot be used as a base URL",
                config.base_url
            )));
        }

        Ok(Self {
            inner: Arc::new(UpstreamClientInner {
                client,
                base_url: config.base_url.clone(),
            }),
        })
    }

    /// Build `<base>/v1/<segments...>`. Segments are percent-encoded.
    #[must_use]
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.inner.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    /// Perform one upstream call.
    ///
    /// The whole exchange, body included, must finish within `timeout`;
    /// otherwise the request is dropped and [`UpstreamError::Timeout`] is
    /// returned. Any status is returned as-is; only transport failures,
    /// timeouts and non-JSON bodies are errors.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, timeout or an unparseable body.
    #[instrument(skip(self, url, body), fields(method = %method, path = %url.path()))]
    pub async fn call(
        &self,
        method: Method,
        url: Url,
        user: Option<&UserId>,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut request = self.inner.client.request(method, url);
        if let Some(user) = user {
            request = request.header(USER_ID_HEADER, user.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))??;

        debug!(status = %status, "upstream responded");

        Ok(UpstreamResponse {
            status,
            body: parse_body(status, text)?,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Users
    // ─────────────────────────────────────────────────────────────────────────

    /// `POST /v1/users` with `{id, email}`.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn create_user(
        &self,
        id: &UserId,
        email: &Email,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let body = json!({ "id": id, "email": email });
        self.create_user_raw(&body, timeout).await
    }

    /// `POST /v1/users` with an arbitrary body.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn create_user_raw(
        &self,
        body: &Value,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.call(Method::POST, self.endpoint(&["users"]), None, Some(body), timeout)
            .await
    }

    /// `GET /v1/users/{id}`.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn get_user(
        &self,
        id: &UserId,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.call(
            Method::GET,
            self.endpoint(&["users", id.as_str()]),
            None,
            None,
            timeout,
        )
        .await
    }

    /// `GET /v1/users`, normalized to a list.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Status`] on a non-2xx answer and
    /// [`UpstreamError::UnexpectedShape`] if the list cannot be found.
    pub async fn list_users(&self, timeout: Duration) -> Result<Vec<UpstreamUser>, UpstreamError> {
        let response = self
            .call(Method::GET, self.endpoint(&["users"]), None, None, timeout)
            .await?
            .error_for_status()?;
        normalize_list(response.body)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Replicas
    // ─────────────────────────────────────────────────────────────────────────

    /// `POST /v1/replicas`.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn create_replica(
        &self,
        replica: &NewReplica,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let body = serde_json::to_value(replica)
            .map_err(|e| UpstreamError::UnexpectedShape(e.to_string()))?;
        self.call(Method::POST, self.endpoint(&["replicas"]), None, Some(&body), timeout)
            .await
    }

    /// `GET /v1/replicas`, optionally filtered by owner.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn list_replicas(
        &self,
        owner: Option<&UserId>,
        page_size: Option<u32>,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut url = self.endpoint(&["replicas"]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(owner) = owner {
                query.append_pair("ownerID", owner.as_str());
            }
            if let Some(page_size) = page_size {
                query.append_pair("page_size", &page_size.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.call(Method::GET, url, None, None, timeout).await
    }

    /// `DELETE /v1/replicas/{uuid}`.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn delete_replica(
        &self,
        uuid: &ReplicaId,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.call(
            Method::DELETE,
            self.endpoint(&["replicas", uuid.as_str()]),
            None,
            None,
            timeout,
        )
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chat
    // ─────────────────────────────────────────────────────────────────────────

    /// `POST /v1/replicas/{uuid}/chat/completions` with `{content, source: "web"}`.
    ///
    /// # Errors
    ///
    /// See [`UpstreamClient::call`].
    pub async fn chat_completion(
        &self,
        replica: &ReplicaId,
        user: Option<&UserId>,
        content: &str,
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let body = json!({ "content": content, "source": "web" });
        self.call(
            Method::POST,
            self.endpoint(&["replicas", replica.as_str(), "chat", "completions"]),
            user,
            Some(&body),
            timeout,
        )
        .await
    }

    /// `GET /v1/replicas/{uuid}/chat/history/web`, mapped to messages in
    /// ascending timestamp order.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Status`] on a non-2xx answer and
    /// [`UpstreamError::UnexpectedShape`] if the list cannot be found.
    /// Unreadable items are skipped.
    pub async fn chat_history(
        &self,
        replica: &ReplicaId,
        user: Option<&UserId>,
        timeout: Duration,
    ) -> Result<Vec<Message>, UpstreamError> {
        let response = self
            .call(
                Method::GET,
                self.endpoint(&["replicas", replica.as_str(), "chat", "history", "web"]),
                user,
                None,
                timeout,
            )
            .await?
            .error_for_status()?;

        let items: Vec<HistoryItem> = normalize_list(response.body)?;
        let mut messages: Vec<Message> = items.into_iter().map(Message::from).collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}

fn parse_body(status: StatusCode, text: String) -> Result<Value, UpstreamError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|_| UpstreamError::Malformed { status, raw: text })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn client(base: &str) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            base_url: Url::parse(base).unwrap(),
            org_secret: SecretString::from("9f2c4e6a8b0d1f3e5a7c9b2d4f6e8a0c".to_string()),
            api_version: "2025-03-25".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let c = client("https://api.example.com");
        assert_eq!(
            c.endpoint(&["replicas", "abc", "chat", "history", "web"]).as_str(),
            "https://api.example.com/v1/replicas/abc/chat/history/web"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let c = client("http://127.0.0.1:8080/proxy/");
        assert_eq!(
            c.endpoint(&["users"]).as_str(),
            "http://127.0.0.1:8080/proxy/v1/users"
        );
    }

    #[test]
    fn test_endpoint_encodes_ids() {
        let c = client("https://api.example.com");
        assert_eq!(
            c.endpoint(&["users", "a/b c"]).as_str(),
            "https://api.example.com/v1/users/a%2Fb%20c"
        );
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(StatusCode::OK, "  ".to_string()).unwrap(), Value::Null);
        assert_eq!(
            parse_body(StatusCode::CREATED, r#"{"id":"x"}"#.to_string()).unwrap(),
            json!({"id": "x"})
        );

        let err = parse_body(StatusCode::BAD_GATEWAY, "<html>".to_string()).unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Malformed { status: StatusCode::BAD_GATEWAY, ref raw } if raw == "<html>"
        ));
    }

    #[test]
    fn test_error_for_status() {
        let ok = UpstreamResponse {
            status: StatusCode::OK,
            body: Value::Null,
        };
        assert!(ok.error_for_status().is_ok());

        let conflict = UpstreamResponse {
            status: StatusCode::CONFLICT,
            body: json!({"error": "exists"}),
        };
        assert_eq!(
            conflict.error_for_status().unwrap_err().status(),
            Some(StatusCode::CONFLICT)
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let c = client("http://127.0.0.1:1");
        let err = c.list_users(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Http(_) | UpstreamError::Timeout(_)));
    }
}
