//! Gateway configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `UPSTREAM_API_URL` - Base URL of the hosted replica platform (e.g. `https://api.sensay.io`)
//! - `UPSTREAM_ORG_SECRET` - Organization secret sent as `X-ORGANIZATION-SECRET`
//!
//! ## Optional
//! - `UPSTREAM_API_VERSION` - Value of the `X-API-Version` header (default: 2025-03-25)
//! - `REPLICA_CHAT_HOST` - Bind address (default: 127.0.0.1)
//! - `REPLICA_CHAT_PORT` - Listen port (default: 3000)
//! - `USER_CACHE_PATH` - Local user cache file (default: data/users.json)
//! - `RETRY_MAX_ATTEMPTS` - Attempts per retried upstream operation (default: 3)
//! - `RETRY_BACKOFF_MS` - Fixed delay between attempts (default: 2000)
//! - `USER_CREATE_TIMEOUT_SECS` - Per-attempt timeout for user creation (default: 30)
//! - `REPLICA_CREATE_TIMEOUT_SECS` - Per-attempt timeout for replica creation (default: 60)
//! - `CHAT_TIMEOUT_SECS` - Timeout for chat completions and plain upstream calls (default: 30)
//! - `CORS_ALLOW_ORIGIN` - Allowed browser origin (default: any)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::upstream::RetryPolicy;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Path of the JSON user cache
    pub user_cache_path: PathBuf,
    /// Allowed CORS origin (`None` allows any origin)
    pub cors_allow_origin: Option<String>,
    /// Upstream API configuration
    pub upstream: UpstreamConfig,
    /// Retry and timeout settings
    pub resilience: ResilienceConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Upstream replica platform configuration.
///
/// Implements `Debug` manually to redact the organization secret.
#[derive(Clone)]
pub struct UpstreamConfig {
    /// Base URL, without the `/v1` suffix
    pub base_url: Url,
    /// Organization secret
    pub org_secret: SecretString,
    /// API version header value
    pub api_version: String,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url.as_str())
            .field("org_secret", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Retry policies and timeouts for upstream calls.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Policy for `POST /v1/users` during check-or-create
    pub user_create: RetryPolicy,
    /// Policy for `POST /v1/replicas`
    pub replica_create: RetryPolicy,
    /// Timeout for chat completions and single-shot upstream calls
    pub request_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            user_create: RetryPolicy::new(3, Duration::from_secs(30), Duration::from_secs(2)),
            replica_create: RetryPolicy::new(3, Duration::from_secs(60), Duration::from_secs(2)),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if the organization secret fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let host = parse_env("REPLICA_CHAT_HOST", "127.0.0.1")?;
        let port = parse_env("REPLICA_CHAT_PORT", "3000")?;
        let user_cache_path = PathBuf::from(get_env_or_default("USER_CACHE_PATH", "data/users.json"));

        Ok(Self {
            host,
            port,
            user_cache_path,
            cors_allow_origin: get_optional_env("CORS_ALLOW_ORIGIN"),
            upstream: UpstreamConfig::from_env()?,
            resilience: ResilienceConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl UpstreamConfig {
    /// Load only the upstream settings (used by the CLI).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL or secret is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let raw_url = get_required_env("UPSTREAM_API_URL")?;
        let base_url = Url::parse(&raw_url)
            .map_err(|e| ConfigError::InvalidEnvVar("UPSTREAM_API_URL".to_string(), e.to_string()))?;

        Ok(Self {
            base_url,
            org_secret: get_validated_secret("UPSTREAM_ORG_SECRET")?,
            api_version: get_env_or_default("UPSTREAM_API_VERSION", "2025-03-25"),
        })
    }
}

impl ResilienceConfig {
    /// Load retry and timeout settings, falling back to the defaults above.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value does not parse or `RETRY_MAX_ATTEMPTS` is 0.
    pub fn from_env() -> Result<Self, ConfigError> {
        let attempts: u32 = parse_env("RETRY_MAX_ATTEMPTS", "3")?;
        let backoff = Duration::from_millis(parse_env("RETRY_BACKOFF_MS", "2000")?);
        let user_timeout = Duration::from_secs(parse_env("USER_CREATE_TIMEOUT_SECS", "30")?);
        let replica_timeout = Duration::from_secs(parse_env("REPLICA_CREATE_TIMEOUT_SECS", "60")?);
        let request_timeout = Duration::from_secs(parse_env("CHAT_TIMEOUT_SECS", "30")?);

        if attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            user_create: RetryPolicy::new(attempts, user_timeout, backoff),
            replica_create: RetryPolicy::new(attempts, replica_timeout, backoff),
            request_timeout,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating empty as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the secret issued by the platform."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
