//! HTTP plumbing shared by the vendor sources.
//!
//! `HttpClient` wraps `reqwest` with authentication, retries with exponential
//! backoff, `429` handling and optional client-side rate limiting.
//! `ResponseCache` keeps small lookups (folder ids, camera names) between
//! page fetches.

use crate::secure_string::SecureString;
use crate::traits::{AuthConfig, ConnectorConfig, ConnectorError, ConnectorResult};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use moka::future::Cache as MokaCache;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

type RateLimiterType = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Longest `Retry-After` the client sleeps through before giving up.
const MAX_RETRY_AFTER_SECS: u64 = 120;

/// HTTP client with retry, rate limiting and authentication.
pub struct HttpClient {
    client: Client,
    config: ConnectorConfig,
    oauth_token: Arc<RwLock<Option<OAuthToken>>>,
    rate_limiter: Option<Arc<RateLimiterType>>,
}

/// OAuth2 access token with its expiry.
#[derive(Clone)]
struct OAuthToken {
    access_token: SecureString,
    expires_at: std::time::Instant,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client-side rate limit.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per period.
    pub max_requests: u32,
    pub period: Duration,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            period: Duration::from_secs(60),
            burst_size: 10,
        }
    }
}

impl HttpClient {
    /// Creates a client without client-side rate limiting.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        Self::with_rate_limit(config, None)
    }

    /// Creates a client with an optional rate limit.
    pub fn with_rate_limit(
        config: ConnectorConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> ConnectorResult<Self> {
        if config.base_url.is_empty() {
            return Err(ConnectorError::ConfigError(format!(
                "{}: base_url is required",
                config.name
            )));
        }

        // TLS verification cannot be turned off in release builds.
        let verify_tls = if config.verify_tls {
            true
        } else if can_disable_tls_verification() {
            warn!(
                base_url = %config.base_url,
                source = %config.name,
                "TLS certificate verification disabled in development mode"
            );
            false
        } else {
            warn!(
                base_url = %config.base_url,
                source = %config.name,
                "Ignoring request to disable TLS verification in a release build"
            );
            true
        };

        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            match (
                reqwest::header::HeaderName::try_from(key.as_str()),
                reqwest::header::HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(header = %key, "Skipping invalid header"),
            }
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!verify_tls)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .default_headers(headers)
            .build()
            .map_err(|e| ConnectorError::ConfigError(e.to_string()))?;

        let rate_limiter = match rate_limit {
            Some(rl) => {
                let quota = Quota::with_period(rl.period / rl.max_requests.max(1))
                    .ok_or_else(|| {
                        ConnectorError::ConfigError("rate limit period must be non-zero".into())
                    })?
                    .allow_burst(NonZeroU32::new(rl.burst_size).unwrap_or(NonZeroU32::MIN));
                Some(Arc::new(GovernorRateLimiter::direct(quota)))
            }
            None => None,
        };

        Ok(Self {
            client,
            config,
            oauth_token: Arc::new(RwLock::new(None)),
            rate_limiter,
        })
    }

    /// Builds a URL from a path. Absolute URLs (e.g. pagination links) pass through.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Starts a request; finish it with [`HttpClient::send`].
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.build_url(path))
    }

    /// Executes a GET request with retry logic.
    pub async fn get(&self, path: &str) -> ConnectorResult<Response> {
        self.send(self.request(Method::GET, path)).await
    }

    /// Executes a GET request and deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ConnectorResult<T> {
        self.send_json(self.request(Method::GET, path)).await
    }

    /// Executes a GET request with query parameters and deserializes the JSON response.
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ConnectorResult<T> {
        self.send_json(self.request(Method::GET, path).query(query))
            .await
    }

    /// Executes a POST request with a JSON body and deserializes the JSON response.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> ConnectorResult<R> {
        self.send_json(self.request(Method::POST, path).json(body))
            .await
    }

    /// Sends a prepared request with authentication, rate limiting and retries.
    pub async fn send(&self, request: RequestBuilder) -> ConnectorResult<Response> {
        self.execute_with_retry(request).await
    }

    /// Sends a prepared request and deserializes the JSON response.
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ConnectorResult<T> {
        let response = self.execute_with_retry(request).await?;
        parse_json_response(response).await
    }

    async fn execute_with_retry(&self, request: RequestBuilder) -> ConnectorResult<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let request = self.add_auth(request).await?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(100);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                debug!(attempt, ?delay, "Retrying request");
                sleep(delay).await;
                delay = std::cmp::min(delay * 2 + rand_jitter(), Duration::from_secs(30));
            }

            let attempt_request = request
                .try_clone()
                .ok_or_else(|| ConnectorError::Internal("Failed to clone request".to_string()))?;

            let response = match attempt_request.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(transport_error(e));
                    continue;
                }
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = retry_after_secs(&response);
                if attempt < self.config.max_retries && retry_after <= MAX_RETRY_AFTER_SECS {
                    warn!(retry_after, "Rate limited, waiting");
                    sleep(Duration::from_secs(retry_after)).await;
                    last_error = Some(ConnectorError::RateLimited(retry_after));
                    continue;
                }
                return Err(ConnectorError::RateLimited(retry_after));
            }

            if status.is_server_error() {
                warn!(%status, attempt, "Server error");
                last_error = Some(ConnectorError::RequestFailed(format!(
                    "Server error: {}",
                    status
                )));
                continue;
            }

            if status.is_client_error() {
                return Err(client_error(response).await);
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| ConnectorError::Internal("Unknown error".to_string())))
    }

    async fn add_auth(&self, request: RequestBuilder) -> ConnectorResult<RequestBuilder> {
        match &self.config.auth {
            AuthConfig::None => Ok(request),

            AuthConfig::ApiKey { key, header_name } => {
                Ok(request.header(header_name.as_str(), key.expose_secret()))
            }

            AuthConfig::QueryParam { name, value } => {
                Ok(request.query(&[(name.as_str(), value.expose_secret())]))
            }

            AuthConfig::BearerToken { token } => Ok(request.bearer_auth(token.expose_secret())),

            AuthConfig::Basic { username, password } => {
                Ok(request.basic_auth(username, Some(password.expose_secret())))
            }

            AuthConfig::OAuth2 {
                client_id,
                client_secret,
                token_url,
                scopes,
            } => {
                let token = self
                    .get_oauth_token(client_id, client_secret, token_url, scopes)
                    .await?;
                Ok(request.bearer_auth(token.expose_secret()))
            }
        }
    }

    /// Returns a cached OAuth2 token, fetching a new one when it is about to expire.
    async fn get_oauth_token(
        &self,
        client_id: &str,
        client_secret: &SecureString,
        token_url: &str,
        scopes: &[String],
    ) -> ConnectorResult<SecureString> {
        {
            let token = self.oauth_token.read().await;
            if let Some(t) = &*token {
                if t.expires_at > std::time::Instant::now() + Duration::from_secs(60) {
                    return Ok(t.access_token.clone());
                }
            }
        }

        info!(source = %self.config.name, "Fetching new OAuth2 token");

        let scope = scopes.join(" ");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret.expose_secret()),
            ("scope", scope.as_str()),
        ];

        let response = self
            .client
            .post(token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ConnectorError::AuthenticationFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::AuthenticationFailed(format!(
                "OAuth2 token request failed: {}",
                response.status()
            )));
        }

        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default = "default_expires_in")]
            expires_in: u64,
        }

        fn default_expires_in() -> u64 {
            3600
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        let access_token = SecureString::new(token_response.access_token);
        *self.oauth_token.write().await = Some(OAuthToken {
            access_token: access_token.clone(),
            expires_at: std::time::Instant::now() + Duration::from_secs(token_response.expires_in),
        });

        Ok(access_token)
    }
}

/// Parses a JSON response body, keeping a snippet of the body on failure.
async fn parse_json_response<T: DeserializeOwned>(response: Response) -> ConnectorResult<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

    serde_json::from_str(&text).map_err(|e| {
        ConnectorError::InvalidResponse(format!(
            "Failed to parse response (status {}): {} - Body: {}",
            status,
            e,
            text.chars().take(500).collect::<String>()
        ))
    })
}

fn transport_error(e: reqwest::Error) -> ConnectorError {
    if e.is_timeout() {
        ConnectorError::Timeout(e.to_string())
    } else if e.is_connect() {
        ConnectorError::ConnectionFailed(e.to_string())
    } else {
        ConnectorError::RequestFailed(e.to_string())
    }
}

async fn client_error(response: Response) -> ConnectorError {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED => ConnectorError::AuthenticationFailed("Unauthorized".into()),
        StatusCode::FORBIDDEN => ConnectorError::AuthorizationDenied("Forbidden".into()),
        StatusCode::NOT_FOUND => ConnectorError::NotFound("Resource not found".into()),
        _ => {
            let body = response.text().await.unwrap_or_default();
            ConnectorError::RequestFailed(format!(
                "Client error {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            ))
        }
    }
}

fn retry_after_secs(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(60)
}

/// Small jitter for exponential backoff.
fn rand_jitter() -> Duration {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::time::Instant::now().hash(&mut hasher);
    Duration::from_millis(hasher.finish() % 100)
}

/// Whether TLS verification may be disabled. Always false in release builds.
#[inline]
pub fn can_disable_tls_verification() -> bool {
    cfg!(debug_assertions)
}

/// Async cache for small vendor lookups.
pub struct ResponseCache<V: Clone + Send + Sync + 'static> {
    cache: MokaCache<String, V>,
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Creates a cache with the given TTL and capacity.
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .time_to_live(ttl)
            .max_capacity(max_capacity)
            .build();
        Self { cache }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: String, value: V) {
        self.cache.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Returns the cached value or computes it with a fallible async function.
    /// Failures are not cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: String, f: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(v) = self.cache.get(&key).await {
            return Ok(v);
        }
        let value = f().await?;
        self.cache.insert(key, value.clone()).await;
        Ok(value)
    }
}
