//! HTTP request executor
//!
//! Runs one logical request through the full rate limit pipeline: resolve the
//! route's bucket, acquire it, acquire the global limiter (nested inside the
//! bucket hold, since both windows gate the same physical call), perform the
//! transport call, feed the response headers back into the bucket, and loop
//! on 429 up to a bounded retry budget. Every attempt is dispatched on the
//! response observability channel before error mapping, so instrumentation
//! sees retried attempts too.

use std::sync::Arc;
use std::time::Duration;

use chat_common::{AuthToken, ClientConfig, RetryPolicy};
use chat_core::{EventDispatcher, Snowflake};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ApiErrorBody, HttpError};
use crate::ratelimit::{
    FixedGlobalLimiter, GlobalLimiter, RatelimitHeaders, RatelimitStorage, UnlimitedGlobalLimiter,
};
use crate::routes::Route;

/// Event name used for response observability dispatches
pub const RESPONSE_EVENT: &str = "http_response";

/// One logical API request
#[derive(Debug, Clone)]
pub struct Request {
    /// Target route
    pub route: Route,
    /// JSON body, if any
    pub body: Option<Value>,
    /// Extra headers merged over the client defaults
    pub headers: HeaderMap,
    /// Queue priority; lower is served first
    pub priority: u32,
    /// Whether to wait for rate limit quota or fail fast
    pub wait: bool,
}

impl Request {
    /// Create a request for a route with default settings
    #[must_use]
    pub fn new(route: Route) -> Self {
        Self {
            route,
            body: None,
            headers: HeaderMap::new(),
            priority: 0,
            wait: true,
        }
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set the queue priority (lower served first)
    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Fail immediately instead of queueing when rate limited
    #[must_use]
    pub fn no_wait(mut self) -> Self {
        self.wait = false;
        self
    }
}

/// A decoded-enough API response
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Raw response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Observability record emitted for every request attempt
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    /// Route template the request targeted
    pub route: String,
    /// HTTP method
    pub method: String,
    /// Response status code
    pub status: u16,
    /// Zero-based attempt number within the retry loop
    pub attempt: u32,
    /// Whether the executor will retry this attempt
    pub will_retry: bool,
}

/// `/gateway/bot` response
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotInfo {
    /// Gateway websocket URL
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    /// Session start budget
    pub session_start_limit: SessionStartLimit,
}

/// IDENTIFY budget reported by `/gateway/bot`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Total session starts per window
    pub total: u32,
    /// Session starts left in the window
    pub remaining: u32,
    /// Milliseconds until the window resets
    pub reset_after: u64,
    /// Concurrent IDENTIFY groups
    pub max_concurrency: u32,
}

/// Builder for [`HttpClient`]
pub struct HttpClientBuilder {
    token: AuthToken,
    base_url: String,
    request_timeout: Duration,
    max_retries: u32,
    user_agent: String,
    global_limit: Option<u32>,
    sweep_interval: Duration,
}

impl HttpClientBuilder {
    /// Start a builder from a credential
    #[must_use]
    pub fn new(token: AuthToken) -> Self {
        Self {
            token,
            base_url: "http://127.0.0.1:8080/api/v1".to_string(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            user_agent: concat!("chat-client/", env!("CARGO_PKG_VERSION")).to_string(),
            global_limit: None,
            sweep_interval: Duration::from_secs(30),
        }
    }

    /// Set the API base URL
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-request transport timeout
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the 429 retry budget
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set a fixed global requests-per-second limit
    ///
    /// Without one the unlimited strategy is used: no fixed cap, only the
    /// lockout window a global 429 opens.
    #[must_use]
    pub fn global_limit(mut self, limit: u32) -> Self {
        self.global_limit = Some(limit);
        self
    }

    /// Set the idle bucket sweep interval
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the client
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let mut default_headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.token.header_value()) {
            default_headers.insert(AUTHORIZATION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.user_agent) {
            default_headers.insert(USER_AGENT, value);
        }

        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .default_headers(default_headers)
            .build()?;

        let global: Arc<dyn GlobalLimiter> = match self.global_limit {
            Some(limit) => Arc::new(FixedGlobalLimiter::new(limit)),
            None => Arc::new(UnlimitedGlobalLimiter::new()),
        };
        let storage = RatelimitStorage::new(global);
        storage.start_sweeper(self.sweep_interval);

        Ok(HttpClient {
            http,
            base_url: self.base_url,
            storage,
            responses: EventDispatcher::new(),
            max_retries: self.max_retries,
            transport_retry: RetryPolicy::http_default(),
        })
    }
}

/// REST client with full rate limit compliance
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    storage: Arc<RatelimitStorage>,
    responses: EventDispatcher<ResponseEvent>,
    max_retries: u32,
    transport_retry: RetryPolicy,
}

impl HttpClient {
    /// Create a client with default settings
    pub fn new(token: AuthToken) -> Result<Self, HttpError> {
        HttpClientBuilder::new(token).build()
    }

    /// Create a client from a [`ClientConfig`]
    pub fn from_config(config: &ClientConfig) -> Result<Self, HttpError> {
        let mut builder = HttpClientBuilder::new(AuthToken::bot(config.token.clone()))
            .base_url(config.api.base_url.clone())
            .request_timeout(Duration::from_secs(config.api.request_timeout_secs))
            .max_retries(config.api.max_retries)
            .sweep_interval(Duration::from_secs(config.ratelimit.sweep_interval_secs));
        if let Some(limit) = config.ratelimit.global_limit {
            builder = builder.global_limit(limit);
        }
        builder.build()
    }

    /// Per-attempt response observability channel
    #[must_use]
    pub fn responses(&self) -> &EventDispatcher<ResponseEvent> {
        &self.responses
    }

    /// The client's rate limit storage
    #[must_use]
    pub fn ratelimits(&self) -> &Arc<RatelimitStorage> {
        &self.storage
    }

    /// Execute one logical request with rate limit compliance and bounded
    /// 429 retries
    pub async fn request(&self, request: Request) -> Result<HttpResponse, HttpError> {
        let url = format!("{}{}", self.base_url, request.route.path);
        let mut attempt: u32 = 0;

        loop {
            if self.storage.is_closed() {
                return Err(HttpError::Closed);
            }
            let bucket = self.storage.bucket_for(&request.route);
            let admission = bucket.acquire(request.priority, request.wait).await?;
            if !request.route.global_exempt {
                // The bucket slot stays held while globally throttled: both
                // windows gate the same physical call.
                self.storage
                    .global()
                    .acquire(request.priority, request.wait)
                    .await?;
            }

            let response = self.send_raw(&request, &url).await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let limits = RatelimitHeaders::parse(&headers);
            let body = response.bytes().await?.to_vec();

            // Header feedback happens regardless of status
            if limits.has_ratelimit_info() {
                if let Some(limit) = limits.limit {
                    bucket.metadata().set_limit(limit);
                }
                admission.update(
                    limits.remaining.unwrap_or(0),
                    limits.reset_after.unwrap_or_default(),
                );
                if let Some(hash) = &limits.bucket {
                    self.storage.link(&request.route, hash, &bucket);
                }
            } else if status < 300 {
                // A successful response with no rate limit headers marks the
                // route unlimited; an error without headers proves nothing
                admission.update_unlimited();
            } else {
                drop(admission);
            }

            let will_retry = status == 429 && attempt < self.max_retries;
            self.responses.dispatch(
                RESPONSE_EVENT,
                ResponseEvent {
                    route: request.route.template.to_string(),
                    method: request.route.method.to_string(),
                    status,
                    attempt,
                    will_retry,
                },
            );

            match status {
                status if status < 300 => {
                    return Ok(HttpResponse {
                        status,
                        headers,
                        body,
                    })
                }
                429 => {
                    let retry_after = limits
                        .retry_after
                        .or(limits.reset_after)
                        .unwrap_or(Duration::from_secs(1));
                    let global = limits.is_global_scope() || body_says_global(&body);
                    if global {
                        self.storage.global().update(retry_after);
                    } else {
                        tracing::warn!(
                            route = request.route.template,
                            scope = limits.scope.as_deref().unwrap_or("user"),
                            retry_after_ms = retry_after.as_millis(),
                            attempt,
                            "Scoped rate limit hit"
                        );
                        if !limits.has_ratelimit_info() {
                            // No bucket state to pace the retry; back off here
                            tokio::time::sleep(retry_after).await;
                        }
                    }
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(HttpError::RatelimitExhausted {
                            route: request.route.template.to_string(),
                            attempts: attempt,
                        });
                    }
                }
                status @ (400 | 401 | 403 | 404) => {
                    return Err(HttpError::Api {
                        status,
                        body: decode_error_body(&body),
                    })
                }
                status if status >= 500 => {
                    return Err(HttpError::Api {
                        status,
                        body: decode_error_body(&body),
                    })
                }
                other => return Err(HttpError::UnexpectedStatus(other)),
            }
        }
    }

    /// Transport call with backoff on transient connection failures
    async fn send_raw(&self, request: &Request, url: &str) -> Result<reqwest::Response, HttpError> {
        let mut attempt: u32 = 0;
        loop {
            let mut builder = self
                .http
                .request(request.route.method.clone(), url)
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }
            match builder.send().await {
                Ok(response) => return Ok(response),
                Err(error)
                    if (error.is_connect() || error.is_timeout())
                        && self.transport_retry.allows_attempt(attempt) =>
                {
                    let delay = self.transport_retry.backoff_delay(attempt);
                    tracing::debug!(
                        route = request.route.template,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "Transient transport failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(HttpError::Transport(error)),
            }
        }
    }

    // === Typed endpoint wrappers ===

    /// Fetch the gateway URL and shard recommendation
    pub async fn get_gateway_bot(&self) -> Result<GatewayBotInfo, HttpError> {
        self.request(Request::new(Route::get_gateway_bot()))
            .await?
            .json()
    }

    /// Fetch the authenticated user
    pub async fn get_current_user<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        self.request(Request::new(Route::get_current_user()))
            .await?
            .json()
    }

    /// Fetch a channel
    pub async fn get_channel<T: DeserializeOwned>(
        &self,
        channel_id: Snowflake,
    ) -> Result<T, HttpError> {
        self.request(Request::new(Route::get_channel(channel_id)))
            .await?
            .json()
    }

    /// Post a message to a channel
    pub async fn create_message<T: DeserializeOwned>(
        &self,
        channel_id: Snowflake,
        body: Value,
    ) -> Result<T, HttpError> {
        self.request(Request::new(Route::create_message(channel_id)).with_body(body))
            .await?
            .json()
    }

    /// Delete a message
    pub async fn delete_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
    ) -> Result<(), HttpError> {
        self.request(Request::new(Route::delete_message(channel_id, message_id)))
            .await
            .map(|_| ())
    }

    /// Fetch a guild
    pub async fn get_guild<T: DeserializeOwned>(&self, guild_id: Snowflake) -> Result<T, HttpError> {
        self.request(Request::new(Route::get_guild(guild_id)))
            .await?
            .json()
    }

    /// Respond to an interaction (bypasses the global limiter)
    pub async fn create_interaction_response(
        &self,
        interaction_id: Snowflake,
        token: &str,
        body: Value,
    ) -> Result<(), HttpError> {
        self.request(
            Request::new(Route::create_interaction_response(interaction_id, token))
                .with_body(body),
        )
        .await
        .map(|_| ())
    }

    /// Close the client: rate limit storage, buckets, and observability
    pub fn close(&self) {
        self.storage.close();
        self.responses.close();
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("storage", &self.storage)
            .finish()
    }
}

fn body_says_global(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| value.get("global").and_then(Value::as_bool))
        .unwrap_or(false)
}

fn decode_error_body(body: &[u8]) -> ApiErrorBody {
    serde_json::from_slice(body).unwrap_or_default()
}
