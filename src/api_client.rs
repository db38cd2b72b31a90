// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Dashboard API client.
//!
//! Every request goes through the same gate:
//!
//! 1. The rate limiter is consulted with the request path as key. A
//!    rejection returns `RateLimitExceeded` before anything touches the
//!    network.
//! 2. The stored access token, if still valid, is attached as a bearer token.
//! 3. Network errors, 429 and 5xx responses are retried with exponential
//!    backoff. A 401 clears the token store and returns
//!    `AuthenticationRequired` without retrying.
//! 4. The outcome is recorded as a data access audit event.
//!
//! Successful GET responses are cached per method and path (query string
//! included) for `api_cache_ttl_ms`. A cache hit skips the rate limiter and
//! the network but is still audited.
//!
//! # Example
//!
//! ```no_run
//! # async fn example(manager: &dashguard::SecurityManager) -> Result<(), dashguard::SecurityError> {
//! use dashguard::ApiClient;
//!
//! let client = ApiClient::new(manager)?;
//! let inventory: serde_json::Value = client.get("/api/inventory").await?;
//! # Ok(())
//! # }
//! ```

use crate::audit::{AuditLogger, DataAction, SecurityAction};
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::error::SecurityError;
use crate::manager::SecurityManager;
use crate::secure_log::SecureLogger;
use crate::security::locks::resilient_lock;
use crate::security::{RateLimiter, SecureTokenStore};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

/// Attempts per request, including the first.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Maximum delay for exponential backoff (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 10_000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Path requested by [`ApiClient::test_connection`].
pub const HEALTH_PATH: &str = "/api/health";

/// Delay before retry number `attempt` (1-based): 500ms, 1s, 2s, ... capped at 10s.
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    Duration::from_millis(RETRY_BASE_DELAY_MS.saturating_mul(factor).min(RETRY_MAX_DELAY_MS))
}

/// Audit action recorded for a request method.
pub fn data_action_for(method: &Method) -> DataAction {
    if method == Method::POST {
        DataAction::Create
    } else if method == Method::PUT || method == Method::PATCH {
        DataAction::Update
    } else if method == Method::DELETE {
        DataAction::Delete
    } else {
        DataAction::Read
    }
}

fn cache_key(method: &Method, path: &str) -> String {
    format!("{} {}", method, path)
}

#[derive(Debug, Clone)]
struct CachedResponse {
    body: Value,
    stored_at: DateTime<Utc>,
}

/// Result of [`ApiClient::test_connection`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub ok: bool,
    pub message: String,
    pub checked_at: DateTime<Utc>,
}

/// Clones share the response cache.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    timeout: Duration,
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    cache: Arc<Mutex<HashMap<String, CachedResponse>>>,
    limiter: Arc<RateLimiter>,
    tokens: SecureTokenStore,
    audit: AuditLogger,
    logger: SecureLogger,
}

impl ApiClient {
    /// Client against the manager's configured `api_base_url`.
    pub fn new(manager: &SecurityManager) -> Result<Self, SecurityError> {
        let raw = manager.config().api_base_url;
        let base_url = Url::parse(&raw)
            .map_err(|e| SecurityError::Config(format!("invalid API base URL '{}': {}", raw, e)))?;
        let client = reqwest::Client::builder()
            .user_agent(crate::context::DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| SecurityError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            timeout: DEFAULT_TIMEOUT,
            config: manager.config_handle().clone(),
            clock: manager.clock().clone(),
            cache: Arc::new(Mutex::new(HashMap::new())),
            limiter: manager.rate_limiter().clone(),
            tokens: manager.tokens().clone(),
            audit: manager.audit().clone(),
            logger: manager.logger().clone(),
        })
    }

    /// Per-attempt timeout (default 30s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, SecurityError> {
        self.base_url
            .join(path)
            .map_err(|e| SecurityError::Config(format!("invalid API path '{}': {}", path, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SecurityError> {
        let key = cache_key(&Method::GET, path);
        if let Some(body) = self.cached(&key) {
            tracing::debug!(target: "dashguard::api", path, "serving cached response");
            self.audit
                .log_data_access(DataAction::Read, path, true, Some(json!({ "cached": true })));
            return from_body(body);
        }

        let response = self.execute(Method::GET, path, None).await?;
        let body: Value = decode(response).await?;
        self.remember(key, &body);
        from_body(body)
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, SecurityError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        let response = self.execute(Method::POST, path, Some(body)).await?;
        decode(response).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, SecurityError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        let response = self.execute(Method::PUT, path, Some(body)).await?;
        decode(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), SecurityError> {
        self.execute(Method::DELETE, path, None).await.map(|_| ())
    }

    /// Drop every cached response. Returns how many were dropped.
    pub fn clear_cache(&self) -> usize {
        let mut cache = resilient_lock(&self.cache);
        let dropped = cache.len();
        cache.clear();
        tracing::info!(target: "dashguard::api", dropped, "response cache cleared");
        dropped
    }

    /// Request [`HEALTH_PATH`], bypassing the cache. Never fails; the outcome
    /// is in the returned status.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let checked_at = self.clock.now();
        match self.execute(Method::GET, HEALTH_PATH, None).await {
            Ok(_) => ConnectionStatus {
                ok: true,
                message: "Connection successful".to_string(),
                checked_at,
            },
            Err(e) => {
                tracing::warn!(target: "dashguard::api", error = %e, "connection test failed");
                ConnectionStatus {
                    ok: false,
                    message: e.to_string(),
                    checked_at,
                }
            }
        }
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let ttl = self.config.read(|c| c.api_cache_ttl());
        let now = self.clock.now();
        let mut cache = resilient_lock(&self.cache);
        let entry = cache.get(key)?;
        let fresh = (now - entry.stored_at).to_std().is_ok_and(|age| age < ttl);
        if fresh {
            return Some(entry.body.clone());
        }
        cache.remove(key);
        None
    }

    fn remember(&self, key: String, body: &Value) {
        if self.config.read(|c| c.api_cache_ttl_ms) == 0 {
            return;
        }
        let entry = CachedResponse {
            body: body.clone(),
            stored_at: self.clock.now(),
        };
        resilient_lock(&self.cache).insert(key, entry);
    }

    async fn execute(&self, method: Method, path: &str, body: Option<Value>) -> Result<reqwest::Response, SecurityError> {
        let action = data_action_for(&method);

        if let Err(e) = self.limiter.check(path) {
            self.audit.log_security_event(
                SecurityAction::RateLimitExceeded,
                Some(json!({
                    "key": path,
                    "retryAfterMs": e.retry_after().map(|d| d.as_millis() as u64),
                })),
            );
            return Err(e);
        }

        let url = self.endpoint(path)?;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                tracing::debug!(
                    target: "dashguard::api",
                    path,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );
                sleep(delay).await;
            }

            let mut request = self.client.request(method.clone(), url.clone()).timeout(self.timeout);
            if let Some(token) = self.tokens.get_token() {
                request = request.bearer_auth(token);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(network_error(&e));
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.tokens.clear_token();
                self.audit
                    .log_data_access(action, path, false, Some(json!({ "status": status.as_u16() })));
                return Err(SecurityError::AuthenticationRequired);
            }
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = Some(SecurityError::Status(status.as_u16()));
                continue;
            }
            if !status.is_success() {
                self.audit
                    .log_data_access(action, path, false, Some(json!({ "status": status.as_u16() })));
                return Err(SecurityError::Status(status.as_u16()));
            }

            self.audit.log_data_access(
                action,
                path,
                true,
                Some(json!({ "status": status.as_u16(), "attempts": attempt + 1 })),
            );
            return Ok(response);
        }

        let err = last_error.unwrap_or_else(|| SecurityError::Network("max retries exceeded".to_string()));
        self.audit
            .log_data_access(action, path, false, Some(json!({ "error": err.to_string() })));
        self.logger.warn(
            "API request failed after retries",
            Some(json!({ "path": path, "error": err.to_string() })),
        );
        Err(err)
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, SecurityError> {
    serde_json::to_value(body).map_err(|e| SecurityError::Config(format!("unserializable request body: {}", e)))
}

fn from_body<T: DeserializeOwned>(body: Value) -> Result<T, SecurityError> {
    serde_json::from_value(body).map_err(|e| SecurityError::Network(format!("invalid response body: {}", e)))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SecurityError> {
    response
        .json::<T>()
        .await
        .map_err(|e| SecurityError::Network(format!("invalid response body: {}", e)))
}

fn network_error(e: &reqwest::Error) -> SecurityError {
    if e.is_timeout() {
        SecurityError::Network("request timed out".to_string())
    } else if e.is_connect() {
        SecurityError::Network(format!("failed to connect: {}", e))
    } else {
        SecurityError::Network(e.to_string())
    }
}
