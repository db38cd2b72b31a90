// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Best-effort delivery of audit events and log entries.
//!
//! Delivery is fire-and-forget: [`dispatch`] hands the payload to the sink
//! and spawns the resulting future. Callers never observe the outcome;
//! failures go to the `on_failure` callback and nowhere else. There is no
//! batching, no retry and no ordering guarantee between deliveries.

use crate::error::{SecurityError, SinkError};
use crate::security::locks::resilient_lock;
use futures_util::future::{self, BoxFuture, FutureExt};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Timeout for a single sink POST.
const SINK_TIMEOUT_SECS: u64 = 10;

/// One payload bound for a remote collection endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SinkRequest {
    /// Endpoint path (`/api/audit`) or absolute URL.
    pub endpoint: String,
    pub body: serde_json::Value,
    /// Sent as `Authorization: Bearer <token>` when present.
    #[serde(skip_serializing)]
    pub bearer: Option<String>,
}

/// A remote endpoint accepting JSON payloads.
///
/// The returned future must be `'static` so it can be spawned detached.
pub trait EventSink: Send + Sync {
    fn deliver(&self, request: SinkRequest) -> BoxFuture<'static, Result<(), SinkError>>;
}

/// POSTs payloads to `base_url` joined with the request endpoint.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSink {
    pub fn new(base_url: &str) -> Result<Self, SecurityError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SecurityError::Config(format!("invalid sink base URL '{}': {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SINK_TIMEOUT_SECS))
            .build()
            .map_err(|e| SecurityError::Network(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    pub fn resolve(&self, endpoint: &str) -> Result<Url, SinkError> {
        self.base_url.join(endpoint).map_err(|e| SinkError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

impl EventSink for HttpSink {
    fn deliver(&self, request: SinkRequest) -> BoxFuture<'static, Result<(), SinkError>> {
        let url = match self.resolve(&request.endpoint) {
            Ok(url) => url,
            Err(e) => return future::ready(Err(e)).boxed(),
        };
        let client = self.client.clone();

        async move {
            let mut builder = client.post(url).json(&request.body);
            if let Some(token) = request.bearer.as_deref() {
                builder = builder.bearer_auth(token);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| SinkError::Transport(e.to_string()))?;
            // Response body is ignored.
            if !response.status().is_success() {
                return Err(SinkError::Rejected(response.status().as_u16()));
            }
            Ok(())
        }
        .boxed()
    }
}

/// Discards everything. Used when no collection endpoint is configured and
/// in tests that do not care about delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn deliver(&self, _request: SinkRequest) -> BoxFuture<'static, Result<(), SinkError>> {
        future::ready(Ok(())).boxed()
    }
}

/// Keeps every delivered payload in memory, in delivery order.
#[derive(Debug, Default)]
pub struct MemorySink {
    requests: Mutex<Vec<SinkRequest>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<SinkRequest> {
        resilient_lock(&self.requests).clone()
    }

    /// Bodies delivered to `endpoint`.
    pub fn bodies_for(&self, endpoint: &str) -> Vec<serde_json::Value> {
        resilient_lock(&self.requests)
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .map(|r| r.body.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        resilient_lock(&self.requests).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn deliver(&self, request: SinkRequest) -> BoxFuture<'static, Result<(), SinkError>> {
        resilient_lock(&self.requests).push(request);
        future::ready(Ok(())).boxed()
    }
}

/// Start delivery of `request` on the current tokio runtime.
///
/// Returns `false` (and delivers nothing) when called outside a runtime.
pub fn dispatch<F>(sink: &Arc<dyn EventSink>, request: SinkRequest, on_failure: F) -> bool
where
    F: FnOnce(SinkError) + Send + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return false;
    };
    // Build the future before spawning so dispatch order matches call order.
    let delivery = sink.deliver(request);
    runtime.spawn(async move {
        if let Err(e) = delivery.await {
            on_failure(e);
        }
    });
    true
}
