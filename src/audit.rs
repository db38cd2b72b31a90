// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Audit event logging.
//!
//! Every security-relevant action on the dashboard (sign-in, token changes,
//! session timeouts, data access) becomes an [`AuditEvent`] that is POSTed to
//! the configured audit endpoint.
//!
//! Wire format (camelCase JSON):
//!
//! ```text
//! {"timestamp":"2025-01-15T10:23:45Z","userId":"jdoe","action":"LOGIN",
//!  "resource":"auth","success":true,"sessionId":"sess_9f..","userAgent":".."}
//! ```
//!
//! Delivery is best-effort. A failed POST is reported to the
//! [`SecureLogger`] and then forgotten: auditing never breaks the caller.

use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::context::{ContextHandle, ANONYMOUS_USER};
use crate::secure_log::{redact_value, SecureLogger};
use crate::security::locks::resilient_lock;
use crate::security::token_store::read_unexpired_token;
use crate::sink::{dispatch, EventSink, SinkRequest};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Number of events kept in memory for inspection.
const MAX_RECENT_EVENTS: usize = 1000;

/// A complete audit record. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: String,
    pub resource: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// An action as reported by the caller. Missing fields are filled in from
/// the client context when the event is logged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAction {
    pub action: String,
    pub resource: String,
    pub success: bool,
    pub details: Option<Value>,
    pub user_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl UserAction {
    pub fn new(action: impl Into<String>, resource: impl Into<String>, success: bool) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            success,
            ..Self::default()
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Security events raised by the layer itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityAction {
    TokenStored,
    TokenCleared,
    SessionStarted,
    SessionTimeout,
    SessionEnded,
    RateLimitExceeded,
    LoginLocked,
    CertificateMismatch,
    ConfigUpdated,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenStored => "TOKEN_STORED",
            Self::TokenCleared => "TOKEN_CLEARED",
            Self::SessionStarted => "SESSION_STARTED",
            Self::SessionTimeout => "SESSION_TIMEOUT",
            Self::SessionEnded => "SESSION_ENDED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::LoginLocked => "LOGIN_LOCKED",
            Self::CertificateMismatch => "CERTIFICATE_MISMATCH",
            Self::ConfigUpdated => "CONFIG_UPDATED",
        }
    }

    /// Whether the event records something being refused.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded | Self::LoginLocked | Self::CertificateMismatch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthAction {
    Login,
    LoginFailed,
    Logout,
    TokenRefresh,
}

impl AuthAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::Logout => "LOGOUT",
            Self::TokenRefresh => "TOKEN_REFRESH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataAction {
    Read,
    Create,
    Update,
    Delete,
}

impl DataAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "DATA_READ",
            Self::Create => "DATA_CREATE",
            Self::Update => "DATA_UPDATE",
            Self::Delete => "DATA_DELETE",
        }
    }
}

macro_rules! impl_display_via_as_str {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_via_as_str!(SecurityAction, AuthAction, DataAction);

/// Audit logger. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<AuditInner>,
}

struct AuditInner {
    sink: Arc<dyn EventSink>,
    config: ConfigHandle,
    context: ContextHandle,
    clock: Arc<dyn Clock>,
    secure_log: SecureLogger,
    /// Transient store the bearer token is read from.
    token_source: Arc<dyn KeyValueStore>,
    recent: Mutex<VecDeque<AuditEvent>>,
    enabled: AtomicBool,
}

impl AuditLogger {
    pub fn new(
        sink: Arc<dyn EventSink>,
        config: ConfigHandle,
        context: ContextHandle,
        clock: Arc<dyn Clock>,
        secure_log: SecureLogger,
        token_source: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            inner: Arc::new(AuditInner {
                sink,
                config,
                context,
                clock,
                secure_log,
                token_source,
                recent: Mutex::new(VecDeque::new()),
                enabled: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Complete `action` with context defaults and send it to the sink.
    ///
    /// Returns the event that was dispatched, or `None` when auditing is
    /// disabled.
    pub fn log_user_action(&self, action: UserAction) -> Option<AuditEvent> {
        if !self.is_enabled() {
            return None;
        }
        let event = self.complete(action);
        self.remember(&event);
        self.send(&event);
        Some(event)
    }

    pub fn log_security_event(&self, action: SecurityAction, details: Option<Value>) -> Option<AuditEvent> {
        let mut entry = UserAction::new(action.as_str(), "security", !action.is_rejection());
        entry.details = details;
        self.log_user_action(entry)
    }

    pub fn log_auth_event(
        &self,
        action: AuthAction,
        user_id: Option<&str>,
        success: bool,
        details: Option<Value>,
    ) -> Option<AuditEvent> {
        let mut entry = UserAction::new(action.as_str(), "auth", success);
        entry.user_id = user_id.map(String::from);
        entry.details = details;
        self.log_user_action(entry)
    }

    pub fn log_data_access(
        &self,
        action: DataAction,
        resource: &str,
        success: bool,
        details: Option<Value>,
    ) -> Option<AuditEvent> {
        let mut entry = UserAction::new(action.as_str(), resource, success);
        entry.details = details;
        self.log_user_action(entry)
    }

    /// Most recent events, oldest first.
    pub fn recent_events(&self) -> Vec<AuditEvent> {
        resilient_lock(&self.inner.recent).iter().cloned().collect()
    }

    /// Recent events with the given action name.
    pub fn events_with_action(&self, action: &str) -> Vec<AuditEvent> {
        resilient_lock(&self.inner.recent)
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }

    fn complete(&self, action: UserAction) -> AuditEvent {
        let ctx = self.inner.context.get();
        AuditEvent {
            timestamp: action.timestamp.unwrap_or_else(|| self.inner.clock.now()),
            user_id: action
                .user_id
                .or(ctx.user_id)
                .unwrap_or_else(|| ANONYMOUS_USER.to_string()),
            action: action.action,
            resource: action.resource,
            success: action.success,
            details: action.details.map(redact_value),
            session_id: action.session_id.unwrap_or(ctx.session_id),
            ip_address: action.ip_address.or(ctx.ip_address),
            user_agent: action.user_agent.or(Some(ctx.user_agent)),
        }
    }

    fn remember(&self, event: &AuditEvent) {
        tracing::debug!(
            target: "dashguard::audit",
            action = %event.action,
            resource = %event.resource,
            success = event.success,
            session = %event.session_id,
            "audit event"
        );
        let mut recent = resilient_lock(&self.inner.recent);
        recent.push_back(event.clone());
        if recent.len() > MAX_RECENT_EVENTS {
            recent.pop_front();
        }
    }

    fn send(&self, event: &AuditEvent) {
        let body = match serde_json::to_value(event) {
            Ok(body) => body,
            Err(e) => {
                self.inner
                    .secure_log
                    .error("Audit event could not be encoded", Some(json!({"error": e.to_string()})));
                return;
            }
        };
        let request = SinkRequest {
            endpoint: self.inner.config.read(|c| c.audit_endpoint.clone()),
            body,
            bearer: read_unexpired_token(self.inner.token_source.as_ref(), self.inner.clock.as_ref()),
        };

        let secure_log = self.inner.secure_log.clone();
        let action = event.action.clone();
        let dispatched = dispatch(&self.inner.sink, request, move |err| {
            secure_log.error(
                "Audit event delivery failed",
                Some(json!({"action": action, "error": err.to_string()})),
            );
        });
        if !dispatched {
            tracing::warn!(
                target: "dashguard::audit",
                action = %event.action,
                "no async runtime; audit event kept locally only"
            );
        }
    }
}
