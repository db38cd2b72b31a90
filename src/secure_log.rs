// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Redacting application logger.
//!
//! Every message and every nested data value passes through the sensitive
//! keyword patterns before it leaves the process. An object key that matches
//! a pattern replaces the whole value, without looking inside it.
//!
//! In development mode entries are mirrored to the `tracing` console only.
//! Otherwise they are POSTed to the configured log endpoint, and delivery
//! failures are dropped silently so a broken endpoint cannot start a loop of
//! "failed to log the failure" entries.

use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::context::ContextHandle;
use crate::sink::{dispatch, EventSink, SinkRequest};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

pub const REDACTED: &str = "[REDACTED]";

/// Sensitive keyword patterns. The numbered-secret pattern must run before
/// the bare `secret` pattern so `secret99` is replaced as one token.
static SENSITIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bsecret\d+\b").expect("numbered secret regex is valid"),
        Regex::new(r"(?i)password").expect("password regex is valid"),
        Regex::new(r"(?i)token").expect("token regex is valid"),
        Regex::new(r"(?i)secret").expect("secret regex is valid"),
        Regex::new(r"(?i)key").expect("key regex is valid"),
        Regex::new(r"(?i)credential").expect("credential regex is valid"),
    ]
});

/// Replace every sensitive keyword in `text` with `[REDACTED]`.
pub fn redact_text(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        result = pattern.replace_all(&result, REDACTED).into_owned();
    }
    result
}

pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_PATTERNS.iter().any(|p| p.is_match(key))
}

/// Redact a JSON value recursively.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_key(&k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value(v)
                    };
                    (k, v)
                })
                .collect(),
        ),
        other => other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
}

/// Wire format of the log endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub session_id: String,
    pub user_agent: String,
    pub url: String,
}

#[derive(Clone)]
pub struct SecureLogger {
    sink: Arc<dyn EventSink>,
    config: ConfigHandle,
    context: ContextHandle,
    clock: Arc<dyn Clock>,
}

impl SecureLogger {
    pub fn new(
        sink: Arc<dyn EventSink>,
        config: ConfigHandle,
        context: ContextHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sink,
            config,
            context,
            clock,
        }
    }

    pub fn error(&self, message: &str, data: Option<Value>) {
        self.emit(LogLevel::Error, message, data);
    }

    pub fn warn(&self, message: &str, data: Option<Value>) {
        self.emit(LogLevel::Warn, message, data);
    }

    pub fn info(&self, message: &str, data: Option<Value>) {
        self.emit(LogLevel::Info, message, data);
    }

    /// Build the redacted entry for `message`/`data`.
    pub fn entry(&self, level: LogLevel, message: &str, data: Option<Value>) -> LogEntry {
        let ctx = self.context.get();
        LogEntry {
            timestamp: self.clock.now(),
            level,
            message: redact_text(message),
            data: data.map(redact_value).unwrap_or(Value::Null),
            user_id: ctx.user_id,
            session_id: ctx.session_id,
            user_agent: ctx.user_agent,
            url: ctx.url,
        }
    }

    fn emit(&self, level: LogLevel, message: &str, data: Option<Value>) {
        let entry = self.entry(level, message, data);
        let (development, endpoint) = self
            .config
            .read(|c| (c.mode.is_development(), c.log_endpoint.clone()));

        if development {
            mirror_to_console(&entry);
            return;
        }

        let body = match serde_json::to_value(&entry) {
            Ok(body) => body,
            Err(_) => return,
        };
        let request = SinkRequest {
            endpoint,
            body,
            bearer: None,
        };
        // Failures are dropped; reporting them would log again.
        dispatch(&self.sink, request, |_| {});
    }
}

fn mirror_to_console(entry: &LogEntry) {
    let data = if entry.data.is_null() {
        String::new()
    } else {
        entry.data.to_string()
    };
    match entry.level {
        LogLevel::Error => {
            tracing::error!(target: "dashguard::secure_log", data = %data, "{}", entry.message)
        }
        LogLevel::Warn => {
            tracing::warn!(target: "dashguard::secure_log", data = %data, "{}", entry.message)
        }
        LogLevel::Info => {
            tracing::info!(target: "dashguard::secure_log", data = %data, "{}", entry.message)
        }
    }
}
