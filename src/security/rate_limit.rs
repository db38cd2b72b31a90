// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fixed-window rate limiting keyed by an opaque identifier (usually the
//! endpoint path).
//!
//! A key's window opens with its first request and closes wholesale at
//! `reset_time`. Window length and request budget are read from the live
//! configuration on every call. Stale records are not swept; they are
//! replaced the next time their key is used.

use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::error::SecurityError;
use crate::security::locks::resilient_lock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

pub struct RateLimiter {
    records: Mutex<HashMap<String, RateLimitRecord>>,
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: ConfigHandle, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    fn limits(&self) -> (chrono::Duration, u32) {
        self.config.read(|c| {
            let window = chrono::Duration::milliseconds(
                i64::try_from(c.rate_limit_window_ms).unwrap_or(i64::MAX / 1000),
            );
            (window, c.rate_limit_max_requests)
        })
    }

    /// Count a request for `id` and report whether it may proceed.
    pub fn is_allowed(&self, id: &str) -> bool {
        let (window, max_requests) = self.limits();
        let now = self.clock.now();
        let mut records = resilient_lock(&self.records);

        match records.get_mut(id) {
            Some(record) if now < record.reset_time => {
                if record.count >= max_requests {
                    return false;
                }
                record.count += 1;
                true
            }
            _ => {
                records.insert(
                    id.to_string(),
                    RateLimitRecord {
                        count: 1,
                        reset_time: now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC),
                    },
                );
                true
            }
        }
    }

    /// Like [`is_allowed`](Self::is_allowed), but a rejection carries the
    /// remaining quota and the time until the window resets.
    pub fn check(&self, id: &str) -> Result<(), SecurityError> {
        if self.is_allowed(id) {
            return Ok(());
        }
        let retry_after = self.time_until_reset(id).unwrap_or_default();
        tracing::warn!(
            target: "dashguard::rate_limit",
            key = %id,
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limit exceeded"
        );
        Err(SecurityError::RateLimitExceeded {
            key: id.to_string(),
            remaining: self.remaining_requests(id),
            retry_after,
        })
    }

    /// Requests left in the current window for `id`.
    pub fn remaining_requests(&self, id: &str) -> u32 {
        let (_, max_requests) = self.limits();
        let now = self.clock.now();
        match resilient_lock(&self.records).get(id) {
            Some(record) if now < record.reset_time => max_requests.saturating_sub(record.count),
            _ => max_requests,
        }
    }

    /// Time left until `id`'s window resets, if it has an open window.
    pub fn time_until_reset(&self, id: &str) -> Option<Duration> {
        let now = self.clock.now();
        let records = resilient_lock(&self.records);
        let record = records.get(id)?;
        (record.reset_time - now).to_std().ok()
    }

    pub fn record(&self, id: &str) -> Option<RateLimitRecord> {
        resilient_lock(&self.records).get(id).copied()
    }

    pub fn clear(&self, id: &str) {
        resilient_lock(&self.records).remove(id);
    }

    pub fn clear_all(&self) {
        resilient_lock(&self.records).clear();
    }

    pub fn tracked_keys(&self) -> usize {
        resilient_lock(&self.records).len()
    }
}
