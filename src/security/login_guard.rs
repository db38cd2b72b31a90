// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Failed sign-in tracking.
//!
//! After `max_login_attempts` consecutive failures a user is locked out for
//! [`LOGIN_LOCKOUT`]. A successful sign-in clears the record.

use crate::audit::{AuditLogger, SecurityAction};
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::error::SecurityError;
use crate::security::locks::resilient_lock;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Lockout applied once the attempt budget is spent: 15 minutes.
pub const LOGIN_LOCKOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoginAttemptRecord {
    pub failures: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

pub struct LoginGuard {
    attempts: Mutex<HashMap<String, LoginAttemptRecord>>,
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
}

impl LoginGuard {
    pub fn new(config: ConfigHandle, clock: Arc<dyn Clock>, audit: AuditLogger) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            config,
            clock,
            audit,
        }
    }

    /// Fail with `LoginLocked` if `user` may not attempt to sign in now.
    pub fn ensure_unlocked(&self, user: &str) -> Result<(), SecurityError> {
        match self.lock_remaining(user) {
            Some(retry_after) => Err(SecurityError::LoginLocked {
                user: user.to_string(),
                retry_after,
            }),
            None => Ok(()),
        }
    }

    pub fn is_locked(&self, user: &str) -> bool {
        self.lock_remaining(user).is_some()
    }

    /// Record a failed attempt. Returns the failure count, or `LoginLocked`
    /// once the budget is exhausted.
    pub fn record_failure(&self, user: &str) -> Result<u32, SecurityError> {
        self.ensure_unlocked(user)?;

        let max_attempts = self.config.read(|c| c.max_login_attempts);
        let now = self.clock.now();
        let failures = {
            let mut attempts = resilient_lock(&self.attempts);
            let record = attempts.entry(user.to_string()).or_default();
            if record.locked_until.is_some_and(|until| now >= until) {
                *record = LoginAttemptRecord::default();
            }
            record.failures += 1;
            if record.failures >= max_attempts {
                let lockout = chrono::Duration::from_std(LOGIN_LOCKOUT).unwrap_or_default();
                record.locked_until = Some(now + lockout);
            }
            record.failures
        };

        if failures >= max_attempts {
            tracing::warn!(target: "dashguard::login", user, failures, "sign-in locked");
            self.audit.log_security_event(
                SecurityAction::LoginLocked,
                Some(json!({ "user": user, "failures": failures })),
            );
            return Err(SecurityError::LoginLocked {
                user: user.to_string(),
                retry_after: LOGIN_LOCKOUT,
            });
        }
        Ok(failures)
    }

    pub fn record_success(&self, user: &str) {
        resilient_lock(&self.attempts).remove(user);
    }

    pub fn failures(&self, user: &str) -> u32 {
        resilient_lock(&self.attempts)
            .get(user)
            .map(|r| r.failures)
            .unwrap_or(0)
    }

    fn lock_remaining(&self, user: &str) -> Option<Duration> {
        let now = self.clock.now();
        let attempts = resilient_lock(&self.attempts);
        let until = attempts.get(user)?.locked_until?;
        (until - now).to_std().ok().filter(|d| !d.is_zero())
    }
}
