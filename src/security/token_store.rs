// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Access token storage with expiry.
//!
//! The token and its absolute expiry (epoch milliseconds) live under
//! `auth_token` and `auth_token_expires` in the transient store. A token read
//! after its expiry is treated as absent and both entries are purged.
//!
//! Writes propagate storage failures to the caller. Reads log them and
//! report "no token".
//!
//! Set, get and clear touch two keys each and run under one lock shared by
//! every clone, so a reader never observes a token without its expiry.

use crate::audit::{AuditLogger, SecurityAction};
use crate::clock::Clock;
use crate::error::SecurityError;
use crate::security::locks::resilient_lock;
use crate::storage::{KeyValueStore, AUTH_TOKEN_EXPIRES_KEY, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Read the token without side effects. Expired, missing or unreadable
/// entries all yield `None`.
pub(crate) fn read_unexpired_token(store: &dyn KeyValueStore, clock: &dyn Clock) -> Option<String> {
    let token = store.get(AUTH_TOKEN_KEY).ok()??;
    let expires = store.get(AUTH_TOKEN_EXPIRES_KEY).ok()??;
    let expires_ms: i64 = expires.parse().ok()?;
    (clock.now().timestamp_millis() <= expires_ms).then_some(token)
}

#[derive(Clone)]
pub struct SecureTokenStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
    /// Serializes the two-key sequences.
    guard: Arc<Mutex<()>>,
}

/// Absolute expiry in epoch milliseconds. Lifetimes past the representable
/// range saturate to `i64::MAX`.
fn expiry_ms(now_ms: i64, expires_in_secs: u64) -> i64 {
    i64::try_from(expires_in_secs.saturating_mul(1000))
        .ok()
        .and_then(|lifetime| now_ms.checked_add(lifetime))
        .unwrap_or(i64::MAX)
}

impl SecureTokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, audit: AuditLogger) -> Self {
        Self {
            store,
            clock,
            audit,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Store `token`, valid for `expires_in_secs` from now.
    pub fn set_token(&self, token: &str, expires_in_secs: u64) -> Result<(), SecurityError> {
        let expires_at = expiry_ms(self.clock.now().timestamp_millis(), expires_in_secs);

        let write = {
            let _held = resilient_lock(&self.guard);
            self.store
                .set(AUTH_TOKEN_KEY, token)
                .and_then(|_| self.store.set(AUTH_TOKEN_EXPIRES_KEY, &expires_at.to_string()))
        };
        if let Err(e) = write {
            tracing::error!(target: "dashguard::tokens", error = %e, "failed to store access token");
            return Err(e.into());
        }

        self.audit.log_security_event(
            SecurityAction::TokenStored,
            Some(json!({ "expiresInSecs": expires_in_secs })),
        );
        Ok(())
    }

    /// The stored token, if present and not expired.
    pub fn get_token(&self) -> Option<String> {
        let _held = resilient_lock(&self.guard);
        let read = self
            .store
            .get(AUTH_TOKEN_KEY)
            .and_then(|token| Ok((token, self.store.get(AUTH_TOKEN_EXPIRES_KEY)?)));

        let (token, expires) = match read {
            Ok((Some(token), Some(expires))) => (token, expires),
            Ok(_) => {
                self.purge();
                return None;
            }
            Err(e) => {
                tracing::warn!(target: "dashguard::tokens", error = %e, "failed to read access token");
                return None;
            }
        };

        match expires.parse::<i64>() {
            Ok(expires_ms) if self.clock.now().timestamp_millis() <= expires_ms => Some(token),
            Ok(_) => {
                tracing::debug!(target: "dashguard::tokens", "access token expired; purging");
                self.purge();
                None
            }
            Err(_) => {
                tracing::warn!(target: "dashguard::tokens", "unparsable token expiry; purging");
                self.purge();
                None
            }
        }
    }

    pub fn is_token_valid(&self) -> bool {
        self.get_token().is_some()
    }

    /// Absolute expiry of the stored token.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.store.get(AUTH_TOKEN_EXPIRES_KEY).ok()??;
        DateTime::from_timestamp_millis(raw.parse().ok()?)
    }

    pub fn set_refresh_token(&self, token: &str) -> Result<(), SecurityError> {
        self.store.set(REFRESH_TOKEN_KEY, token).map_err(|e| {
            tracing::error!(target: "dashguard::tokens", error = %e, "failed to store refresh token");
            SecurityError::from(e)
        })
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(REFRESH_TOKEN_KEY).unwrap_or_else(|e| {
            tracing::warn!(target: "dashguard::tokens", error = %e, "failed to read refresh token");
            None
        })
    }

    /// Remove the access token, its expiry and the refresh token.
    pub fn clear_token(&self) {
        {
            let _held = resilient_lock(&self.guard);
            self.remove_all(&[AUTH_TOKEN_KEY, AUTH_TOKEN_EXPIRES_KEY, REFRESH_TOKEN_KEY]);
        }
        self.audit.log_security_event(SecurityAction::TokenCleared, None);
    }

    /// Caller holds `guard`.
    fn purge(&self) {
        self.remove_all(&[AUTH_TOKEN_KEY, AUTH_TOKEN_EXPIRES_KEY]);
    }

    fn remove_all(&self, keys: &[&'static str]) {
        for &key in keys {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(target: "dashguard::tokens", key, error = %e, "failed to remove token entry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ConfigHandle, SecurityConfig};
    use crate::context::ContextHandle;
    use crate::error::StorageError;
    use crate::secure_log::SecureLogger;
    use crate::sink::NullSink;
    use crate::storage::MemoryStore;
    use std::time::Duration;

    fn token_store(store: Arc<dyn KeyValueStore>, clock: &ManualClock) -> SecureTokenStore {
        let config = ConfigHandle::new(SecurityConfig::default());
        let context = ContextHandle::default();
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let secure_log = SecureLogger::new(Arc::new(NullSink), config.clone(), context.clone(), clock.clone());
        let audit = AuditLogger::new(Arc::new(NullSink), config, context, clock.clone(), secure_log, store.clone());
        SecureTokenStore::new(store, clock, audit)
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::QuotaExceeded(key.to_string()))
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
        fn clear(&self) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
    }

    #[test]
    fn test_token_round_trip_before_expiry() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new());
        let tokens = token_store(store.clone(), &clock);

        tokens.set_token("abc", 60).unwrap();
        clock.advance(Duration::from_secs(59));
        assert_eq!(tokens.get_token().as_deref(), Some("abc"));
        assert!(tokens.is_token_valid());
        assert!(tokens.expires_at().is_some());
    }

    #[test]
    fn test_expired_token_is_purged() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new());
        let tokens = token_store(store.clone(), &clock);

        tokens.set_token("abc", 1).unwrap();
        clock.advance(Duration::from_millis(1001));

        assert_eq!(tokens.get_token(), None);
        assert!(!store.contains(AUTH_TOKEN_KEY));
        assert!(!store.contains(AUTH_TOKEN_EXPIRES_KEY));
    }

    #[test]
    fn test_token_valid_exactly_at_expiry() {
        let clock = ManualClock::default();
        let tokens = token_store(Arc::new(MemoryStore::new()), &clock);
        tokens.set_token("abc", 1).unwrap();
        clock.advance(Duration::from_millis(1000));
        assert!(tokens.is_token_valid());
    }

    #[test]
    fn test_missing_expiry_purges_token() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new());
        let tokens = token_store(store.clone(), &clock);
        store.set(AUTH_TOKEN_KEY, "orphan").unwrap();

        assert_eq!(tokens.get_token(), None);
        assert!(!store.contains(AUTH_TOKEN_KEY));
    }

    #[test]
    fn test_garbage_expiry_is_treated_as_expired() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new());
        let tokens = token_store(store.clone(), &clock);
        store.set(AUTH_TOKEN_KEY, "abc").unwrap();
        store.set(AUTH_TOKEN_EXPIRES_KEY, "tomorrow").unwrap();

        assert_eq!(tokens.get_token(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_clear_removes_refresh_token() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new());
        let tokens = token_store(store.clone(), &clock);
        tokens.set_token("abc", 60).unwrap();
        tokens.set_refresh_token("refresh").unwrap();
        assert_eq!(tokens.refresh_token().as_deref(), Some("refresh"));

        tokens.clear_token();
        assert!(store.is_empty());
        assert_eq!(tokens.refresh_token(), None);
    }

    #[test]
    fn test_write_failure_propagates_and_read_failure_is_none() {
        let clock = ManualClock::default();
        let tokens = token_store(Arc::new(BrokenStore), &clock);

        let err = tokens.set_token("abc", 60).unwrap_err();
        assert!(matches!(err, SecurityError::Storage(StorageError::QuotaExceeded(_))));
        assert_eq!(tokens.get_token(), None);
        assert!(tokens.set_refresh_token("r").is_err());
        tokens.clear_token();
    }

    #[test]
    fn test_huge_lifetime_saturates_instead_of_overflowing() {
        let clock = ManualClock::default();
        let tokens = token_store(Arc::new(MemoryStore::new()), &clock);

        tokens.set_token("abc", 9_223_372_036_854_775).unwrap();
        assert_eq!(tokens.get_token().as_deref(), Some("abc"));
        tokens.set_token("abc", u64::MAX).unwrap();
        assert!(tokens.is_token_valid());
        assert_eq!(expiry_ms(1_000, u64::MAX), i64::MAX);
        assert_eq!(expiry_ms(1_000, 2), 3_000);
    }

    /// Store whose removals always fail; reads and writes work.
    struct StickyStore(MemoryStore);

    impl KeyValueStore for StickyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.0.set(key, value)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".into()))
        }
        fn clear(&self) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".into()))
        }
    }

    #[test]
    fn test_failed_purge_still_reports_no_token() {
        let clock = ManualClock::default();
        let store = Arc::new(StickyStore(MemoryStore::new()));
        let tokens = token_store(store.clone(), &clock);
        tokens.set_token("abc", 1).unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(tokens.get_token(), None);
        assert!(store.0.contains(AUTH_TOKEN_KEY));
    }

    #[test]
    fn test_concurrent_set_and_get_never_purge_a_fresh_token() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::new());
        let tokens = token_store(store.clone(), &clock);

        std::thread::scope(|scope| {
            for i in 0..4 {
                let tokens = tokens.clone();
                scope.spawn(move || {
                    for j in 0..200 {
                        tokens.set_token(&format!("tok-{}-{}", i, j), 3_600).unwrap();
                    }
                });
            }
            for _ in 0..4 {
                let tokens = tokens.clone();
                scope.spawn(move || {
                    for _ in 0..200 {
                        tokens.get_token();
                    }
                });
            }
        });

        // A reader racing a writer would have purged an orphaned token.
        assert!(tokens.get_token().is_some());
        assert!(store.contains(AUTH_TOKEN_EXPIRES_KEY));
    }

    #[test]
    fn test_read_unexpired_token_has_no_side_effects() {
        let clock = ManualClock::default();
        let store = MemoryStore::new();
        store.set(AUTH_TOKEN_KEY, "abc").unwrap();
        store.set(AUTH_TOKEN_EXPIRES_KEY, &(clock.now().timestamp_millis() - 5).to_string()).unwrap();

        assert_eq!(read_unexpired_token(&store, &clock), None);
        assert!(store.contains(AUTH_TOKEN_KEY));
    }
}
