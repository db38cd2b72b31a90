// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Key/value storage used for tokens and session bookkeeping.
//!
//! The dashboard keeps two stores: a *transient* one scoped to the browser
//! tab (token, expiry, session id) and a *durable* one that survives
//! reloads (cached user profile, dashboard preferences). Both are modelled by
//! [`KeyValueStore`]; [`MemoryStore`] is the in-process implementation.

use crate::error::StorageError;
use crate::security::locks::{resilient_read, resilient_write};
use std::collections::HashMap;
use std::sync::RwLock;

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const AUTH_TOKEN_EXPIRES_KEY: &str = "auth_token_expires";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_DATA_KEY: &str = "user_data";
pub const SESSION_ID_KEY: &str = "session_id";
pub const DASHBOARD_PREFERENCES_KEY: &str = "dashboard_preferences";

/// Durable keys wiped when a session ends.
pub const DURABLE_SESSION_KEYS: [&str; 3] =
    [USER_DATA_KEY, SESSION_ID_KEY, DASHBOARD_PREFERENCES_KEY];

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        resilient_read(&self.entries).contains_key(key)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(resilient_read(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        resilient_write(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        resilient_write(&self.entries).remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        resilient_write(&self.entries).clear();
        Ok(())
    }
}
