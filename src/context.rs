// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Who is using the dashboard, from where.
//!
//! Supplies the defaults that audit events and log entries are stamped with.

use crate::security::locks::{resilient_read, resilient_write};
use std::sync::{Arc, RwLock};

pub const DEFAULT_USER_AGENT: &str = concat!("dashguard/", env!("CARGO_PKG_VERSION"));
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub user_id: Option<String>,
    pub session_id: String,
    pub ip_address: Option<String>,
    pub user_agent: String,
    /// Page the user is on when the event is recorded.
    pub url: String,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            user_id: None,
            session_id: String::new(),
            ip_address: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            url: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextHandle {
    inner: Arc<RwLock<ClientContext>>,
}

impl ContextHandle {
    pub fn new(context: ClientContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    pub fn get(&self) -> ClientContext {
        resilient_read(&self.inner).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut ClientContext)) {
        f(&mut resilient_write(&self.inner));
    }

    pub fn set_user(&self, user_id: Option<String>) {
        self.update(|ctx| ctx.user_id = user_id);
    }

    pub fn set_session_id(&self, session_id: impl Into<String>) {
        let session_id = session_id.into();
        self.update(|ctx| ctx.session_id = session_id);
    }
}
