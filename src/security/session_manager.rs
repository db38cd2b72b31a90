// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idle session timeout.
//!
//! ## Lifecycle
//!
//! ```text
//!   STOPPED --start_session()--> ACTIVE --(idle for session_timeout)--> STOPPED
//!                                  |  ^                                   ^
//!                                  |  | activity event: re-arm timer      |
//!                                  +--+                                   |
//!                                  +------------ end_session(Logout) -----+
//! ```
//!
//! Exactly one timer is armed while ACTIVE. Every tracked activity event
//! aborts it and arms a fresh one for the full timeout (a reset, not a
//! throttle). Each arm bumps a generation counter and a timer only ends the
//! session if its generation is still current, so a timer that was aborted
//! too late to stop it from waking still cannot log the user out.
//!
//! Ending the session clears the token store, wipes transient storage and
//! the durable session keys, records an audit event and sends the user to
//! the login entry point through the [`Navigator`].

use crate::audit::{AuditLogger, SecurityAction};
use crate::clock::Clock;
use crate::config::ConfigHandle;
use crate::error::SecurityError;
use crate::security::locks::resilient_lock;
use crate::security::token_store::SecureTokenStore;
use crate::storage::{KeyValueStore, DURABLE_SESSION_KEYS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Route the user is sent to when a session ends.
pub const LOGIN_ROUTE: &str = "/login";

/// User activity that keeps a session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
    Click,
}

impl ActivityEvent {
    pub const ALL: [ActivityEvent; 6] = [
        ActivityEvent::PointerDown,
        ActivityEvent::PointerMove,
        ActivityEvent::KeyPress,
        ActivityEvent::Scroll,
        ActivityEvent::TouchStart,
        ActivityEvent::Click,
    ];

    /// DOM event name listened for at the document root.
    pub fn dom_name(&self) -> &'static str {
        match self {
            ActivityEvent::PointerDown => "mousedown",
            ActivityEvent::PointerMove => "mousemove",
            ActivityEvent::KeyPress => "keypress",
            ActivityEvent::Scroll => "scroll",
            ActivityEvent::TouchStart => "touchstart",
            ActivityEvent::Click => "click",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Stopped,
    Active,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Stopped => write!(f, "STOPPED"),
            SessionPhase::Active => write!(f, "ACTIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// No activity within the timeout window.
    Timeout,
    /// The user signed out.
    Logout,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Timeout => "timeout",
            EndReason::Logout => "logout",
        }
    }
}

/// Performs the hard navigation to the login entry point.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self, reason: EndReason);
}

/// Navigator that only records the redirect in the log. Used where there is
/// no UI shell to drive, such as the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect_to_login(&self, reason: EndReason) {
        tracing::info!(
            target: "dashguard::session",
            route = LOGIN_ROUTE,
            reason = reason.as_str(),
            "redirecting to login"
        );
    }
}

#[derive(Debug)]
struct SessionRuntime {
    phase: SessionPhase,
    started_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    deadline: Option<tokio::time::Instant>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl Default for SessionRuntime {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Stopped,
            started_at: None,
            last_activity: None,
            deadline: None,
            timer: None,
            generation: 0,
        }
    }
}

/// Idle-timeout tracker. Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ConfigHandle,
    clock: Arc<dyn Clock>,
    tokens: SecureTokenStore,
    transient: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    audit: AuditLogger,
    navigator: Arc<dyn Navigator>,
    runtime: Mutex<SessionRuntime>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConfigHandle,
        clock: Arc<dyn Clock>,
        tokens: SecureTokenStore,
        transient: Arc<dyn KeyValueStore>,
        durable: Arc<dyn KeyValueStore>,
        audit: AuditLogger,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                clock,
                tokens,
                transient,
                durable,
                audit,
                navigator,
                runtime: Mutex::new(SessionRuntime::default()),
            }),
        }
    }

    /// STOPPED -> ACTIVE and arm the idle timer. On an ACTIVE session this
    /// behaves like [`refresh_session`](Self::refresh_session).
    pub fn start_session(&self) -> Result<(), SecurityError> {
        let handle = Handle::try_current().map_err(|_| SecurityError::NoRuntime)?;
        let timeout = self.inner.config.read(|c| c.session_timeout());
        let now = self.inner.clock.now();

        let was_active = {
            let mut rt = resilient_lock(&self.inner.runtime);
            let was_active = rt.phase == SessionPhase::Active;
            if !was_active {
                rt.phase = SessionPhase::Active;
                rt.started_at = Some(now);
            }
            rt.last_activity = Some(now);
            self.arm(&mut rt, &handle, timeout);
            was_active
        };

        if !was_active {
            tracing::info!(
                target: "dashguard::session",
                timeout_ms = timeout.as_millis() as u64,
                listeners = ?ActivityEvent::ALL.map(|e| e.dom_name()),
                "session started"
            );
            self.inner.audit.log_security_event(
                SecurityAction::SessionStarted,
                Some(json!({ "timeoutMs": timeout.as_millis() as u64 })),
            );
        }
        Ok(())
    }

    /// Feed a user activity event. Ignored while STOPPED.
    pub fn handle_activity(&self, event: ActivityEvent) -> bool {
        if !self.is_active() {
            return false;
        }
        tracing::trace!(target: "dashguard::session", event = event.dom_name(), "activity");
        self.refresh_session()
    }

    /// Record activity now and restart the full timeout window.
    pub fn refresh_session(&self) -> bool {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(target: "dashguard::session", "no async runtime; session timer not re-armed");
            return false;
        };
        let timeout = self.inner.config.read(|c| c.session_timeout());
        let now = self.inner.clock.now();

        let mut rt = resilient_lock(&self.inner.runtime);
        if rt.phase != SessionPhase::Active {
            return false;
        }
        rt.last_activity = Some(now);
        self.arm(&mut rt, &handle, timeout);
        true
    }

    /// ACTIVE -> STOPPED. Returns `false` if the session was not active.
    pub fn end_session(&self, reason: EndReason) -> bool {
        self.finish(reason, None)
    }

    pub fn phase(&self) -> SessionPhase {
        resilient_lock(&self.inner.runtime).phase
    }

    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        resilient_lock(&self.inner.runtime).last_activity
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        resilient_lock(&self.inner.runtime).started_at
    }

    /// Time until the armed timer fires.
    pub fn time_remaining(&self) -> Option<Duration> {
        let deadline = resilient_lock(&self.inner.runtime).deadline?;
        Some(deadline.saturating_duration_since(tokio::time::Instant::now()))
    }

    fn arm(&self, rt: &mut SessionRuntime, handle: &Handle, timeout: Duration) {
        if let Some(previous) = rt.timer.take() {
            previous.abort();
        }
        rt.generation += 1;
        let generation = rt.generation;
        // Deadline is fixed now, not when the task is first polled.
        let deadline = tokio::time::Instant::now() + timeout;
        rt.deadline = Some(deadline);

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        rt.timer = Some(handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                SessionManager { inner }.finish(EndReason::Timeout, Some(generation));
            }
        }));
    }

    /// `fired_generation` is set when called from a timer task; a stale
    /// generation is ignored and the running timer is not aborted.
    fn finish(&self, reason: EndReason, fired_generation: Option<u64>) -> bool {
        let (timer, started_at, last_activity) = {
            let mut rt = resilient_lock(&self.inner.runtime);
            if rt.phase != SessionPhase::Active {
                return false;
            }
            if fired_generation.is_some_and(|g| g != rt.generation) {
                return false;
            }
            rt.phase = SessionPhase::Stopped;
            rt.generation += 1;
            rt.deadline = None;
            (rt.timer.take(), rt.started_at.take(), rt.last_activity.take())
        };
        if fired_generation.is_none() {
            if let Some(timer) = timer {
                timer.abort();
            }
        }

        self.inner.tokens.clear_token();
        if let Err(e) = self.inner.transient.clear() {
            tracing::warn!(target: "dashguard::session", error = %e, "failed to clear transient storage");
        }
        for key in DURABLE_SESSION_KEYS {
            if let Err(e) = self.inner.durable.remove(key) {
                tracing::warn!(target: "dashguard::session", key, error = %e, "failed to remove durable key");
            }
        }

        let now = self.inner.clock.now();
        let details = json!({
            "reason": reason.as_str(),
            "sessionDurationMs": started_at.map(|t| (now - t).num_milliseconds()),
            "idleMs": last_activity.map(|t| (now - t).num_milliseconds()),
        });
        let action = match reason {
            EndReason::Timeout => SecurityAction::SessionTimeout,
            EndReason::Logout => SecurityAction::SessionEnded,
        };
        self.inner.audit.log_security_event(action, Some(details));

        tracing::info!(target: "dashguard::session", reason = reason.as_str(), "session ended");
        self.inner.navigator.redirect_to_login(reason);
        true
    }
}
