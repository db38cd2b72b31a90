// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests through the public `SecurityManager` API.

use dashguard::config::{DEFAULT_AUDIT_ENDPOINT, DEFAULT_LOG_ENDPOINT};
use dashguard::sanitize::sanitize_email;
use dashguard::security::{ActivityEvent, EndReason, Navigator, SessionPhase};
use dashguard::storage::{AUTH_TOKEN_EXPIRES_KEY, AUTH_TOKEN_KEY, SESSION_ID_KEY, USER_DATA_KEY};
use dashguard::{
    redact_text, KeyValueStore, ManualClock, MemorySink, MemoryStore, PartialSecurityConfig,
    RuntimeMode, SecurityConfig, SecurityError, SecurityManager, ValidationError,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT_MS: u64 = 5_000;

#[derive(Default)]
struct RecordingNavigator {
    timeouts: AtomicUsize,
    logouts: AtomicUsize,
}

impl Navigator for RecordingNavigator {
    fn redirect_to_login(&self, reason: EndReason) {
        match reason {
            EndReason::Timeout => self.timeouts.fetch_add(1, Ordering::SeqCst),
            EndReason::Logout => self.logouts.fetch_add(1, Ordering::SeqCst),
        };
    }
}

struct Harness {
    manager: SecurityManager,
    sink: Arc<MemorySink>,
    clock: ManualClock,
    transient: Arc<MemoryStore>,
    durable: Arc<MemoryStore>,
    navigator: Arc<RecordingNavigator>,
}

fn harness(config: SecurityConfig) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let clock = ManualClock::default();
    let transient = Arc::new(MemoryStore::new());
    let durable = Arc::new(MemoryStore::new());
    let navigator = Arc::new(RecordingNavigator::default());
    let manager = SecurityManager::builder()
        .config(config)
        .sink(sink.clone())
        .clock(Arc::new(clock.clone()))
        .transient_store(transient.clone())
        .durable_store(durable.clone())
        .navigator(navigator.clone())
        .build()
        .expect("manager builds");
    Harness {
        manager,
        sink,
        clock,
        transient,
        durable,
        navigator,
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// RATE LIMITING
// =============================================================================

#[tokio::test]
async fn test_rate_limit_window() {
    let h = harness(SecurityConfig {
        rate_limit_max_requests: 4,
        rate_limit_window_ms: 1_000,
        ..SecurityConfig::default()
    });
    let limiter = h.manager.rate_limiter();

    for id in ["/api/inventory", "/api/leads"] {
        for _ in 0..4 {
            assert!(limiter.is_allowed(id));
        }
        assert!(!limiter.is_allowed(id));
    }

    h.clock.advance(Duration::from_millis(1_000));
    assert!(limiter.is_allowed("/api/inventory"));
    assert_eq!(limiter.remaining_requests("/api/inventory"), 3);
}

// =============================================================================
// TOKENS
// =============================================================================

#[tokio::test]
async fn test_token_expires_after_one_second() {
    let h = harness(SecurityConfig::default());
    h.manager.tokens().set_token("abc", 1).unwrap();

    h.clock.advance(Duration::from_millis(1_001));
    assert_eq!(h.manager.tokens().get_token(), None);
    assert!(!h.transient.contains(AUTH_TOKEN_KEY));
    assert!(!h.transient.contains(AUTH_TOKEN_EXPIRES_KEY));
}

#[tokio::test]
async fn test_audit_events_carry_bearer_token() {
    let h = harness(SecurityConfig::default());
    h.manager.tokens().set_token("abc", 60).unwrap();
    h.manager.audit().log_security_event(
        dashguard::SecurityAction::ConfigUpdated,
        Some(json!({ "fields": [] })),
    );

    let last = h.sink.requests().pop().unwrap();
    assert_eq!(last.endpoint, DEFAULT_AUDIT_ENDPOINT);
    assert_eq!(last.bearer.as_deref(), Some("abc"));
}

// =============================================================================
// SESSION TIMEOUT
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_session_timeout_fires_once_and_cleans_up() {
    let h = harness(SecurityConfig::default());
    h.manager
        .initialize(PartialSecurityConfig {
            session_timeout_ms: Some(TIMEOUT_MS),
            ..Default::default()
        })
        .unwrap();
    h.manager.login_succeeded("jdoe", "abc", 3_600).unwrap();
    h.durable.set(USER_DATA_KEY, r#"{"name":"Jane"}"#).unwrap();
    assert!(h.transient.contains(SESSION_ID_KEY));

    tokio::time::advance(Duration::from_millis(TIMEOUT_MS + 1)).await;
    settle().await;

    assert_eq!(h.navigator.timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.sessions().phase(), SessionPhase::Stopped);
    assert!(h.transient.is_empty());
    assert!(!h.durable.contains(USER_DATA_KEY));
    assert_eq!(h.manager.audit().events_with_action("SESSION_TIMEOUT").len(), 1);

    tokio::time::advance(Duration::from_millis(TIMEOUT_MS * 4)).await;
    settle().await;
    assert_eq!(h.navigator.timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_activity_before_expiry_resets_countdown() {
    let h = harness(SecurityConfig {
        session_timeout_ms: TIMEOUT_MS,
        ..SecurityConfig::default()
    });
    h.manager.initialize(PartialSecurityConfig::default()).unwrap();

    let almost = Duration::from_millis(TIMEOUT_MS - 1);
    tokio::time::advance(almost).await;
    settle().await;
    h.manager.sessions().handle_activity(ActivityEvent::KeyPress);

    tokio::time::advance(almost).await;
    settle().await;
    assert_eq!(h.navigator.timeouts.load(Ordering::SeqCst), 0);
    assert!(h.manager.sessions().is_active());

    tokio::time::advance(Duration::from_millis(2)).await;
    settle().await;
    assert_eq!(h.navigator.timeouts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_logout_before_timeout() {
    let h = harness(SecurityConfig {
        session_timeout_ms: TIMEOUT_MS,
        ..SecurityConfig::default()
    });
    h.manager.initialize(PartialSecurityConfig::default()).unwrap();
    h.manager.login_succeeded("jdoe", "abc", 3_600).unwrap();

    assert!(h.manager.logout());
    tokio::time::advance(Duration::from_millis(TIMEOUT_MS * 2)).await;
    settle().await;

    assert_eq!(h.navigator.logouts.load(Ordering::SeqCst), 1);
    assert_eq!(h.navigator.timeouts.load(Ordering::SeqCst), 0);
    assert!(h.manager.tokens().get_token().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reinitialize_does_not_reset_timer() {
    let h = harness(SecurityConfig {
        session_timeout_ms: TIMEOUT_MS,
        ..SecurityConfig::default()
    });
    h.manager.initialize(PartialSecurityConfig::default()).unwrap();

    tokio::time::advance(Duration::from_millis(TIMEOUT_MS - 10)).await;
    settle().await;
    assert!(matches!(
        h.manager.initialize(PartialSecurityConfig::default()),
        Err(SecurityError::AlreadyInitialized)
    ));

    tokio::time::advance(Duration::from_millis(20)).await;
    settle().await;
    assert_eq!(h.navigator.timeouts.load(Ordering::SeqCst), 1);
}

// =============================================================================
// LOGGING AND SANITIZING
// =============================================================================

#[test]
fn test_redaction_example() {
    assert_eq!(
        redact_text("My password is 1234 and secret99 too"),
        "My [REDACTED] is 1234 and [REDACTED] too"
    );
}

#[test]
fn test_email_sanitizing() {
    assert!(matches!(
        sanitize_email("BAD EMAIL"),
        Err(ValidationError::InvalidEmail(_))
    ));
    assert_eq!(sanitize_email("User@Example.com").unwrap(), "user@example.com");
}

#[tokio::test]
async fn test_secure_logger_production_delivery_is_redacted() {
    let h = harness(SecurityConfig::default());
    h.manager.context().set_user(Some("jdoe".into()));
    h.manager
        .logger()
        .error("token refresh failed", Some(json!({ "refreshToken": "r-1", "attempt": 2 })));

    let bodies = h.sink.bodies_for(DEFAULT_LOG_ENDPOINT);
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["message"], "[REDACTED] refresh failed");
    assert_eq!(bodies[0]["data"]["refreshToken"], "[REDACTED]");
    assert_eq!(bodies[0]["data"]["attempt"], 2);
    assert_eq!(bodies[0]["level"], "error");
    assert_eq!(bodies[0]["userId"], "jdoe");
}

#[tokio::test]
async fn test_development_mode_keeps_logs_local() {
    let h = harness(SecurityConfig {
        mode: RuntimeMode::Development,
        ..SecurityConfig::default()
    });
    h.manager.logger().info("dashboard loaded", None);
    assert!(h.sink.bodies_for(DEFAULT_LOG_ENDPOINT).is_empty());
}
