// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The security service object.
//!
//! [`SecurityManager`] owns one instance of every component and wires them
//! together: configuration, client context, stores, loggers, the token store,
//! the rate limiter, the login guard, certificate pinning and the session
//! manager. Construct it once per dashboard instance and pass it by reference.
//!
//! `initialize` runs once. A second call returns
//! [`SecurityError::AlreadyInitialized`] and leaves the running session and
//! its timer untouched; use [`SecurityManager::update_config`] to change
//! settings afterwards.

use crate::audit::{AuditLogger, AuthAction, SecurityAction};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigHandle, PartialSecurityConfig, SecurityConfig};
use crate::context::{ClientContext, ContextHandle};
use crate::error::SecurityError;
use crate::secure_log::SecureLogger;
use crate::security::locks::{resilient_read, resilient_write};
use crate::security::pinning::{generate_csp_nonce, CertificatePinner};
use crate::security::{
    EndReason, LogNavigator, LoginGuard, Navigator, RateLimiter, SecureTokenStore, SessionManager,
};
use crate::sink::{EventSink, HttpSink};
use crate::storage::{KeyValueStore, MemoryStore, SESSION_ID_KEY};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Prefix of generated session identifiers.
pub const SESSION_ID_PREFIX: &str = "sess_";

/// Fresh opaque session identifier: `sess_` followed by 128 random bits in hex.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", SESSION_ID_PREFIX, hex::encode(bytes))
}

/// Builder for [`SecurityManager`]. Every collaborator has a default:
/// an HTTP sink against the configured API base URL, the system clock,
/// in-memory stores and a navigator that only logs.
#[derive(Default)]
pub struct SecurityManagerBuilder {
    config: Option<SecurityConfig>,
    context: Option<ClientContext>,
    sink: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    transient: Option<Arc<dyn KeyValueStore>>,
    durable: Option<Arc<dyn KeyValueStore>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl SecurityManagerBuilder {
    pub fn config(mut self, config: SecurityConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn context(mut self, context: ClientContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Per-tab store holding the token and session id.
    pub fn transient_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.transient = Some(store);
        self
    }

    /// Long-lived store holding user data and dashboard preferences.
    pub fn durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn build(self) -> Result<SecurityManager, SecurityError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let sink: Arc<dyn EventSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(HttpSink::new(&config.api_base_url)?),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let transient: Arc<dyn KeyValueStore> = self.transient.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let durable: Arc<dyn KeyValueStore> = self.durable.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let navigator: Arc<dyn Navigator> = self.navigator.unwrap_or_else(|| Arc::new(LogNavigator));

        let config = ConfigHandle::new(config);
        let context = ContextHandle::new(self.context.unwrap_or_default());

        let logger = SecureLogger::new(sink.clone(), config.clone(), context.clone(), clock.clone());
        let audit = AuditLogger::new(
            sink,
            config.clone(),
            context.clone(),
            clock.clone(),
            logger.clone(),
            transient.clone(),
        );
        let tokens = SecureTokenStore::new(transient.clone(), clock.clone(), audit.clone());
        let rate_limiter = Arc::new(RateLimiter::new(config.clone(), clock.clone()));
        let login_guard = Arc::new(LoginGuard::new(config.clone(), clock.clone(), audit.clone()));
        let sessions = SessionManager::new(
            config.clone(),
            clock.clone(),
            tokens.clone(),
            transient.clone(),
            durable.clone(),
            audit.clone(),
            navigator,
        );

        Ok(SecurityManager {
            config,
            context,
            clock,
            transient,
            durable,
            logger,
            audit,
            tokens,
            rate_limiter,
            login_guard,
            sessions,
            pinner: RwLock::new(CertificatePinner::default()),
            initialized: AtomicBool::new(false),
        })
    }
}

pub struct SecurityManager {
    config: ConfigHandle,
    context: ContextHandle,
    clock: Arc<dyn Clock>,
    transient: Arc<dyn KeyValueStore>,
    durable: Arc<dyn KeyValueStore>,
    logger: SecureLogger,
    audit: AuditLogger,
    tokens: SecureTokenStore,
    rate_limiter: Arc<RateLimiter>,
    login_guard: Arc<LoginGuard>,
    sessions: SessionManager,
    pinner: RwLock<CertificatePinner>,
    initialized: AtomicBool,
}

impl SecurityManager {
    pub fn builder() -> SecurityManagerBuilder {
        SecurityManagerBuilder::default()
    }

    /// Merge `overrides`, run the pinning and CSP initializers, assign a new
    /// session id and start the idle session.
    ///
    /// Must be called from within a tokio runtime. If any step fails the
    /// manager stays uninitialized and the call may be retried.
    pub fn initialize(&self, overrides: PartialSecurityConfig) -> Result<(), SecurityError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::warn!(target: "dashguard::manager", "initialize called twice; ignoring");
            return Err(SecurityError::AlreadyInitialized);
        }
        let result = self.run_initializers(overrides);
        if let Err(e) = &result {
            tracing::error!(target: "dashguard::manager", error = %e, "initialization failed");
            self.initialized.store(false, Ordering::SeqCst);
        }
        result
    }

    fn run_initializers(&self, overrides: PartialSecurityConfig) -> Result<(), SecurityError> {
        let previous_config = self.config.get();
        let previous_pinner = self.pinner();
        let previous_session = self.context.get().session_id;

        let config = self.config.update(overrides)?;
        if let Err(e) = self.activate(&config) {
            self.config.restore(previous_config);
            *resilient_write(&self.pinner) = previous_pinner;
            self.context.set_session_id(previous_session);
            if let Err(remove_err) = self.transient.remove(SESSION_ID_KEY) {
                tracing::warn!(target: "dashguard::manager", error = %remove_err, "failed to remove session id");
            }
            return Err(e);
        }
        Ok(())
    }

    fn activate(&self, config: &SecurityConfig) -> Result<(), SecurityError> {
        self.init_pinning(config)?;
        if config.csp_nonce.is_none() {
            self.config.set_csp_nonce(generate_csp_nonce());
        }

        let session_id = new_session_id();
        self.transient.set(SESSION_ID_KEY, &session_id)?;
        self.context.set_session_id(session_id.clone());

        self.sessions.start_session()?;
        tracing::info!(
            target: "dashguard::manager",
            session_id = %session_id,
            mode = %config.mode,
            pins = self.pinner().pin_count(),
            "security layer initialized"
        );
        Ok(())
    }

    fn init_pinning(&self, config: &SecurityConfig) -> Result<(), SecurityError> {
        let fingerprints = config.certificate_fingerprints.as_deref().unwrap_or_default();
        let pinner = CertificatePinner::from_fingerprints(fingerprints)?;
        *resilient_write(&self.pinner) = pinner;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SecurityConfig {
        self.config.get()
    }

    /// Live configuration shared with every component.
    pub fn config_handle(&self) -> &ConfigHandle {
        &self.config
    }

    /// Apply `overrides` to the live configuration. Components pick up new
    /// values on their next read; an armed session timer keeps its deadline
    /// until the next activity re-arms it.
    pub fn update_config(&self, overrides: PartialSecurityConfig) -> Result<SecurityConfig, SecurityError> {
        let fields = changed_fields(&overrides);
        let pins_changed = overrides.certificate_fingerprints.is_some();
        let config = self.config.update(overrides)?;
        if pins_changed {
            self.init_pinning(&config)?;
        }
        self.audit
            .log_security_event(SecurityAction::ConfigUpdated, Some(json!({ "fields": fields })));
        Ok(config)
    }

    /// Check the backend certificate against the pinned fingerprints.
    pub fn verify_certificate(&self, der: &[u8]) -> Result<(), SecurityError> {
        if resilient_read(&self.pinner).verify(der) {
            return Ok(());
        }
        tracing::error!(target: "dashguard::manager", "certificate pin mismatch");
        self.audit.log_security_event(
            SecurityAction::CertificateMismatch,
            Some(json!({ "fingerprint": crate::security::fingerprint(der) })),
        );
        Err(SecurityError::CertificateMismatch)
    }

    /// Record a successful sign-in and store its access token.
    pub fn login_succeeded(&self, user: &str, token: &str, expires_in_secs: u64) -> Result<(), SecurityError> {
        self.login_guard.ensure_unlocked(user)?;
        self.tokens.set_token(token, expires_in_secs)?;
        self.login_guard.record_success(user);
        self.context.set_user(Some(user.to_string()));
        self.audit.log_auth_event(AuthAction::Login, Some(user), true, None);
        if self.is_initialized() && !self.sessions.is_active() {
            self.sessions.start_session()?;
        }
        Ok(())
    }

    /// Record a failed sign-in. Returns the failure count so far, or
    /// `LoginLocked` once the attempt budget is spent. Attempts made while
    /// locked are not counted and are audited with `"locked": true`.
    pub fn login_failed(&self, user: &str) -> Result<u32, SecurityError> {
        if let Err(e) = self.login_guard.ensure_unlocked(user) {
            self.audit.log_auth_event(
                AuthAction::LoginFailed,
                Some(user),
                false,
                Some(json!({ "locked": true })),
            );
            return Err(e);
        }
        self.audit.log_auth_event(AuthAction::LoginFailed, Some(user), false, None);
        self.login_guard.record_failure(user)
    }

    /// User-initiated sign-out. Returns `false` if no session was active.
    pub fn logout(&self) -> bool {
        let user = self.context.get().user_id;
        self.audit.log_auth_event(AuthAction::Logout, user.as_deref(), true, None);
        let ended = self.sessions.end_session(EndReason::Logout);
        self.context.set_user(None);
        ended
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn transient_store(&self) -> &Arc<dyn KeyValueStore> {
        &self.transient
    }

    pub fn durable_store(&self) -> &Arc<dyn KeyValueStore> {
        &self.durable
    }

    pub fn logger(&self) -> &SecureLogger {
        &self.logger
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn tokens(&self) -> &SecureTokenStore {
        &self.tokens
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn login_guard(&self) -> &Arc<LoginGuard> {
        &self.login_guard
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn pinner(&self) -> CertificatePinner {
        resilient_read(&self.pinner).clone()
    }
}

/// Names of the fields set in `overrides`, for the audit trail.
fn changed_fields(overrides: &PartialSecurityConfig) -> Vec<String> {
    match serde_json::to_value(overrides) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k)
            .collect(),
        _ => Vec::new(),
    }
}
