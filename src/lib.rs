// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dashguard - Session and request security for the dealership dashboard
//!
//! Tokens expire, idle sessions end, requests stay within budget, and every
//! security-relevant action leaves an audit trail with secrets redacted.
//!
//! # Core Modules
//!
//! - [`manager`] - The [`SecurityManager`] service object wiring everything together
//! - [`security`] - Rate limiting, token storage, idle session timeout, sign-in lockout, pinning
//! - [`audit`] - Audit events delivered best-effort to the audit endpoint
//! - [`secure_log`] - Redacting application logger
//! - [`sanitize`] - Input sanitizers for form fields
//! - [`api_client`] - Rate-limited, authenticated dashboard API client
//! - [`config`] - Configuration defaults, file and environment loading
//! - [`error`] - Error types and user-facing error formatting
//!
//! # Example
//!
//! ```no_run
//! use dashguard::{PartialSecurityConfig, SecurityManager};
//!
//! # async fn run() -> Result<(), dashguard::SecurityError> {
//! let manager = SecurityManager::builder().build()?;
//! manager.initialize(PartialSecurityConfig {
//!     session_timeout_ms: Some(15 * 60 * 1000),
//!     ..Default::default()
//! })?;
//! manager.login_succeeded("jdoe", "access-token", 3600)?;
//! # Ok(())
//! # }
//! ```

pub mod api_client;
pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod sanitize;
pub mod secure_log;
pub mod security;
pub mod sink;
pub mod storage;

pub use api_client::{ApiClient, ConnectionStatus};
pub use audit::{AuditEvent, AuditLogger, AuthAction, DataAction, SecurityAction, UserAction};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigHandle, PartialSecurityConfig, RuntimeMode, SecurityConfig};
pub use context::{ClientContext, ContextHandle};
pub use error::{SecurityError, SinkError, StorageError, ValidationError};
pub use manager::{SecurityManager, SecurityManagerBuilder};
pub use secure_log::{redact_text, redact_value, LogLevel, SecureLogger};
pub use security::{
    ActivityEvent, CertificatePinner, EndReason, LoginGuard, Navigator, RateLimiter,
    SecureTokenStore, SessionManager, SessionPhase,
};
pub use sink::{EventSink, HttpSink, MemorySink, NullSink};
pub use storage::{KeyValueStore, MemoryStore};
