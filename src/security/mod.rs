// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session security controls for the dealership dashboard.
//!
//! ## Components
//!
//! - **Rate limiting**: fixed-window request budget per endpoint
//! - **Token storage**: access token with absolute expiry, purged on read once stale
//! - **Session timeout**: idle timer re-armed by user activity, full cleanup on expiry
//! - **Sign-in lockout**: temporary lock after repeated failed sign-ins
//! - **Certificate pinning**: SHA-256 fingerprint match of the backend certificate
//!
//! ## Usage
//!
//! ```no_run
//! use dashguard::security::ActivityEvent;
//! use dashguard::SecurityManager;
//!
//! # async fn run() -> Result<(), dashguard::SecurityError> {
//! let manager = SecurityManager::builder().build()?;
//! manager.initialize(Default::default())?;
//!
//! // Wire UI events to the session manager.
//! manager.sessions().handle_activity(ActivityEvent::Click);
//! # Ok(())
//! # }
//! ```

pub mod locks;
pub mod login_guard;
pub mod pinning;
pub mod rate_limit;
pub mod session_manager;
pub mod token_store;

pub use locks::{resilient_lock, resilient_read, resilient_write};
pub use login_guard::{LoginAttemptRecord, LoginGuard, LOGIN_LOCKOUT};
pub use pinning::{fingerprint, generate_csp_nonce, CertificatePinner};
pub use rate_limit::{RateLimitRecord, RateLimiter};
pub use session_manager::{
    ActivityEvent, EndReason, LogNavigator, Navigator, SessionManager, SessionPhase, LOGIN_ROUTE,
};
pub use token_store::SecureTokenStore;
