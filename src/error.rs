// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy and user-facing error formatting.
//!
//! ## Propagation policy
//!
//! - **Critical paths** (token writes, credential checks, rate limiting)
//!   return [`SecurityError`] to the caller.
//! - **Non-critical paths** (audit delivery, remote logging) absorb
//!   [`SinkError`] locally and never surface it.
//! - **Session timeout** is not an error at all: it ends the session and
//!   redirects to the login entry point.
//!
//! [`SecurityError::user_message`] renders the caller-facing text with the
//! same title/causes/fixes layout as [`format_error`].

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Where operators are pointed when a message cannot be acted on directly.
pub const SUPPORT_HINT: &str = "contact your dealership system administrator";

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Malformed input rejected by one of the sanitizers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("phone number is empty")]
    EmptyPhone,

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("filename is empty after sanitization")]
    EmptyFilename,
}

/// Failure reading or writing a key/value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded while writing {0}")]
    QuotaExceeded(String),
}

/// Failure delivering a payload to a remote sink. Always absorbed.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("invalid sink endpoint {endpoint}: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("sink request failed: {0}")]
    Transport(String),

    #[error("sink rejected payload with status {0}")]
    Rejected(u16),
}

/// Errors surfaced to callers of the security layer.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("network failure: {0}")]
    Network(String),

    #[error("request failed with status {0}")]
    Status(u16),

    #[error("rate limit exceeded for {key}: retry in {}s", retry_after.as_secs())]
    RateLimitExceeded {
        key: String,
        remaining: u32,
        retry_after: Duration,
    },

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("too many failed sign-in attempts for {user}: locked for {}s", retry_after.as_secs())]
    LoginLocked { user: String, retry_after: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("backend certificate does not match any pinned fingerprint")]
    CertificateMismatch,

    #[error("security manager already initialized")]
    AlreadyInitialized,

    #[error("no tokio runtime available to arm the session timer")]
    NoRuntime,
}

impl SecurityError {
    /// Seconds the caller should wait before retrying, when that is known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } | Self::LoginLocked { retry_after, .. } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Render a message suitable for display to the dashboard user.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => ErrorBuilder::new("Too many requests")
                .cause("The dashboard sent more requests than allowed in the current window")
                .fix(format!(
                    "Wait {} second(s) before trying again",
                    retry_after.as_secs().max(1)
                ))
                .build(),
            Self::AuthenticationRequired => ErrorBuilder::new("Your session has expired")
                .cause("The sign-in token is missing or no longer valid")
                .fix("Sign in again")
                .build(),
            Self::LoginLocked { retry_after, .. } => ErrorBuilder::new("Sign-in temporarily locked")
                .cause("Too many failed sign-in attempts")
                .fix(format!(
                    "Wait {} minute(s) before signing in again",
                    retry_after.as_secs().div_ceil(60).max(1)
                ))
                .fix("Reset your password if you have forgotten it")
                .build(),
            Self::Validation(err) => ErrorBuilder::new("Invalid input")
                .cause(err.to_string())
                .fix("Correct the highlighted field and submit again")
                .build(),
            Self::Network(_) | Self::Status(_) => ErrorBuilder::new("The dealership service is unavailable")
                .cause("The backend did not answer or returned an error")
                .fix("Check your network connection")
                .fix("Try again in a moment")
                .build(),
            Self::CertificateMismatch => ErrorBuilder::new("Secure connection could not be verified")
                .cause("The server presented a certificate that is not pinned")
                .cause("A proxy may be intercepting the connection")
                .fix(format!("Do not continue; {}", SUPPORT_HINT))
                .build(),
            other => format_simple_error(&other.to_string()),
        }
    }
}

// =============================================================================
// FORMATTING
// =============================================================================

/// Formats an error message with title, causes, fixes and a support hint.
///
/// ```
/// use dashguard::error::format_error;
///
/// let text = format_error(
///     "Failed to reach the audit endpoint",
///     &["Backend is down"],
///     &["Retry later"],
/// );
/// assert!(text.starts_with("[✗] Failed to reach the audit endpoint"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut builder = ErrorBuilder::new(title);
    for cause in causes {
        builder = builder.cause(*cause);
    }
    for fix in fixes {
        builder = builder.fix(*fix);
    }
    builder.build()
}

/// Formats a bare error title with the support hint.
pub fn format_simple_error(title: &str) -> String {
    format!("[✗] {}\n\nNeed help? {}", title, SUPPORT_HINT)
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[✗] {}\n\n", self.title)?;

        if !self.causes.is_empty() {
            writeln!(f, "Possible causes:")?;
            for cause in &self.causes {
                writeln!(f, "  - {}", cause)?;
            }
            writeln!(f)?;
        }

        if !self.fixes.is_empty() {
            writeln!(f, "Try these fixes:")?;
            for (i, fix) in self.fixes.iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, fix)?;
            }
            writeln!(f)?;
        }

        write!(f, "Need help? {}", SUPPORT_HINT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_layout() {
        let text = format_error("Title", &["cause a", "cause b"], &["fix a", "fix b"]);
        assert!(text.starts_with("[✗] Title\n\n"));
        assert!(text.contains("Possible causes:\n  - cause a\n  - cause b\n"));
        assert!(text.contains("Try these fixes:\n  1. fix a\n  2. fix b\n"));
        assert!(text.ends_with(SUPPORT_HINT));
    }

    #[test]
    fn test_format_error_skips_empty_sections() {
        let text = format_error("Only title", &[], &[]);
        assert!(!text.contains("Possible causes"));
        assert!(!text.contains("Try these fixes"));
    }

    #[test]
    fn test_rate_limit_message_carries_retry_guidance() {
        let err = SecurityError::RateLimitExceeded {
            key: "/api/dashboard/sales".to_string(),
            remaining: 0,
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert!(err.user_message().contains("Wait 42 second(s)"));
        assert!(err.to_string().contains("/api/dashboard/sales"));
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err: SecurityError = ValidationError::InvalidEmail("BAD EMAIL".to_string()).into();
        assert_eq!(err.to_string(), "invalid email address: BAD EMAIL");
        assert!(err.user_message().contains("Invalid input"));
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_expired_session_message() {
        let msg = SecurityError::AuthenticationRequired.user_message();
        assert!(msg.contains("Sign in again"));
    }
}
