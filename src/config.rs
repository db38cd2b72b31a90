// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Security configuration.
//!
//! [`SecurityConfig`] starts from compiled-in defaults, is optionally
//! overlaid by `~/.dashguard/config.json`, then by `DASHGUARD_*` environment
//! variables, and finally by the [`PartialSecurityConfig`] handed to
//! `SecurityManager::initialize`. Components hold a [`ConfigHandle`] and read
//! the live values on every use, so `update_config` takes effect immediately.

use crate::error::SecurityError;
use crate::security::locks::{resilient_read, resilient_write};
use crate::security::pinning::CertificatePinner;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Default idle timeout: 30 minutes.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;
pub const DEFAULT_AUDIT_ENDPOINT: &str = "/api/audit";
pub const DEFAULT_LOG_ENDPOINT: &str = "/api/logs";
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60 * 1000;
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";
/// GET responses are reused for 5 minutes.
pub const DEFAULT_API_CACHE_TTL_MS: u64 = 5 * 60 * 1000;

pub const ENV_CERT_FINGERPRINTS: &str = "DASHGUARD_CERT_FINGERPRINTS";
pub const ENV_CSP_NONCE: &str = "DASHGUARD_CSP_NONCE";
pub const ENV_MODE: &str = "DASHGUARD_MODE";
pub const ENV_API_BASE_URL: &str = "DASHGUARD_API_BASE_URL";

/// Runtime mode. Development mirrors secure logs to the console instead of
/// shipping them to the log endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    Development,
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn is_development(&self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

impl std::str::FromStr for RuntimeMode {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeMode::Development),
            "production" | "prod" => Ok(RuntimeMode::Production),
            other => Err(SecurityError::Config(format!("unknown mode '{}'", other))),
        }
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeMode::Development => write!(f, "development"),
            RuntimeMode::Production => write!(f, "production"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub session_timeout_ms: u64,
    pub max_login_attempts: u32,
    pub audit_endpoint: String,
    pub log_endpoint: String,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csp_nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_fingerprints: Option<Vec<String>>,
    pub mode: RuntimeMode,
    pub api_base_url: String,
    /// Lifetime of cached GET responses. Zero disables the cache.
    pub api_cache_ttl_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            max_login_attempts: DEFAULT_MAX_LOGIN_ATTEMPTS,
            audit_endpoint: DEFAULT_AUDIT_ENDPOINT.to_string(),
            log_endpoint: DEFAULT_LOG_ENDPOINT.to_string(),
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            csp_nonce: None,
            certificate_fingerprints: None,
            mode: RuntimeMode::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_cache_ttl_ms: DEFAULT_API_CACHE_TTL_MS,
        }
    }
}

impl SecurityConfig {
    /// Directory holding the optional config file (`~/.dashguard`).
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".dashguard")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Load defaults, the config file (if present) and environment overrides.
    pub fn load() -> Result<Self, SecurityError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file, falling back to defaults when it is absent.
    pub fn load_from(path: &Path) -> Result<Self, SecurityError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            SecurityError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SecurityError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-provided values through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SecurityError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_CERT_FINGERPRINTS) {
            let pins: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !pins.is_empty() {
                self.certificate_fingerprints = Some(pins);
            }
        }
        if let Some(nonce) = lookup(ENV_CSP_NONCE).filter(|n| !n.trim().is_empty()) {
            self.csp_nonce = Some(nonce.trim().to_string());
        }
        if let Some(mode) = lookup(ENV_MODE) {
            self.mode = mode.parse()?;
        }
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        Ok(())
    }

    /// Overlay every field present in `partial`.
    pub fn merge(&mut self, partial: PartialSecurityConfig) {
        let PartialSecurityConfig {
            session_timeout_ms,
            max_login_attempts,
            audit_endpoint,
            log_endpoint,
            rate_limit_window_ms,
            rate_limit_max_requests,
            csp_nonce,
            certificate_fingerprints,
            mode,
            api_base_url,
            api_cache_ttl_ms,
        } = partial;

        if let Some(v) = session_timeout_ms {
            self.session_timeout_ms = v;
        }
        if let Some(v) = max_login_attempts {
            self.max_login_attempts = v;
        }
        if let Some(v) = audit_endpoint {
            self.audit_endpoint = v;
        }
        if let Some(v) = log_endpoint {
            self.log_endpoint = v;
        }
        if let Some(v) = rate_limit_window_ms {
            self.rate_limit_window_ms = v;
        }
        if let Some(v) = rate_limit_max_requests {
            self.rate_limit_max_requests = v;
        }
        if csp_nonce.is_some() {
            self.csp_nonce = csp_nonce;
        }
        if certificate_fingerprints.is_some() {
            self.certificate_fingerprints = certificate_fingerprints;
        }
        if let Some(v) = mode {
            self.mode = v;
        }
        if let Some(v) = api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = api_cache_ttl_ms {
            self.api_cache_ttl_ms = v;
        }
    }

    /// The required counters must all be non-zero, the endpoints non-empty
    /// and every certificate pin a well-formed SHA-256 fingerprint.
    pub fn validate(&self) -> Result<(), SecurityError> {
        let zero = [
            ("session_timeout_ms", self.session_timeout_ms == 0),
            ("max_login_attempts", self.max_login_attempts == 0),
            ("rate_limit_window_ms", self.rate_limit_window_ms == 0),
            ("rate_limit_max_requests", self.rate_limit_max_requests == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(SecurityError::Config(format!("{} must be greater than zero", name)));
        }
        if self.audit_endpoint.trim().is_empty() {
            return Err(SecurityError::Config("audit_endpoint must not be empty".into()));
        }
        if self.log_endpoint.trim().is_empty() {
            return Err(SecurityError::Config("log_endpoint must not be empty".into()));
        }
        url::Url::parse(&self.api_base_url).map_err(|e| {
            SecurityError::Config(format!("api_base_url '{}' is invalid: {}", self.api_base_url, e))
        })?;
        if let Some(pins) = &self.certificate_fingerprints {
            CertificatePinner::from_fingerprints(pins)?;
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn api_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.api_cache_ttl_ms)
    }
}

/// Field-by-field overrides for [`SecurityConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialSecurityConfig {
    pub session_timeout_ms: Option<u64>,
    pub max_login_attempts: Option<u32>,
    pub audit_endpoint: Option<String>,
    pub log_endpoint: Option<String>,
    pub rate_limit_window_ms: Option<u64>,
    pub rate_limit_max_requests: Option<u32>,
    pub csp_nonce: Option<String>,
    pub certificate_fingerprints: Option<Vec<String>>,
    pub mode: Option<RuntimeMode>,
    pub api_base_url: Option<String>,
    pub api_cache_ttl_ms: Option<u64>,
}

/// Shared, live view of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<SecurityConfig>>,
}

impl ConfigHandle {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> SecurityConfig {
        resilient_read(&self.inner).clone()
    }

    /// Read a single value without cloning the whole config.
    pub fn read<T>(&self, f: impl FnOnce(&SecurityConfig) -> T) -> T {
        f(&resilient_read(&self.inner))
    }

    /// Merge `partial` and validate. On failure the previous config is kept.
    pub fn update(&self, partial: PartialSecurityConfig) -> Result<SecurityConfig, SecurityError> {
        let mut guard = resilient_write(&self.inner);
        let mut next = guard.clone();
        next.merge(partial);
        next.validate()?;
        *guard = next.clone();
        Ok(next)
    }

    pub(crate) fn set_csp_nonce(&self, nonce: String) {
        resilient_write(&self.inner).csp_nonce = Some(nonce);
    }

    /// Put back a config taken with [`ConfigHandle::get`].
    pub(crate) fn restore(&self, config: SecurityConfig) {
        *resilient_write(&self.inner) = config;
    }
}
