//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use steward_framework::{ExtensionResult, OtpVerifier, RateLimiter, RouterSettings};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StewardConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Required when `output` is `file`.
    pub file_path: Option<PathBuf>,
    /// Per-module levels, e.g. `steward_framework = "debug"`.
    pub filters: HashMap<String, LogLevel>,
    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
}

// =============================================================================
// Store
// =============================================================================

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file; `:memory:` keeps everything in memory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("steward.db")
}

// =============================================================================
// Router
// =============================================================================

/// Command routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Prefix that marks a message as a command.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Keyword tried for unhandled commands.
    #[serde(default = "default_fallback_keyword")]
    pub fallback_keyword: String,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            fallback_keyword: default_fallback_keyword(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn to_settings(&self) -> RouterSettings {
        RouterSettings {
            prefix: self.prefix.clone(),
            fallback_keyword: self.fallback_keyword.clone(),
        }
    }
}

fn default_prefix() -> String {
    "#".to_string()
}

fn default_fallback_keyword() -> String {
    "default".to_string()
}

/// Per-sender token bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Time to regain one token, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            burst: default_burst(),
        }
    }
}

impl RateLimitConfig {
    pub fn to_limiter(&self) -> RateLimiter {
        RateLimiter::new(Duration::from_millis(self.interval_ms), self.burst)
    }
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_burst() -> u32 {
    1
}

// =============================================================================
// Auth
// =============================================================================

/// Admin command authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Base32 TOTP secret. Without one only the bypass token is accepted.
    #[serde(default)]
    pub secret: Option<String>,

    /// Token accepted without verification; empty disables it.
    #[serde(default = "default_bypass_token")]
    pub bypass_token: String,

    /// Periods accepted either side of the current one.
    #[serde(default = "default_window")]
    pub window: u64,

    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            bypass_token: default_bypass_token(),
            window: default_window(),
            period_secs: default_period_secs(),
        }
    }
}

impl AuthConfig {
    /// Builds the verifier; fails on a secret that is not valid base32.
    pub fn to_verifier(&self) -> ExtensionResult<OtpVerifier> {
        let verifier = match self.secret.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(secret) => OtpVerifier::new(secret)?,
            None => OtpVerifier::bypass_only(),
        };
        Ok(verifier
            .with_bypass(self.bypass_token.clone())
            .with_period(self.period_secs)
            .with_window(self.window))
    }
}

fn default_bypass_token() -> String {
    steward_framework::otp::DEFAULT_BYPASS_TOKEN.to_string()
}

fn default_window() -> u64 {
    1
}

fn default_period_secs() -> u64 {
    30
}

// =============================================================================
// Remote
// =============================================================================

/// HTTP settings for source downloads and remote extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}
