//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{AuthConfig, LogOutput, LoggingConfig, RouterConfig, StewardConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &StewardConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_router(&config.router)?;
    validate_auth(&config.auth)?;

    if config.store.path.as_os_str().is_empty() {
        return Err(ConfigError::validation("store.path must not be empty"));
    }
    if config.remote.timeout_secs == 0 {
        return Err(ConfigError::validation("remote.timeout_secs must be greater than 0"));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is file",
        ));
    }
    Ok(())
}

fn validate_router(router: &RouterConfig) -> ConfigResult<()> {
    if router.prefix.trim().is_empty() {
        return Err(ConfigError::validation("router.prefix must not be empty"));
    }
    if router.prefix.contains(char::is_whitespace) {
        return Err(ConfigError::validation("router.prefix cannot contain spaces"));
    }
    if router.fallback_keyword.trim().is_empty() {
        return Err(ConfigError::validation("router.fallback_keyword must not be empty"));
    }
    if router.rate_limit.interval_ms == 0 {
        return Err(ConfigError::validation(
            "router.rate_limit.interval_ms must be greater than 0",
        ));
    }
    if router.rate_limit.burst == 0 {
        return Err(ConfigError::validation("router.rate_limit.burst must be at least 1"));
    }
    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> ConfigResult<()> {
    if auth.period_secs == 0 {
        return Err(ConfigError::validation("auth.period_secs must be greater than 0"));
    }
    auth.to_verifier()
        .map(drop)
        .map_err(|e| ConfigError::validation(format!("auth.secret: {e}")))
}
