//! Configuration for the Steward runtime.
//!
//! Layered TOML/YAML files, `STEWARD_*` environment variables and
//! programmatic overrides are merged by [`ConfigLoader`] and validated
//! before use.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    AuthConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, RateLimitConfig, RemoteConfig,
    RouterConfig, SpanEventConfig, StewardConfig, StoreConfig,
};
pub use validation::validate_config;
