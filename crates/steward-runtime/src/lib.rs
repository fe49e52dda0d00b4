//! Steward Runtime - configuration, logging and wiring for the Steward host.
//!
//! This crate provides:
//! - figment based configuration (`ConfigLoader`, `StewardConfig`)
//! - `tracing-subscriber` logging setup (`LoggingBuilder`)
//! - `StewardRuntime`, which assembles the store, registries and routing
//!   pipeline around a chat transport
//!
//! ```rust,ignore
//! use steward_runtime::StewardRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(MyTransport::connect().await?);
//!     let runtime = StewardRuntime::builder().build(transport)?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, StewardConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RuntimeBuilder, StewardRuntime};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
