//! Runtime error types.

use steward_framework::ExtensionError;
use steward_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a [`StewardRuntime`](crate::StewardRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be opened.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Loaders, registries or the OTP verifier could not be set up.
    #[error("Extension error: {0}")]
    Extension(#[from] ExtensionError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
