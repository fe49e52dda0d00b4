//! Errors raised by chat transport implementations.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur while talking to the chat transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The account is logged out or the connection dropped.
    #[error("transport is not alive")]
    NotAlive,

    /// The requested group does not exist or is not visible to the account.
    #[error("group '{0}' not found")]
    GroupNotFound(String),

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The transport does not support this kind of payload.
    #[error("unsupported payload: {0}")]
    Unsupported(&'static str),

    /// Any other protocol level failure.
    #[error("transport error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Creates a send failure.
    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    /// Creates an internal transport error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
