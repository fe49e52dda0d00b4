//! Error types for the Steward framework.

use steward_store::StoreError;
use thiserror::Error;

/// Errors raised by extension loading, lifecycle operations and invocation.
///
/// Display strings are written for the chat surface: administrative commands
/// reply with them directly. Use [`user_message`](Self::user_message) when the
/// text is shown to ordinary users.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// Malformed input, missing key, or a loaded source that contradicts the
    /// request (e.g. a different id on update).
    #[error("{0}")]
    Validation(String),

    /// Unknown extension, unbound keyword or schedule.
    #[error("{0}")]
    NotFound(String),

    /// The id or keyword is already taken.
    #[error("{message}")]
    Conflict {
        /// The extension currently owning the contested key or id.
        owner: String,
        message: String,
    },

    /// The database rejected the operation.
    #[error("持久化失败: {0}")]
    Persistence(#[from] StoreError),

    /// The extension itself failed: script error, panic or bad return value.
    #[error("插件{id}运行出错: {message}")]
    RuntimeFault { id: String, message: String },

    /// The source could not be fetched or compiled.
    #[error("加载源码失败: {0}")]
    Source(String),

    /// A remote extension could not be reached.
    #[error("远程插件请求失败: {0}")]
    Remote(#[from] reqwest::Error),
}

impl ExtensionError {
    /// Creates a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a conflict error naming the current owner.
    pub fn conflict(owner: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            owner: owner.into(),
            message: message.into(),
        }
    }

    /// Creates a runtime fault attributed to extension `id`.
    pub fn fault(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuntimeFault {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Creates a source error.
    pub fn source_error(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Text that is safe to show in a chat.
    ///
    /// Database details are replaced by a generic failure notice.
    pub fn user_message(&self) -> String {
        match self {
            Self::Persistence(_) => "操作失败".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type for extension operations.
pub type ExtensionResult<T> = Result<T, ExtensionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_is_masked() {
        let store = steward_store::Store::open_in_memory().unwrap();
        let err: ExtensionError = store.exec("NOT VALID SQL", &[]).unwrap_err().into();
        assert_eq!(err.user_message(), "操作失败");
        assert!(err.to_string().starts_with("持久化失败"));
    }

    #[test]
    fn test_conflict_names_owner() {
        let err = ExtensionError::conflict("weather", "唤醒词[天气]已被占用");
        match &err {
            ExtensionError::Conflict { owner, .. } => assert_eq!(owner, "weather"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.user_message(), "唤醒词[天气]已被占用");
    }
}
