//! Fetching extension source text.
//!
//! A *location* is what an administrator types after `install`:
//!
//! | location                         | source text                     |
//! |----------------------------------|---------------------------------|
//! | `[remote]http://host/api/echo?x` | `http://host/api/echo` (no I/O) |
//! | `http://host/plugins/echo.lua`   | downloaded body                 |
//! | `/srv/plugins/echo.lua`          | file contents                   |
//!
//! The package hint is the file stem of the location (`echo` in all three
//! rows above).

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{ExtensionError, ExtensionResult};

const REMOTE_MARKER: &str = "[remote]";

/// Source text together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Package name to use when the source does not declare one.
    pub package_hint: String,
    /// Raw source text (script body or endpoint URL).
    pub text: String,
    /// The location as given by the administrator.
    pub location: String,
}

impl Source {
    /// Wraps in-memory source text.
    pub fn inline(package_hint: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            package_hint: package_hint.into(),
            text: text.into(),
            location: String::new(),
        }
    }
}

/// Resolves locations to [`Source`]s.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
}

impl Default for SourceFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl SourceFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Creates a fetcher whose downloads time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> ExtensionResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client))
    }

    /// Resolves `location` to source text.
    pub async fn fetch(&self, location: &str) -> ExtensionResult<Source> {
        let location = location.trim();
        if location.is_empty() {
            return Err(ExtensionError::validation("请输入插件路径"));
        }
        let package_hint = package_hint(location);

        let text = if let Some(url) = location.strip_prefix(REMOTE_MARKER) {
            strip_query(url).to_string()
        } else if location.starts_with("http://") || location.starts_with("https://") {
            debug!(location = %location, "Downloading extension source");
            self.client
                .get(location)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?
        } else {
            tokio::fs::read_to_string(location)
                .await
                .map_err(|e| ExtensionError::source_error(format!("{location}: {e}")))?
        };

        Ok(Source {
            package_hint,
            text,
            location: location.to_string(),
        })
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// File stem of the last path segment of `location`.
pub fn package_hint(location: &str) -> String {
    let path = strip_query(location.strip_prefix(REMOTE_MARKER).unwrap_or(location));
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_package_hint() {
        assert_eq!(package_hint("/srv/plugins/echo.lua"), "echo");
        assert_eq!(package_hint("http://host/plugins/echo.lua?v=2"), "echo");
        assert_eq!(package_hint("[remote]http://host/api/echo?token=1"), "echo");
        assert_eq!(package_hint("weather"), "weather");
    }

    #[tokio::test]
    async fn test_remote_marker_skips_fetch() {
        let fetcher = SourceFetcher::default();
        let src = fetcher
            .fetch("[remote]http://127.0.0.1:1/api/echo?token=abc")
            .await
            .unwrap();
        assert_eq!(src.text, "http://127.0.0.1:1/api/echo");
        assert_eq!(src.package_hint, "echo");
    }

    #[tokio::test]
    async fn test_reads_file() {
        let mut file = tempfile::Builder::new().suffix(".lua").tempfile().unwrap();
        write!(file, "PACKAGE = 'x'").unwrap();
        let location = file.path().to_string_lossy().into_owned();

        let src = assert_ok!(SourceFetcher::default().fetch(&location).await);
        assert_eq!(src.text, "PACKAGE = 'x'");
        assert_eq!(src.location, location);
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let err = assert_err!(SourceFetcher::default().fetch("/definitely/not/here.lua").await);
        assert!(matches!(err, ExtensionError::Source(_)));
    }
}
