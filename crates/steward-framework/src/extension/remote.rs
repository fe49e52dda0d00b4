//! HTTP backed extensions.
//!
//! The source text of a remote extension is its endpoint URL; the package
//! name is the last path segment.
//!
//! - `GET <url>` returns `{"keyword": "...", "description": "..."}`.
//! - `POST <url>` receives the invocation as JSON and answers with
//!   `{"error": "", "type": 1, "body": "...", "filename": ""}`.
//!
//! | `type` | meaning                                   |
//! |--------|-------------------------------------------|
//! | -1     | not handled                               |
//! | 0      | handled, nothing to send                  |
//! | 1      | text reply                                |
//! | 2/3/4  | image / video / file; `body` is a URL or `BASE64:` data |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use steward_core::{Media, Reply};
use tracing::{debug, warn};

use super::{BoxedExtension, CodeLoader, Extension, ExtensionInfo, Invocation, source_hash};
use crate::error::{ExtensionError, ExtensionResult};

const BASE64_PREFIX: &str = "BASE64:";

/// Loads remote extensions.
#[derive(Debug, Clone, Default)]
pub struct RemoteLoader {
    client: reqwest::Client,
}

impl RemoteLoader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Creates a loader whose requests time out after `timeout`.
    pub fn with_timeout(timeout: Duration) -> ExtensionResult<Self> {
        Ok(Self::new(
            reqwest::Client::builder().timeout(timeout).build()?,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteInfo {
    keyword: String,
    description: String,
}

#[async_trait]
impl CodeLoader for RemoteLoader {
    async fn load(&self, package_hint: &str, source: &str) -> ExtensionResult<BoxedExtension> {
        let url = source.trim().to_string();
        let id = package_from_url(&url).unwrap_or_else(|| package_hint.to_string());
        if id.is_empty() {
            return Err(ExtensionError::validation(format!("无法从{url}解析插件ID")));
        }

        let info = match self.fetch_info(&url).await {
            Ok(info) => ExtensionInfo {
                trigger_hint: info.keyword,
                description: info.description,
            },
            Err(e) => {
                warn!(extension = %id, error = %e, "Remote extension info unavailable");
                ExtensionInfo::default()
            }
        };

        debug!(extension = %id, url = %url, "Remote extension loaded");
        Ok(Arc::new(RemoteExtension {
            hash: source_hash(&url),
            id,
            url,
            info,
            client: self.client.clone(),
        }))
    }
}

impl RemoteLoader {
    async fn fetch_info(&self, url: &str) -> reqwest::Result<RemoteInfo> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

/// Last non-empty path segment of `url`, without query.
fn package_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);
    let (_, path) = path.split_once('/')?;
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Invocation protocol
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteRequest<'a> {
    #[serde(rename = "msgID")]
    msg_id: &'a str,
    uid: &'a str,
    username: &'a str,
    gid: &'a str,
    group_name: &'a str,
    message: String,
    raw_message: &'a str,
    msg_type: i32,
    time: i64,
}

impl<'a> RemoteRequest<'a> {
    fn from_invocation(inv: &'a Invocation) -> Self {
        let message = inv.text();
        match inv.message_ref() {
            Some(msg) => Self {
                msg_id: &msg.msg_id,
                uid: &msg.sender.uid,
                username: msg.sender.group_name(),
                gid: msg.gid(),
                group_name: msg.group_name(),
                message,
                raw_message: &msg.content,
                msg_type: msg.msg_type.code(),
                time: msg.timestamp,
            },
            None => Self {
                msg_id: "",
                uid: "",
                username: "",
                gid: inv.target(),
                group_name: "",
                message,
                raw_message: "",
                msg_type: 0,
                time: chrono::Utc::now().timestamp(),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteResponse {
    error: String,
    #[serde(rename = "type")]
    kind: i32,
    body: String,
    filename: String,
}

/// Media payload kinds a reply can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaKind {
    Image,
    Video,
    File,
}

impl MediaKind {
    fn default_extension(self) -> &'static str {
        match self {
            Self::Image => ".jpg",
            Self::Video => ".mp4",
            Self::File => "",
        }
    }
}

/// Builds a media reply from a URL or `BASE64:` body.
///
/// Without a filename the MD5 of the body plus a kind specific extension is
/// used.
pub(crate) fn media_reply(kind: MediaKind, body: &str, filename: &str) -> ExtensionResult<Reply> {
    let filename = if filename.is_empty() {
        format!("{}{}", source_hash(body), kind.default_extension())
    } else {
        filename.to_string()
    };
    let media = match body.strip_prefix(BASE64_PREFIX) {
        Some(data) => Media::Bytes(
            BASE64
                .decode(data.trim())
                .map_err(|e| ExtensionError::validation(format!("BASE64数据无效: {e}")))?,
        ),
        None => Media::Url(body.to_string()),
    };
    Ok(match kind {
        MediaKind::Image => Reply::Image { media, filename },
        MediaKind::Video => Reply::Video { media, filename },
        MediaKind::File => Reply::File { media, filename },
    })
}

/// An extension implemented by an HTTP endpoint.
pub struct RemoteExtension {
    id: String,
    url: String,
    hash: String,
    info: ExtensionInfo,
    client: reqwest::Client,
}

impl RemoteExtension {
    fn interpret(&self, inv: &Invocation, response: RemoteResponse) -> ExtensionResult<bool> {
        if !response.error.is_empty() {
            return Err(ExtensionError::fault(&self.id, response.error));
        }
        let kind = match response.kind {
            -1 => return Ok(false),
            0 => return Ok(true),
            1 => {
                inv.reply(Reply::text(response.body));
                return Ok(true);
            }
            2 => MediaKind::Image,
            3 => MediaKind::Video,
            4 => MediaKind::File,
            other => {
                return Err(ExtensionError::fault(
                    &self.id,
                    format!("未知的返回类型: {other}"),
                ));
            }
        };
        inv.reply(media_reply(kind, &response.body, &response.filename)?);
        Ok(true)
    }
}

#[async_trait]
impl Extension for RemoteExtension {
    fn id(&self) -> &str {
        &self.id
    }

    fn source_hash(&self) -> &str {
        &self.hash
    }

    fn info(&self) -> ExtensionInfo {
        self.info.clone()
    }

    async fn handle(&self, invocation: Arc<Invocation>) -> ExtensionResult<bool> {
        let request = RemoteRequest::from_invocation(&invocation);
        let response: RemoteResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.interpret(&invocation, response)
    }
}
