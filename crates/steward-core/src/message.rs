//! Outgoing replies.
//!
//! Extensions never call the transport directly. They push [`Reply`] values
//! into their invocation outbox and the host delivers them once the call
//! returns.

use serde::{Deserialize, Serialize};

/// Where a media payload comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Media {
    /// A URL the transport downloads before sending.
    Url(String),
    /// Raw bytes already in memory.
    Bytes(Vec<u8>),
}

/// A message to deliver into a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Plain text.
    Text(String),
    /// Picture.
    Image { media: Media, filename: String },
    /// Video clip.
    Video { media: Media, filename: String },
    /// Arbitrary file attachment.
    File { media: Media, filename: String },
}

impl Reply {
    /// Creates a text reply.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Returns the text if this is a text reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}
