//! Inbound event model.
//!
//! A transport converts whatever its protocol delivers into an
//! [`InboundMessage`]. The router only ever sees this shape, so every field a
//! stage or an extension needs must be filled in by the transport:
//!
//! - `sender` and `group` are snapshots taken when the message arrived.
//! - `at_target` is the account id the message explicitly mentions, if any.
//! - `is_self` marks messages sent by the host's own account (echoes).

use serde::{Deserialize, Serialize};

// ============================================================================
// Participants
// ============================================================================

/// A chat account as seen from inside a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Protocol level account id.
    pub uid: String,
    /// The account's own nickname.
    pub nickname: String,
    /// The nickname the account uses inside the current group.
    #[serde(default)]
    pub display_name: String,
    /// The remark the host account assigned to this user.
    #[serde(default)]
    pub remark_name: String,
}

impl User {
    /// Creates a user with only an id and a nickname.
    pub fn new(uid: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            nickname: nickname.into(),
            ..Default::default()
        }
    }

    /// Sets the in-group display name (builder pattern).
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the remark name (builder pattern).
    pub fn with_remark_name(mut self, name: impl Into<String>) -> Self {
        self.remark_name = name.into();
        self
    }

    /// Best human readable name: remark, then display name, then nickname.
    pub fn preferred_name(&self) -> &str {
        self.name_candidates().next().unwrap_or(&self.nickname)
    }

    /// Non-empty names in lookup order: remark, display name, nickname.
    pub fn name_candidates(&self) -> impl Iterator<Item = &str> {
        [
            self.remark_name.as_str(),
            self.display_name.as_str(),
            self.nickname.as_str(),
        ]
        .into_iter()
        .filter(|name| !name.is_empty())
    }

    /// Name shown in a group: display name, falling back to nickname.
    pub fn group_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.nickname
        } else {
            &self.display_name
        }
    }
}

/// A group chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Protocol level group id.
    pub gid: String,
    /// Group name.
    pub name: String,
}

impl Group {
    /// Creates a group snapshot.
    pub fn new(gid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            gid: gid.into(),
            name: name.into(),
        }
    }
}

// ============================================================================
// Message Type
// ============================================================================

/// Content classification of an inbound message.
///
/// The numeric codes are the ones exchanged with remote extensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgType {
    /// Plain text.
    #[default]
    Text,
    /// Picture.
    Image,
    /// Voice clip.
    Voice,
    /// Video clip.
    Video,
    /// Sticker.
    Emoticon,
    /// Shared file or app card.
    App,
    /// System notification (joins, recalls, ...).
    System,
    /// Anything the transport could not classify.
    Other(i32),
}

impl MsgType {
    /// Returns the protocol code of this message type.
    pub fn code(self) -> i32 {
        match self {
            Self::Text => 1,
            Self::Image => 3,
            Self::Voice => 34,
            Self::Video => 43,
            Self::Emoticon => 47,
            Self::App => 49,
            Self::System => 10000,
            Self::Other(code) => code,
        }
    }

    /// Maps a protocol code back to a message type.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Text,
            3 => Self::Image,
            34 => Self::Voice,
            43 => Self::Video,
            47 => Self::Emoticon,
            49 => Self::App,
            10000 => Self::System,
            other => Self::Other(other),
        }
    }
}

// ============================================================================
// Inbound Message
// ============================================================================

/// One message delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message id, used for duplicate suppression.
    pub msg_id: String,
    /// The account that wrote the message.
    pub sender: User,
    /// The group the message was posted in; `None` for direct messages.
    pub group: Option<Group>,
    /// Raw text content.
    pub content: String,
    /// Content classification.
    pub msg_type: MsgType,
    /// Unix timestamp (seconds) the message was created.
    pub timestamp: i64,
    /// Account id explicitly mentioned by the message, if any.
    pub at_target: Option<String>,
    /// `true` when the host's own account sent this message.
    pub is_self: bool,
    /// `true` for system notifications.
    pub is_system: bool,
}

impl InboundMessage {
    /// Creates a text message posted by `sender` in `group`.
    pub fn text(
        msg_id: impl Into<String>,
        sender: User,
        group: Group,
        content: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            sender,
            group: Some(group),
            content: content.into(),
            msg_type: MsgType::Text,
            ..Default::default()
        }
    }

    /// Marks the message as mentioning `uid` (builder pattern).
    pub fn at(mut self, uid: impl Into<String>) -> Self {
        self.at_target = Some(uid.into());
        self
    }

    /// Returns `true` for text messages.
    pub fn is_text(&self) -> bool {
        self.msg_type == MsgType::Text
    }

    /// Group id, or an empty string for direct messages.
    pub fn gid(&self) -> &str {
        self.group.as_ref().map_or("", |g| g.gid.as_str())
    }

    /// Group name, or an empty string for direct messages.
    pub fn group_name(&self) -> &str {
        self.group.as_ref().map_or("", |g| g.name.as_str())
    }
}
