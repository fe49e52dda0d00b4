//! Command parsing helpers and the admin grammars.
//!
//! - [`split`]: tokenizing of command arguments
//! - [`admin`]: the OTP guarded `插件`, `定时任务` and `禁用词` families
//!
//! Unmatched commands can be handed to a [`CommandRelay`], for example an
//! upstream bot that knows more commands than this host.

pub mod admin;
pub mod split;

pub use admin::{KeywordAdmin, PluginAdmin, TaskAdmin};
pub use split::{shell_split, split_head};

use async_trait::async_trait;
use steward_core::InboundMessage;

/// Receives commands no plugin handled.
#[async_trait]
pub trait CommandRelay: Send + Sync + 'static {
    /// Forwards `command` (keyword and arguments joined by a space).
    /// Returns `true` if the relay took it.
    async fn relay(&self, message: &InboundMessage, command: &str) -> bool;
}
