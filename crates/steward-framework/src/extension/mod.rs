//! Extensions: independently loadable units of behavior.
//!
//! An [`Extension`] is produced by a [`CodeLoader`] from raw source text and
//! lives inside a registry:
//!
//! - [`PluginRegistry`](crate::registry::PluginRegistry) binds plugins to
//!   chat keywords.
//! - [`TaskRegistry`](crate::registry::TaskRegistry) binds tasks to cron
//!   schedules.
//!
//! Each call receives an [`Invocation`] describing what triggered it. Replies
//! are pushed into the invocation's outbox and delivered by the host after
//! `handle` returns.
//!
//! ```rust,ignore
//! let ext = loader.load("weather", &source).await?;
//! let inv = Arc::new(Invocation::message(msg, "天气", vec!["北京".into()], &services));
//! if ext.handle(inv.clone()).await? {
//!     for reply in inv.take_replies() { /* deliver */ }
//! }
//! ```

mod instance;
pub mod loader;
pub mod lua;
pub mod remote;
pub mod source;

pub use instance::{Instance, Lease};
pub use loader::{CodeLoader, SourceLoader};
pub use lua::LuaLoader;
pub use remote::RemoteLoader;
pub use source::{Source, SourceFetcher};

use std::sync::Arc;

use async_trait::async_trait;
use md5::{Digest, Md5};
use parking_lot::Mutex;
use steward_core::{InboundMessage, Reply};
use steward_store::{DistributedLock, Store};

use crate::error::ExtensionResult;

// =============================================================================
// Extension trait
// =============================================================================

/// What an extension declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionInfo {
    /// Default keyword for plugins. Ignored for tasks.
    pub trigger_hint: String,
    /// Free-form description shown by `help` and list commands.
    pub description: String,
}

/// A loaded extension.
///
/// `init` and `destroy` are synchronous: registries call `init` inside the
/// binding transaction, so an extension that creates its own tables either
/// fully succeeds together with the binding or not at all.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    /// Stable identity, derived from the declared package name.
    fn id(&self) -> &str;

    /// Lowercase hex MD5 of the source text.
    fn source_hash(&self) -> &str;

    /// Declared trigger hint and description.
    fn info(&self) -> ExtensionInfo;

    /// Prepares persistent state. Called once per loaded instance.
    fn init(&self, _store: &Store) -> ExtensionResult<()> {
        Ok(())
    }

    /// Releases state. Called at most once, after the last in-flight call.
    fn destroy(&self, _store: &Store) -> ExtensionResult<()> {
        Ok(())
    }

    /// Handles one invocation. Returns `true` if it was handled.
    async fn handle(&self, invocation: Arc<Invocation>) -> ExtensionResult<bool>;

    /// Returns `true` if `other` has the same id and source hash.
    fn same_as(&self, other: &dyn Extension) -> bool {
        self.id() == other.id() && self.source_hash() == other.source_hash()
    }
}

/// A shared extension trait object.
pub type BoxedExtension = Arc<dyn Extension>;

impl std::fmt::Debug for dyn Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.id())
            .field("source_hash", &self.source_hash())
            .finish()
    }
}

/// Lowercase hex MD5 of `source`.
pub fn source_hash(source: &str) -> String {
    hex::encode(Md5::digest(source.as_bytes()))
}

// =============================================================================
// Host services
// =============================================================================

/// Host facilities handed to every invocation.
#[derive(Debug, Clone)]
pub struct HostServices {
    pub store: Store,
    pub lock: DistributedLock,
}

impl HostServices {
    /// Creates services around `store`, with a wall-clock lock manager.
    pub fn new(store: Store) -> Self {
        let lock = DistributedLock::new(store.clone());
        Self { store, lock }
    }
}

// =============================================================================
// Invocation
// =============================================================================

/// What caused an invocation.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A chat command.
    Message(InboundMessage),
    /// A cron schedule firing for `target`.
    Schedule { target: String },
}

/// Everything an extension sees during one `handle` call.
#[derive(Debug)]
pub struct Invocation {
    trigger: Trigger,
    keyword: String,
    params: Vec<String>,
    services: HostServices,
    outbox: Mutex<Vec<Reply>>,
}

impl Invocation {
    /// Creates an invocation for a chat command.
    pub fn message(
        message: InboundMessage,
        keyword: impl Into<String>,
        params: Vec<String>,
        services: &HostServices,
    ) -> Self {
        Self {
            trigger: Trigger::Message(message),
            keyword: keyword.into(),
            params,
            services: services.clone(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Creates an invocation for task `task_id` firing on behalf of `target`.
    pub fn schedule(
        task_id: impl Into<String>,
        target: impl Into<String>,
        services: &HostServices,
    ) -> Self {
        Self {
            trigger: Trigger::Schedule {
                target: target.into(),
            },
            keyword: task_id.into(),
            params: Vec::new(),
            services: services.clone(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// The inbound message, for chat triggered invocations.
    pub fn message_ref(&self) -> Option<&InboundMessage> {
        match &self.trigger {
            Trigger::Message(msg) => Some(msg),
            Trigger::Schedule { .. } => None,
        }
    }

    /// Keyword that matched, or the task id for scheduled runs.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Parameters joined by single spaces.
    pub fn text(&self) -> String {
        self.params.join(" ")
    }

    /// Group the replies go to: the message's group or the schedule target.
    pub fn target(&self) -> &str {
        match &self.trigger {
            Trigger::Message(msg) => msg.gid(),
            Trigger::Schedule { target } => target,
        }
    }

    pub fn store(&self) -> &Store {
        &self.services.store
    }

    pub fn lock(&self) -> &DistributedLock {
        &self.services.lock
    }

    /// Queues a reply for delivery after the call returns.
    pub fn reply(&self, reply: Reply) {
        self.outbox.lock().push(reply);
    }

    /// Drains the queued replies.
    pub fn take_replies(&self) -> Vec<Reply> {
        std::mem::take(&mut *self.outbox.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::{Group, User};

    #[test]
    fn test_source_hash_is_lower_hex_md5() {
        assert_eq!(source_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(source_hash("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_invocation_target_and_outbox() {
        let services = HostServices::new(Store::open_in_memory().unwrap());
        let sender = User::new("u", "n");
        let msg = InboundMessage::text("m1", sender, Group::new("g1", "G"), "#天气 北京");
        let params = vec!["北京".into(), "今天".into()];
        let inv = Invocation::message(msg, "天气", params, &services);
        assert_eq!(inv.target(), "g1");
        assert_eq!(inv.text(), "北京 今天");

        inv.reply(Reply::text("晴"));
        assert_eq!(inv.take_replies(), vec![Reply::text("晴")]);
        assert!(inv.take_replies().is_empty());

        let scheduled = Invocation::schedule("ping", "g2", &services);
        assert_eq!(scheduled.target(), "g2");
        assert!(scheduled.message_ref().is_none());
    }
}
