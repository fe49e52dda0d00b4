//! Per-event routing context.
//!
//! One [`RouteContext`] is created for every inbound message and shared by
//! all stages of the [`CommandRouter`](crate::CommandRouter). It holds:
//!
//! - the message and the transport it arrived on
//! - the `absorbed` flag, set by any stage that consumed the message
//! - a typed state map stages use to hand data down the chain (for example
//!   the [`Quote`] parsed by the quote stage)

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use steward_core::{BoxedTransport, InboundMessage, Reply, User};
use tracing::warn;

/// A quoted message split out of an inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    /// The new text written below the quote.
    pub body: String,
    /// The quoted text, without the author prefix.
    pub snippet: String,
    /// Member the quoted text was attributed to.
    pub author: User,
}

/// Shared state for one routing cycle.
pub struct RouteContext {
    message: InboundMessage,
    transport: BoxedTransport,
    /// Set by any stage that consumed the message.
    absorbed: AtomicBool,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl RouteContext {
    pub fn new(message: InboundMessage, transport: BoxedTransport) -> Self {
        Self {
            message,
            transport,
            absorbed: AtomicBool::new(false),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn message(&self) -> &InboundMessage {
        &self.message
    }

    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    /// Marks the message as consumed.
    pub fn absorb(&self) {
        self.absorbed.store(true, Ordering::SeqCst);
    }

    pub fn is_absorbed(&self) -> bool {
        self.absorbed.load(Ordering::SeqCst)
    }

    // ─── State ───────────────────────────────────────────────────────────────

    /// Stores a value; one per type, later calls overwrite.
    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.lock().contains_key(&TypeId::of::<T>())
    }

    /// The quote parsed from this message, if any.
    pub fn quote(&self) -> Option<Quote> {
        self.get_state::<Quote>()
    }

    // ─── Replies ─────────────────────────────────────────────────────────────

    /// Sends `reply` to the originating group. Failures are logged.
    pub async fn reply(&self, reply: Reply) {
        let gid = self.message.gid();
        if let Err(e) = self.transport.send(gid, &reply).await {
            warn!(msg_id = %self.message.msg_id, gid = %gid, error = %e, "Failed to send reply");
        }
    }

    pub async fn reply_text(&self, text: impl Into<String>) {
        self.reply(Reply::text(text)).await;
    }
}

impl std::fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("message", &self.message)
            .field("absorbed", &self.is_absorbed())
            .finish_non_exhaustive()
    }
}
