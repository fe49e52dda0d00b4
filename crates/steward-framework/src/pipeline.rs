//! The inbound message pipeline.
//!
//! A [`CommandRouter`] runs an ordered chain of [`Stage`]s over one shared
//! [`RouteContext`]:
//!
//! 1. Stages run in registration order
//! 2. A stage returning [`Flow::Stop`] ends the chain
//! 3. Whether the message was consumed is read from the context's
//!    `absorbed` flag afterwards
//!
//! ```rust,ignore
//! let router = CommandRouter::new()
//!     .with(DedupStage::new(store.clone()))
//!     .with(QuoteStage)
//!     .with(RecordStage::new(store.clone()))
//!     .with(CommandStage::new(plugins, tasks, services));
//!
//! let absorbed = router.route(message, transport).await;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use steward_core::{BoxedTransport, InboundMessage};
use tracing::{Instrument, Level, debug, span};

use crate::context::RouteContext;

/// What the router does after a stage ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &RouteContext) -> Flow;
}

/// Ordered chain of stages.
#[derive(Default, Clone)]
pub struct CommandRouter {
    stages: Vec<Arc<dyn Stage>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage.
    pub fn add(&mut self, stage: impl Stage) {
        self.stages.push(Arc::new(stage));
    }

    /// Appends a stage (builder pattern).
    pub fn with(mut self, stage: impl Stage) -> Self {
        self.add(stage);
        self
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Routes one message. Returns `true` if a stage absorbed it.
    pub async fn route(&self, message: InboundMessage, transport: BoxedTransport) -> bool {
        let span = span!(Level::DEBUG, "route", msg_id = %message.msg_id, gid = %message.gid());
        let ctx = RouteContext::new(message, transport);
        self.run(&ctx).instrument(span).await;
        ctx.is_absorbed()
    }

    async fn run(&self, ctx: &RouteContext) {
        for stage in &self.stages {
            if stage.run(ctx).await == Flow::Stop {
                debug!(stage = stage.name(), absorbed = ctx.is_absorbed(), "Routing stopped");
                return;
            }
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("CommandRouter").field("stages", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use steward_core::{Group, User};

    struct Counting {
        hits: Arc<AtomicUsize>,
        flow: Flow,
        absorb: bool,
    }

    #[async_trait]
    impl Stage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, ctx: &RouteContext) -> Flow {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if self.absorb {
                ctx.absorb();
            }
            self.flow
        }
    }

    fn message() -> InboundMessage {
        InboundMessage::text("m", User::new("u", "n"), Group::new("g", "G"), "hi")
    }

    #[tokio::test]
    async fn test_stop_ends_chain() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let router = CommandRouter::new()
            .with(Counting {
                hits: first.clone(),
                flow: Flow::Stop,
                absorb: true,
            })
            .with(Counting {
                hits: second.clone(),
                flow: Flow::Continue,
                absorb: false,
            });
        assert_eq!(router.stage_count(), 2);

        let transport = MockTransport::new(User::new("bot", "bot")).into_arc();
        assert!(router.route(message(), transport).await);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_stages_run_on_continue() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = CommandRouter::new();
        for _ in 0..3 {
            router.add(Counting {
                hits: hits.clone(),
                flow: Flow::Continue,
                absorb: false,
            });
        }

        let transport = MockTransport::new(User::new("bot", "bot")).into_arc();
        assert!(!router.route(message(), transport).await);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
