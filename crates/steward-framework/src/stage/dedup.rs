use async_trait::async_trait;
use steward_store::{Store, history};
use tracing::{debug, warn};

use crate::context::RouteContext;
use crate::pipeline::{Flow, Stage};

/// Drops messages whose id is already in the history.
///
/// System notifications and the host's own messages are never checked.
#[derive(Debug, Clone)]
pub struct DedupStage {
    store: Store,
}

impl DedupStage {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for DedupStage {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn run(&self, ctx: &RouteContext) -> Flow {
        let msg = ctx.message();
        if msg.is_system || msg.is_self {
            return Flow::Continue;
        }
        match self.store.read(|conn| history::contains(conn, &msg.msg_id)) {
            Ok(true) => {
                debug!(msg_id = %msg.msg_id, "Skipping duplicate message");
                ctx.absorb();
                Flow::Stop
            }
            Ok(false) => Flow::Continue,
            Err(e) => {
                warn!(msg_id = %msg.msg_id, error = %e, "History lookup failed");
                Flow::Continue
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use steward_core::{Group, InboundMessage, User};
    use steward_store::MessageRecord;

    fn context(msg: InboundMessage) -> RouteContext {
        RouteContext::new(msg, MockTransport::new(User::new("bot", "bot")).into_arc())
    }

    #[tokio::test]
    async fn test_recorded_id_is_absorbed() {
        let store = Store::open_in_memory().unwrap();
        let stage = DedupStage::new(store.clone());
        let msg = InboundMessage::text("m1", User::new("u", "n"), Group::new("g", "G"), "#天气");

        let ctx = context(msg.clone());
        assert_eq!(stage.run(&ctx).await, Flow::Continue);

        let record = MessageRecord {
            msg_id: "m1".into(),
            ..Default::default()
        };
        store.transaction(|c| history::record(c, &record)).unwrap();

        let ctx = context(msg.clone());
        assert_eq!(stage.run(&ctx).await, Flow::Stop);
        assert!(ctx.is_absorbed());

        let mut own = msg;
        own.is_self = true;
        assert_eq!(stage.run(&context(own)).await, Flow::Continue);
    }
}
