use async_trait::async_trait;
use steward_store::{MessageRecord, Store, history};
use tracing::warn;

use crate::context::RouteContext;
use crate::pipeline::{Flow, Stage};

/// Appends every user message to the history.
///
/// System notifications and the host's own messages are skipped; ids that
/// are already present are ignored.
#[derive(Debug, Clone)]
pub struct RecordStage {
    store: Store,
}

impl RecordStage {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Stage for RecordStage {
    fn name(&self) -> &'static str {
        "record"
    }

    async fn run(&self, ctx: &RouteContext) -> Flow {
        let msg = ctx.message();
        if msg.is_system || msg.is_self {
            return Flow::Continue;
        }
        let record = MessageRecord {
            msg_id: msg.msg_id.clone(),
            gid: msg.gid().to_string(),
            group_name: msg.group_name().to_string(),
            uid: msg.sender.uid.clone(),
            username: msg.sender.group_name().to_string(),
            msg_type: msg.msg_type.code(),
            content: msg.content.trim().to_string(),
            time: msg.timestamp,
        };
        if let Err(e) = self.store.transaction(|conn| history::record(conn, &record)) {
            warn!(msg_id = %msg.msg_id, error = %e, "Failed to record message");
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use steward_core::{Group, InboundMessage, User};

    #[tokio::test]
    async fn test_records_once() {
        let store = Store::open_in_memory().unwrap();
        let stage = RecordStage::new(store.clone());
        let transport = MockTransport::new(User::new("bot", "bot")).into_arc();
        let msg = InboundMessage::text("m1", User::new("u", "n"), Group::new("g", "G"), " hi ");

        for _ in 0..2 {
            let ctx = RouteContext::new(msg.clone(), transport.clone());
            assert_eq!(stage.run(&ctx).await, Flow::Continue);
        }
        assert_eq!(store.read(|c| history::count_for_group(c, "g")).unwrap(), 1);

        let mut system = msg;
        system.msg_id = "m2".into();
        system.is_system = true;
        stage.run(&RouteContext::new(system, transport)).await;
        assert_eq!(store.read(|c| history::count_for_group(c, "g")).unwrap(), 1);
    }
}
