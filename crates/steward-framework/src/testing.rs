//! Test doubles shared across the crate's unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use steward_core::{ChatTransport, Group, Media, Reply, TransportResult, User};

/// Transport that records every send.
#[derive(Default)]
pub struct MockTransport {
    me: User,
    members: HashMap<String, Vec<User>>,
    sent: Mutex<Vec<(String, Reply)>>,
}

impl MockTransport {
    pub fn new(me: User) -> Self {
        Self {
            me,
            ..Default::default()
        }
    }

    pub fn with_members(mut self, gid: &str, members: Vec<User>) -> Self {
        self.members.insert(gid.to_string(), members);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Everything sent so far as `(group, reply)`.
    pub fn sent(&self) -> Vec<(String, Reply)> {
        self.sent.lock().clone()
    }

    /// Text replies sent so far.
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(_, r)| r.as_text().map(str::to_string))
            .collect()
    }

    fn push(&self, gid: &str, reply: Reply) -> TransportResult<String> {
        let mut sent = self.sent.lock();
        sent.push((gid.to_string(), reply));
        Ok(format!("sent-{}", sent.len()))
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    fn alive(&self) -> bool {
        true
    }

    async fn current_user(&self) -> TransportResult<User> {
        Ok(self.me.clone())
    }

    async fn groups(&self, _force_refresh: bool) -> TransportResult<Vec<Group>> {
        Ok(self
            .members
            .keys()
            .map(|gid| Group::new(gid.clone(), gid.clone()))
            .collect())
    }

    async fn members(&self, group_id: &str) -> TransportResult<Vec<User>> {
        Ok(self.members.get(group_id).cloned().unwrap_or_default())
    }

    async fn send_text(&self, group_id: &str, text: &str) -> TransportResult<String> {
        self.push(group_id, Reply::text(text))
    }

    async fn send_image(
        &self,
        group_id: &str,
        media: &Media,
        filename: &str,
    ) -> TransportResult<String> {
        self.push(
            group_id,
            Reply::Image {
                media: media.clone(),
                filename: filename.to_string(),
            },
        )
    }

    async fn send_video(
        &self,
        group_id: &str,
        media: &Media,
        filename: &str,
    ) -> TransportResult<String> {
        self.push(
            group_id,
            Reply::Video {
                media: media.clone(),
                filename: filename.to_string(),
            },
        )
    }

    async fn send_file(
        &self,
        group_id: &str,
        media: &Media,
        filename: &str,
    ) -> TransportResult<String> {
        self.push(
            group_id,
            Reply::File {
                media: media.clone(),
                filename: filename.to_string(),
            },
        )
    }
}
