//! The chat transport seam.
//!
//! This module defines [`ChatTransport`], the only interface Steward uses to
//! reach a messaging account.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::event::{Group, User};
use crate::message::{Media, Reply};

/// A logged-in messaging account.
///
/// A transport:
/// - Reports whether the account is still online
/// - Enumerates groups and their members (optionally bypassing its cache)
/// - Sends text and media into a group, returning the new message id
///
/// Inbound events are pushed by the transport into
/// `StewardRuntime::handle_event`; this trait only covers the outbound half.
///
/// # API Design
///
/// - `send_*`: one method per payload kind, mirroring the protocol
/// - `send`: convenience dispatch over a [`Reply`]
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// Returns `true` while the account is logged in.
    fn alive(&self) -> bool;

    /// Returns the host's own account.
    async fn current_user(&self) -> TransportResult<User>;

    /// Lists the groups the account belongs to.
    ///
    /// `force_refresh` bypasses any cached roster.
    async fn groups(&self, force_refresh: bool) -> TransportResult<Vec<Group>>;

    /// Lists the members of a group.
    async fn members(&self, group_id: &str) -> TransportResult<Vec<User>>;

    /// Sends a text message.
    async fn send_text(&self, group_id: &str, text: &str) -> TransportResult<String>;

    /// Sends a picture.
    async fn send_image(
        &self,
        group_id: &str,
        media: &Media,
        filename: &str,
    ) -> TransportResult<String>;

    /// Sends a video clip.
    async fn send_video(
        &self,
        group_id: &str,
        media: &Media,
        filename: &str,
    ) -> TransportResult<String>;

    /// Sends a file attachment.
    async fn send_file(
        &self,
        group_id: &str,
        media: &Media,
        filename: &str,
    ) -> TransportResult<String>;

    /// Sends any [`Reply`] by dispatching to the matching `send_*` method.
    async fn send(&self, group_id: &str, reply: &Reply) -> TransportResult<String> {
        match reply {
            Reply::Text(text) => self.send_text(group_id, text).await,
            Reply::Image { media, filename } => self.send_image(group_id, media, filename).await,
            Reply::Video { media, filename } => self.send_video(group_id, media, filename).await,
            Reply::File { media, filename } => self.send_file(group_id, media, filename).await,
        }
    }
}

/// A shared transport trait object.
pub type BoxedTransport = Arc<dyn ChatTransport>;
