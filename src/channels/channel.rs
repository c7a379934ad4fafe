//! Channel capability traits and shared types.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{ChannelError, PipelineError};
use crate::event::Event;

/// Lifecycle of a channel. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Idle,
    Starting,
    Active,
    Stopped,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Idle => "idle",
            ChannelState::Starting => "starting",
            ChannelState::Active => "active",
            ChannelState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How a channel acquires items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Persistent connection to the platform's real-time endpoint.
    Push,
    /// Fixed-interval polling of the platform API.
    Pull,
    /// Fabricated events, used when no live source is available.
    Synthetic,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Push => "push",
            Strategy::Pull => "pull",
            Strategy::Synthetic => "synthetic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a comment being replied to lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentScope {
    Room(String),
    Video(String),
}

impl CommentScope {
    pub fn id(&self) -> &str {
        match self {
            CommentScope::Room(id) | CommentScope::Video(id) => id,
        }
    }
}

/// Destination for normalized events. Implemented by the pipeline.
///
/// `process_event` must return without waiting for reply or CRM work.
pub trait EventSink: Send + Sync {
    fn process_event(&self, event: Event) -> Result<(), PipelineError>;
}

/// Sends composed replies back to the platform a channel is bound to.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Channel name used for routing replies.
    fn name(&self) -> &str;

    /// Post free-form text into the channel. Fails unless the channel is
    /// active.
    async fn send_message(&self, content: &str) -> Result<(), ChannelError>;

    /// Reply to one comment in a room or under a video.
    async fn send_comment_reply(
        &self,
        scope: &CommentScope,
        item_id: &str,
        content: &str,
    ) -> Result<(), ChannelError>;

    /// Answer a private message conversation.
    async fn send_private_message_reply(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<(), ChannelError>;
}

/// Point-in-time view of a channel for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub state: ChannelState,
    pub strategy: Option<Strategy>,
    pub room_id: Option<String>,
    pub video_id: Option<String>,
}

/// One acquisition unit bound to a platform and scope.
#[async_trait]
pub trait Channel: ReplySender {
    /// Choose an acquisition strategy and launch it. Only valid from `Idle`.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Halt every acquisition loop and release held connections.
    /// Calling it again after the first time is a no-op.
    async fn stop(&self) -> Result<(), ChannelError>;

    fn is_connected(&self) -> bool;

    fn state(&self) -> ChannelState;

    fn strategy(&self) -> Option<Strategy>;

    fn snapshot(&self) -> ChannelSnapshot;

    /// `"online"` while active, `"offline"` otherwise.
    fn status(&self) -> &'static str {
        if self.is_connected() { "online" } else { "offline" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ChannelState::Idle.to_string(), "idle");
        assert_eq!(ChannelState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_strategy_serializes_snake_case() {
        let json = serde_json::to_string(&Strategy::Synthetic).unwrap();
        assert_eq!(json, "\"synthetic\"");
    }

    #[test]
    fn test_comment_scope_id() {
        assert_eq!(CommentScope::Room("123".into()).id(), "123");
        assert_eq!(CommentScope::Video("v1".into()).id(), "v1");
    }
}
