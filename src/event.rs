//! Canonical interaction event shared by every channel.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of interaction observed on a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Enter,
    Comment,
    Like,
    Follow,
    Gift,
    VideoComment,
    PrivateMessage,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Enter => "enter",
            EventType::Comment => "comment",
            EventType::Like => "like",
            EventType::Follow => "follow",
            EventType::Gift => "gift",
            EventType::VideoComment => "video_comment",
            EventType::PrivateMessage => "private_message",
        }
    }

    /// Types whose events are meaningless without text.
    pub fn requires_content(self) -> bool {
        matches!(
            self,
            EventType::Comment | EventType::VideoComment | EventType::PrivateMessage
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "enter" => Ok(EventType::Enter),
            "comment" => Ok(EventType::Comment),
            "like" => Ok(EventType::Like),
            "follow" => Ok(EventType::Follow),
            "gift" => Ok(EventType::Gift),
            "video_comment" => Ok(EventType::VideoComment),
            "private_message" => Ok(EventType::PrivateMessage),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// One normalized interaction, produced by a channel and consumed once by
/// the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    pub user_id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    /// Create an event stamped with a fresh id and the current time.
    pub fn new(
        event_type: EventType,
        channel: impl Into<String>,
        user_id: impl Into<String>,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            channel: channel.into(),
            room_id: None,
            video_id: None,
            user_id: user_id.into(),
            nickname: nickname.into(),
            avatar: None,
            content: None,
            created_at: chrono::Utc::now().timestamp(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = non_empty(room_id.into());
        self
    }

    pub fn with_video(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = non_empty(video_id.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = non_empty(avatar.into());
        self
    }

    /// Upstream creation time, when the platform reports one.
    pub fn with_created_at(mut self, created_at: i64) -> Self {
        if created_at > 0 {
            self.created_at = created_at;
        }
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Text content, treating an empty string the same as absent.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }

    /// Content-bearing types must carry non-empty text.
    pub fn is_well_formed(&self) -> bool {
        !self.event_type.requires_content() || self.text().is_some()
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn is_synthetic(&self) -> bool {
        self.metadata
            .get("synthetic")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trips_through_str() {
        for t in [
            EventType::Enter,
            EventType::Comment,
            EventType::Like,
            EventType::Follow,
            EventType::Gift,
            EventType::VideoComment,
            EventType::PrivateMessage,
        ] {
            assert_eq!(t.as_str().parse::<EventType>().unwrap(), t);
        }
        assert!("superchat".parse::<EventType>().is_err());
    }

    #[test]
    fn test_comment_without_content_is_malformed() {
        let evt = Event::new(EventType::Comment, "douyin", "u1", "Alice").with_room("123");
        assert!(!evt.is_well_formed());

        let evt = evt.with_content("");
        assert!(!evt.is_well_formed());

        let evt = evt.with_content("how much?");
        assert!(evt.is_well_formed());
    }

    #[test]
    fn test_enter_does_not_need_content() {
        let evt = Event::new(EventType::Enter, "douyin", "u1", "Alice");
        assert!(evt.is_well_formed());
    }

    #[test]
    fn test_empty_scope_is_dropped() {
        let evt = Event::new(EventType::Enter, "douyin", "u1", "Alice")
            .with_room("")
            .with_video("v9");
        assert_eq!(evt.room_id, None);
        assert_eq!(evt.video_id.as_deref(), Some("v9"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Event::new(EventType::Like, "wechat", "u1", "A");
        let b = Event::new(EventType::Like, "wechat", "u1", "A");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_serializes_type_field() {
        let evt = Event::new(EventType::VideoComment, "douyin", "u1", "A")
            .with_video("v1")
            .with_content("nice")
            .with_metadata("comment_id", "c1");
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "video_comment");
        assert_eq!(json["metadata"]["comment_id"], "c1");
        assert!(json.get("room_id").is_none());
    }

    #[test]
    fn test_metadata_str_ignores_empty_values() {
        let evt = Event::new(EventType::Comment, "douyin", "u1", "A")
            .with_metadata("comment_id", "")
            .with_metadata("synthetic", true);
        assert_eq!(evt.metadata_str("comment_id"), None);
        assert!(evt.is_synthetic());
    }
}
