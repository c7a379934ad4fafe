//! Channel manager: one running channel per platform tag.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::RwLock;

use crate::channels::channel::{Channel, ChannelSnapshot, EventSink, ReplySender};
use crate::channels::platform::Platform;
use crate::channels::platform_channel::{ChannelOptions, PlatformChannel};
use crate::channels::status_tracker::ChannelStatusTracker;
use crate::config::Config;
use crate::error::ChannelError;
use crate::pipeline::ReplyRouter;

/// Platform endpoints and default scopes applied to every new channel.
#[derive(Debug, Clone, Default)]
pub struct ManagerSettings {
    pub api_base: String,
    pub push_url: Option<String>,
    pub app_id: String,
    /// Default room per platform tag.
    pub room_ids: HashMap<String, String>,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_base: config.platforms.douyin_api_base.clone(),
            push_url: config.platforms.douyin_push_url.clone(),
            app_id: config.oauth.app_id.clone(),
            room_ids: config.platforms.room_ids.clone(),
        }
    }
}

/// Registry of started channels, keyed by platform tag.
///
/// Starting a tag that is already present replaces the stored channel.
/// The replaced instance is not stopped here; its acquisition loops end
/// when the last reference to it is dropped.
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<PlatformChannel>>>,
    sink: Arc<dyn EventSink>,
    replies: Arc<ReplyRouter>,
    tracker: Arc<ChannelStatusTracker>,
    settings: ManagerSettings,
}

impl ChannelManager {
    pub fn new(
        sink: Arc<dyn EventSink>,
        replies: Arc<ReplyRouter>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            sink,
            replies,
            tracker: Arc::new(ChannelStatusTracker::new()),
            settings,
        }
    }

    pub fn tracker(&self) -> Arc<ChannelStatusTracker> {
        Arc::clone(&self.tracker)
    }

    /// Options for `platform` prefilled from the manager settings.
    pub fn channel_options(&self, platform: Platform) -> ChannelOptions {
        let mut options = ChannelOptions::new(platform).with_app_id(self.settings.app_id.clone());
        if !self.settings.api_base.is_empty() {
            options = options.with_api_base(self.settings.api_base.clone());
        }
        if let Some(url) = &self.settings.push_url {
            options = options.with_push_url(url.clone());
        }
        if let Some(room_id) = self.settings.room_ids.get(platform.as_str()) {
            options = options.with_room(room_id.clone());
        }
        options
    }

    /// Create and start a channel for `tag` using the default scope.
    pub async fn start_channel(&self, tag: &str) -> Result<(), ChannelError> {
        let platform: Platform = tag.parse()?;
        self.start_with(self.channel_options(platform)).await
    }

    /// Start a channel for an authorized account.
    pub async fn start_for_account(
        &self,
        platform: Platform,
        token: SecretString,
        room_id: Option<String>,
        video_id: Option<String>,
    ) -> Result<(), ChannelError> {
        let mut options = self.channel_options(platform).with_credential(token);
        if let Some(room_id) = room_id {
            options = options.with_room(room_id);
        }
        if let Some(video_id) = video_id {
            options = options.with_video(video_id);
        }
        self.start_with(options).await
    }

    /// Build, start and store a channel from explicit options.
    pub async fn start_with(&self, options: ChannelOptions) -> Result<(), ChannelError> {
        let tag = options.platform.as_str().to_string();
        let channel = Arc::new(PlatformChannel::new(
            options,
            Arc::clone(&self.sink),
            Some(Arc::clone(&self.tracker)),
        ));

        // Connecting may take a while; the table lock is only held to store.
        channel.start().await?;

        let sender: Arc<dyn ReplySender> = channel.clone();
        self.replies.register(&sender).await;

        let replaced = self.channels.write().await.insert(tag.clone(), channel);
        if replaced.is_some() {
            tracing::warn!(channel = %tag, "Replaced a running channel without stopping it");
        }
        self.replies.prune().await;
        Ok(())
    }

    pub async fn get(&self, tag: &str) -> Option<Arc<PlatformChannel>> {
        self.channels.read().await.get(tag).cloned()
    }

    /// Stop one channel. It stays in the table and reports "offline".
    pub async fn stop_channel(&self, tag: &str) -> Result<(), ChannelError> {
        let channel = self
            .get(tag)
            .await
            .ok_or_else(|| ChannelError::NotConnected {
                name: tag.to_string(),
            })?;
        channel.stop().await
    }

    /// Stop every stored channel. Individual failures are collected, not
    /// fatal.
    pub async fn stop_all(&self) -> Vec<(String, ChannelError)> {
        let channels: Vec<(String, Arc<PlatformChannel>)> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(tag, channel)| (tag.clone(), Arc::clone(channel)))
            .collect();

        let mut failures = Vec::new();
        for (tag, channel) in channels {
            if let Err(e) = channel.stop().await {
                tracing::error!(channel = %tag, error = %e, "Failed to stop channel");
                failures.push((tag, e));
            }
        }
        tracing::info!(failed = failures.len(), "All channels stopped");
        failures
    }

    /// Platform tag → "online" / "offline".
    pub async fn get_status(&self) -> BTreeMap<String, String> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(tag, channel)| (tag.clone(), channel.status().to_string()))
            .collect()
    }

    pub async fn snapshots(&self) -> Vec<ChannelSnapshot> {
        let mut snapshots: Vec<ChannelSnapshot> = self
            .channels
            .read()
            .await
            .values()
            .map(|channel| channel.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channels::channel::{ChannelState, Strategy};
    use crate::channels::test_support::RecordingSink;

    fn manager() -> (ChannelManager, Arc<ReplyRouter>) {
        let replies = Arc::new(ReplyRouter::new());
        let settings = ManagerSettings {
            room_ids: HashMap::from([("douyin".to_string(), "123".to_string())]),
            ..ManagerSettings::default()
        };
        let manager = ChannelManager::new(
            Arc::new(RecordingSink::default()),
            Arc::clone(&replies),
            settings,
        );
        (manager, replies)
    }

    #[tokio::test]
    async fn test_unknown_tag_is_rejected() {
        let (manager, _) = manager();
        let err = manager.start_channel("tiktok").await.unwrap_err();
        assert!(matches!(err, ChannelError::UnsupportedPlatform(tag) if tag == "tiktok"));
        assert!(manager.get_status().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_all() {
        let (manager, replies) = manager();
        manager.start_channel("douyin").await.unwrap();
        manager.start_channel("wechat").await.unwrap();

        let status = manager.get_status().await;
        assert_eq!(
            status,
            BTreeMap::from([
                ("douyin".to_string(), "online".to_string()),
                ("wechat".to_string(), "online".to_string()),
            ])
        );
        assert!(replies.get("douyin").await.is_some());

        let douyin = manager.get("douyin").await.unwrap();
        assert_eq!(douyin.snapshot().room_id.as_deref(), Some("123"));
        assert_eq!(douyin.strategy(), Some(Strategy::Synthetic));

        assert!(manager.stop_all().await.is_empty());
        let status = manager.get_status().await;
        assert!(status.values().all(|s| s == "offline"));
        assert_eq!(douyin.state(), ChannelState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_replaces_stored_channel() {
        let (manager, _) = manager();
        manager.start_channel("kuaishou").await.unwrap();
        let first = manager.get("kuaishou").await.unwrap();

        manager.start_channel("kuaishou").await.unwrap();
        let second = manager.get("kuaishou").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        // The old instance is only released, not stopped by the manager.
        assert_eq!(first.state(), ChannelState::Active);
        assert_eq!(manager.get_status().await.len(), 1);
        first.stop().await.unwrap();
        assert_eq!(second.state(), ChannelState::Active);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_unknown_channel() {
        let (manager, _) = manager();
        assert!(manager.stop_channel("douyin").await.is_err());
    }

    #[tokio::test]
    async fn test_tracker_sees_started_channels() {
        let (manager, _) = manager();
        manager.start_channel("xiaohongshu").await.unwrap();
        let info = manager
            .tracker()
            .get_channel_status("xiaohongshu")
            .await
            .unwrap();
        assert_eq!(info.status, "connected");
        assert_eq!(info.strategy, Some(Strategy::Synthetic));
        manager.stop_all().await;
    }
}
