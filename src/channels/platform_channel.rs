//! `PlatformChannel`: one platform + scope, driving exactly one acquisition
//! strategy at a time.
//!
//! Strategy selection in `start()`:
//!
//! ```text
//! push URL configured + platform has push + room id
//!     └─ connect ok ───────────────────────────────► Push
//!     └─ connect failed ─┐
//! credential + platform API + room/video id ◄──────┘
//!     └─ yes ──────────────────────────────────────► Pull
//!     └─ no  ──────────────────────────────────────► Synthetic
//! ```

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::channels::api::PlatformApi;
use crate::channels::channel::{
    Channel, ChannelSnapshot, ChannelState, CommentScope, EventSink, ReplySender, Strategy,
};
use crate::channels::platform::Platform;
use crate::channels::pull::{self, PullTarget};
use crate::channels::status_tracker::{ChannelStatus, ChannelStatusTracker};
use crate::channels::{push, synthetic};
use crate::config::DEFAULT_DOUYIN_API_BASE;
use crate::dedup::DedupStore;
use crate::error::ChannelError;
use crate::event::{Event, EventType};

/// Everything needed to build a channel.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub platform: Platform,
    pub room_id: Option<String>,
    pub video_id: Option<String>,
    pub credential: Option<SecretString>,
    pub api_base: String,
    /// `None` disables the push strategy.
    pub push_url: Option<String>,
    pub app_id: String,
    /// Overrides the per-target pull interval.
    pub pull_interval: Option<Duration>,
}

impl ChannelOptions {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            room_id: None,
            video_id: None,
            credential: None,
            api_base: DEFAULT_DOUYIN_API_BASE.to_string(),
            push_url: None,
            app_id: String::new(),
            pull_interval: None,
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into()).filter(|r| !r.is_empty());
        self
    }

    pub fn with_video(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into()).filter(|v| !v.is_empty());
        self
    }

    pub fn with_credential(mut self, token: SecretString) -> Self {
        self.credential = Some(token);
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into()).filter(|u| !u.is_empty());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval = Some(interval);
        self
    }
}

/// State shared between a channel and its acquisition tasks.
pub(crate) struct ChannelShared {
    pub name: String,
    pub platform: Platform,
    pub room_id: Option<String>,
    pub video_id: Option<String>,
    pub dedup: DedupStore,
    sink: Arc<dyn EventSink>,
    tracker: Option<Arc<ChannelStatusTracker>>,
    state: watch::Sender<ChannelState>,
}

impl ChannelShared {
    pub(crate) fn new(
        platform: Platform,
        room_id: Option<String>,
        video_id: Option<String>,
        sink: Arc<dyn EventSink>,
        tracker: Option<Arc<ChannelStatusTracker>>,
    ) -> Self {
        Self {
            name: platform.as_str().to_string(),
            platform,
            room_id,
            video_id,
            dedup: DedupStore::new(),
            sink,
            tracker,
            state: watch::Sender::new(ChannelState::Idle),
        }
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// New event attributed to this channel and tagged with `strategy`.
    pub(crate) fn event(
        &self,
        event_type: EventType,
        user_id: impl Into<String>,
        nickname: impl Into<String>,
        strategy: Strategy,
    ) -> Event {
        Event::new(event_type, self.name.clone(), user_id, nickname)
            .with_metadata("strategy", strategy.as_str())
    }

    /// Hand an event to the sink. Never blocks on downstream work.
    pub(crate) async fn emit(&self, event: Event) {
        if let Some(tracker) = &self.tracker {
            tracker.record_event(&self.name).await;
        }
        let event_id = event.id.clone();
        if let Err(e) = self.sink.process_event(event) {
            tracing::warn!(channel = %self.name, event_id = %event_id, error = %e, "Event rejected by pipeline");
        }
    }

    pub(crate) async fn record_error(&self, reason: &str) {
        if let Some(tracker) = &self.tracker {
            tracker.record_error(&self.name, reason).await;
        }
    }

    /// Terminal transition after an unrecoverable acquisition failure.
    pub(crate) async fn mark_failed(&self, reason: &str) {
        self.state.send_replace(ChannelState::Stopped);
        if let Some(tracker) = &self.tracker {
            tracker
                .set_status(&self.name, ChannelStatus::Error(reason.to_string()))
                .await;
        }
    }
}

/// Shutdown signal plus the tasks listening to it.
pub(crate) struct LoopSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl LoopSet {
    pub(crate) fn new() -> Self {
        Self {
            shutdown: watch::Sender::new(false),
            handles: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Signal every loop and wait for it to exit.
    pub(crate) async fn halt(self) {
        self.shutdown.send_replace(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Acquisition task ended abnormally");
            }
        }
    }
}

/// The running acquisition, one variant per strategy.
enum Acquisition {
    Push {
        loops: LoopSet,
        outbound: mpsc::Sender<String>,
    },
    Pull {
        loops: LoopSet,
    },
    Synthetic {
        loops: LoopSet,
    },
}

impl Acquisition {
    fn strategy(&self) -> Strategy {
        match self {
            Acquisition::Push { .. } => Strategy::Push,
            Acquisition::Pull { .. } => Strategy::Pull,
            Acquisition::Synthetic { .. } => Strategy::Synthetic,
        }
    }

    async fn halt(self) {
        match self {
            Acquisition::Push { loops, .. }
            | Acquisition::Pull { loops }
            | Acquisition::Synthetic { loops } => loops.halt().await,
        }
    }
}

/// A channel bound to one platform account and scope.
pub struct PlatformChannel {
    shared: Arc<ChannelShared>,
    options: ChannelOptions,
    api: Option<Arc<PlatformApi>>,
    acquisition: Mutex<Option<Acquisition>>,
    strategy: StdRwLock<Option<Strategy>>,
}

impl PlatformChannel {
    pub fn new(
        options: ChannelOptions,
        sink: Arc<dyn EventSink>,
        tracker: Option<Arc<ChannelStatusTracker>>,
    ) -> Self {
        let api = match (&options.credential, options.platform.has_open_api()) {
            (Some(token), true) => Some(Arc::new(PlatformApi::new(
                options.api_base.clone(),
                token.clone(),
            ))),
            _ => None,
        };
        let shared = Arc::new(ChannelShared::new(
            options.platform,
            options.room_id.clone(),
            options.video_id.clone(),
            sink,
            tracker,
        ));

        Self {
            shared,
            options,
            api,
            acquisition: Mutex::new(None),
            strategy: StdRwLock::new(None),
        }
    }

    pub fn platform(&self) -> Platform {
        self.shared.platform
    }

    /// Pull targets this channel would poll, or why pull is unavailable.
    fn pull_targets(&self) -> Result<(Arc<PlatformApi>, Vec<PullTarget>), &'static str> {
        let api = self.api.clone().ok_or(if self.options.platform.has_open_api() {
            "no credential"
        } else {
            "platform has no open API"
        })?;

        let mut targets = Vec::new();
        if let Some(room_id) = &self.shared.room_id {
            targets.push(PullTarget::LiveComments {
                room_id: room_id.clone(),
            });
            targets.push(PullTarget::PrivateMessages);
        }
        if let Some(video_id) = &self.shared.video_id {
            targets.push(PullTarget::VideoComments {
                video_id: video_id.clone(),
            });
        }
        if targets.is_empty() {
            return Err("no room or video id");
        }
        Ok((api, targets))
    }

    async fn launch(&self) -> Acquisition {
        let push_target = match (&self.options.push_url, &self.shared.room_id) {
            (Some(url), Some(room_id)) if self.shared.platform.has_push() => Some((url, room_id)),
            _ => None,
        };

        if let Some((url, room_id)) = push_target {
            match push::connect(
                &self.shared.name,
                url,
                room_id,
                &self.options.app_id,
                self.options.credential.as_ref(),
            )
            .await
            {
                Ok(stream) => {
                    let (loops, outbound) = push::spawn(Arc::clone(&self.shared), stream);
                    return Acquisition::Push { loops, outbound };
                }
                Err(e) => {
                    tracing::warn!(channel = %self.shared.name, error = %e, "Push connect failed, falling back");
                    self.shared.record_error(&e.to_string()).await;
                }
            }
        }

        match self.pull_targets() {
            Ok((api, targets)) => Acquisition::Pull {
                loops: pull::spawn(Arc::clone(&self.shared), api, targets, self.options.pull_interval),
            },
            Err(reason) => {
                tracing::info!(
                    channel = %self.shared.name,
                    reason,
                    strategy = "synthetic",
                    "No live source available, generating synthetic events"
                );
                Acquisition::Synthetic {
                    loops: synthetic::spawn(Arc::clone(&self.shared)),
                }
            }
        }
    }

    fn set_strategy(&self, strategy: Option<Strategy>) {
        let mut current = self.strategy.write().unwrap_or_else(|e| e.into_inner());
        *current = strategy;
    }

    fn require_api(&self) -> Result<&PlatformApi, ChannelError> {
        self.api.as_deref().ok_or_else(|| ChannelError::MissingCredential {
            name: self.shared.name.clone(),
        })
    }

    fn missing(&self, what: &'static str) -> ChannelError {
        ChannelError::MissingScope {
            name: self.shared.name.clone(),
            what,
        }
    }
}

#[async_trait]
impl ReplySender for PlatformChannel {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn send_message(&self, content: &str) -> Result<(), ChannelError> {
        if self.shared.state() != ChannelState::Active {
            return Err(ChannelError::NotConnected {
                name: self.shared.name.clone(),
            });
        }

        let outbound = match &*self.acquisition.lock().await {
            Some(Acquisition::Push { outbound, .. }) => Some(outbound.clone()),
            _ => None,
        };

        match outbound {
            Some(tx) => {
                let frame = json!({"type": "message", "content": content}).to_string();
                tx.send(frame).await.map_err(|_| ChannelError::NotConnected {
                    name: self.shared.name.clone(),
                })
            }
            None => {
                tracing::info!(channel = %self.shared.name, content, "Channel message (no live connection to write to)");
                Ok(())
            }
        }
    }

    async fn send_comment_reply(
        &self,
        scope: &CommentScope,
        item_id: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        if scope.id().is_empty() {
            return Err(self.missing(match scope {
                CommentScope::Room(_) => "room id",
                CommentScope::Video(_) => "video id",
            }));
        }
        if item_id.is_empty() {
            return Err(self.missing("comment id"));
        }
        let api = self.require_api()?;

        match scope {
            CommentScope::Room(room_id) => api.reply_live_comment(room_id, item_id, content).await?,
            CommentScope::Video(video_id) => {
                api.reply_video_comment(video_id, item_id, content).await?
            }
        }
        tracing::info!(channel = %self.shared.name, scope = scope.id(), comment_id = item_id, "Comment reply sent");
        Ok(())
    }

    async fn send_private_message_reply(
        &self,
        conversation_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        if conversation_id.is_empty() {
            return Err(self.missing("conversation id"));
        }
        let api = self.require_api()?;

        api.send_private_message(conversation_id, user_id, content)
            .await?;
        tracing::info!(channel = %self.shared.name, conversation_id, "Private message reply sent");
        Ok(())
    }
}

#[async_trait]
impl Channel for PlatformChannel {
    async fn start(&self) -> Result<(), ChannelError> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == ChannelState::Idle {
                *state = ChannelState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ChannelError::InvalidState {
                name: self.shared.name.clone(),
                action: "start",
                state: self.shared.state().to_string(),
            });
        }

        if let Some(tracker) = &self.shared.tracker {
            tracker.register_channel(&self.shared.name).await;
        }

        let acquisition = self.launch().await;
        let strategy = acquisition.strategy();

        let mut slot = self.acquisition.lock().await;
        // stop() may have run while we were connecting.
        let activated = self.shared.state.send_if_modified(|state| {
            if *state == ChannelState::Starting {
                *state = ChannelState::Active;
                true
            } else {
                false
            }
        });
        if !activated {
            drop(slot);
            acquisition.halt().await;
            return Err(ChannelError::InvalidState {
                name: self.shared.name.clone(),
                action: "start",
                state: self.shared.state().to_string(),
            });
        }
        *slot = Some(acquisition);
        drop(slot);

        self.set_strategy(Some(strategy));
        if let Some(tracker) = &self.shared.tracker {
            tracker.set_strategy(&self.shared.name, strategy).await;
            tracker
                .set_status(&self.shared.name, ChannelStatus::Connected)
                .await;
        }

        tracing::info!(
            channel = %self.shared.name,
            strategy = %strategy,
            room_id = self.shared.room_id.as_deref().unwrap_or(""),
            video_id = self.shared.video_id.as_deref().unwrap_or(""),
            "Channel started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        let previous = self.shared.state.send_replace(ChannelState::Stopped);
        let acquisition = self.acquisition.lock().await.take();

        if let Some(acquisition) = acquisition {
            acquisition.halt().await;
        }

        if previous != ChannelState::Stopped {
            if let Some(tracker) = &self.shared.tracker {
                tracker
                    .set_status(&self.shared.name, ChannelStatus::Disconnected)
                    .await;
            }
            tracing::info!(channel = %self.shared.name, "Channel stopped");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == ChannelState::Active
    }

    fn state(&self) -> ChannelState {
        self.shared.state()
    }

    fn strategy(&self) -> Option<Strategy> {
        *self.strategy.read().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            name: self.shared.name.clone(),
            state: self.shared.state(),
            strategy: self.strategy(),
            room_id: self.shared.room_id.clone(),
            video_id: self.shared.video_id.clone(),
        }
    }
}

impl Drop for PlatformChannel {
    fn drop(&mut self) {
        // Loops exit once the shutdown sender inside LoopSet is dropped.
        self.shared.state.send_replace(ChannelState::Stopped);
    }
}
