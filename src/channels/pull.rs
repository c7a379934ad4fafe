//! Pull strategy: fixed-interval polling of the platform API.
//!
//! Each target re-fetches the latest page on every tick, so consecutive
//! pages overlap. Items pass through the channel's `DedupStore` and only
//! first observations become events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::channels::api::PlatformApi;
use crate::channels::channel::Strategy;
use crate::channels::platform_channel::{ChannelShared, LoopSet};
use crate::dedup::{DedupKey, DedupNamespace};
use crate::error::ChannelError;
use crate::event::EventType;

/// One upstream collection polled by its own loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PullTarget {
    LiveComments { room_id: String },
    VideoComments { video_id: String },
    PrivateMessages,
}

impl PullTarget {
    pub(crate) fn interval(&self) -> Duration {
        match self {
            PullTarget::LiveComments { .. } => Duration::from_secs(5),
            PullTarget::VideoComments { .. } | PullTarget::PrivateMessages => {
                Duration::from_secs(10)
            }
        }
    }

    pub(crate) fn page_size(&self) -> u32 {
        match self {
            PullTarget::LiveComments { .. } => 50,
            PullTarget::VideoComments { .. } | PullTarget::PrivateMessages => 20,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            PullTarget::LiveComments { .. } => "live_comments",
            PullTarget::VideoComments { .. } => "video_comments",
            PullTarget::PrivateMessages => "private_messages",
        }
    }
}

/// Start one loop per target.
pub(crate) fn spawn(
    shared: Arc<ChannelShared>,
    api: Arc<PlatformApi>,
    targets: Vec<PullTarget>,
    interval: Option<Duration>,
) -> LoopSet {
    let mut loops = LoopSet::new();
    for target in targets {
        let shutdown = loops.subscribe();
        loops.push(tokio::spawn(run(
            Arc::clone(&shared),
            Arc::clone(&api),
            interval.unwrap_or_else(|| target.interval()),
            target,
            shutdown,
        )));
    }
    loops
}

async fn run(
    shared: Arc<ChannelShared>,
    api: Arc<PlatformApi>,
    period: Duration,
    target: PullTarget,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(channel = %shared.name, target = target.label(), ?period, "Pull loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = shutdown.changed() => break,
            result = poll_once(&shared, &api, &target) => result,
        };

        match result {
            Ok(0) => {}
            Ok(emitted) => {
                tracing::debug!(channel = %shared.name, target = target.label(), emitted, "Pulled new items");
            }
            Err(e) => {
                tracing::warn!(channel = %shared.name, target = target.label(), error = %e, "Pull tick failed");
                shared.record_error(&e.to_string()).await;
            }
        }
    }

    tracing::debug!(channel = %shared.name, target = target.label(), "Pull loop stopped");
}

/// Fetch the latest page for `target` and emit every item not seen before.
/// Returns the number of events emitted.
pub(crate) async fn poll_once(
    shared: &ChannelShared,
    api: &PlatformApi,
    target: &PullTarget,
) -> Result<usize, ChannelError> {
    let mut emitted = 0;

    match target {
        PullTarget::LiveComments { room_id } | PullTarget::VideoComments { video_id: room_id } => {
            if room_id.is_empty() {
                return Ok(0);
            }
            let (page, namespace, event_type) = match target {
                PullTarget::LiveComments { .. } => (
                    api.list_live_comments(room_id, target.page_size(), 0).await?,
                    DedupNamespace::LiveComment,
                    EventType::Comment,
                ),
                _ => (
                    api.list_video_comments(room_id, target.page_size(), 0).await?,
                    DedupNamespace::VideoComment,
                    EventType::VideoComment,
                ),
            };

            for item in page.list {
                if item.comment_id.is_empty() {
                    continue;
                }
                let key = DedupKey::new(namespace, room_id.as_str(), item.comment_id.as_str());
                if !shared.dedup.mark_if_new(&key) {
                    continue;
                }

                let event = shared
                    .event(event_type, item.user_id, item.nickname, Strategy::Pull)
                    .with_avatar(item.avatar)
                    .with_content(item.comment_text)
                    .with_created_at(item.create_time)
                    .with_metadata("comment_id", item.comment_id);
                let event = match namespace {
                    DedupNamespace::VideoComment => event.with_video(room_id.as_str()),
                    _ => event.with_room(room_id.as_str()),
                };
                shared.emit(event).await;
                emitted += 1;
            }
        }
        PullTarget::PrivateMessages => {
            let page = api
                .list_private_messages(target.page_size(), 0)
                .await?;

            for item in page.list {
                if item.message_id.is_empty() {
                    continue;
                }
                let key = DedupKey::new(
                    DedupNamespace::PrivateMessage,
                    item.user_id.as_str(),
                    item.message_id.as_str(),
                );
                if !shared.dedup.mark_if_new(&key) {
                    continue;
                }

                let event = shared
                    .event(
                        EventType::PrivateMessage,
                        item.user_id,
                        item.nickname,
                        Strategy::Pull,
                    )
                    .with_avatar(item.avatar)
                    .with_content(item.content)
                    .with_created_at(item.create_time)
                    .with_metadata("message_id", item.message_id)
                    .with_metadata("conversation_id", item.conversation_id)
                    .with_metadata("message_type", item.message_type);
                shared.emit(event).await;
                emitted += 1;
            }
        }
    }

    Ok(emitted)
}
