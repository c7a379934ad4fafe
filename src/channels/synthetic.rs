//! Synthetic strategy: fabricated events on a fixed interval.
//!
//! Keeps the ingestion path observable end to end without live
//! credentials. Every event carries `metadata.synthetic = true` and is
//! logged with `strategy = "synthetic"`; none of them pass through the
//! dedup store.

use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::channels::channel::Strategy;
use crate::channels::platform_channel::{ChannelShared, LoopSet};
use crate::event::{Event, EventType};

const SYNTHETIC_TYPES: [EventType; 4] = [
    EventType::Enter,
    EventType::Comment,
    EventType::Like,
    EventType::Follow,
];

pub(crate) fn spawn(shared: Arc<ChannelShared>) -> LoopSet {
    let mut loops = LoopSet::new();
    let shutdown = loops.subscribe();
    loops.push(tokio::spawn(run(shared, shutdown)));
    loops
}

async fn run(shared: Arc<ChannelShared>, mut shutdown: watch::Receiver<bool>) {
    let period = shared.platform.synthetic_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let event = fabricate(&shared);
        tracing::info!(
            channel = %shared.name,
            strategy = "synthetic",
            event_type = %event.event_type,
            nickname = %event.nickname,
            "Synthetic event"
        );
        shared.emit(event).await;
    }
}

/// Build one pseudo-random event from the platform's sample pools.
pub(crate) fn fabricate(shared: &ChannelShared) -> Event {
    let mut rng = rand::thread_rng();
    let platform = shared.platform;

    let event_type = *SYNTHETIC_TYPES.choose(&mut rng).unwrap_or(&EventType::Enter);
    let nickname = platform.sample_users().choose(&mut rng).copied().unwrap_or("viewer");
    let user_id = format!("{}_{}", platform, rng.gen_range(100_000..1_000_000));

    let mut event = shared
        .event(event_type, user_id, nickname, Strategy::Synthetic)
        .with_metadata("synthetic", true);
    if let Some(room_id) = &shared.room_id {
        event = event.with_room(room_id.as_str());
    }
    if let Some(video_id) = &shared.video_id {
        event = event.with_video(video_id.as_str());
    }
    if event_type == EventType::Comment {
        let content = platform
            .sample_comments()
            .choose(&mut rng)
            .copied()
            .unwrap_or("hello");
        event = event.with_content(content);
    }
    event
}
