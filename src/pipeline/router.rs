//! Reply routing: channel name → the channel's `ReplySender`.
//!
//! Entries are weak so a channel that is stopped and dropped by the
//! manager is not kept alive by the pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;

use crate::channels::ReplySender;

#[derive(Default)]
pub struct ReplyRouter {
    senders: RwLock<HashMap<String, Weak<dyn ReplySender>>>,
}

impl ReplyRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` under its name, replacing any previous entry.
    pub async fn register(&self, sender: &Arc<dyn ReplySender>) {
        let name = sender.name().to_string();
        tracing::debug!(channel = %name, "Registered reply sender");
        self.senders
            .write()
            .await
            .insert(name, Arc::downgrade(sender));
    }

    pub async fn get(&self, channel: &str) -> Option<Arc<dyn ReplySender>> {
        let senders = self.senders.read().await;
        senders.get(channel).and_then(Weak::upgrade)
    }

    /// Drop entries whose channel no longer exists.
    pub async fn prune(&self) -> usize {
        let mut senders = self.senders.write().await;
        let before = senders.len();
        senders.retain(|_, weak| weak.strong_count() > 0);
        before - senders.len()
    }
}
