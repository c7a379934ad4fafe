//! Per-channel counters for the status endpoint.
//!
//! ```text
//! Channel created     --> register_channel(name)
//! Strategy launched   --> set_strategy(name, strategy) + set_status(Connected)
//! Event emitted       --> record_event(name)
//! Fetch/read failure  --> record_error(name, reason)
//! Channel stopped     --> set_status(name, Disconnected)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::channels::channel::Strategy;

/// Connection status of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Connected,
    Disconnected,
    Error(String),
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Disconnected => write!(f, "disconnected"),
            ChannelStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Serializable status row for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatusInfo {
    pub name: String,
    pub status: String,
    pub strategy: Option<Strategy>,
    pub connected_since: Option<String>,
    pub event_count: u64,
    pub last_event_at: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

struct ChannelMetrics {
    status: RwLock<ChannelStatus>,
    strategy: RwLock<Option<Strategy>>,
    connected_since: RwLock<Option<DateTime<Utc>>>,
    event_count: AtomicU64,
    last_event_at: RwLock<Option<DateTime<Utc>>>,
    error_count: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl ChannelMetrics {
    fn new() -> Self {
        Self {
            status: RwLock::new(ChannelStatus::Disconnected),
            strategy: RwLock::new(None),
            connected_since: RwLock::new(None),
            event_count: AtomicU64::new(0),
            last_event_at: RwLock::new(None),
            error_count: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    async fn info(&self, name: &str) -> ChannelStatusInfo {
        let status = self.status.read().await;
        let status_str = match &*status {
            ChannelStatus::Connected => "connected".to_string(),
            ChannelStatus::Disconnected => "disconnected".to_string(),
            ChannelStatus::Error(_) => "error".to_string(),
        };
        let last_error = match &*status {
            ChannelStatus::Error(msg) => Some(msg.clone()),
            _ => self.last_error.read().await.clone(),
        };

        ChannelStatusInfo {
            name: name.to_string(),
            status: status_str,
            strategy: *self.strategy.read().await,
            connected_since: self.connected_since.read().await.map(|dt| dt.to_rfc3339()),
            event_count: self.event_count.load(Ordering::Relaxed),
            last_event_at: self.last_event_at.read().await.map(|dt| dt.to_rfc3339()),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_error,
        }
    }
}

/// Tracks status and counters for every registered channel.
pub struct ChannelStatusTracker {
    channels: Arc<RwLock<HashMap<String, Arc<ChannelMetrics>>>>,
    started_at: Instant,
}

impl ChannelStatusTracker {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            started_at: Instant::now(),
        }
    }

    /// Register a channel. Re-registering a name resets its counters, since
    /// a restarted channel is a new instance.
    pub async fn register_channel(&self, name: &str) {
        let mut channels = self.channels.write().await;
        channels.insert(name.to_string(), Arc::new(ChannelMetrics::new()));
    }

    async fn metrics(&self, name: &str) -> Option<Arc<ChannelMetrics>> {
        self.channels.read().await.get(name).cloned()
    }

    /// No-op if the channel is not registered.
    pub async fn record_event(&self, name: &str) {
        if let Some(metrics) = self.metrics(name).await {
            metrics.event_count.fetch_add(1, Ordering::Relaxed);
            *metrics.last_event_at.write().await = Some(Utc::now());
        }
    }

    /// No-op if the channel is not registered.
    pub async fn record_error(&self, name: &str, reason: &str) {
        if let Some(metrics) = self.metrics(name).await {
            metrics.error_count.fetch_add(1, Ordering::Relaxed);
            *metrics.last_error.write().await = Some(reason.to_string());
        }
    }

    pub async fn set_strategy(&self, name: &str, strategy: Strategy) {
        if let Some(metrics) = self.metrics(name).await {
            *metrics.strategy.write().await = Some(strategy);
        }
    }

    /// `connected_since` is set on the first transition to `Connected` and
    /// cleared on any other status.
    pub async fn set_status(&self, name: &str, status: ChannelStatus) {
        let Some(metrics) = self.metrics(name).await else {
            return;
        };
        let is_connecting = status == ChannelStatus::Connected;
        *metrics.status.write().await = status;

        let mut since = metrics.connected_since.write().await;
        if is_connecting {
            if since.is_none() {
                *since = Some(Utc::now());
            }
        } else {
            *since = None;
        }
    }

    /// All channels, sorted by name.
    pub async fn get_all_statuses(&self) -> Vec<ChannelStatusInfo> {
        let channels: Vec<(String, Arc<ChannelMetrics>)> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(name, m)| (name.clone(), Arc::clone(m)))
            .collect();

        let mut result = Vec::with_capacity(channels.len());
        for (name, metrics) in channels {
            result.push(metrics.info(&name).await);
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    pub async fn get_channel_status(&self, name: &str) -> Option<ChannelStatusInfo> {
        let metrics = self.metrics(name).await?;
        Some(metrics.info(name).await)
    }

    /// Seconds since the tracker was created.
    pub fn uptime(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn total_events(&self) -> u64 {
        self.channels
            .read()
            .await
            .values()
            .map(|m| m.event_count.load(Ordering::Relaxed))
            .sum()
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn connected_count(&self) -> usize {
        let channels = self.channels.read().await;
        let mut count = 0;
        for metrics in channels.values() {
            if *metrics.status.read().await == ChannelStatus::Connected {
                count += 1;
            }
        }
        count
    }
}

impl Default for ChannelStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
