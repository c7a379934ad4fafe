//! Event pipeline: reply generation, lead scoring and delivery.
//!
//! ```text
//! Channel ──process_event──► bounded queue ──► N workers ──► handle_event
//!                               (full: drop)                    │
//!        ┌──────────────────────────────────────────────────────┤
//!        ▼                                                      ▼
//!  auto-reply type?                                       CRM configured?
//!   AI (rate limited) ─fail─► rules                        score ─► LeadSink
//!        │
//!        ▼
//!  ReplyRouter ─► channel's ReplySender
//! ```
//!
//! `process_event` never waits for reply or CRM work. Failures inside a
//! worker are logged and end that event's processing only.

pub mod ai;
pub mod crm;
mod router;
pub mod rules;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

pub use ai::{AiClient, ReplyGenerator};
pub use crm::{CrmClient, Lead, LeadSink};
pub use router::ReplyRouter;

use crate::channels::{CommentScope, EventSink};
use crate::config::{Config, PipelineConfig};
use crate::error::PipelineError;
use crate::event::{Event, EventType};
use crate::limiter::RateLimiter;

/// Where a reply came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Ai,
    Rules,
}

/// What processing one event produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventOutcome {
    pub reply: Option<(String, ReplySource)>,
    pub reply_delivered: bool,
    pub lead: Option<Lead>,
    pub lead_sent: bool,
}

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub skipped: u64,
    pub replied: u64,
    pub ai_fallbacks: u64,
    pub leads_sent: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    skipped: AtomicU64,
    replied: AtomicU64,
    ai_fallbacks: AtomicU64,
    leads_sent: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            ai_fallbacks: self.ai_fallbacks.load(Ordering::Relaxed),
            leads_sent: self.leads_sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

struct PipelineCore {
    limiter: Arc<RateLimiter>,
    ai: Option<Arc<dyn ReplyGenerator>>,
    crm: Option<Arc<dyn LeadSink>>,
    replies: Arc<ReplyRouter>,
    auto_reply: HashSet<EventType>,
    counters: Counters,
}

impl PipelineCore {
    async fn handle(&self, event: Event) -> EventOutcome {
        let mut outcome = EventOutcome::default();
        if !event.is_well_formed() {
            Counters::bump(&self.counters.skipped);
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Skipping event without content");
            return outcome;
        }
        Counters::bump(&self.counters.processed);

        if self.auto_reply.contains(&event.event_type) {
            let (reply, source) = self.compose_reply(&event).await;
            if !reply.is_empty() {
                match self.deliver(&event, &reply).await {
                    Ok(()) => {
                        Counters::bump(&self.counters.replied);
                        outcome.reply_delivered = true;
                        tracing::info!(
                            channel = %event.channel,
                            event_id = %event.id,
                            source = ?source,
                            synthetic = event.is_synthetic(),
                            "Reply sent"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(channel = %event.channel, event_id = %event.id, error = %e, "Reply delivery failed");
                    }
                }
                outcome.reply = Some((reply, source));
            }
        }

        if let Some(crm) = &self.crm {
            let lead = Lead::from_event(&event, crm.tenant_id(), rules::lead_score(&event), Utc::now());
            match crm.submit(&lead).await {
                Ok(()) => {
                    Counters::bump(&self.counters.leads_sent);
                    outcome.lead_sent = true;
                    tracing::debug!(uid = %lead.uid, score = lead.score, channel = %lead.channel, "Lead submitted");
                }
                Err(e) => {
                    tracing::warn!(uid = %lead.uid, error = %e, "Lead submission failed");
                }
            }
            outcome.lead = Some(lead);
        }

        outcome
    }

    /// AI reply when configured and admitted by the limiter, rules otherwise.
    async fn compose_reply(&self, event: &Event) -> (String, ReplySource) {
        let content = event.text().unwrap_or_default();

        if let Some(ai) = &self.ai {
            let attempt = if self.limiter.allow() {
                ai.generate(event).await
            } else {
                Err(PipelineError::RateLimited)
            };
            match attempt {
                Ok(reply) if !reply.trim().is_empty() => return (reply, ReplySource::Ai),
                Ok(_) => {
                    tracing::warn!(event_id = %event.id, "AI returned an empty reply, using rules");
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "AI reply unavailable, using rules");
                }
            }
            Counters::bump(&self.counters.ai_fallbacks);
        }

        (rules::rule_reply(content).to_string(), ReplySource::Rules)
    }

    /// Route the reply back through the originating channel.
    async fn deliver(&self, event: &Event, reply: &str) -> Result<(), PipelineError> {
        let sender = self
            .replies
            .get(&event.channel)
            .await
            .ok_or_else(|| PipelineError::NoReplySender {
                channel: event.channel.clone(),
            })?;

        let comment_id = event.metadata_str("comment_id");
        let result = match event.event_type {
            EventType::Comment if comment_id.is_some() && event.room_id.is_some() => {
                let scope = CommentScope::Room(event.room_id.clone().unwrap_or_default());
                sender
                    .send_comment_reply(&scope, comment_id.unwrap_or_default(), reply)
                    .await
            }
            EventType::VideoComment if comment_id.is_some() && event.video_id.is_some() => {
                let scope = CommentScope::Video(event.video_id.clone().unwrap_or_default());
                sender
                    .send_comment_reply(&scope, comment_id.unwrap_or_default(), reply)
                    .await
            }
            EventType::PrivateMessage => match event.metadata_str("conversation_id") {
                Some(conversation_id) => {
                    sender
                        .send_private_message_reply(conversation_id, &event.user_id, reply)
                        .await
                }
                None => sender.send_message(reply).await,
            },
            _ => sender.send_message(reply).await,
        };

        result.map_err(|source| PipelineError::ReplyFailed {
            channel: event.channel.clone(),
            source,
        })
    }
}

/// Builder for `Pipeline`.
pub struct PipelineBuilder {
    config: PipelineConfig,
    limiter: Arc<RateLimiter>,
    ai: Option<Arc<dyn ReplyGenerator>>,
    crm: Option<Arc<dyn LeadSink>>,
    replies: Arc<ReplyRouter>,
}

impl PipelineBuilder {
    pub fn ai(mut self, ai: Arc<dyn ReplyGenerator>) -> Self {
        self.ai = Some(ai);
        self
    }

    pub fn crm(mut self, crm: Arc<dyn LeadSink>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn reply_router(mut self, replies: Arc<ReplyRouter>) -> Self {
        self.replies = replies;
        self
    }

    /// Spawn the worker pool. Must be called inside a Tokio runtime.
    pub fn build(self) -> Pipeline {
        let core = Arc::new(PipelineCore {
            limiter: self.limiter,
            ai: self.ai,
            crm: self.crm,
            replies: self.replies,
            auto_reply: self.config.auto_reply_types.iter().copied().collect(),
            counters: Counters::default(),
        });

        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..self.config.workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let core = Arc::clone(&core);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        match next {
                            Some(event) => {
                                core.handle(event).await;
                            }
                            None => break,
                        }
                    }
                    tracing::debug!(worker, "Pipeline worker exited");
                })
            })
            .collect();

        tracing::info!(
            workers = self.config.workers.max(1),
            queue_capacity = self.config.queue_capacity.max(1),
            ai = core.ai.is_some(),
            crm = core.crm.is_some(),
            auto_reply = ?self.config.auto_reply_types,
            "Pipeline started"
        );

        Pipeline {
            queue: StdMutex::new(Some(tx)),
            core,
            workers: Mutex::new(workers),
        }
    }
}

/// Bounded, worker-pooled event processor.
pub struct Pipeline {
    queue: StdMutex<Option<mpsc::Sender<Event>>>,
    core: Arc<PipelineCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig, limiter: Arc<RateLimiter>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            limiter,
            ai: None,
            crm: None,
            replies: Arc::new(ReplyRouter::new()),
        }
    }

    /// Pipeline wired to the HTTP collaborators enabled in `config`.
    pub fn from_config(config: &Config, limiter: Arc<RateLimiter>) -> Self {
        let mut builder = Self::builder(config.pipeline.clone(), limiter);
        if let Some(ai) = AiClient::from_config(&config.ai) {
            builder = builder.ai(Arc::new(ai));
        }
        if let Some(crm) = CrmClient::from_config(&config.crm) {
            builder = builder.crm(Arc::new(crm));
        }
        builder.build()
    }

    pub fn reply_router(&self) -> Arc<ReplyRouter> {
        Arc::clone(&self.core.replies)
    }

    pub fn stats(&self) -> PipelineStats {
        self.core.counters.snapshot()
    }

    /// Process one event inline, bypassing the queue.
    pub async fn handle_event(&self, event: Event) -> EventOutcome {
        self.core.handle(event).await
    }

    /// Close the queue, let workers drain what is already queued, and wait
    /// for them.
    pub async fn shutdown(&self) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(sender);

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Pipeline worker panicked");
            }
        }
        tracing::info!(stats = ?self.stats(), "Pipeline stopped");
    }
}

impl EventSink for Pipeline {
    fn process_event(&self, event: Event) -> Result<(), PipelineError> {
        if !event.is_well_formed() {
            Counters::bump(&self.core.counters.skipped);
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Skipping event without content");
            return Ok(());
        }

        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = queue.as_ref() else {
            return Err(PipelineError::QueueClosed);
        };

        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                Counters::bump(&self.core.counters.dropped);
                tracing::warn!(
                    channel = %event.channel,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Pipeline queue full, dropping event"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::QueueClosed),
        }
    }
}
