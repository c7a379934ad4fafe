//! Live IM proxy.
//!
//! Ingests viewer interactions (enters, comments, follows, private
//! messages) from several live-streaming platforms, deduplicates them per
//! channel, and turns each one into at most one reply (AI generated behind
//! a token bucket, rule based otherwise) plus a scored CRM lead.
//!
//! ```text
//! platform ──► PlatformChannel (push | pull | synthetic) ──► Pipeline
//!                    ▲                                          │
//!                    └──────────── ReplySender ◄────────────────┤
//!                                                              ▼
//!                                                             CRM
//! ```

pub mod channels;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod event;
pub mod limiter;
pub mod oauth;
pub mod pipeline;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventType};
pub use limiter::RateLimiter;
pub use pipeline::Pipeline;
