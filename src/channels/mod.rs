//! Platform channels: acquisition of live interactions.
//!
//! Each channel binds one platform to a room and/or video scope and runs
//! exactly one acquisition strategy. Items are normalized into `Event`s,
//! deduplicated per channel and handed to an `EventSink` (the pipeline).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        ChannelManager                            │
//! │                                                                  │
//! │   ┌─────────────────┐  ┌─────────────────┐  ┌────────────────┐   │
//! │   │ PlatformChannel │  │ PlatformChannel │  │ ...            │   │
//! │   │  douyin (push)  │  │ kuaishou (synth)│  │                │   │
//! │   └────────┬────────┘  └────────┬────────┘  └───────┬────────┘   │
//! │            │ dedup              │                   │            │
//! │            └────────────────────┴───────────────────┘            │
//! │                                 │                                │
//! │                     EventSink::process_event                     │
//! └─────────────────────────────────┼────────────────────────────────┘
//!                                   ▼
//!                                Pipeline
//! ```

pub mod api;
mod channel;
mod manager;
pub mod platform;
mod platform_channel;
mod pull;
mod push;
pub mod status_tracker;
mod synthetic;

pub use api::PlatformApi;
pub use channel::{
    Channel, ChannelSnapshot, ChannelState, CommentScope, EventSink, ReplySender, Strategy,
};
pub use manager::{ChannelManager, ManagerSettings};
pub use platform::Platform;
pub use platform_channel::{ChannelOptions, PlatformChannel};
pub use status_tracker::{ChannelStatus, ChannelStatusInfo, ChannelStatusTracker};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use crate::channels::EventSink;
    use crate::error::PipelineError;
    use crate::event::Event;

    /// Sink that keeps every event it receives.
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        pub fn len(&self) -> usize {
            self.events.lock().unwrap().len()
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn process_event(&self, event: Event) -> Result<(), PipelineError> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }
}
