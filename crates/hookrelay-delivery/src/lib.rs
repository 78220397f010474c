//! Webhook delivery pipeline with reliability guarantees.
//!
//! This crate implements the relay that takes blockchain events destined
//! for subscriber-configured HTTP endpoints and guarantees at-least-once,
//! bounded-concurrency, retrying delivery. Permanent failures are
//! quarantined in a dead letter queue for inspection and manual replay.
//!
//! # Architecture
//!
//! The delivery queue owns scheduling: a min-heap keyed by each
//! delivery's next attempt time, drained by a bounded pool of async
//! workers. The queue processor supplies the per-delivery handler:
//!
//! 1. **Resolve** - fetch the webhook configuration from the injected
//!    provider
//! 2. **Validate** - reject malformed configurations
//! 3. **Send** - one HTTP POST, bounded by the webhook's timeout
//! 4. **Track** - record the attempt outcome, success or failure
//!
//! A handler failure re-schedules the delivery with exponential backoff
//! until the attempt ceiling, then hands it to the dead letter queue.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookrelay_core::{Clock, RealClock};
//! use hookrelay_delivery::{
//!     DeadLetterQueue, DeliveryQueue, DeliveryTracker, InMemoryConfigProvider, QueueConfig,
//!     QueueProcessor, SenderConfig, WebhookSender,
//! };
//!
//! # async fn example() -> hookrelay_delivery::Result<()> {
//! let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
//! let queue = Arc::new(DeliveryQueue::new(QueueConfig::default(), clock.clone()));
//! let sender = Arc::new(WebhookSender::new(SenderConfig::default(), clock.clone())?);
//! let tracker = Arc::new(DeliveryTracker::new(clock.clone()));
//! let dead_letter = Arc::new(DeadLetterQueue::new(clock.clone()));
//! let provider = Arc::new(InMemoryConfigProvider::new());
//!
//! let processor = Arc::new(QueueProcessor::new(
//!     queue,
//!     sender,
//!     tracker,
//!     Some(dead_letter),
//!     provider,
//! ));
//! processor.start().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter;
pub mod error;
pub mod processor;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod sender;
pub mod tracker;

pub use dead_letter::{DeadLetterQueue, DeadLetterStats};
pub use error::{DeliveryError, Result};
pub use processor::{ProcessorStats, QueueProcessor};
pub use provider::{ConfigProvider, InMemoryConfigProvider};
pub use queue::{DeliveryHandler, DeliveryQueue, QueueConfig};
pub use retry::RetryPolicy;
pub use sender::{validate_config, ConfigValidation, SenderConfig, WebhookSender};
pub use tracker::{DeliveryStats, DeliveryTracker};

/// Default number of concurrent delivery workers.
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 10;

/// Default interval between idle worker polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Per-webhook delivery history retention cap.
pub const HISTORY_CAP: usize = 1000;
