//! Delivery orchestration.
//!
//! The queue processor wires the pipeline together: it supplies the
//! queue's per-delivery handler (resolve configuration, validate, send,
//! track), aggregates run-level statistics, and hands deliveries that
//! exhausted their retries to the dead letter queue.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use hookrelay_core::{
    DeliveryResult, EntryId, QuarantineReason, WebhookConfig, WebhookDelivery,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    dead_letter::{DeadLetterQueue, DeadLetterStats},
    error::{DeliveryError, Result},
    provider::ConfigProvider,
    queue::{DeliveryHandler, DeliveryQueue},
    sender::{self, WebhookSender},
    tracker::DeliveryTracker,
};

/// Run-level statistics for the processor.
///
/// The first four counters are monotonic for the processor's lifetime;
/// queue size and processing count are live snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    /// Whether the processor is currently running.
    pub is_running: bool,

    /// Attempts processed, regardless of outcome.
    pub total_processed: u64,

    /// Attempts that delivered successfully.
    pub successful_deliveries: u64,

    /// Attempts that failed.
    pub failed_deliveries: u64,

    /// Deliveries pending or awaiting a scheduled retry.
    pub current_queue_size: usize,

    /// Deliveries currently being attempted.
    pub processing_count: usize,
}

/// Pipeline state shared between the processor and the queue's handler.
struct ProcessorCore {
    sender: Arc<WebhookSender>,
    tracker: Arc<DeliveryTracker>,
    dead_letter: Option<Arc<DeadLetterQueue>>,
    provider: Arc<dyn ConfigProvider>,
    total_processed: AtomicU64,
    successful_deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
}

impl ProcessorCore {
    /// The queue's per-delivery handler: resolve, validate, send, track.
    ///
    /// Exactly one tracker record is written per attempt, success or
    /// failure. Failures are re-raised so the queue's retry logic
    /// engages.
    async fn process_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.total_processed.fetch_add(1, Ordering::SeqCst);

        let (result, error) = self.attempt_delivery(delivery).await;
        self.tracker.track(delivery, &result).await;

        match error {
            None => {
                self.successful_deliveries.fetch_add(1, Ordering::SeqCst);
                info!(
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    status_code = result.status_code,
                    response_time_ms = result.response_time_ms,
                    attempt = delivery.attempts,
                    "webhook delivered"
                );
                Ok(())
            },
            Some(error) => {
                self.failed_deliveries.fetch_add(1, Ordering::SeqCst);
                debug!(
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    attempt = delivery.attempts,
                    error = %error,
                    "delivery attempt failed"
                );
                Err(error)
            },
        }
    }

    /// Runs one attempt and pairs its tracker-facing result with the
    /// error to re-raise, if any.
    async fn attempt_delivery(
        &self,
        delivery: &WebhookDelivery,
    ) -> (DeliveryResult, Option<DeliveryError>) {
        let config = match self.provider.resolve(delivery.webhook_id).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                let error = DeliveryError::config_not_found(delivery.webhook_id);
                return (DeliveryResult::failure(None, 0, error.to_string()), Some(error));
            },
            Err(error) => {
                return (DeliveryResult::failure(None, 0, error.to_string()), Some(error));
            },
        };

        if !config.is_active {
            let error = DeliveryError::config_invalid(vec![format!(
                "webhook {} is not active",
                config.id
            )]);
            return (DeliveryResult::failure(None, 0, error.to_string()), Some(error));
        }

        let validation = sender::validate_config(&config);
        if !validation.is_valid {
            let error = DeliveryError::config_invalid(validation.errors);
            return (DeliveryResult::failure(None, 0, error.to_string()), Some(error));
        }

        let result = match self.sender.send(delivery, &config).await {
            Ok(result) => result,
            // Programmer error, not a transport outcome; still tracked
            // and re-raised like any other attempt failure.
            Err(error) => {
                return (DeliveryResult::failure(None, 0, error.to_string()), Some(error));
            },
        };

        if result.success {
            (result, None)
        } else {
            let error = transport_error(&result, &config);
            (result, Some(error))
        }
    }

    /// Forwards an exhausted delivery to the dead letter queue.
    ///
    /// Without a dead letter queue the delivery is permanently lost;
    /// that is logged as an error but deliberately does not crash the
    /// pipeline.
    async fn handle_max_retries_exceeded(
        &self,
        delivery: &WebhookDelivery,
        last_error: &DeliveryError,
    ) {
        match &self.dead_letter {
            Some(dead_letter) => {
                let entry_id = dead_letter
                    .add_failed(
                        delivery.clone(),
                        QuarantineReason::MaxRetriesExceeded,
                        last_error.to_string(),
                    )
                    .await;

                warn!(
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    attempts = delivery.attempts,
                    max_attempts = delivery.max_attempts,
                    last_error = %last_error,
                    %entry_id,
                    "delivery moved to dead letter queue"
                );
            },
            None => {
                error!(
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    attempts = delivery.attempts,
                    last_error = %last_error,
                    "delivery exhausted retries and no dead letter queue is configured, \
                     delivery lost"
                );
            },
        }
    }
}

/// Orchestrator for the delivery pipeline.
///
/// Owns the queue, sender, tracker, and optional dead letter queue. The
/// configuration provider is constructor-injected so tests substitute a
/// fake store instead of mutating relay internals.
pub struct QueueProcessor {
    queue: Arc<DeliveryQueue>,
    core: Arc<ProcessorCore>,
    running: AtomicBool,
}

impl QueueProcessor {
    /// Creates a processor over the given pipeline components.
    ///
    /// Running without a dead letter queue is an explicit degraded mode:
    /// deliveries that exhaust their retries are logged and lost.
    pub fn new(
        queue: Arc<DeliveryQueue>,
        sender: Arc<WebhookSender>,
        tracker: Arc<DeliveryTracker>,
        dead_letter: Option<Arc<DeadLetterQueue>>,
        provider: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            queue,
            core: Arc::new(ProcessorCore {
                sender,
                tracker,
                dead_letter,
                provider,
                total_processed: AtomicU64::new(0),
                successful_deliveries: AtomicU64::new(0),
                failed_deliveries: AtomicU64::new(0),
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Starts processing queued deliveries.
    ///
    /// Idempotent: starting an already-running processor logs a warning
    /// and no-ops.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("queue processor is already running");
            return;
        }

        let handler = Arc::new(ProcessorHandler { core: self.core.clone() });
        self.queue.start(handler).await;
        info!("queue processor started");
    }

    /// Stops dispatching new deliveries; in-flight work finishes.
    ///
    /// Idempotent: stopping a stopped processor logs a warning and
    /// no-ops.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if workers do not finish
    /// in time.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("queue processor is not running");
            return Ok(());
        }

        self.queue.stop().await?;
        info!("queue processor stopped");
        Ok(())
    }

    /// Whether the processor is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Adds a delivery to the queue.
    pub async fn enqueue(&self, delivery: WebhookDelivery) {
        self.queue.enqueue(delivery).await;
    }

    /// Current run-level statistics.
    pub async fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            is_running: self.is_running(),
            total_processed: self.core.total_processed.load(Ordering::SeqCst),
            successful_deliveries: self.core.successful_deliveries.load(Ordering::SeqCst),
            failed_deliveries: self.core.failed_deliveries.load(Ordering::SeqCst),
            current_queue_size: self.queue.queue_size().await,
            processing_count: self.queue.processing_count(),
        }
    }

    /// Replays a dead-lettered delivery into the live queue.
    ///
    /// Returns `false`, without raising, when no dead letter queue is
    /// configured or the entry does not exist.
    pub async fn retry_from_dead_letter(&self, entry_id: EntryId) -> bool {
        let Some(dead_letter) = &self.core.dead_letter else {
            warn!(%entry_id, "cannot replay: no dead letter queue configured");
            return false;
        };

        let Some(delivery) = dead_letter.take_for_retry(entry_id).await else {
            warn!(%entry_id, "cannot replay: dead letter entry not found");
            return false;
        };

        info!(
            %entry_id,
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            "re-enqueueing delivery from dead letter queue"
        );
        self.queue.enqueue(delivery).await;
        true
    }

    /// Statistics of the attached dead letter queue, if any.
    pub async fn dead_letter_stats(&self) -> Option<DeadLetterStats> {
        match &self.core.dead_letter {
            Some(dead_letter) => Some(dead_letter.stats().await),
            None => None,
        }
    }
}

/// Maps an unsuccessful sender result to the error the queue retries on.
fn transport_error(result: &DeliveryResult, config: &WebhookConfig) -> DeliveryError {
    match result.status_code {
        Some(status) => {
            DeliveryError::http_status(status, result.error.clone().unwrap_or_default())
        },
        None => match result.error.as_deref() {
            Some(sender::TIMEOUT_ERROR) => DeliveryError::timeout(
                u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            ),
            Some(message) => DeliveryError::network(message),
            None => DeliveryError::network("delivery failed"),
        },
    }
}

/// Adapter handing the pipeline to the queue's workers.
struct ProcessorHandler {
    core: Arc<ProcessorCore>,
}

#[async_trait]
impl DeliveryHandler for ProcessorHandler {
    async fn handle(&self, delivery: &WebhookDelivery) -> Result<()> {
        self.core.process_delivery(delivery).await
    }

    async fn retries_exhausted(&self, delivery: &WebhookDelivery, last_error: &DeliveryError) {
        self.core.handle_max_retries_exceeded(delivery, last_error).await;
    }
}
