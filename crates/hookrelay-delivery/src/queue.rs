//! Delivery scheduling and the bounded worker pool.
//!
//! The queue owns pending and in-flight deliveries. Scheduling is a
//! min-heap keyed by each delivery's explicit next attempt time, so
//! backoff math stays unit-testable and deterministic; no timer
//! callbacks. A bounded pool of workers drains the heap, each executing
//! one delivery's handler to completion before picking up the next,
//! which enforces the concurrency ceiling.
//!
//! Failed attempts are re-scheduled with exponential backoff until the
//! delivery's attempt ceiling; the failure at the ceiling is forwarded
//! to the handler's exhaustion hook exactly once and the delivery leaves
//! the queue.

use std::{
    cmp::{Ordering as CmpOrdering, Reverse},
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookrelay_core::{Clock, DeliveryStatus, WebhookDelivery};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    retry::RetryPolicy,
    DEFAULT_MAX_CONCURRENT_DELIVERIES, DEFAULT_POLL_INTERVAL_MS,
};

/// Per-delivery callback invoked by queue workers.
///
/// The queue processor implements this to run the delivery pipeline. A
/// returned error means "retry or give up" - the queue decides which
/// based on the delivery's attempt ceiling, and reports the final
/// failure through `retries_exhausted`.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Processes one delivery attempt.
    async fn handle(&self, delivery: &WebhookDelivery) -> Result<()>;

    /// Called exactly once when a delivery fails its final permitted
    /// attempt. The delivery is no longer in the queue.
    async fn retries_exhausted(&self, delivery: &WebhookDelivery, last_error: &DeliveryError);
}

/// Configuration for the delivery queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Concurrency ceiling: number of delivery workers.
    pub max_concurrent_deliveries: usize,

    /// How often idle workers poll for due deliveries.
    pub poll_interval: Duration,

    /// Maximum time to wait for in-flight deliveries on stop.
    pub shutdown_timeout: Duration,

    /// Backoff policy for retry scheduling.
    pub retry_policy: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            shutdown_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// A delivery waiting in the schedule.
#[derive(Debug)]
struct ScheduledDelivery {
    next_attempt_at: DateTime<Utc>,
    // FIFO tiebreak for deliveries due at the same instant
    seq: u64,
    delivery: WebhookDelivery,
}

impl PartialEq for ScheduledDelivery {
    fn eq(&self, other: &Self) -> bool {
        self.next_attempt_at == other.next_attempt_at && self.seq == other.seq
    }
}

impl Eq for ScheduledDelivery {}

impl PartialOrd for ScheduledDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledDelivery {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.next_attempt_at.cmp(&other.next_attempt_at).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
struct ScheduleState {
    heap: BinaryHeap<Reverse<ScheduledDelivery>>,
    next_seq: u64,
}

impl ScheduleState {
    fn push(&mut self, delivery: WebhookDelivery, next_attempt_at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledDelivery { next_attempt_at, seq, delivery }));
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<WebhookDelivery> {
        match self.heap.peek() {
            Some(Reverse(scheduled)) if scheduled.next_attempt_at <= now => {
                self.heap.pop().map(|Reverse(scheduled)| scheduled.delivery)
            },
            _ => None,
        }
    }
}

#[derive(Debug)]
struct QueueInner {
    schedule: Mutex<ScheduleState>,
    processing: AtomicUsize,
}

/// Stateful delivery scheduler with a bounded worker pool.
pub struct DeliveryQueue {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    inner: Arc<QueueInner>,
    running: AtomicBool,
    cancellation: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryQueue {
    /// Creates an empty queue with the given configuration.
    pub fn new(config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Arc::new(QueueInner {
                schedule: Mutex::new(ScheduleState::default()),
                processing: AtomicUsize::new(0),
            }),
            running: AtomicBool::new(false),
            cancellation: Mutex::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Adds a delivery to the queue, due immediately.
    ///
    /// The delivery enters (or re-enters, when replayed from the dead
    /// letter queue) as pending with a zeroed attempt counter.
    pub async fn enqueue(&self, mut delivery: WebhookDelivery) {
        delivery.status = DeliveryStatus::Pending;
        delivery.attempts = 0;

        let now = self.now();
        let mut schedule = self.inner.schedule.lock().await;
        schedule.push(delivery, now);
        debug!(queue_size = schedule.heap.len(), "delivery enqueued");
    }

    /// Begins dispatching queued deliveries to the given handler.
    ///
    /// Spawns the configured number of workers and returns immediately.
    /// Starting an already-running queue logs a warning and no-ops.
    pub async fn start(&self, handler: Arc<dyn DeliveryHandler>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("delivery queue is already processing");
            return;
        }

        let token = CancellationToken::new();
        *self.cancellation.lock().await = token.clone();

        info!(
            worker_count = self.config.max_concurrent_deliveries,
            "starting delivery queue workers"
        );

        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.max_concurrent_deliveries {
            let worker = QueueWorker {
                id: worker_id,
                inner: self.inner.clone(),
                config: self.config.clone(),
                clock: self.clock.clone(),
                handler: handler.clone(),
                cancellation: token.clone(),
            };
            workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Stops dispatching new deliveries.
    ///
    /// In-flight deliveries are allowed to finish naturally; nothing is
    /// aborted mid-flight. Stopping an idle queue is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if workers do not finish
    /// within the configured shutdown timeout.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("delivery queue is not processing");
            return Ok(());
        }

        info!("stopping delivery queue");
        self.cancellation.lock().await.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let join_all = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "queue worker panicked");
                }
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, join_all).await {
            Ok(()) => {
                info!("delivery queue stopped");
                Ok(())
            },
            Err(_) => {
                error!(
                    timeout_seconds = self.config.shutdown_timeout.as_secs(),
                    "delivery workers did not stop in time"
                );
                Err(DeliveryError::shutdown_timeout(self.config.shutdown_timeout))
            },
        }
    }

    /// Number of deliveries pending or awaiting a scheduled retry.
    pub async fn queue_size(&self) -> usize {
        self.inner.schedule.lock().await.heap.len()
    }

    /// Number of deliveries currently being attempted.
    pub fn processing_count(&self) -> usize {
        self.inner.processing.load(Ordering::SeqCst)
    }

    /// Whether workers are currently dispatching.
    pub fn is_processing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            // Cancel outstanding workers rather than orphaning them
            if let Ok(token) = self.cancellation.try_lock() {
                token.cancel();
            }
            warn!("delivery queue dropped while processing, workers cancelled");
        }
    }
}

/// Individual worker draining the schedule.
struct QueueWorker {
    id: usize,
    inner: Arc<QueueInner>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn DeliveryHandler>,
    cancellation: CancellationToken,
}

impl QueueWorker {
    /// Main worker loop: claims and processes due deliveries until
    /// cancelled.
    async fn run(self) {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation.is_cancelled() {
                break;
            }

            let claimed = {
                let now = self.now();
                let mut schedule = self.inner.schedule.lock().await;
                let delivery = schedule.pop_due(now);
                if delivery.is_some() {
                    // Counted before the lock drops so queue_size plus
                    // processing_count never under-reports in-flight work
                    self.inner.processing.fetch_add(1, Ordering::SeqCst);
                }
                delivery
            };

            match claimed {
                Some(delivery) => self.process(delivery).await,
                None => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
    }

    /// Runs one claimed delivery through the handler and routes the
    /// outcome: completion, scheduled retry, or exhaustion.
    async fn process(&self, mut delivery: WebhookDelivery) {
        delivery.status = DeliveryStatus::Delivering;
        delivery.attempts += 1;

        debug!(
            worker_id = self.id,
            delivery_id = %delivery.id,
            attempt = delivery.attempts,
            max_attempts = delivery.max_attempts,
            "dispatching delivery"
        );

        match self.handler.handle(&delivery).await {
            Ok(()) => {
                delivery.status = DeliveryStatus::Completed;
                debug!(
                    worker_id = self.id,
                    delivery_id = %delivery.id,
                    attempt = delivery.attempts,
                    "delivery completed"
                );
            },
            Err(error) => {
                if delivery.attempts < delivery.max_attempts {
                    let delay = self
                        .config
                        .retry_policy
                        .delay_from_base(delivery.retry_base_delay, delivery.attempts);
                    let next_attempt_at = self.now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));

                    warn!(
                        worker_id = self.id,
                        delivery_id = %delivery.id,
                        attempt = delivery.attempts,
                        next_retry_at = %next_attempt_at,
                        error = %error,
                        "delivery failed, retry scheduled"
                    );

                    delivery.status = DeliveryStatus::Pending;
                    let mut schedule = self.inner.schedule.lock().await;
                    schedule.push(delivery, next_attempt_at);
                } else {
                    delivery.status = DeliveryStatus::Failed;
                    error!(
                        worker_id = self.id,
                        delivery_id = %delivery.id,
                        attempts = delivery.attempts,
                        error = %error,
                        "delivery exhausted all attempts"
                    );
                    self.handler.retries_exhausted(&delivery, &error).await;
                }
            },
        }

        self.inner.processing.fetch_sub(1, Ordering::SeqCst);
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }
}
