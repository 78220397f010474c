//! Per-endpoint delivery accounting.
//!
//! Records every attempt's outcome into a bounded rolling history and
//! keeps aggregate statistics that stay exact across history eviction.
//! Histories are sharded per webhook, so concurrent workers only contend
//! when they track the same endpoint. Accounting never fails a delivery:
//! the tracker's writes are local and infallible, and metric emission is
//! fire-and-forget.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use hookrelay_core::{Clock, DeliveryRecord, DeliveryResult, WebhookDelivery, WebhookId};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::HISTORY_CAP;

/// Aggregate delivery statistics for one webhook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Total attempts tracked for the webhook.
    pub total_deliveries: u64,

    /// Attempts that succeeded.
    pub successful_deliveries: u64,

    /// Attempts that failed.
    pub failed_deliveries: u64,

    /// Mean response time over all tracked attempts, rounded to the
    /// nearest millisecond. Unaffected by history eviction.
    pub average_response_time_ms: u64,
}

/// Rolling history plus aggregate counters for one webhook.
///
/// Counters accumulate independently of the retained record window so
/// statistics stay exact after old records are evicted.
#[derive(Debug, Default)]
struct WebhookHistory {
    records: VecDeque<DeliveryRecord>,
    total: u64,
    successful: u64,
    failed: u64,
    response_time_total_ms: u64,
}

impl WebhookHistory {
    fn append(&mut self, record: DeliveryRecord) {
        self.total += 1;
        if record.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.response_time_total_ms =
            self.response_time_total_ms.saturating_add(record.response_time_ms);

        if self.records.len() == HISTORY_CAP {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    fn stats(&self) -> DeliveryStats {
        let average_response_time_ms = if self.total == 0 {
            0
        } else {
            let mean = self.response_time_total_ms as f64 / self.total as f64;
            mean.round() as u64
        };

        DeliveryStats {
            total_deliveries: self.total,
            successful_deliveries: self.successful,
            failed_deliveries: self.failed,
            average_response_time_ms,
        }
    }
}

/// Stateful per-endpoint delivery tracker.
///
/// Shared across workers. Each webhook's history sits behind its own
/// lock; the outer map is locked only to look up or create a shard, so
/// attempts for unrelated webhooks do not contend on writes.
#[derive(Debug)]
pub struct DeliveryTracker {
    shards: RwLock<HashMap<WebhookId, Arc<RwLock<WebhookHistory>>>>,
    clock: Arc<dyn Clock>,
}

impl DeliveryTracker {
    /// Creates an empty tracker.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { shards: RwLock::new(HashMap::new()), clock }
    }

    async fn shard(&self, webhook_id: WebhookId) -> Option<Arc<RwLock<WebhookHistory>>> {
        self.shards.read().await.get(&webhook_id).cloned()
    }

    async fn shard_or_insert(&self, webhook_id: WebhookId) -> Arc<RwLock<WebhookHistory>> {
        if let Some(shard) = self.shard(webhook_id).await {
            return shard;
        }
        self.shards.write().await.entry(webhook_id).or_default().clone()
    }

    /// Records the outcome of one delivery attempt.
    ///
    /// Appends one record per attempt, success or failure, and emits
    /// fire-and-forget metrics.
    pub async fn track(&self, delivery: &WebhookDelivery, result: &DeliveryResult) {
        let record = DeliveryRecord {
            delivery_id: delivery.id,
            timestamp: self.clock.now_utc(),
            success: result.success,
            response_time_ms: result.response_time_ms,
            error: result.error.clone(),
        };

        let shard = self.shard_or_insert(delivery.webhook_id).await;
        shard.write().await.append(record);

        let webhook_label = delivery.webhook_id.to_string();
        counter!("webhook_deliveries_total", "webhook_id" => webhook_label.clone()).increment(1);
        if result.success {
            counter!("webhook_delivery_success_total", "webhook_id" => webhook_label.clone())
                .increment(1);
        }
        histogram!("webhook_response_time_ms", "webhook_id" => webhook_label)
            .record(result.response_time_ms as f64);

        debug!(
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            success = result.success,
            response_time_ms = result.response_time_ms,
            "delivery attempt tracked"
        );
    }

    /// Aggregate statistics for a webhook.
    ///
    /// Unknown webhook ids return zeroed stats, never an error.
    pub async fn stats(&self, webhook_id: WebhookId) -> DeliveryStats {
        match self.shard(webhook_id).await {
            Some(shard) => shard.read().await.stats(),
            None => DeliveryStats::default(),
        }
    }

    /// The `limit` most recent records for a webhook, in chronological
    /// order (oldest of the window first).
    pub async fn recent(&self, webhook_id: WebhookId, limit: usize) -> Vec<DeliveryRecord> {
        let Some(shard) = self.shard(webhook_id).await else {
            return Vec::new();
        };

        let history = shard.read().await;
        let skip = history.records.len().saturating_sub(limit);
        history.records.iter().skip(skip).cloned().collect()
    }

    /// Clears one webhook's history and statistics, or everything when
    /// no webhook is given. Idempotent.
    pub async fn clear(&self, webhook_id: Option<WebhookId>) {
        let mut shards = self.shards.write().await;
        match webhook_id {
            Some(id) => {
                shards.remove(&id);
            },
            None => shards.clear(),
        }
    }
}
