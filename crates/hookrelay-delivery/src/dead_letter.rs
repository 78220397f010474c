//! Quarantine store for permanently failed deliveries.
//!
//! Deliveries that exhaust their attempt ceiling land here with
//! diagnostic context. Operators inspect entries and replay them; replay
//! hands back a reset copy of the delivery for re-enqueue, it does not
//! re-enqueue by itself.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use hookrelay_core::{
    Clock, DeadLetterEntry, DeliveryId, DeliveryStatus, EntryId, QuarantineReason, WebhookDelivery,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Aggregate statistics over the quarantine table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterStats {
    /// Number of quarantined deliveries.
    pub total_entries: u64,

    /// Entries eligible for replay.
    pub retryable_entries: u64,

    /// Timestamp of the oldest quarantined failure.
    pub oldest_failure_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct DeadLetterState {
    entries: HashMap<EntryId, DeadLetterEntry>,
    // Insertion order, for stable inspection listings
    order: VecDeque<EntryId>,
}

/// Stateful quarantine for deliveries that exhausted all retries.
///
/// The entry table sits behind a single lock: a delivery is written here
/// at most once in its lifetime, on its final failure, and inspection
/// and replay look entries up by entry id across all webhooks.
#[derive(Debug)]
pub struct DeadLetterQueue {
    state: RwLock<DeadLetterState>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterQueue {
    /// Creates an empty dead letter queue.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { state: RwLock::new(DeadLetterState::default()), clock }
    }

    /// Quarantines a delivery that exhausted all retries.
    ///
    /// Never fails toward the caller: by the time a delivery reaches the
    /// dead letter queue the pipeline has already given up retrying, so
    /// quarantine problems are a degraded outcome, not a fatal one.
    pub async fn add_failed(
        &self,
        mut delivery: WebhookDelivery,
        reason: QuarantineReason,
        last_error: impl Into<String>,
    ) -> EntryId {
        delivery.status = DeliveryStatus::DeadLettered;

        let entry = DeadLetterEntry {
            id: EntryId::new(),
            delivery,
            reason,
            last_error: last_error.into(),
            failed_at: self.clock.now_utc(),
            retryable: true,
        };
        let entry_id = entry.id;

        let mut state = self.state.write().await;
        state.order.push_back(entry_id);
        state.entries.insert(entry_id, entry);
        drop(state);

        counter!("webhook_dead_letters_total").increment(1);

        debug!(%entry_id, reason = %reason, "delivery quarantined");
        entry_id
    }

    /// Removes an entry and returns its delivery reset for re-enqueue.
    ///
    /// The returned delivery is a fresh one: regenerated id, attempts
    /// reset to zero, status pending. Returns `None` for unknown entries.
    pub async fn take_for_retry(&self, entry_id: EntryId) -> Option<WebhookDelivery> {
        let mut state = self.state.write().await;
        let entry = state.entries.remove(&entry_id)?;
        state.order.retain(|id| *id != entry_id);
        drop(state);

        let mut delivery = entry.delivery;
        delivery.id = DeliveryId::new();
        delivery.attempts = 0;
        delivery.status = DeliveryStatus::Pending;

        info!(
            %entry_id,
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            "dead letter entry released for replay"
        );

        Some(delivery)
    }

    /// Looks up a single entry.
    pub async fn entry(&self, entry_id: EntryId) -> Option<DeadLetterEntry> {
        self.state.read().await.entries.get(&entry_id).cloned()
    }

    /// All entries in quarantine order.
    pub async fn entries(&self) -> Vec<DeadLetterEntry> {
        let state = self.state.read().await;
        state.order.iter().filter_map(|id| state.entries.get(id).cloned()).collect()
    }

    /// Aggregate statistics over the quarantine table.
    pub async fn stats(&self) -> DeadLetterStats {
        let state = self.state.read().await;

        DeadLetterStats {
            total_entries: state.entries.len() as u64,
            retryable_entries: state.entries.values().filter(|e| e.retryable).count() as u64,
            oldest_failure_at: state.entries.values().map(|e| e.failed_at).min(),
        }
    }
}
