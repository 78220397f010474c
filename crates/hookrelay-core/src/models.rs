//! Domain models and strongly-typed identifiers.
//!
//! Defines webhook configurations, deliveries, per-attempt records, and
//! newtype ID wrappers for compile-time type safety. The delivery state
//! machine lives here so every component agrees on the lifecycle.

use std::{collections::HashMap, fmt, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed webhook identifier.
///
/// Identifies a subscriber-registered endpoint plus its delivery policy.
/// Owned by the external configuration store; the relay only ever reads
/// configurations resolved by this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed delivery identifier.
///
/// One delivery is one event destined for one webhook. Subscribers
/// deduplicate on this ID, so it must stay stable across retry attempts
/// of the same delivery and change when a delivery is replayed as a
/// fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed subscription identifier.
///
/// Ties a delivery back to the event subscription that matched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed dead-letter entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub Uuid);

impl EntryId {
    /// Creates a new random entry ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Payload shape rendered for a webhook endpoint.
///
/// The producer serializes the triggering event into this shape before
/// enqueueing; the relay treats the rendered payload as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Plain JSON rendering of the event.
    Generic,
    /// Discord-compatible embed payload.
    Discord,
    /// Slack-compatible block payload.
    Slack,
}

/// A single event subscription attached to a webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    /// Contract address the subscription watches.
    pub contract_address: String,

    /// Event name within the contract's ABI.
    pub event_name: String,

    /// Structured filter expression over decoded event arguments.
    pub filter: serde_json::Value,
}

/// A subscriber's delivery target and policy.
///
/// Owned by the external configuration store and treated as read-only by
/// the relay. Fetched per delivery attempt, so configuration changes take
/// effect on the next attempt without restarting the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Unique identifier for this webhook.
    pub id: WebhookId,

    /// Destination URL, must be HTTP or HTTPS.
    pub url: String,

    /// Payload shape the producer renders for this endpoint.
    pub format: PayloadFormat,

    /// Custom headers merged into every delivery request.
    pub headers: HashMap<String, String>,

    /// Optional HMAC secret used to sign payloads.
    ///
    /// When set, every request carries an `X-Signature` header computed
    /// over the exact payload bytes sent as the body.
    pub secret: Option<String>,

    /// Per-request timeout for delivery attempts.
    pub timeout: Duration,

    /// Maximum delivery attempts before dead-lettering.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff between attempts.
    pub retry_base_delay: Duration,

    /// Whether the webhook currently accepts deliveries.
    pub is_active: bool,

    /// Event subscriptions routed to this webhook.
    pub subscriptions: Vec<EventSubscription>,
}

/// The blockchain event that triggered a delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Address of the contract that emitted the event.
    pub contract_address: String,

    /// Event name within the contract's ABI.
    pub event_name: String,

    /// Block number the event was included in.
    pub block_number: u64,

    /// Transaction hash of the emitting transaction.
    pub transaction_hash: String,

    /// Log index within the block.
    pub log_index: u32,

    /// Decoded event arguments.
    pub args: HashMap<String, serde_json::Value>,

    /// Timestamp of the containing block.
    pub block_timestamp: DateTime<Utc>,
}

/// Delivery lifecycle status.
///
/// Deliveries progress through these states while in the pipeline:
///
/// ```text
/// Pending -> Delivering -> Completed
///                       -> Pending (retry scheduled)
///                       -> Failed -> DeadLettered
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Waiting in the queue, possibly for a scheduled retry.
    Pending,

    /// A worker has claimed the delivery and is attempting it.
    Delivering,

    /// Successfully delivered. Terminal.
    Completed,

    /// Exhausted all attempts. Transitions out of the live queue.
    Failed,

    /// Quarantined in the dead letter queue. Terminal until replayed.
    DeadLettered,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Delivering => write!(f, "delivering"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

/// One unit of work: an event destined for one webhook.
///
/// Created by the producer at enqueue time with the attempt ceiling and
/// backoff base copied from the webhook's configuration, so the queue can
/// schedule retries without a configuration lookup. Mutated only by the
/// delivery queue (attempts, status) until it completes or is handed to
/// the dead letter queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Subscription that matched the event.
    pub subscription_id: SubscriptionId,

    /// Target webhook.
    pub webhook_id: WebhookId,

    /// The triggering blockchain event.
    pub event: ChainEvent,

    /// Pre-rendered payload, sent byte-for-byte as the request body.
    ///
    /// The HMAC signature is computed over exactly these bytes, never a
    /// re-serialization.
    pub payload: Bytes,

    /// Number of dispatch attempts so far. Incremented by the queue.
    pub attempts: u32,

    /// Attempt ceiling, copied from the config at creation.
    pub max_attempts: u32,

    /// Backoff base delay, copied from the config at creation.
    pub retry_base_delay: Duration,

    /// Current lifecycle status.
    pub status: DeliveryStatus,
}

impl WebhookDelivery {
    /// Creates a pending delivery for a webhook, copying the retry policy
    /// fields from its configuration.
    pub fn for_config(
        subscription_id: SubscriptionId,
        event: ChainEvent,
        payload: Bytes,
        config: &WebhookConfig,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            subscription_id,
            webhook_id: config.id,
            event,
            payload,
            attempts: 0,
            max_attempts: config.retry_attempts,
            retry_base_delay: config.retry_base_delay,
            status: DeliveryStatus::Pending,
        }
    }
}

/// Outcome of one delivery attempt.
///
/// Ephemeral: always paired with the delivery it belongs to when handed
/// to the tracker, never persisted on its own. Ordinary HTTP failures
/// (4xx, 5xx, timeout, network error) are represented here rather than
/// raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Whether the endpoint acknowledged the delivery with a 2xx.
    pub success: bool,

    /// HTTP status code, when a response was received.
    pub status_code: Option<u16>,

    /// Wall-clock time from request start to completion.
    pub response_time_ms: u64,

    /// Error description for failed attempts.
    pub error: Option<String>,
}

impl DeliveryResult {
    /// Builds a successful result.
    pub fn success(status_code: u16, response_time_ms: u64) -> Self {
        Self { success: true, status_code: Some(status_code), response_time_ms, error: None }
    }

    /// Builds a failed result.
    pub fn failure(
        status_code: Option<u16>,
        response_time_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self { success: false, status_code, response_time_ms, error: Some(error.into()) }
    }
}

/// Immutable snapshot of one tracked delivery attempt.
///
/// Appended to a per-webhook bounded history; never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Delivery the attempt belonged to.
    pub delivery_id: DeliveryId,

    /// When the attempt was recorded.
    pub timestamp: DateTime<Utc>,

    /// Whether the attempt succeeded.
    pub success: bool,

    /// Response time of the attempt in milliseconds.
    pub response_time_ms: u64,

    /// Error description for failed attempts.
    pub error: Option<String>,
}

/// Why a delivery was quarantined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// The delivery failed on its final permitted attempt.
    MaxRetriesExceeded,
}

impl fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxRetriesExceeded => write!(f, "max retries exceeded"),
        }
    }
}

/// Quarantine record for a permanently failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Unique identifier for this entry.
    pub id: EntryId,

    /// Full snapshot of the failed delivery.
    pub delivery: WebhookDelivery,

    /// Structured reason for the quarantine.
    pub reason: QuarantineReason,

    /// Last error observed before giving up.
    pub last_error: String,

    /// When the delivery was quarantined.
    pub failed_at: DateTime<Utc>,

    /// Whether the entry is eligible for replay.
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event() -> ChainEvent {
        ChainEvent {
            contract_address: "0xabc".to_string(),
            event_name: "Transfer".to_string(),
            block_number: 1,
            transaction_hash: "0xdead".to_string(),
            log_index: 0,
            args: HashMap::new(),
            block_timestamp: Utc::now(),
        }
    }

    fn test_config() -> WebhookConfig {
        WebhookConfig {
            id: WebhookId::new(),
            url: "https://example.com/hook".to_string(),
            format: PayloadFormat::Generic,
            headers: HashMap::new(),
            secret: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 5,
            retry_base_delay: Duration::from_secs(1),
            is_active: true,
            subscriptions: Vec::new(),
        }
    }

    #[test]
    fn delivery_copies_retry_policy_from_config() {
        let config = test_config();
        let delivery = WebhookDelivery::for_config(
            SubscriptionId::new(),
            test_event(),
            Bytes::from_static(b"{}"),
            &config,
        );

        assert_eq!(delivery.webhook_id, config.id);
        assert_eq!(delivery.max_attempts, 5);
        assert_eq!(delivery.retry_base_delay, Duration::from_secs(1));
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.status, DeliveryStatus::Pending);
    }

    #[test]
    fn status_display_matches_serde_names() {
        assert_eq!(DeliveryStatus::Pending.to_string(), "pending");
        assert_eq!(DeliveryStatus::Delivering.to_string(), "delivering");
        assert_eq!(DeliveryStatus::Completed.to_string(), "completed");
        assert_eq!(DeliveryStatus::DeadLettered.to_string(), "dead_lettered");
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(DeliveryId::new(), DeliveryId::new());
        assert_ne!(WebhookId::new(), WebhookId::new());
    }
}
