//! Core domain models for the webhook relay.
//!
//! Provides strongly-typed identifiers, the delivery state machine, and
//! the clock abstraction used for deterministic scheduling. The delivery
//! crate builds on these foundational types; collaborators outside the
//! relay (the configuration store, the event source) exchange these
//! models across their trait boundaries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod models;
pub mod time;

pub use models::{
    ChainEvent, DeadLetterEntry, DeliveryId, DeliveryRecord, DeliveryResult, DeliveryStatus,
    EntryId, EventSubscription, PayloadFormat, QuarantineReason, SubscriptionId, WebhookConfig,
    WebhookDelivery, WebhookId,
};
pub use time::{Clock, RealClock, TestClock};
