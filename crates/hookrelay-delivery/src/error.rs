//! Error types for webhook delivery operations.
//!
//! Defines the failure taxonomy that drives retry decisions. Only
//! configuration and transport failures cross the queue boundary; both
//! are retried up to the attempt ceiling, since a configuration that is
//! missing or invalid now may become valid later. Accounting failures
//! never fail a delivery.

use std::time::Duration;

use hookrelay_core::WebhookId;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure taxonomy for webhook delivery operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// No configuration exists for the target webhook.
    #[error("configuration not found for webhook {webhook_id}")]
    ConfigNotFound {
        /// Webhook the lookup was performed for
        webhook_id: WebhookId,
    },

    /// The resolved configuration failed validation.
    #[error("invalid webhook configuration: {}", reasons.join("; "))]
    ConfigInvalid {
        /// Individual validation failures
        reasons: Vec<String>,
    },

    /// The HTTP request exceeded the webhook's timeout.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Network-level connectivity failure.
    #[error("network error: {message}")]
    Network {
        /// Description of the network failure
        message: String,
    },

    /// The endpoint responded with a non-2xx status.
    #[error("endpoint returned HTTP {status}")]
    HttpStatus {
        /// HTTP status code returned by the endpoint
        status: u16,
        /// Response body excerpt
        body: String,
    },

    /// Workers did not finish within the shutdown timeout.
    #[error("delivery workers did not stop within {timeout:?}")]
    ShutdownTimeout {
        /// Configured shutdown timeout
        timeout: Duration,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    Internal {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a configuration-not-found error.
    pub fn config_not_found(webhook_id: WebhookId) -> Self {
        Self::ConfigNotFound { webhook_id }
    }

    /// Creates an invalid-configuration error.
    pub fn config_invalid(reasons: Vec<String>) -> Self {
        Self::ConfigInvalid { reasons }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates an HTTP status error from a response.
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus { status, body: body.into() }
    }

    /// Creates a shutdown timeout error.
    pub fn shutdown_timeout(timeout: Duration) -> Self {
        Self::ShutdownTimeout { timeout }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this failure should count against the attempt ceiling and
    /// be retried with backoff.
    ///
    /// Configuration failures are retryable: the store may be having a
    /// transient issue, or the subscriber may fix the configuration. A
    /// permanently broken configuration exhausts its retries and
    /// dead-letters, which is the intended terminal outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConfigNotFound { .. }
            | Self::ConfigInvalid { .. }
            | Self::Timeout { .. }
            | Self::Network { .. }
            | Self::HttpStatus { .. } => true,

            Self::ShutdownTimeout { .. } | Self::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_failures_are_retryable() {
        assert!(DeliveryError::config_not_found(WebhookId::new()).is_retryable());
        assert!(DeliveryError::config_invalid(vec!["bad url".into()]).is_retryable());
        assert!(DeliveryError::timeout(30_000).is_retryable());
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::http_status(503, "unavailable").is_retryable());
    }

    #[test]
    fn lifecycle_failures_are_not_retryable() {
        assert!(!DeliveryError::shutdown_timeout(Duration::from_secs(30)).is_retryable());
        assert!(!DeliveryError::internal("bug").is_retryable());
    }

    #[test]
    fn error_display_format() {
        let error = DeliveryError::timeout(5000);
        assert_eq!(error.to_string(), "request timeout after 5000ms");

        let error = DeliveryError::config_invalid(vec!["a".into(), "b".into()]);
        assert_eq!(error.to_string(), "invalid webhook configuration: a; b");
    }
}
