//! HTTP dispatch for webhook deliveries.
//!
//! The sender performs exactly one outbound POST per call and reports
//! the outcome as data: 4xx/5xx responses, timeouts, and network errors
//! all come back as an unsuccessful [`DeliveryResult`] rather than an
//! error. An `Err` is reserved for programmer mistakes, like pairing a
//! delivery with another webhook's configuration. Also hosts
//! configuration validation and payload signing.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use hookrelay_core::{Clock, DeliveryResult, WebhookConfig, WebhookDelivery};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use url::Url;

use crate::error::{DeliveryError, Result};

/// Header carrying the HMAC-SHA256 signature of the payload body.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Canonical error string reported for timed-out delivery attempts.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Configuration for the webhook sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderConfig {
    /// User agent string for delivery requests.
    pub user_agent: String,

    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self { user_agent: "Hookrelay-Webhook-Delivery/1.0".to_string(), max_redirects: 3 }
    }
}

/// Stateless HTTP dispatcher for webhook deliveries.
///
/// Uses a pooled client shared across all endpoints. Timeouts are
/// enforced per call from the webhook's configuration rather than
/// globally, so one slow endpoint cannot stall deliveries to others.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl WebhookSender {
    /// Creates a new sender with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Internal` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: SenderConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .build()
            .map_err(|e| DeliveryError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, clock })
    }

    /// Performs one delivery attempt against the webhook's endpoint.
    ///
    /// Sends the delivery's pre-rendered payload byte-for-byte as the
    /// request body, with the config's custom headers merged under the
    /// managed ones and, when a secret is configured, an `X-Signature`
    /// header computed over those exact bytes. The call is bounded by
    /// the config's timeout; a timeout yields an unsuccessful result
    /// with the error `"timeout"`. Response time is measured wall-clock
    /// from request start to response (or failure) completion.
    ///
    /// # Errors
    ///
    /// Ordinary HTTP failures (4xx, 5xx, timeout, network error) are
    /// reported inside the `Ok` result, never as an `Err`. An `Err` is
    /// reserved for programmer errors: a delivery paired with a
    /// configuration for a different webhook.
    pub async fn send(
        &self,
        delivery: &WebhookDelivery,
        config: &WebhookConfig,
    ) -> Result<DeliveryResult> {
        if delivery.webhook_id != config.id {
            return Err(DeliveryError::internal(format!(
                "delivery {} targets webhook {} but was given configuration for {}",
                delivery.id, delivery.webhook_id, config.id
            )));
        }

        let started = self.clock.now();

        let mut request = self
            .client
            .post(&config.url)
            .timeout(config.timeout)
            .body(delivery.payload.clone())
            .header("content-type", "application/json");

        for (key, value) in &config.headers {
            if !is_managed_header(key) {
                request = request.header(key, value);
            }
        }

        request = request
            .header("X-Hookrelay-Delivery-Id", delivery.id.to_string())
            .header("X-Hookrelay-Delivery-Attempt", delivery.attempts.to_string());

        if let Some(secret) = &config.secret {
            request = request.header(SIGNATURE_HEADER, signature_for(secret, &delivery.payload));
        }

        debug!(
            delivery_id = %delivery.id,
            webhook_id = %delivery.webhook_id,
            url = %config.url,
            attempt = delivery.attempts,
            "dispatching webhook request"
        );

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = self.elapsed_ms(started);

                let error = if e.is_timeout() {
                    TIMEOUT_ERROR.to_string()
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    e.to_string()
                };

                debug!(
                    delivery_id = %delivery.id,
                    response_time_ms = elapsed,
                    error = %error,
                    "webhook request failed"
                );

                return Ok(DeliveryResult::failure(None, elapsed, error));
            },
        };

        let elapsed = self.elapsed_ms(started);
        let status = response.status();
        let status_code = status.as_u16();

        if status.is_success() {
            Ok(DeliveryResult::success(status_code, elapsed))
        } else {
            let snippet = response_snippet(response).await;
            let error = if snippet.is_empty() {
                format!("HTTP {status_code}")
            } else {
                format!("HTTP {status_code}: {snippet}")
            };
            Ok(DeliveryResult::failure(Some(status_code), elapsed, error))
        }
    }

    fn elapsed_ms(&self, started: std::time::Instant) -> u64 {
        let elapsed = self.clock.now().saturating_duration_since(started);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Outcome of validating a webhook configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidation {
    /// Whether the configuration passed all checks.
    pub is_valid: bool,
    /// Individual validation failures, empty when valid.
    pub errors: Vec<String>,
}

/// Validates a webhook configuration before delivery.
///
/// Checks that the URL is a well-formed HTTP(S) URL, the timeout is
/// positive, and headers carry no control characters that would corrupt
/// the request.
pub fn validate_config(config: &WebhookConfig) -> ConfigValidation {
    let mut errors = Vec::new();

    match Url::parse(&config.url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {},
        Ok(url) => errors.push(format!("unsupported URL scheme '{}'", url.scheme())),
        Err(e) => errors.push(format!("invalid URL: {e}")),
    }

    if config.timeout.is_zero() {
        errors.push("timeout must be greater than zero".to_string());
    }

    for (key, value) in &config.headers {
        if key.is_empty() || key.chars().any(char::is_control) {
            errors.push(format!("invalid header name {key:?}"));
        }
        if value.chars().any(char::is_control) {
            errors.push(format!("invalid value for header {key:?}"));
        }
    }

    ConfigValidation { is_valid: errors.is_empty(), errors }
}

/// Computes the `X-Signature` value for a payload.
///
/// HMAC-SHA256 over the exact payload bytes, rendered as
/// `sha256=<hex digest>`. Subscribers verify deliveries by recomputing
/// this over the raw request body they received.
pub fn signature_for(secret: &str, payload: &[u8]) -> String {
    let mut mac = <Hmac<Sha256>>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Reads a truncated response body for failure diagnostics.
async fn response_snippet(response: reqwest::Response) -> String {
    const MAX_SNIPPET_LEN: usize = 256;

    match response.bytes().await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let mut snippet: String = text.chars().take(MAX_SNIPPET_LEN).collect();
            if text.chars().count() > MAX_SNIPPET_LEN {
                snippet.push_str("... (truncated)");
            }
            snippet
        },
        Err(_) => String::new(),
    }
}

/// Checks if a header is managed by the delivery system and must not be
/// overridden by webhook configuration.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, time::Duration};

    use bytes::Bytes;
    use chrono::Utc;
    use hookrelay_core::{
        ChainEvent, PayloadFormat, RealClock, SubscriptionId, WebhookDelivery, WebhookId,
    };
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_event() -> ChainEvent {
        ChainEvent {
            contract_address: "0x1111".to_string(),
            event_name: "Transfer".to_string(),
            block_number: 42,
            transaction_hash: "0xfeed".to_string(),
            log_index: 3,
            args: HashMap::new(),
            block_timestamp: Utc::now(),
        }
    }

    fn test_config(url: String) -> WebhookConfig {
        WebhookConfig {
            id: WebhookId::new(),
            url,
            format: PayloadFormat::Generic,
            headers: HashMap::new(),
            secret: None,
            timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(100),
            is_active: true,
            subscriptions: Vec::new(),
        }
    }

    fn test_delivery(config: &WebhookConfig, payload: &'static [u8]) -> WebhookDelivery {
        let mut delivery = WebhookDelivery::for_config(
            SubscriptionId::new(),
            test_event(),
            Bytes::from_static(payload),
            config,
        );
        delivery.attempts = 1;
        delivery
    }

    fn test_sender() -> WebhookSender {
        WebhookSender::new(SenderConfig::default(), Arc::new(RealClock::new()))
            .expect("sender should build")
    }

    #[tokio::test]
    async fn successful_delivery_returns_success_result() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::body_bytes(b"{\"ok\":true}".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = test_config(format!("{}/hook", mock_server.uri()));
        let delivery = test_delivery(&config, b"{\"ok\":true}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");

        assert!(result.success);
        assert_eq!(result.status_code, Some(200));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn server_error_is_reported_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .mount(&mock_server)
            .await;

        let config = test_config(format!("{}/hook", mock_server.uri()));
        let delivery = test_delivery(&config, b"{}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");

        assert!(!result.success);
        assert_eq!(result.status_code, Some(500));
        let error = result.error.expect("failure should carry an error");
        assert!(error.contains("HTTP 500"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn client_error_is_reported_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&mock_server)
            .await;

        let config = test_config(format!("{}/hook", mock_server.uri()));
        let delivery = test_delivery(&config, b"{}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");

        assert!(!result.success);
        assert_eq!(result.status_code, Some(404));
    }

    #[tokio::test]
    async fn timeout_reports_canonical_error() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let mut config = test_config(format!("{}/hook", mock_server.uri()));
        config.timeout = Duration::from_millis(50);
        let delivery = test_delivery(&config, b"{}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");

        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert_eq!(result.error.as_deref(), Some(TIMEOUT_ERROR));
    }

    #[tokio::test]
    async fn connection_refused_reports_network_error() {
        // Port 1 is essentially never listening
        let config = test_config("http://127.0.0.1:1/hook".to_string());
        let delivery = test_delivery(&config, b"{}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");

        assert!(!result.success);
        assert_eq!(result.status_code, None);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn signature_header_covers_exact_payload_bytes() {
        let mock_server = MockServer::start().await;
        let payload: &[u8] = b"{\"value\": 1}";
        let expected = signature_for("s3cret", payload);

        Mock::given(matchers::method("POST"))
            .and(matchers::header(SIGNATURE_HEADER, expected.as_str()))
            .and(matchers::body_bytes(payload.to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = test_config(format!("{}/hook", mock_server.uri()));
        config.secret = Some("s3cret".to_string());
        let delivery = test_delivery(&config, b"{\"value\": 1}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");
        assert!(result.success);
    }

    #[tokio::test]
    async fn custom_headers_forwarded_managed_headers_skipped() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header("X-Custom", "value"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = test_config(format!("{}/hook", mock_server.uri()));
        config.headers.insert("X-Custom".to_string(), "value".to_string());
        // Attempting to override content-type must be ignored
        config.headers.insert("Content-Type".to_string(), "text/plain".to_string());
        let delivery = test_delivery(&config, b"{}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");
        assert!(result.success);
    }

    #[tokio::test]
    async fn delivery_metadata_headers_added() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::header_exists("X-Hookrelay-Delivery-Id"))
            .and(matchers::header("X-Hookrelay-Delivery-Attempt", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = test_config(format!("{}/hook", mock_server.uri()));
        let delivery = test_delivery(&config, b"{}");

        let result = test_sender().send(&delivery, &config).await.expect("send should not raise");
        assert!(result.success);
    }

    #[tokio::test]
    async fn mismatched_delivery_and_config_raises() {
        let config = test_config("https://example.com/hook".to_string());
        let other = test_config("https://example.com/other".to_string());
        let delivery = test_delivery(&other, b"{}");

        let error = test_sender()
            .send(&delivery, &config)
            .await
            .expect_err("a foreign configuration is a programmer error");
        assert!(matches!(error, DeliveryError::Internal { .. }), "got: {error}");
    }

    #[test]
    fn signature_is_stable_for_identical_bytes() {
        let payload = b"payload bytes";
        assert_eq!(signature_for("key", payload), signature_for("key", payload));
        assert_ne!(signature_for("key", payload), signature_for("other", payload));
        assert!(signature_for("key", payload).starts_with("sha256="));
    }

    #[test]
    fn validation_accepts_well_formed_config() {
        let config = test_config("https://example.com/hook".to_string());
        let validation = validate_config(&config);

        assert!(validation.is_valid);
        assert!(validation.errors.is_empty());
    }

    #[test]
    fn validation_rejects_bad_urls() {
        let config = test_config("ftp://example.com/hook".to_string());
        let validation = validate_config(&config);
        assert!(!validation.is_valid);
        assert!(validation.errors[0].contains("scheme"));

        let config = test_config("not a url".to_string());
        let validation = validate_config(&config);
        assert!(!validation.is_valid);
    }

    #[test]
    fn validation_rejects_zero_timeout() {
        let mut config = test_config("https://example.com/hook".to_string());
        config.timeout = Duration::ZERO;

        let validation = validate_config(&config);
        assert!(!validation.is_valid);
        assert!(validation.errors.iter().any(|e| e.contains("timeout")));
    }

    #[test]
    fn validation_rejects_control_characters_in_headers() {
        let mut config = test_config("https://example.com/hook".to_string());
        config.headers.insert("X-Bad\n".to_string(), "value".to_string());
        config.headers.insert("X-Ok".to_string(), "bad\r\nvalue".to_string());

        let validation = validate_config(&config);
        assert!(!validation.is_valid);
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn managed_headers_identified() {
        assert!(is_managed_header("Content-Length"));
        assert!(is_managed_header("content-type"));
        assert!(is_managed_header("HOST"));

        assert!(!is_managed_header("Authorization"));
        assert!(!is_managed_header("X-Custom-Header"));
    }
}
