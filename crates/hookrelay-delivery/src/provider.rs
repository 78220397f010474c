//! Webhook configuration resolution.
//!
//! The relay never owns webhook configurations; it resolves them per
//! delivery attempt through this trait, backed by the relational store
//! in production. Tests and embedded deployments substitute the
//! in-memory implementation, which replaces the mutable-map backdoor a
//! pipeline like this tends to grow.

use std::collections::HashMap;

use async_trait::async_trait;
use hookrelay_core::{WebhookConfig, WebhookId};
use tokio::sync::RwLock;

use crate::error::Result;

/// Read-only source of webhook configurations.
///
/// `resolve` returns `Ok(None)` for unknown webhooks; errors are
/// reserved for the store itself failing, and are retried like any other
/// delivery failure.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Resolves the configuration for a webhook.
    async fn resolve(&self, webhook_id: WebhookId) -> Result<Option<WebhookConfig>>;
}

/// In-memory configuration provider.
///
/// The substitute for the external store in tests and embedded setups.
#[derive(Debug, Default)]
pub struct InMemoryConfigProvider {
    configs: RwLock<HashMap<WebhookId, WebhookConfig>>,
}

impl InMemoryConfigProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider pre-populated with configurations.
    pub fn with_configs(configs: impl IntoIterator<Item = WebhookConfig>) -> Self {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    /// Inserts or replaces a configuration.
    pub async fn insert(&self, config: WebhookConfig) {
        self.configs.write().await.insert(config.id, config);
    }

    /// Removes a configuration.
    pub async fn remove(&self, webhook_id: WebhookId) {
        self.configs.write().await.remove(&webhook_id);
    }
}

#[async_trait]
impl ConfigProvider for InMemoryConfigProvider {
    async fn resolve(&self, webhook_id: WebhookId) -> Result<Option<WebhookConfig>> {
        Ok(self.configs.read().await.get(&webhook_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap as StdHashMap, time::Duration};

    use hookrelay_core::PayloadFormat;

    use super::*;

    fn test_config() -> WebhookConfig {
        WebhookConfig {
            id: WebhookId::new(),
            url: "https://example.com/hook".to_string(),
            format: PayloadFormat::Generic,
            headers: StdHashMap::new(),
            secret: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            is_active: true,
            subscriptions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn resolves_inserted_configs() {
        let provider = InMemoryConfigProvider::new();
        let config = test_config();
        let id = config.id;

        provider.insert(config.clone()).await;
        assert_eq!(provider.resolve(id).await.unwrap(), Some(config));
    }

    #[tokio::test]
    async fn unknown_webhook_resolves_to_none() {
        let provider = InMemoryConfigProvider::new();
        assert_eq!(provider.resolve(WebhookId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn removed_configs_stop_resolving() {
        let config = test_config();
        let id = config.id;
        let provider = InMemoryConfigProvider::with_configs([config]);

        provider.remove(id).await;
        assert_eq!(provider.resolve(id).await.unwrap(), None);
    }
}
