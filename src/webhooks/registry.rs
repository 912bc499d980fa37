// Webhook registry - subscription CRUD and event matching
//
// Validates input before it reaches the store and refuses to delete a
// webhook that still has delivery history.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::webhooks::model::{NewWebhook, Webhook, WebhookUpdate};
use crate::webhooks::store::{DeliveryStore, WebhookFilter, WebhookStore};
use crate::webhooks::validation;

/// Webhook registry
#[derive(Clone)]
pub struct WebhookRegistry {
    webhooks: Arc<dyn WebhookStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

impl WebhookRegistry {
    /// Create a registry over the given stores
    pub fn new(webhooks: Arc<dyn WebhookStore>, deliveries: Arc<dyn DeliveryStore>) -> Self {
        Self {
            webhooks,
            deliveries,
        }
    }

    /// Register a new webhook
    pub async fn register(&self, new: NewWebhook) -> Result<Webhook> {
        validation::validate_new(&new)?;
        let webhook = self.webhooks.insert(Webhook::from_new(new)).await?;
        info!(
            webhook_id = %webhook.id,
            url = %webhook.url,
            events = ?webhook.events,
            "Registered webhook"
        );
        Ok(webhook)
    }

    /// Get webhook by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Webhook>> {
        self.webhooks.get(id).await
    }

    /// List webhooks, optionally only those subscribed to `event_type`
    pub async fn list(&self, event_type: Option<&str>, active_only: bool) -> Result<Vec<Webhook>> {
        let filter = WebhookFilter {
            event_type: event_type.map(str::to_string),
            active_only,
        };
        self.webhooks.list(&filter).await
    }

    /// Active webhooks whose event set contains `event_type`
    pub async fn matching(&self, event_type: &str) -> Result<Vec<Webhook>> {
        self.list(Some(event_type), true).await
    }

    /// Apply a partial update; only supplied fields change
    pub async fn update(&self, id: Uuid, update: WebhookUpdate) -> Result<Webhook> {
        let mut webhook = self
            .webhooks
            .get(id)
            .await?
            .ok_or(WebhookError::WebhookNotFound(id))?;

        if let Some(name) = update.name {
            validation::validate_name(&name)?;
            webhook.name = name;
        }
        if let Some(url) = update.url {
            validation::validate_url(&url)?;
            webhook.url = url;
        }
        if let Some(description) = update.description {
            webhook.description = description;
        }
        if let Some(events) = update.events {
            validation::validate_events(&events)?;
            webhook.events = events.into_iter().collect();
        }
        if let Some(headers) = update.headers {
            if let Some(headers) = &headers {
                validation::validate_headers(headers)?;
            }
            webhook.headers = headers;
        }
        if let Some(is_active) = update.is_active {
            webhook.is_active = is_active;
        }
        if let Some(secret_key) = update.secret_key {
            webhook.secret_key = secret_key;
        }
        if let Some(retry_count) = update.retry_count {
            validation::validate_retry_count(retry_count)?;
            webhook.retry_count = retry_count;
        }

        webhook.updated_at = Utc::now();
        let webhook = self.webhooks.update(webhook).await?;
        info!(webhook_id = %webhook.id, "Updated webhook");
        Ok(webhook)
    }

    /// Delete a webhook that has no delivery history
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if self.webhooks.get(id).await?.is_none() {
            return Err(WebhookError::WebhookNotFound(id));
        }

        let history = self.deliveries.count_for_webhook(id).await?;
        if history > 0 {
            return Err(WebhookError::Conflict(format!(
                "cannot delete webhook {} with {} existing deliveries",
                id, history
            )));
        }

        if !self.webhooks.delete(id).await? {
            return Err(WebhookError::WebhookNotFound(id));
        }
        info!(webhook_id = %id, "Deleted webhook");
        Ok(())
    }
}
