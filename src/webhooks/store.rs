//! Webhook and Delivery Stores
//!
//! Persistence seams for subscriptions and delivery history. The relational
//! store of the surrounding service implements these traits; `MemoryStore`
//! is the in-process implementation used by the CLI and tests.
//!
//! Delivery rows are sharded, so concurrent executor tasks writing distinct
//! rows never contend on a single lock.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::webhooks::model::{Webhook, WebhookDelivery};

/// Filter for webhook listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookFilter {
    /// Only webhooks whose event set contains this literal type
    pub event_type: Option<String>,
    /// Exclude inactive webhooks
    pub active_only: bool,
}

impl WebhookFilter {
    /// Active webhooks subscribed to `event_type`
    pub fn matching(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            active_only: true,
        }
    }

    pub fn matches(&self, webhook: &Webhook) -> bool {
        if self.active_only && !webhook.is_active {
            return false;
        }
        match &self.event_type {
            Some(event_type) => webhook.events.contains(event_type),
            None => true,
        }
    }
}

/// Storage for webhook subscriptions (`webhooks` table)
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn insert(&self, webhook: Webhook) -> Result<Webhook>;

    async fn get(&self, id: Uuid) -> Result<Option<Webhook>>;

    async fn list(&self, filter: &WebhookFilter) -> Result<Vec<Webhook>>;

    /// Replace an existing webhook; fails if it does not exist
    async fn update(&self, webhook: Webhook) -> Result<Webhook>;

    /// Returns false when no webhook had this id
    async fn delete(&self, id: Uuid) -> Result<bool>;
}

/// Storage for delivery history (`webhook_deliveries` table)
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Persist all rows together; either every row is stored or none is
    async fn insert_batch(&self, deliveries: &[WebhookDelivery]) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<WebhookDelivery>>;

    /// Overwrite an existing row
    async fn save(&self, delivery: &WebhookDelivery) -> Result<()>;

    /// Reset a finished, failed row for a new attempt sequence
    ///
    /// The check and the reset are one conditional write, so two callers can
    /// never both claim the same row. Returns `None` when the row is missing,
    /// has succeeded, or is still running.
    async fn begin_retry(&self, id: Uuid) -> Result<Option<WebhookDelivery>>;

    /// Rows for a webhook, newest first, at most `limit`
    async fn list_for_webhook(&self, webhook_id: Uuid, limit: usize)
        -> Result<Vec<WebhookDelivery>>;

    async fn count_for_webhook(&self, webhook_id: Uuid) -> Result<usize>;
}

#[derive(Debug, Clone)]
struct StoredDelivery {
    /// Insertion order, used as tie-break for equal timestamps
    seq: u64,
    delivery: WebhookDelivery,
}

/// In-memory store implementing both store traits
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    webhooks: Arc<DashMap<Uuid, Webhook>>,
    deliveries: Arc<DashMap<Uuid, StoredDelivery>>,
    next_seq: Arc<AtomicU64>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored delivery rows
    pub fn delivery_count(&self) -> usize {
        self.deliveries.len()
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn insert(&self, webhook: Webhook) -> Result<Webhook> {
        if self.webhooks.contains_key(&webhook.id) {
            return Err(WebhookError::Store(format!(
                "duplicate webhook id {}",
                webhook.id
            )));
        }
        self.webhooks.insert(webhook.id, webhook.clone());
        Ok(webhook)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Webhook>> {
        Ok(self.webhooks.get(&id).map(|w| w.value().clone()))
    }

    async fn list(&self, filter: &WebhookFilter) -> Result<Vec<Webhook>> {
        let mut webhooks: Vec<Webhook> = self
            .webhooks
            .iter()
            .filter(|w| filter.matches(w.value()))
            .map(|w| w.value().clone())
            .collect();
        webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(webhooks)
    }

    async fn update(&self, webhook: Webhook) -> Result<Webhook> {
        match self.webhooks.get_mut(&webhook.id) {
            Some(mut entry) => {
                *entry = webhook.clone();
                Ok(webhook)
            }
            None => Err(WebhookError::WebhookNotFound(webhook.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.webhooks.remove(&id).is_some())
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn insert_batch(&self, deliveries: &[WebhookDelivery]) -> Result<()> {
        if let Some(dup) = deliveries
            .iter()
            .find(|d| self.deliveries.contains_key(&d.id))
        {
            return Err(WebhookError::Store(format!(
                "duplicate delivery id {}",
                dup.id
            )));
        }
        for delivery in deliveries {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            self.deliveries.insert(
                delivery.id,
                StoredDelivery {
                    seq,
                    delivery: delivery.clone(),
                },
            );
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        Ok(self.deliveries.get(&id).map(|d| d.delivery.clone()))
    }

    async fn save(&self, delivery: &WebhookDelivery) -> Result<()> {
        match self.deliveries.get_mut(&delivery.id) {
            Some(mut entry) => {
                entry.delivery = delivery.clone();
                Ok(())
            }
            None => Err(WebhookError::DeliveryNotFound(delivery.id)),
        }
    }

    async fn begin_retry(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        // Entry lock is held across the check and the reset
        let Some(mut entry) = self.deliveries.get_mut(&id) else {
            return Ok(None);
        };
        let row = &mut entry.delivery;
        if row.is_success || row.completed_at.is_none() {
            return Ok(None);
        }
        row.reset_for_retry();
        Ok(Some(row.clone()))
    }

    async fn list_for_webhook(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let mut rows: Vec<StoredDelivery> = self
            .deliveries
            .iter()
            .filter(|d| d.delivery.webhook_id == webhook_id)
            .map(|d| d.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            b.delivery
                .created_at
                .cmp(&a.delivery.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|row| row.delivery)
            .collect())
    }

    async fn count_for_webhook(&self, webhook_id: Uuid) -> Result<usize> {
        Ok(self
            .deliveries
            .iter()
            .filter(|d| d.delivery.webhook_id == webhook_id)
            .count())
    }
}
