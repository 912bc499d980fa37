// Webhook manager - entry point for webhook commands
//
// Manages:
// - Webhook registration and lifecycle (via the registry)
// - Event triggering (via the dispatcher)
// - Delivery history queries
// - Manual retry of a finished, failed delivery

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WebhookError};
use crate::metrics;
use crate::webhooks::delivery::{DeliveryExecutor, DeliverySettings, DeliveryTransport};
use crate::webhooks::dispatcher::EventDispatcher;
use crate::webhooks::model::{NewWebhook, Webhook, WebhookDelivery, WebhookEvent, WebhookUpdate};
use crate::webhooks::registry::WebhookRegistry;
use crate::webhooks::store::{DeliveryStore, MemoryStore, WebhookStore};

/// Default page size for delivery history
pub const DEFAULT_DELIVERY_LIMIT: usize = 100;

/// Why a manual retry did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryNoOpReason {
    DeliveryNotFound,
    AlreadySucceeded,
    /// The current attempt sequence has not finished yet
    StillInProgress,
    WebhookMissing,
    WebhookInactive,
}

impl RetryNoOpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryNoOpReason::DeliveryNotFound => "delivery_not_found",
            RetryNoOpReason::AlreadySucceeded => "already_succeeded",
            RetryNoOpReason::StillInProgress => "still_in_progress",
            RetryNoOpReason::WebhookMissing => "webhook_missing",
            RetryNoOpReason::WebhookInactive => "webhook_inactive",
        }
    }
}

/// Result of a manual retry request
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// A new attempt sequence ran; this is the final row
    Retried(WebhookDelivery),
    /// Nothing to retry
    NoOp(RetryNoOpReason),
}

impl RetryOutcome {
    pub fn delivery(&self) -> Option<&WebhookDelivery> {
        match self {
            RetryOutcome::Retried(delivery) => Some(delivery),
            RetryOutcome::NoOp(_) => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, RetryOutcome::NoOp(_))
    }
}

/// Webhook manager
#[derive(Clone)]
pub struct WebhookManager {
    registry: WebhookRegistry,
    deliveries: Arc<dyn DeliveryStore>,
    executor: DeliveryExecutor,
    dispatcher: EventDispatcher,
}

impl WebhookManager {
    /// Create a manager over external stores
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        deliveries: Arc<dyn DeliveryStore>,
        transport: Arc<dyn DeliveryTransport>,
        settings: DeliverySettings,
        max_in_flight: usize,
    ) -> Self {
        let registry = WebhookRegistry::new(webhooks, deliveries.clone());
        let executor = DeliveryExecutor::new(transport, deliveries.clone(), settings);
        let dispatcher = EventDispatcher::new(
            registry.clone(),
            deliveries.clone(),
            executor.clone(),
            max_in_flight,
        );
        Self {
            registry,
            deliveries,
            executor,
            dispatcher,
        }
    }

    /// Create a manager backed by a fresh in-memory store
    pub fn in_memory(
        transport: Arc<dyn DeliveryTransport>,
        settings: DeliverySettings,
        max_in_flight: usize,
    ) -> Self {
        let store = MemoryStore::new();
        Self::new(
            Arc::new(store.clone()),
            Arc::new(store),
            transport,
            settings,
            max_in_flight,
        )
    }

    pub fn registry(&self) -> &WebhookRegistry {
        &self.registry
    }

    /// Register a new webhook
    pub async fn register(&self, new: NewWebhook) -> Result<Webhook> {
        self.registry.register(new).await
    }

    /// Get webhook by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Webhook>> {
        self.registry.get(id).await
    }

    /// List webhooks
    pub async fn list(&self, event_type: Option<&str>, active_only: bool) -> Result<Vec<Webhook>> {
        self.registry.list(event_type, active_only).await
    }

    pub async fn update(&self, id: Uuid, update: WebhookUpdate) -> Result<Webhook> {
        self.registry.update(id, update).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.registry.delete(id).await
    }

    /// Deliver an event to all matching webhooks
    pub async fn trigger(&self, event: WebhookEvent) -> Result<Vec<WebhookDelivery>> {
        self.dispatcher.trigger(event).await
    }

    /// Delivery history for a webhook, newest first
    pub async fn get_deliveries(
        &self,
        webhook_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        if self.registry.get(webhook_id).await?.is_none() {
            return Err(WebhookError::WebhookNotFound(webhook_id));
        }
        self.deliveries.list_for_webhook(webhook_id, limit).await
    }

    pub async fn get_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>> {
        self.deliveries.get(id).await
    }

    /// Start a new attempt sequence for a finished, unsuccessful delivery
    ///
    /// Expected caller conditions (already delivered, webhook gone or
    /// disabled, sequence still running) come back as `RetryOutcome::NoOp`.
    /// Only store failures are errors.
    pub async fn retry_delivery(&self, delivery_id: Uuid) -> Result<RetryOutcome> {
        let outcome = self.retry_inner(delivery_id).await?;

        let label = match &outcome {
            RetryOutcome::Retried(_) => "retried",
            RetryOutcome::NoOp(reason) => {
                debug!(
                    delivery_id = %delivery_id,
                    reason = reason.as_str(),
                    "Manual retry skipped"
                );
                "noop"
            }
        };
        metrics::MANUAL_RETRIES_TOTAL.with_label_values(&[label]).inc();

        Ok(outcome)
    }

    async fn retry_inner(&self, delivery_id: Uuid) -> Result<RetryOutcome> {
        let delivery = match self.deliveries.get(delivery_id).await? {
            Some(delivery) => delivery,
            None => return Ok(RetryOutcome::NoOp(RetryNoOpReason::DeliveryNotFound)),
        };
        if delivery.is_success {
            return Ok(RetryOutcome::NoOp(RetryNoOpReason::AlreadySucceeded));
        }
        if delivery.completed_at.is_none() {
            return Ok(RetryOutcome::NoOp(RetryNoOpReason::StillInProgress));
        }

        let webhook = match self.registry.get(delivery.webhook_id).await? {
            Some(webhook) => webhook,
            None => return Ok(RetryOutcome::NoOp(RetryNoOpReason::WebhookMissing)),
        };
        if !webhook.is_active {
            return Ok(RetryOutcome::NoOp(RetryNoOpReason::WebhookInactive));
        }

        // Another retry may have claimed the row since it was read
        let delivery = match self.deliveries.begin_retry(delivery.id).await? {
            Some(delivery) => delivery,
            None => {
                let reason = self.unclaimable_reason(delivery_id).await?;
                return Ok(RetryOutcome::NoOp(reason));
            }
        };

        info!(
            webhook_id = %webhook.id,
            delivery_id = %delivery.id,
            attempt_count = delivery.attempt_count,
            "Retrying webhook delivery"
        );

        let delivery = self.executor.run(&webhook, delivery).await;
        Ok(RetryOutcome::Retried(delivery))
    }

    async fn unclaimable_reason(&self, delivery_id: Uuid) -> Result<RetryNoOpReason> {
        Ok(match self.deliveries.get(delivery_id).await? {
            None => RetryNoOpReason::DeliveryNotFound,
            Some(delivery) if delivery.is_success => RetryNoOpReason::AlreadySucceeded,
            Some(_) => RetryNoOpReason::StillInProgress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::retry::BackoffPolicy;
    use crate::webhooks::testing::{ScriptedTransport, Step};
    use serde_json::json;
    use std::time::Duration;

    fn manager(transport: ScriptedTransport) -> (WebhookManager, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let settings = DeliverySettings {
            backoff: BackoffPolicy::from_millis(1),
            ..Default::default()
        };
        (
            WebhookManager::in_memory(transport.clone(), settings, 4),
            transport,
        )
    }

    async fn register(manager: &WebhookManager, url: &str) -> Webhook {
        manager
            .register(NewWebhook::new("W1", url, ["deal.won"]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_retry_of_success_is_noop() {
        let (manager, transport) = manager(ScriptedTransport::default());
        register(&manager, "https://example.com/hook").await;

        let results = manager
            .trigger(WebhookEvent::new("deal.won", json!({"id": 1})))
            .await
            .unwrap();
        let delivered = results[0].clone();
        assert!(delivered.is_success);

        let outcome = manager.retry_delivery(delivered.id).await.unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::NoOp(RetryNoOpReason::AlreadySucceeded)
        );
        assert_eq!(transport.request_count(), 1);

        let stored = manager.get_delivery(delivered.id).await.unwrap().unwrap();
        assert_eq!(stored, delivered);
    }

    #[tokio::test]
    async fn test_retry_after_exhaustion_runs_new_sequence() {
        let mut steps = vec![Step::Status(500); 3];
        steps.extend(vec![Step::Status(502); 3]);
        let (manager, transport) = manager(ScriptedTransport::new(steps));
        register(&manager, "https://example.com/hook").await;

        let results = manager
            .trigger(WebhookEvent::new("deal.won", json!({})))
            .await
            .unwrap();
        let failed = &results[0];
        assert!(!failed.is_success);
        assert_eq!(failed.attempt_count, 3);
        assert!(failed.completed_at.is_some());

        let outcome = manager.retry_delivery(failed.id).await.unwrap();
        let retried = outcome.delivery().unwrap();
        assert!(!retried.is_success);
        assert_eq!(retried.attempt_count, 6);
        assert_eq!(retried.response_status, Some(502));
        assert!(retried.completed_at.unwrap() >= failed.completed_at.unwrap());
        assert_eq!(retried.created_at, failed.created_at);
        assert_eq!(transport.request_count(), 6);
    }

    #[tokio::test]
    async fn test_retry_can_succeed() {
        let mut steps = vec![Step::Status(503); 3];
        steps.push(Step::Respond(200, "ok".to_string()));
        let (manager, transport) = manager(ScriptedTransport::new(steps));
        register(&manager, "https://example.com/hook").await;

        let results = manager
            .trigger(WebhookEvent::new("deal.won", json!({})))
            .await
            .unwrap();

        let outcome = manager.retry_delivery(results[0].id).await.unwrap();
        let retried = outcome.delivery().unwrap();
        assert!(retried.is_success);
        assert_eq!(retried.attempt_count, 4);
        assert_eq!(retried.response_body.as_deref(), Some("ok"));
        assert!(retried.error_message.is_none());
        assert_eq!(transport.request_count(), 4);

        // Now successful, so a second retry does nothing
        let again = manager.retry_delivery(results[0].id).await.unwrap();
        assert!(again.is_noop());
    }

    #[tokio::test]
    async fn test_retry_noop_reasons() {
        let (manager, transport) = manager(ScriptedTransport::new(vec![Step::Status(500); 3]));
        let webhook = register(&manager, "https://example.com/hook").await;

        let outcome = manager.retry_delivery(Uuid::new_v4()).await.unwrap();
        assert_eq!(outcome, RetryOutcome::NoOp(RetryNoOpReason::DeliveryNotFound));

        let results = manager
            .trigger(WebhookEvent::new("deal.won", json!({})))
            .await
            .unwrap();
        let failed = results[0].clone();

        manager
            .update(
                webhook.id,
                WebhookUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = manager.retry_delivery(failed.id).await.unwrap();
        assert_eq!(outcome, RetryOutcome::NoOp(RetryNoOpReason::WebhookInactive));
        assert_eq!(transport.request_count(), 3);

        let stored = manager.get_delivery(failed.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_retry_noop_when_webhook_missing() {
        let transport = Arc::new(ScriptedTransport::default());
        let store = MemoryStore::new();
        let manager = WebhookManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            transport.clone(),
            DeliverySettings::default(),
            4,
        );

        let orphan_webhook = Uuid::new_v4();
        let mut delivery =
            WebhookDelivery::new(orphan_webhook, &WebhookEvent::new("deal.won", json!({})));
        delivery.record_error("Connection failed".to_string());
        delivery.complete();
        store.insert_batch(std::slice::from_ref(&delivery)).await.unwrap();

        let outcome = manager.retry_delivery(delivery.id).await.unwrap();
        assert_eq!(outcome, RetryOutcome::NoOp(RetryNoOpReason::WebhookMissing));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_noop_while_in_progress() {
        let (manager, transport) = manager(ScriptedTransport::default());
        let webhook = register(&manager, "https://example.com/hook").await;

        // Row created by a trigger whose sequence has not finished
        let mut pending =
            WebhookDelivery::new(webhook.id, &WebhookEvent::new("deal.won", json!({})));
        pending.record_response(500, String::new());
        manager
            .deliveries
            .insert_batch(std::slice::from_ref(&pending))
            .await
            .unwrap();

        let outcome = manager.retry_delivery(pending.id).await.unwrap();
        assert_eq!(outcome, RetryOutcome::NoOp(RetryNoOpReason::StillInProgress));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_retries_run_one_sequence() {
        let mut steps = vec![Step::Status(500); 3];
        steps.push(Step::Status(200));
        let transport = ScriptedTransport::new(steps).with_latency(Duration::from_millis(20));
        let (manager, transport) = manager(transport);
        register(&manager, "https://example.com/hook").await;

        let results = manager
            .trigger(WebhookEvent::new("deal.won", json!({})))
            .await
            .unwrap();
        let id = results[0].id;

        let (first, second) = tokio::join!(manager.retry_delivery(id), manager.retry_delivery(id));
        let outcomes = [first.unwrap(), second.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| !o.is_noop()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| *o == RetryOutcome::NoOp(RetryNoOpReason::StillInProgress)));
        assert_eq!(transport.request_count(), 4);

        let stored = manager.get_delivery(id).await.unwrap().unwrap();
        assert!(stored.is_success);
        assert_eq!(stored.attempt_count, 4);
    }

    #[tokio::test]
    async fn test_get_deliveries_newest_first() {
        let (manager, _) = manager(ScriptedTransport::default());
        let webhook = register(&manager, "https://example.com/hook").await;

        for n in 0..5 {
            manager
                .trigger(WebhookEvent::new("deal.won", json!({"n": n})))
                .await
                .unwrap();
        }

        let history = manager
            .get_deliveries(webhook.id, DEFAULT_DELIVERY_LIMIT)
            .await
            .unwrap();
        let order: Vec<i64> = history
            .iter()
            .map(|d| d.payload["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![4, 3, 2, 1, 0]);

        let page = manager.get_deliveries(webhook.id, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].payload["n"], 4);
    }

    #[tokio::test]
    async fn test_get_deliveries_unknown_webhook() {
        let (manager, _) = manager(ScriptedTransport::default());
        let result = manager
            .get_deliveries(Uuid::new_v4(), DEFAULT_DELIVERY_LIMIT)
            .await;
        assert!(matches!(result, Err(WebhookError::WebhookNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_blocked_by_history() {
        let (manager, _) = manager(ScriptedTransport::default());
        let webhook = register(&manager, "https://example.com/hook").await;
        manager
            .trigger(WebhookEvent::new("deal.won", json!({})))
            .await
            .unwrap();

        assert!(matches!(
            manager.delete(webhook.id).await,
            Err(WebhookError::Conflict(_))
        ));
        assert_eq!(manager.list(None, false).await.unwrap().len(), 1);
    }
}
