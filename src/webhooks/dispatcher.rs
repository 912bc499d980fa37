// Event dispatcher - fan-out of one event to every matching webhook
//
// Delivery rows for all matches are created in a single batch before the
// first HTTP attempt. Attempt sequences then run concurrently, bounded by
// a semaphore, and the caller receives every final row in match order.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{Result, WebhookError};
use crate::metrics;
use crate::webhooks::delivery::DeliveryExecutor;
use crate::webhooks::model::{WebhookDelivery, WebhookEvent};
use crate::webhooks::registry::WebhookRegistry;
use crate::webhooks::store::DeliveryStore;
use crate::webhooks::validation;

/// Default cap on concurrently running attempt sequences per trigger
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Event dispatcher
#[derive(Clone)]
pub struct EventDispatcher {
    registry: WebhookRegistry,
    deliveries: Arc<dyn DeliveryStore>,
    executor: DeliveryExecutor,
    max_in_flight: usize,
}

impl EventDispatcher {
    pub fn new(
        registry: WebhookRegistry,
        deliveries: Arc<dyn DeliveryStore>,
        executor: DeliveryExecutor,
        max_in_flight: usize,
    ) -> Self {
        Self {
            registry,
            deliveries,
            executor,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Deliver `event` to every active webhook subscribed to its type
    ///
    /// Returns one final delivery row per matching webhook. Individual
    /// delivery failures are recorded on their rows and never turn into an
    /// `Err`; only validation and store failures do.
    pub async fn trigger(&self, event: WebhookEvent) -> Result<Vec<WebhookDelivery>> {
        validation::validate_event_type(&event.event_type)?;
        metrics::EVENTS_TRIGGERED_TOTAL.inc();

        let webhooks = self.registry.matching(&event.event_type).await?;
        if webhooks.is_empty() {
            debug!(
                target: "webhook_delivery",
                event_type = %event.event_type,
                "No webhooks subscribed to event"
            );
            return Ok(Vec::new());
        }

        let deliveries: Vec<WebhookDelivery> = webhooks
            .iter()
            .map(|webhook| WebhookDelivery::new(webhook.id, &event))
            .collect();
        self.deliveries.insert_batch(&deliveries).await?;

        info!(
            target: "webhook_delivery",
            event_type = %event.event_type,
            webhooks = webhooks.len(),
            "Dispatching event"
        );

        let delivery_ids: Vec<_> = deliveries.iter().map(|d| d.id).collect();
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();

        for (index, (webhook, delivery)) in webhooks.into_iter().zip(deliveries).enumerate() {
            let executor = self.executor.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (index, executor.run(&webhook, delivery).await)
            });
        }

        // A failed task never cuts its siblings short
        let mut results: Vec<Option<WebhookDelivery>> = vec![None; tasks.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, delivery)) => results[index] = Some(delivery),
                Err(e) => error!(
                    target: "webhook_delivery",
                    event_type = %event.event_type,
                    error = %e,
                    "Delivery task failed"
                ),
            }
        }

        let mut finished = Vec::with_capacity(results.len());
        for (result, id) in results.into_iter().zip(delivery_ids) {
            match result {
                Some(delivery) => finished.push(delivery),
                // Report the row as last persisted by the failed task
                None => match self.deliveries.get(id).await? {
                    Some(delivery) => finished.push(delivery),
                    None => {
                        return Err(WebhookError::DeliveryNotFound(id));
                    }
                },
            }
        }

        Ok(finished)
    }
}
