// Webhook dispatch and delivery
//
// Handles:
// - Webhook registration and event matching
// - Signed HTTP delivery with retries and exponential backoff
// - Concurrent fan-out per triggered event
// - Delivery history and manual retry

pub mod delivery;
pub mod dispatcher;
pub mod manager;
pub mod model;
pub mod registry;
pub mod retry;
pub mod signature;
pub mod store;
pub mod validation;

#[cfg(test)]
mod testing;

pub use delivery::{
    DeliveryExecutor, DeliveryFailure, DeliverySettings, DeliveryTransport, HttpTransport,
    OutboundRequest, TransportError, TransportResponse,
};
pub use dispatcher::EventDispatcher;
pub use manager::{RetryNoOpReason, RetryOutcome, WebhookManager, DEFAULT_DELIVERY_LIMIT};
pub use model::{
    DeliveryState, NewWebhook, Webhook, WebhookDelivery, WebhookEvent, WebhookUpdate,
};
pub use registry::WebhookRegistry;
pub use retry::{BackoffPolicy, RetryDecision};
pub use store::{DeliveryStore, MemoryStore, WebhookFilter, WebhookStore};
