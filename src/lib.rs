//! Webhook Relay Library
//!
//! Outbound webhook dispatch: subscription registry, HMAC-signed HTTP
//! delivery with bounded retries and exponential backoff, concurrent
//! fan-out per event, and a delivery history supporting manual retry.

pub mod config;
pub mod error;
pub mod metrics;
pub mod webhooks;

pub use error::{Result, WebhookError};
pub use webhooks::WebhookManager;
