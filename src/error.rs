//! Webhook Error Types
//!
//! Errors surfaced synchronously to callers of registry, store and manager
//! operations. Per-attempt delivery failures are not errors at this level:
//! they are recorded on the delivery row (see `webhooks::delivery`).

use uuid::Uuid;

/// Error types for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Malformed registration or update input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation blocked by existing state (e.g. delivery history)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Webhook does not exist
    #[error("Webhook not found: {0}")]
    WebhookNotFound(Uuid),

    /// Delivery does not exist
    #[error("Delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    /// Underlying persistence layer failed
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid runtime configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl WebhookError {
    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        WebhookError::Validation(msg.into())
    }

    /// True for errors caused by caller input rather than a system fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WebhookError::Validation(_)
                | WebhookError::Conflict(_)
                | WebhookError::WebhookNotFound(_)
                | WebhookError::DeliveryNotFound(_)
        )
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Validation(format!("invalid JSON: {}", err))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, WebhookError>;
