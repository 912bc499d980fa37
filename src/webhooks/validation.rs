//! Registration and update validation
//!
//! All checks raise `WebhookError::Validation` synchronously so malformed
//! subscriptions never reach the store.

use std::collections::BTreeMap;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;

use crate::error::{Result, WebhookError};
use crate::webhooks::model::NewWebhook;

/// Validate a complete registration request
pub fn validate_new(new: &NewWebhook) -> Result<()> {
    validate_name(&new.name)?;
    validate_url(&new.url)?;
    validate_events(&new.events)?;
    if let Some(headers) = &new.headers {
        validate_headers(headers)?;
    }
    if let Some(retry_count) = new.retry_count {
        validate_retry_count(retry_count)?;
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(WebhookError::validation("name must not be empty"));
    }
    Ok(())
}

/// URL must be absolute, use http or https, and carry a host
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| WebhookError::validation(format!("invalid URL '{}': {}", url, e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(WebhookError::validation(format!(
                "unsupported URL scheme '{}': must be http or https",
                other
            )))
        }
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(WebhookError::validation(format!("URL '{}' has no host", url)));
    }

    Ok(())
}

pub fn validate_events(events: &[String]) -> Result<()> {
    if events.is_empty() {
        return Err(WebhookError::validation(
            "at least one event type is required",
        ));
    }
    if events.iter().any(|e| e.trim().is_empty()) {
        return Err(WebhookError::validation("event types must not be blank"));
    }
    // A subscription must be reachable by some triggerable event type
    events.iter().try_for_each(|e| validate_event_type(e))
}

/// Every custom header must be a legal HTTP header name/value pair
pub fn validate_headers(headers: &BTreeMap<String, String>) -> Result<()> {
    for (name, value) in headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| WebhookError::validation(format!("invalid header name '{}'", name)))?;
        HeaderValue::from_str(value).map_err(|_| {
            WebhookError::validation(format!("invalid value for header '{}'", name))
        })?;
    }
    Ok(())
}

/// Event type of a triggered event; it is echoed in the X-Event-Type header
pub fn validate_event_type(event_type: &str) -> Result<()> {
    if event_type.trim().is_empty() {
        return Err(WebhookError::validation("event type must not be empty"));
    }
    HeaderValue::from_str(event_type).map_err(|_| {
        WebhookError::validation(format!("event type '{}' is not header-safe", event_type))
    })?;
    Ok(())
}

pub fn validate_retry_count(retry_count: u32) -> Result<()> {
    if retry_count == 0 {
        return Err(WebhookError::validation("retry_count must be at least 1"));
    }
    Ok(())
}
