// Webhook data model
//
// Subscriptions, delivery records and the transient event value that
// flows from a trigger call into the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Attempts per delivery sequence when the caller does not choose
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// A registered webhook subscription
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Webhook {
    /// Unique webhook ID
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Absolute HTTP(S) URL to POST events to
    pub url: String,
    /// Free-form description
    pub description: Option<String>,
    /// Event types routed to this webhook (literal membership)
    pub events: BTreeSet<String>,
    /// Extra HTTP headers merged into every request
    pub headers: Option<BTreeMap<String, String>>,
    /// Shared secret for the X-Signature header; never serialized
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
    /// Inactive webhooks never match and cannot be retried
    pub is_active: bool,
    /// Maximum attempts per delivery sequence (>= 1)
    pub retry_count: u32,
    /// Identity of the registering user
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Build a webhook record from a validated registration request
    pub fn from_new(new: NewWebhook) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: new.name,
            url: new.url,
            description: new.description,
            events: new.events.into_iter().collect(),
            headers: new.headers,
            secret_key: new.secret_key,
            is_active: true,
            retry_count: new.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if this webhook should receive an event
    pub fn handles_event(&self, event_type: &str) -> bool {
        self.is_active && self.events.contains(event_type)
    }

    /// Whether deliveries to this webhook carry a signature
    pub fn is_signed(&self) -> bool {
        self.secret_key.is_some()
    }
}

/// Registration request for a new webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NewWebhook {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl NewWebhook {
    /// Create a registration request with the required fields
    pub fn new<I, S>(name: impl Into<String>, url: impl Into<String>, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            url: url.into(),
            events: events.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret_key = Some(secret.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

/// Partial update for an existing webhook
///
/// `None` leaves a field untouched. For the clearable fields the inner
/// `Option` is the new value, so `Some(None)` removes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub description: Option<Option<String>>,
    pub events: Option<Vec<String>>,
    pub headers: Option<Option<BTreeMap<String, String>>>,
    pub is_active: Option<bool>,
    pub secret_key: Option<Option<String>>,
    pub retry_count: Option<u32>,
}

impl WebhookUpdate {
    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Lifecycle of a delivery record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Created, no attempt recorded yet
    Pending,
    /// Attempt sequence running
    InProgress,
    /// Last attempt received a 2xx
    Success,
    /// Attempts exhausted without success
    Exhausted,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Success | DeliveryState::Exhausted)
    }
}

/// One attempt sequence against one webhook for one event occurrence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    /// Echoed verbatim as the request body
    pub payload: serde_json::Value,
    /// Cumulative HTTP attempts, including the one in flight
    pub attempt_count: u32,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub is_success: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookDelivery {
    /// Fresh delivery row for an event routed to `webhook_id`
    pub fn new(webhook_id: Uuid, event: &WebhookEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            event_type: event.event_type.clone(),
            payload: event.payload.clone(),
            attempt_count: 1,
            response_status: None,
            response_body: None,
            error_message: None,
            is_success: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Current lifecycle state, derived from the stored fields
    pub fn state(&self) -> DeliveryState {
        match (self.completed_at.is_some(), self.is_success) {
            (true, true) => DeliveryState::Success,
            (true, false) => DeliveryState::Exhausted,
            (false, _) if self.attempt_count <= 1 && !self.has_result() => {
                DeliveryState::Pending
            }
            (false, _) => DeliveryState::InProgress,
        }
    }

    /// Whether the current sequence has stopped
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    fn has_result(&self) -> bool {
        self.response_status.is_some() || self.error_message.is_some()
    }

    /// Record an HTTP response; overwrites the previous attempt's result
    pub fn record_response(&mut self, status: u16, body: String) {
        self.response_status = Some(status);
        self.response_body = Some(body);
        self.error_message = None;
        self.is_success = (200..300).contains(&status);
    }

    /// Record a transport-level failure; overwrites the previous result
    pub fn record_error(&mut self, message: String) {
        self.response_status = None;
        self.response_body = None;
        self.error_message = Some(message);
        self.is_success = false;
    }

    /// Mark the current sequence as finished
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Clear the terminal fields and count the first attempt of a new sequence
    pub fn reset_for_retry(&mut self) {
        self.response_status = None;
        self.response_body = None;
        self.error_message = None;
        self.is_success = false;
        self.completed_at = None;
        self.attempt_count += 1;
    }
}

/// Event occurrence supplied by a trigger call; never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    #[serde(alias = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl WebhookEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}
