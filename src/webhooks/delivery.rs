// Webhook delivery executor with retry logic
//
// Drives one delivery record through its attempt sequence: build the
// signed request, POST it, record the result, back off and try again
// until a 2xx arrives or the webhook's retry budget is spent.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{Result, WebhookError};
use crate::metrics;
use crate::webhooks::model::{Webhook, WebhookDelivery};
use crate::webhooks::retry::{BackoffPolicy, RetryDecision};
use crate::webhooks::signature::{self, SIGNATURE_HEADER};
use crate::webhooks::store::DeliveryStore;

/// Product token sent as User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!("webhook-relay/", env!("CARGO_PKG_VERSION"));

/// Per-attempt request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes of receiver response kept on the delivery row
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 64 * 1024;

pub const WEBHOOK_ID_HEADER: &str = "X-Webhook-Id";
pub const DELIVERY_ID_HEADER: &str = "X-Delivery-Id";
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// A fully built outbound request
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub timeout: Duration,
    /// Bytes of response body the transport may read
    pub response_body_limit: usize,
}

/// Response received from a webhook endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Failure before any HTTP response was received
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timeout ({}s)", .0.as_secs())]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request error: {0}")]
    Request(String),
}

/// Why a single attempt did not succeed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryFailure {
    /// Endpoint answered with a non-2xx status
    #[error("HTTP {status}")]
    Http { status: u16 },

    /// No response was received
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request could not be built from the stored webhook/delivery
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DeliveryFailure {
    fn metric_label(&self) -> &'static str {
        match self {
            DeliveryFailure::Http { .. } => "http_error",
            DeliveryFailure::Transport(_) | DeliveryFailure::InvalidRequest(_) => {
                "transport_error"
            }
        }
    }
}

/// HTTP client seam used by the executor
///
/// One transport instance is shared by every concurrent delivery task.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn post(&self, request: OutboundRequest)
        -> std::result::Result<TransportResponse, TransportError>;
}

/// Connection-pooled reqwest transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with its own pooled client
    ///
    /// Redirects are not followed: a webhook endpoint must answer directly.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(
        &self,
        request: OutboundRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        let timeout = request.timeout;
        let limit = request.response_body_limit;
        let mut response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .timeout(timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status().as_u16();

        // Stop reading at the limit; the rest of the body is never buffered
        let mut body = Vec::new();
        while body.len() < limit {
            let chunk = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(timeout)
                } else {
                    TransportError::Request(format!("Failed to read response body: {}", e))
                }
            })?;
            let Some(chunk) = chunk else {
                break;
            };
            let take = chunk.len().min(limit - body.len());
            body.extend_from_slice(&chunk[..take]);
        }

        Ok(TransportResponse {
            status,
            body: decode_body(body),
        })
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(timeout)
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Decode a possibly truncated body, dropping a character cut at the end
fn decode_body(mut bytes: Vec<u8>) -> String {
    if let Err(e) = std::str::from_utf8(&bytes) {
        if e.error_len().is_none() {
            bytes.truncate(e.valid_up_to());
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Executor tunables
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverySettings {
    pub request_timeout: Duration,
    pub user_agent: String,
    pub backoff: BackoffPolicy,
    pub response_body_limit: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            backoff: BackoffPolicy::default(),
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
        }
    }
}

/// Webhook delivery executor
///
/// Cheap to clone; clones share the transport and the store.
#[derive(Clone)]
pub struct DeliveryExecutor {
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<dyn DeliveryStore>,
    settings: DeliverySettings,
}

impl DeliveryExecutor {
    /// Create a new delivery executor
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<dyn DeliveryStore>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            transport,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Run the attempt sequence for `delivery` until it reaches a terminal state
    ///
    /// The first attempt of the sequence is counted by the delivery's current
    /// `attempt_count`; each further attempt increments it. Every attempt result
    /// and the final outcome are written to the store before this returns.
    pub async fn run(&self, webhook: &Webhook, mut delivery: WebhookDelivery) -> WebhookDelivery {
        let max_attempts = webhook.retry_count.max(1);
        let mut sequence_attempt: u32 = 1;

        metrics::DELIVERIES_IN_FLIGHT.inc();

        loop {
            let result = self.attempt(webhook, &mut delivery).await;

            let failure = match result {
                Ok(()) => {
                    delivery.complete();
                    self.persist(&delivery).await;
                    info!(
                        target: "webhook_delivery",
                        webhook_id = %webhook.id,
                        delivery_id = %delivery.id,
                        attempt_count = delivery.attempt_count,
                        "Webhook delivered successfully"
                    );
                    metrics::DELIVERIES_COMPLETED_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    break;
                }
                Err(failure) => failure,
            };

            warn!(
                target: "webhook_delivery",
                webhook_id = %webhook.id,
                delivery_id = %delivery.id,
                attempt = sequence_attempt,
                max_attempts,
                error = %failure,
                "Webhook delivery attempt failed"
            );

            match self.settings.backoff.next(sequence_attempt, max_attempts) {
                RetryDecision::Retry(delay) => {
                    self.persist(&delivery).await;
                    debug!(
                        target: "webhook_delivery",
                        delivery_id = %delivery.id,
                        delay_ms = delay.as_millis() as u64,
                        "Backing off before next attempt"
                    );
                    tokio::time::sleep(delay).await;
                    sequence_attempt += 1;
                    delivery.attempt_count += 1;
                }
                RetryDecision::GiveUp => {
                    delivery.complete();
                    self.persist(&delivery).await;
                    info!(
                        target: "webhook_delivery",
                        webhook_id = %webhook.id,
                        delivery_id = %delivery.id,
                        attempt_count = delivery.attempt_count,
                        "Webhook delivery exhausted its attempts"
                    );
                    metrics::DELIVERIES_COMPLETED_TOTAL
                        .with_label_values(&["exhausted"])
                        .inc();
                    break;
                }
            }
        }

        metrics::DELIVERIES_IN_FLIGHT.dec();
        delivery
    }

    /// Make one HTTP attempt and record its result on `delivery`
    async fn attempt(
        &self,
        webhook: &Webhook,
        delivery: &mut WebhookDelivery,
    ) -> std::result::Result<(), DeliveryFailure> {
        let request = match self.build_request(webhook, delivery) {
            Ok(request) => request,
            Err(failure) => {
                delivery.record_error(failure.to_string());
                metrics::DELIVERY_ATTEMPTS_TOTAL
                    .with_label_values(&[failure.metric_label()])
                    .inc();
                return Err(failure);
            }
        };

        debug!(
            target: "webhook_delivery",
            webhook_id = %webhook.id,
            delivery_id = %delivery.id,
            attempt_count = delivery.attempt_count,
            url = %webhook.url,
            "Sending webhook"
        );

        let start = Instant::now();
        let result = self.transport.post(request).await;
        metrics::DELIVERY_ATTEMPT_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(response) => {
                let body = truncate_utf8(response.body, self.settings.response_body_limit);
                delivery.record_response(response.status, body);
                if delivery.is_success {
                    Ok(())
                } else {
                    Err(DeliveryFailure::Http {
                        status: response.status,
                    })
                }
            }
            Err(e) => {
                delivery.record_error(e.to_string());
                Err(DeliveryFailure::Transport(e))
            }
        };

        let label = match &outcome {
            Ok(()) => "success",
            Err(failure) => failure.metric_label(),
        };
        metrics::DELIVERY_ATTEMPTS_TOTAL.with_label_values(&[label]).inc();

        outcome
    }

    /// Build the outbound request for the current attempt
    pub fn build_request(
        &self,
        webhook: &Webhook,
        delivery: &WebhookDelivery,
    ) -> std::result::Result<OutboundRequest, DeliveryFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, header_value(&self.settings.user_agent)?);
        headers.insert(
            HeaderName::from_static("x-webhook-id"),
            header_value(&webhook.id.to_string())?,
        );
        headers.insert(
            HeaderName::from_static("x-delivery-id"),
            header_value(&delivery.id.to_string())?,
        );
        headers.insert(
            HeaderName::from_static("x-event-type"),
            header_value(&delivery.event_type)?,
        );

        // Custom headers replace defaults of the same name
        if let Some(custom) = &webhook.headers {
            for (name, value) in custom {
                let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    DeliveryFailure::InvalidRequest(format!("invalid header name '{}'", name))
                })?;
                headers.insert(name, header_value(value)?);
            }
        }

        if let Some(secret) = &webhook.secret_key {
            let sig = signature::sign(secret, &delivery.payload);
            headers.insert(
                HeaderName::from_static("x-signature"),
                header_value(&sig)?,
            );
        }

        let body = serde_json::to_vec(&delivery.payload)
            .map_err(|e| DeliveryFailure::InvalidRequest(format!("payload: {}", e)))?;

        Ok(OutboundRequest {
            url: webhook.url.clone(),
            headers,
            body,
            timeout: self.settings.request_timeout,
            response_body_limit: self.settings.response_body_limit,
        })
    }

    async fn persist(&self, delivery: &WebhookDelivery) {
        if let Err(e) = self.store.save(delivery).await {
            error!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                error = %e,
                "Failed to persist delivery state"
            );
        }
    }
}

fn header_value(value: &str) -> std::result::Result<HeaderValue, DeliveryFailure> {
    HeaderValue::from_str(value)
        .map_err(|_| DeliveryFailure::InvalidRequest(format!("invalid header value '{}'", value)))
}

/// Cut `body` to at most `limit` bytes without splitting a character
fn truncate_utf8(mut body: String, limit: usize) -> String {
    if body.len() > limit {
        let mut cut = limit;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
