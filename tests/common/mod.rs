//! Shared fixtures for integration tests against a real HTTP receiver.
//!
//! Responders record what the relay sends so tests can assert on the wire
//! format without a database.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use webhook_relay::webhooks::{
    BackoffPolicy, DeliverySettings, HttpTransport, NewWebhook, Webhook, WebhookManager,
};
use wiremock::{Request, Respond, ResponseTemplate};

pub const SECRET: &str = "whsec_test_secret_key_12345";

/// Backoff unit used by integration tests; keeps retry sequences short
pub const TEST_BACKOFF_UNIT: Duration = Duration::from_millis(20);

/// A request as seen by the receiver
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub received_at: Instant,
}

impl CapturedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    /// Header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| k.to_lowercase() == name)
            .map(|(_, v)| v.as_str())
    }
}

fn capture(request: &Request) -> CapturedRequest {
    CapturedRequest {
        body: request.body.clone(),
        headers: request
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect(),
        received_at: Instant::now(),
    }
}

/// Records every request and answers with a fixed status
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    status: u16,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            status,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.lock().unwrap().push(capture(request));
        ResponseTemplate::new(self.status)
    }
}

/// Fails `n` times with `failure_status`, then answers 200
#[derive(Clone)]
pub struct FailingResponder {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
    failure_status: u16,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl FailingResponder {
    pub fn fail_times(n: u32) -> Self {
        Self::fail_times_with(n, 500)
    }

    pub fn fail_times_with(n: u32, status: u16) -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
            failures_before_success: n,
            failure_status: status,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Respond for FailingResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.requests.lock().unwrap().push(capture(request));
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures_before_success {
            ResponseTemplate::new(self.failure_status).set_body_string("unavailable")
        } else {
            ResponseTemplate::new(200).set_body_string("accepted")
        }
    }
}

pub fn test_settings() -> DeliverySettings {
    DeliverySettings {
        backoff: BackoffPolicy::new(TEST_BACKOFF_UNIT),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Manager with a real HTTP transport and an in-memory store
pub fn http_manager(settings: DeliverySettings) -> WebhookManager {
    let transport = HttpTransport::new().expect("build HTTP transport");
    WebhookManager::in_memory(Arc::new(transport), settings, 8)
}

pub async fn register(
    manager: &WebhookManager,
    url: String,
    events: &[&str],
    configure: impl FnOnce(NewWebhook) -> NewWebhook,
) -> Webhook {
    manager
        .register(configure(NewWebhook::new(
            "receiver",
            url,
            events.iter().copied(),
        )))
        .await
        .expect("register webhook")
}
