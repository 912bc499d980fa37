//! Scripted transport for executor and dispatcher tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::webhooks::delivery::{
    DeliveryTransport, OutboundRequest, TransportError, TransportResponse,
};
use crate::webhooks::model::WebhookDelivery;
use crate::webhooks::store::{DeliveryStore, MemoryStore};

/// One scripted reply
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(u16),
    Respond(u16, String),
    Fail(TransportError),
    /// The delivery task panics as the request goes out
    Panic,
}

/// Replays scripted replies; unscripted requests get 200
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    default_steps: Mutex<VecDeque<Step>>,
    routes: Mutex<HashMap<String, VecDeque<Step>>>,
    requests: Mutex<Vec<OutboundRequest>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    watched: Mutex<Option<(MemoryStore, Uuid)>>,
    snapshots: Mutex<Vec<WebhookDelivery>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            default_steps: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    /// Every request waits this long before replying
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Script replies for one URL
    pub(crate) fn route(self, url: &str, steps: Vec<Step>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into());
        self
    }

    /// Record the stored row for `delivery_id` as each request goes out
    pub(crate) fn watch_row(&self, store: MemoryStore, delivery_id: Uuid) {
        *self.watched.lock().unwrap() = Some((store, delivery_id));
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshots(&self) -> Vec<WebhookDelivery> {
        self.snapshots.lock().unwrap().clone()
    }

    fn next_step(&self, url: &str) -> Step {
        if let Some(steps) = self.routes.lock().unwrap().get_mut(url) {
            if let Some(step) = steps.pop_front() {
                return step;
            }
        }
        self.default_steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Status(200))
    }
}

#[async_trait]
impl DeliveryTransport for ScriptedTransport {
    async fn post(
        &self,
        request: OutboundRequest,
    ) -> Result<TransportResponse, TransportError> {
        let watched = self.watched.lock().unwrap().clone();
        if let Some((store, id)) = watched {
            if let Ok(Some(row)) = DeliveryStore::get(&store, id).await {
                self.snapshots.lock().unwrap().push(row);
            }
        }

        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        let step = self.next_step(&url);
        if matches!(step, Step::Panic) {
            panic!("scripted transport panic for {}", url);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Status(status) => Ok(TransportResponse {
                status,
                body: String::new(),
            }),
            Step::Respond(status, body) => Ok(TransportResponse { status, body }),
            Step::Fail(err) => Err(err),
            Step::Panic => unreachable!(),
        }
    }
}
