// Prometheus metrics for webhook delivery
//
// - Delivery attempts by outcome (counter)
// - Completed delivery sequences by final state (counter)
// - Attempt latency (histogram)
// - Sequences currently running (gauge)
// - Manual retries by result (counter)
// - Events triggered (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_delivery_attempts_total", "HTTP delivery attempts by outcome"),
        &["outcome"]
    ).expect("Failed to create delivery attempts metric");

    pub static ref DELIVERIES_COMPLETED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_deliveries_completed_total", "Delivery sequences that reached a terminal state"),
        &["state"]
    ).expect("Failed to create deliveries completed metric");

    pub static ref DELIVERY_ATTEMPT_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new("webhook_delivery_attempt_duration_seconds", "Duration of a single delivery attempt"),
    ).expect("Failed to create attempt duration metric");

    pub static ref DELIVERIES_IN_FLIGHT: IntGauge = IntGauge::new(
        "webhook_deliveries_in_flight",
        "Delivery sequences currently running"
    ).expect("Failed to create in-flight metric");

    pub static ref MANUAL_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("webhook_manual_retries_total", "Manual retry requests by result"),
        &["result"]
    ).expect("Failed to create manual retries metric");

    pub static ref EVENTS_TRIGGERED_TOTAL: IntCounter = IntCounter::new(
        "webhook_events_triggered_total",
        "Events passed to the dispatcher"
    ).expect("Failed to create events triggered metric");
}

/// Initialize metrics registry - call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELIVERIES_COMPLETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DELIVERY_ATTEMPT_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(DELIVERIES_IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(MANUAL_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(EVENTS_TRIGGERED_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
