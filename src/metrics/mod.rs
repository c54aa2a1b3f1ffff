//! Prometheus collectors for the watch pipeline.
//!
//! Collectors are process-wide; embedders expose them by registering them on
//! their own registry with [`register_custom_metrics`] or by rendering the
//! crate registry with [`gather_text`].

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref QUEUE_ADDS: IntCounterVec = IntCounterVec::new(
        Opts::new("queue_adds_total", "Keys accepted by the work queue"),
        &["queue"]
    )
    .expect("metric can not be created");

    pub static ref QUEUE_DEPTH: IntGaugeVec = IntGaugeVec::new(
        Opts::new("queue_depth", "Keys waiting to be processed"),
        &["queue"]
    )
    .expect("metric can not be created");

    pub static ref QUEUE_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("queue_retries_total", "Rate limited requeues"),
        &["queue"]
    )
    .expect("metric can not be created");

    pub static ref DISPATCH_RESULTS: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatch_results_total", "Dispatch attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_events_total", "Watch events applied to the change cache"),
        &["event_type"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_RESTARTS: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_restarts_total", "List-then-watch restarts after a subscription loss"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("crd_watch".to_string()), None).expect("registry can be created");
}

static REGISTER_DEFAULT: Once = Once::new();

/// Registers every collector on `registry`.
///
/// # Errors
/// Fails when a collector is already registered there.
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(QUEUE_ADDS.clone()))?;
    registry.register(Box::new(QUEUE_DEPTH.clone()))?;
    registry.register(Box::new(QUEUE_RETRIES.clone()))?;
    registry.register(Box::new(DISPATCH_RESULTS.clone()))?;
    registry.register(Box::new(CACHE_EVENTS.clone()))?;
    registry.register(Box::new(WATCH_RESTARTS.clone()))?;
    Ok(())
}

/// Renders the crate registry in the Prometheus text format
pub fn gather_text() -> String {
    REGISTER_DEFAULT.call_once(|| {
        if let Err(e) = register_custom_metrics(&REGISTRY) {
            error!("could not register custom metrics: {}", e);
        }
    });

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
