use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, Registry};
use tracing::error;

lazy_static! {
    static ref CONTROL_COMMANDS_TOTAL: IntCounter = IntCounter::new(
        "ghost_control_commands_total",
        "CDP commands sent across all sessions",
    )
    .unwrap();
    static ref CONTROL_NAVIGATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "ghost_control_navigations_total",
            "Navigations grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref CONTROL_BLOCKED_REQUESTS: IntCounterVec = IntCounterVec::new(
        opts!(
            "ghost_control_blocked_requests_total",
            "Requests blocked by interception, grouped by classification"
        ),
        &["classification"]
    )
    .unwrap();
    static ref CONTROL_CRASHES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "ghost_control_crashes_total",
            "Session-fatal events grouped by source"
        ),
        &["source"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register browser-control metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CONTROL_COMMANDS_TOTAL.clone());
    register(registry, CONTROL_NAVIGATIONS_TOTAL.clone());
    register(registry, CONTROL_BLOCKED_REQUESTS.clone());
    register(registry, CONTROL_CRASHES_TOTAL.clone());
}

pub fn record_command() {
    CONTROL_COMMANDS_TOTAL.inc();
}

pub fn record_navigation(outcome: &str) {
    CONTROL_NAVIGATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_blocked_request(classification: &str) {
    CONTROL_BLOCKED_REQUESTS
        .with_label_values(&[classification])
        .inc();
}

pub fn record_crash(source: &str) {
    CONTROL_CRASHES_TOTAL.with_label_values(&[source]).inc();
}
