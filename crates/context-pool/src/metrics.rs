use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounterVec, IntGauge, Registry};
use tracing::error;

use crate::model::PoolSnapshot;

lazy_static! {
    static ref POOL_AVAILABLE: IntGauge =
        IntGauge::new("ghost_pool_available", "Warm slots ready for leases").unwrap();
    static ref POOL_IN_USE: IntGauge =
        IntGauge::new("ghost_pool_in_use", "Slots currently leased").unwrap();
    static ref POOL_COLD: IntGauge =
        IntGauge::new("ghost_pool_cold", "Slots awaiting warm-up").unwrap();
    static ref POOL_QUEUED: IntGauge =
        IntGauge::new("ghost_pool_queued", "Acquire requests waiting").unwrap();
    static ref POOL_ASSIGNMENTS: IntCounterVec = IntCounterVec::new(
        opts!(
            "ghost_pool_assignments_total",
            "Lease assignments grouped by path"
        ),
        &["path"]
    )
    .unwrap();
    static ref POOL_RECYCLES: IntCounterVec = IntCounterVec::new(
        opts!(
            "ghost_pool_recycles_total",
            "Slot recycles grouped by trigger"
        ),
        &["trigger"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register pool metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, POOL_AVAILABLE.clone());
    register(registry, POOL_IN_USE.clone());
    register(registry, POOL_COLD.clone());
    register(registry, POOL_QUEUED.clone());
    register(registry, POOL_ASSIGNMENTS.clone());
    register(registry, POOL_RECYCLES.clone());
}

pub fn observe_snapshot(snapshot: &PoolSnapshot) {
    POOL_AVAILABLE.set(snapshot.available as i64);
    POOL_IN_USE.set(snapshot.in_use as i64);
    POOL_COLD.set((snapshot.cold + snapshot.replenishing) as i64);
    POOL_QUEUED.set(snapshot.queued as i64);
}

pub fn record_assignment(path: &str) {
    POOL_ASSIGNMENTS.with_label_values(&[path]).inc();
}

pub fn record_recycle(trigger: &str) {
    POOL_RECYCLES.with_label_values(&[trigger]).inc();
}
