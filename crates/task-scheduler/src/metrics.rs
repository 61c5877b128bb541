use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    crashes: AtomicU64,
    retries: AtomicU64,
    budget_kills: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_submitted() {
    increment(&COUNTERS.submitted);
}

pub fn record_succeeded() {
    increment(&COUNTERS.succeeded);
}

pub fn record_failed() {
    increment(&COUNTERS.failed);
}

pub fn record_cancelled() {
    increment(&COUNTERS.cancelled);
}

pub fn record_crash() {
    increment(&COUNTERS.crashes);
}

pub fn record_retry() {
    increment(&COUNTERS.retries);
}

pub fn record_budget_kill() {
    increment(&COUNTERS.budget_kills);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerMetricsSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub crashes: u64,
    pub retries: u64,
    pub budget_kills: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        submitted: COUNTERS.submitted.load(Ordering::Relaxed),
        succeeded: COUNTERS.succeeded.load(Ordering::Relaxed),
        failed: COUNTERS.failed.load(Ordering::Relaxed),
        cancelled: COUNTERS.cancelled.load(Ordering::Relaxed),
        crashes: COUNTERS.crashes.load(Ordering::Relaxed),
        retries: COUNTERS.retries.load(Ordering::Relaxed),
        budget_kills: COUNTERS.budget_kills.load(Ordering::Relaxed),
    }
}
