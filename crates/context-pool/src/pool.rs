//! Pool implementation.
//!
//! All slot and queue state lives behind one mutex and is only touched
//! synchronously; warm-ups and session closes happen outside the lock.
//! Status events are prepared under the lock and emitted after it is
//! dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ghostpilot_browser_control::testing::SessionFactory;
use ghostpilot_browser_control::GhostSession;
use ghostpilot_core_types::{ContextId, LeaseId, Priority, TaskId};
use ghostpilot_event_bus::StatusChannel;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::errors::PoolError;
use crate::events::{PoolEvent, PoolEventKind};
use crate::metrics;
use crate::model::{
    AcquireRequest, Lease, PoolConfig, PoolSnapshot, PoolTelemetry, SlotState,
};

struct Slot {
    context: ContextId,
    state: SlotState,
    session: Option<Arc<GhostSession>>,
    last_warm_duration: Option<Duration>,
}

struct Waiter {
    task_id: TaskId,
    priority: Priority,
    enqueued_at: Instant,
    tx: oneshot::Sender<Result<Lease, PoolError>>,
}

struct PoolInner {
    slots: Vec<Slot>,
    available: VecDeque<usize>,
    waiters: [VecDeque<Waiter>; 2],
    active_leases: HashMap<u64, usize>,
    next_lease: u64,
    shutting_down: bool,
}

impl PoolInner {
    fn snapshot(&self, cfg: &PoolConfig) -> PoolSnapshot {
        let mut cold = 0;
        let mut replenishing = 0;
        let mut available = 0;
        let mut in_use = 0;
        let slot_states: Vec<SlotState> = self
            .slots
            .iter()
            .map(|slot| {
                match slot.state {
                    SlotState::Cold => cold += 1,
                    SlotState::Replenishing => replenishing += 1,
                    SlotState::Available => available += 1,
                    SlotState::InUse => in_use += 1,
                }
                slot.state
            })
            .collect();
        PoolSnapshot {
            min: cfg.min,
            max: cfg.max,
            total: self.slots.len(),
            cold,
            replenishing,
            available,
            in_use,
            queued: self.waiters.iter().map(VecDeque::len).sum(),
            slot_states,
        }
    }

    fn pop_waiter(&mut self) -> Option<Waiter> {
        for queue in self.waiters.iter_mut() {
            if let Some(waiter) = queue.pop_front() {
                return Some(waiter);
            }
        }
        None
    }

    fn available_count(&self) -> usize {
        self.available.len()
    }

    fn first_cold(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.state == SlotState::Cold)
    }
}

#[derive(Default)]
struct Telemetry {
    warm_assignments: AtomicU64,
    queued_assignments: AtomicU64,
    warm_wait_sum_ms: AtomicU64,
    queue_wait_sum_ms: AtomicU64,
    warm_duration_sum_ms: AtomicU64,
    warm_duration_count: AtomicU64,
}

pub struct GhostContextPool {
    cfg: PoolConfig,
    factory: Arc<dyn SessionFactory>,
    inner: Mutex<PoolInner>,
    events: StatusChannel<PoolEvent>,
    telemetry: Telemetry,
    replenish_notify: Arc<Notify>,
    replenish_task: Mutex<Option<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl GhostContextPool {
    pub fn new(cfg: PoolConfig, factory: Arc<dyn SessionFactory>) -> Arc<Self> {
        let slots = (0..cfg.max)
            .map(|i| Slot {
                context: ContextId::slot(i),
                state: SlotState::Cold,
                session: None,
                last_warm_duration: None,
            })
            .collect();
        Arc::new(Self {
            cfg,
            factory,
            inner: Mutex::new(PoolInner {
                slots,
                available: VecDeque::new(),
                waiters: [VecDeque::new(), VecDeque::new()],
                active_leases: HashMap::new(),
                next_lease: 0,
                shutting_down: false,
            }),
            events: StatusChannel::default(),
            telemetry: Telemetry::default(),
            replenish_notify: Arc::new(Notify::new()),
            replenish_task: Mutex::new(None),
            initialized: AtomicBool::new(false),
        })
    }

    /// Warm `min` slots and start the replenishment loop.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), PoolError> {
        let mut set = JoinSet::new();
        for idx in 0..self.cfg.min.min(self.cfg.max) {
            {
                let mut inner = self.inner.lock();
                inner.slots[idx].state = SlotState::Replenishing;
            }
            let factory = self.factory.clone();
            let control = self.cfg.control.clone();
            let context = ContextId::slot(idx);
            set.spawn(async move {
                let started = Instant::now();
                let result = factory.warm(&control, &context).await;
                (idx, started.elapsed(), result)
            });
        }

        while let Some(joined) = set.join_next().await {
            let (idx, duration, result) =
                joined.map_err(|_| PoolError::AcquireDropped)?;
            match result {
                Ok(session) => self.complete_warm(idx, session, duration),
                Err(err) => {
                    warn!(target: "ghost-pool", slot = idx, %err, "initial warm failed");
                    self.inner.lock().slots[idx].state = SlotState::Cold;
                }
            }
        }

        self.initialized.store(true, Ordering::Release);
        if self.cfg.auto_replenish {
            self.spawn_replenish_loop();
        }
        self.observe();
        info!(target: "ghost-pool", min = self.cfg.min, max = self.cfg.max, "pool initialized");
        Ok(())
    }

    /// Lease a warm context, or wait in the priority queue.
    pub async fn acquire_ghost_tab(&self, request: AcquireRequest) -> Result<Lease, PoolError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(PoolError::NotInitialized);
        }
        let started = Instant::now();

        enum Path {
            Immediate(Lease, PoolSnapshot),
            Queued(oneshot::Receiver<Result<Lease, PoolError>>, PoolSnapshot),
        }

        let path = {
            let mut inner = self.inner.lock();
            if inner.shutting_down {
                return Err(PoolError::ShuttingDown);
            }
            if let Some(idx) = inner.available.pop_front() {
                let wait_ms = started.elapsed().as_millis() as u64;
                let lease = make_lease(
                    &mut inner,
                    idx,
                    request.task_id.clone(),
                    request.priority,
                    wait_ms,
                );
                let snapshot = inner.snapshot(&self.cfg);
                Path::Immediate(lease, snapshot)
            } else {
                let (tx, rx) = oneshot::channel();
                inner.waiters[request.priority.index()].push_back(Waiter {
                    task_id: request.task_id.clone(),
                    priority: request.priority,
                    enqueued_at: started,
                    tx,
                });
                let snapshot = inner.snapshot(&self.cfg);
                Path::Queued(rx, snapshot)
            }
        };

        match path {
            Path::Immediate(lease, snapshot) => {
                self.telemetry.warm_assignments.fetch_add(1, Ordering::Relaxed);
                self.telemetry
                    .warm_wait_sum_ms
                    .fetch_add(lease.assignment_wait_ms, Ordering::Relaxed);
                metrics::record_assignment("warm");
                self.emit(PoolEvent::new(
                    PoolEventKind::Dispatched,
                    lease.task_id.clone(),
                    Some(lease.context_id.clone()),
                    false,
                    snapshot,
                ));
                Ok(lease)
            }
            Path::Queued(rx, snapshot) => {
                self.emit(PoolEvent::new(
                    PoolEventKind::Enqueued,
                    request.task_id.clone(),
                    None,
                    true,
                    snapshot,
                ));
                self.replenish_notify.notify_one();
                let lease = rx.await.map_err(|_| PoolError::AcquireDropped)??;
                self.telemetry
                    .queued_assignments
                    .fetch_add(1, Ordering::Relaxed);
                self.telemetry
                    .queue_wait_sum_ms
                    .fetch_add(lease.assignment_wait_ms, Ordering::Relaxed);
                metrics::record_assignment("queued");
                let snapshot = self.inner.lock().snapshot(&self.cfg);
                self.emit(PoolEvent::new(
                    PoolEventKind::Dispatched,
                    lease.task_id.clone(),
                    Some(lease.context_id.clone()),
                    true,
                    snapshot,
                ));
                Ok(lease)
            }
        }
    }

    /// Return a lease. Crashed contexts recycle cold; healthy ones go
    /// straight to the next waiter or back on the available queue.
    /// Releasing twice is a no-op.
    pub async fn release(&self, lease: &Lease) -> Result<(), PoolError> {
        let (to_close, snapshot, task_id, context_id) = {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.active_leases.remove(&lease.lease_id.0) else {
                return Ok(());
            };

            let crashed = inner.slots[idx]
                .session
                .as_ref()
                .and_then(|session| session.get_last_crash_event())
                .is_some();

            let to_close = if crashed {
                let session = inner.slots[idx].session.take();
                inner.slots[idx].state = SlotState::Cold;
                metrics::record_recycle("crash");
                debug!(
                    target: "ghost-pool",
                    context = %inner.slots[idx].context,
                    "crashed context recycled"
                );
                session
            } else {
                self.hand_off_or_park(&mut inner, idx);
                None
            };

            let snapshot = inner.snapshot(&self.cfg);
            (to_close, snapshot, lease.task_id.clone(), lease.context_id.clone())
        };

        if let Some(session) = to_close {
            session.close().await;
        }
        self.replenish_notify.notify_one();
        self.emit(PoolEvent::new(
            PoolEventKind::Released,
            task_id,
            Some(context_id),
            false,
            snapshot,
        ));
        Ok(())
    }

    /// Force-recycle a context regardless of lease state; used by task
    /// cancellation.
    pub async fn destroy_context(&self, context: &ContextId) -> Result<(), PoolError> {
        let to_close = {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.slots.iter().position(|s| &s.context == context) else {
                return Err(PoolError::UnknownContext(context.as_str().to_string()));
            };
            inner.available.retain(|&i| i != idx);
            inner.active_leases.retain(|_, slot_idx| *slot_idx != idx);
            inner.slots[idx].state = SlotState::Cold;
            metrics::record_recycle("destroyed");
            inner.slots[idx].session.take()
        };
        if let Some(session) = to_close {
            session.close_target().await.ok();
            session.close().await;
        }
        self.replenish_notify.notify_one();
        self.observe();
        Ok(())
    }

    /// Reject all queued requests, close every session, reset slots.
    pub async fn shutdown(&self) {
        let (waiters, sessions) = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            let waiters: Vec<Waiter> = inner
                .waiters
                .iter_mut()
                .flat_map(|queue| queue.drain(..))
                .collect();
            inner.available.clear();
            inner.active_leases.clear();
            let sessions: Vec<Arc<GhostSession>> = inner
                .slots
                .iter_mut()
                .filter_map(|slot| {
                    slot.state = SlotState::Cold;
                    slot.session.take()
                })
                .collect();
            (waiters, sessions)
        };

        for waiter in waiters {
            let _ = waiter.tx.send(Err(PoolError::ShuttingDown));
        }
        for session in sessions {
            session.close().await;
        }
        if let Some(handle) = self.replenish_task.lock().take() {
            handle.abort();
        }
        self.observe();
        info!(target: "ghost-pool", "pool shut down");
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.inner.lock().snapshot(&self.cfg)
    }

    pub fn telemetry(&self) -> PoolTelemetry {
        let warm = self.telemetry.warm_assignments.load(Ordering::Relaxed);
        let queued = self.telemetry.queued_assignments.load(Ordering::Relaxed);
        let warm_durations = self.telemetry.warm_duration_count.load(Ordering::Relaxed);
        PoolTelemetry {
            warm_assignment_count: warm,
            queued_assignment_count: queued,
            average_warm_assignment_wait_ms: average(
                self.telemetry.warm_wait_sum_ms.load(Ordering::Relaxed),
                warm,
            ),
            average_queue_wait_ms: average(
                self.telemetry.queue_wait_sum_ms.load(Ordering::Relaxed),
                queued,
            ),
            average_warm_duration_ms: average(
                self.telemetry.warm_duration_sum_ms.load(Ordering::Relaxed),
                warm_durations,
            ),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Park a freshly warmed session, or hand it straight to a waiter.
    fn complete_warm(&self, idx: usize, session: GhostSession, duration: Duration) {
        self.telemetry
            .warm_duration_sum_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.telemetry
            .warm_duration_count
            .fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.slots[idx].session = Some(Arc::new(session));
        inner.slots[idx].last_warm_duration = Some(duration);
        self.hand_off_or_park(&mut inner, idx);
    }

    /// Slot has a healthy session: dispatch to the best waiter
    /// (foreground first) or mark it available.
    fn hand_off_or_park(&self, inner: &mut PoolInner, idx: usize) {
        loop {
            match inner.pop_waiter() {
                Some(waiter) => {
                    let wait_ms = waiter.enqueued_at.elapsed().as_millis() as u64;
                    let lease =
                        make_lease(inner, idx, waiter.task_id.clone(), waiter.priority, wait_ms);
                    if waiter.tx.send(Ok(lease)).is_ok() {
                        return;
                    }
                    // waiter gave up; un-lease and try the next one
                    let lease_id = inner.next_lease;
                    inner.active_leases.remove(&lease_id);
                }
                None => {
                    inner.slots[idx].state = SlotState::Available;
                    inner.available.push_back(idx);
                    return;
                }
            }
        }
    }

    fn spawn_replenish_loop(self: &Arc<Self>) {
        let pool = Arc::downgrade(self);
        let notify = self.replenish_notify.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(pool) = pool.upgrade() else { break };
                pool.replenish_once().await;
                let notified = notify.notified();
                drop(pool);
                tokio::select! {
                    _ = notified => {}
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                }
            }
        });
        *self.replenish_task.lock() = Some(handle);
    }

    /// Warm cold slots until the available floor holds. Single-flight:
    /// only the replenish loop calls this.
    async fn replenish_once(self: &Arc<Self>) {
        loop {
            let claim = {
                let mut inner = self.inner.lock();
                if inner.shutting_down || inner.available_count() >= self.cfg.min {
                    None
                } else {
                    inner.first_cold().map(|idx| {
                        inner.slots[idx].state = SlotState::Replenishing;
                        (idx, inner.slots[idx].context.clone())
                    })
                }
            };
            let Some((idx, context)) = claim else { break };

            let started = Instant::now();
            match self.factory.warm(&self.cfg.control, &context).await {
                Ok(session) => {
                    self.complete_warm(idx, session, started.elapsed());
                    self.observe();
                }
                Err(err) => {
                    warn!(target: "ghost-pool", context = %context, %err, "warm attempt failed");
                    self.inner.lock().slots[idx].state = SlotState::Cold;
                    tokio::time::sleep(self.cfg.warm_retry_backoff).await;
                    break;
                }
            }
        }
    }

    fn emit(&self, event: PoolEvent) {
        metrics::observe_snapshot(&event.snapshot);
        self.events.emit(event);
    }

    fn observe(&self) {
        metrics::observe_snapshot(&self.snapshot());
    }
}

fn make_lease(
    inner: &mut PoolInner,
    idx: usize,
    task_id: TaskId,
    priority: Priority,
    assignment_wait_ms: u64,
) -> Lease {
    inner.next_lease += 1;
    let lease_id = inner.next_lease;
    inner.slots[idx].state = SlotState::InUse;
    inner.active_leases.insert(lease_id, idx);
    let session = inner.slots[idx]
        .session
        .clone()
        .expect("leasing a slot without a session is a pool invariant violation");
    Lease {
        lease_id: LeaseId(lease_id),
        task_id,
        context_id: inner.slots[idx].context.clone(),
        priority,
        assignment_wait_ms,
        session,
    }
}

fn average(sum: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}
