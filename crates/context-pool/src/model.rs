use std::sync::Arc;
use std::time::Duration;

use ghostpilot_browser_control::{ControlConfig, GhostSession};
use ghostpilot_core_types::{ContextId, LeaseId, Priority, TaskId};
use serde::{Deserialize, Serialize};

/// Pool sizing and warm-up behaviour.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Warm floor maintained by the replenishment loop.
    pub min: usize,
    /// Total slot count; hard ceiling on concurrent leases.
    pub max: usize,
    /// Connection settings shared by every context.
    pub control: ControlConfig,
    /// Keep the replenishment loop running (`GHOST_CONTEXT_AUTO_REPLENISH`).
    pub auto_replenish: bool,
    /// Backoff after a failed warm attempt.
    pub warm_retry_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 2,
            max: 4,
            control: ControlConfig::default(),
            auto_replenish: true,
            warm_retry_backoff: Duration::from_millis(500),
        }
    }
}

/// Lifecycle of one pool slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Cold,
    Replenishing,
    Available,
    InUse,
}

/// Acquisition request.
#[derive(Clone, Debug)]
pub struct AcquireRequest {
    pub task_id: TaskId,
    pub priority: Priority,
}

/// Single-assignment handle coupling a task to one ghost context.
///
/// Exactly one live lease references a slot; release through the pool
/// is idempotent.
pub struct Lease {
    pub lease_id: LeaseId,
    pub task_id: TaskId,
    pub context_id: ContextId,
    pub priority: Priority,
    pub assignment_wait_ms: u64,
    pub(crate) session: Arc<GhostSession>,
}

impl Lease {
    pub fn session(&self) -> &Arc<GhostSession> {
        &self.session
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("lease_id", &self.lease_id)
            .field("task_id", &self.task_id)
            .field("context_id", &self.context_id)
            .field("priority", &self.priority)
            .field("assignment_wait_ms", &self.assignment_wait_ms)
            .finish()
    }
}

/// Counter-consistent view of the pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub min: usize,
    pub max: usize,
    pub total: usize,
    pub cold: usize,
    pub replenishing: usize,
    pub available: usize,
    pub in_use: usize,
    pub queued: usize,
    pub slot_states: Vec<SlotState>,
}

impl PoolSnapshot {
    /// `cold + replenishing + available + in_use == total`.
    pub fn is_consistent(&self) -> bool {
        self.cold + self.replenishing + self.available + self.in_use == self.total
    }
}

/// Assignment and warm-up timing counters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PoolTelemetry {
    pub warm_assignment_count: u64,
    pub queued_assignment_count: u64,
    pub average_warm_assignment_wait_ms: f64,
    pub average_queue_wait_ms: f64,
    pub average_warm_duration_ms: f64,
}
