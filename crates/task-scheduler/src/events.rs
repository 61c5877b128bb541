use std::time::SystemTime;

use ghostpilot_core_types::{ContextId, TaskId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerEventKind {
    Started,
    CrashDetected,
    Retrying,
    Succeeded,
    Failed,
    ResourceBudgetExceeded,
    ResourceBudgetKilled,
    Cancelled,
}

/// Causal per-task status stream: STARTED precedes everything, a
/// terminal SUCCEEDED/FAILED closes it, every CRASH_DETECTED precedes
/// its RETRYING.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub task_id: TaskId,
    pub kind: SchedulerEventKind,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    pub recorded_at: SystemTime,
}

impl SchedulerEvent {
    pub fn new(
        task_id: TaskId,
        kind: SchedulerEventKind,
        attempt: u32,
        context_id: Option<ContextId>,
    ) -> Self {
        Self {
            task_id,
            kind,
            attempt,
            context_id,
            recorded_at: SystemTime::now(),
        }
    }
}
