use std::time::Duration;

use ghostpilot_agent_loop::{TaskCaps, TaskRunReport};
use ghostpilot_core_types::{ContextId, Priority, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::resource::ResourceBudget;

/// What a task works on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInput {
    pub intent: String,
    pub start_url: String,
    #[serde(default)]
    pub caps: Option<TaskCaps>,
}

/// One submission to the scheduler.
#[derive(Clone, Debug)]
pub struct TaskSubmission {
    pub task_id: TaskId,
    pub priority: Priority,
    pub input: TaskInput,
}

/// Scheduler-wide policy.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Crash retries; a task gets `max_retries + 1` attempts.
    pub max_retries: u32,
    /// CPU/memory budget; None disables the sampler.
    pub budget: Option<ResourceBudget>,
    /// Sampler poll period.
    pub sample_interval: Duration,
    /// Continuous breach span that triggers enforcement.
    pub violation_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            budget: None,
            sample_interval: Duration::from_millis(500),
            violation_window: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
    Crashed,
    BudgetKilled,
}

/// Per-attempt trace surfaced on terminal errors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub context_id: ContextId,
    pub status: AttemptStatus,
    pub crash_detected: bool,
}

/// Last observed progress, frozen at cancellation for out-of-band
/// inspection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrozenTaskState {
    pub current_url: String,
    pub progress_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,
}

/// Terminal result of a submission.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub attempts_used: u32,
    pub context_id: ContextId,
    pub report: Option<TaskRunReport>,
    pub frozen: Option<FrozenTaskState>,
}
