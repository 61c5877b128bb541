use ghostpilot_context_pool::PoolError;
use ghostpilot_core_types::{StructuredError, TaskId};
use thiserror::Error;

use crate::model::AttemptRecord;

/// Terminal failure after every allowed attempt, with the full
/// per-attempt trace.
#[derive(Debug, Error)]
#[error("task {task_id} failed after {attempts_used} attempts: {error_detail}")]
pub struct ParallelTaskExecutionError {
    pub task_id: TaskId,
    pub attempts_used: u32,
    pub attempts: Vec<AttemptRecord>,
    pub error_detail: StructuredError,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Execution(#[from] Box<ParallelTaskExecutionError>),
    #[error("task {0} was already submitted and is still running")]
    DuplicateTask(TaskId),
}
