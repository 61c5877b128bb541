//! Parallel task scheduler.
//!
//! Submits tasks onto pool leases, classifies crashes for bounded
//! retry on fresh contexts, enforces CPU/memory budgets through an
//! independent sampler, and emits a causal status stream per task.

pub mod errors;
pub mod events;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod resource;
pub mod scheduler;

pub use errors::{ParallelTaskExecutionError, SchedulerError};
pub use events::{SchedulerEvent, SchedulerEventKind};
pub use executor::{AgentTaskExecutor, ProgressHandle, TaskExecutor};
pub use model::{
    AttemptRecord, AttemptStatus, FrozenTaskState, SchedulerConfig, TaskInput, TaskOutcome,
    TaskSubmission,
};
pub use resource::{NullSampler, ResourceBudget, ResourceSample, ResourceSampler};
pub use scheduler::ParallelTaskScheduler;
