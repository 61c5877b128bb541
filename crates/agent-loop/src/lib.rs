//! Perception-action loop.
//!
//! A [`TaskRunner`] drives one ghost session through perceive → decide
//! → act iterations: tiered perception with a DOM bypass, an
//! observation cache, anti-repeat fingerprints, context-window
//! summarization, subtask checkpoints, and structured error routing to
//! the injected decision engine.

pub mod config;
pub mod context_window;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod model;
pub mod rule_based;
pub mod runner;
pub mod state_machine;
pub mod subtask;

pub use config::TaskCaps;
pub use context_window::{ContextWindow, ContextWindowMetrics, HistoryPair};
pub use engine::{
    DecisionEngine, DecisionMode, DecisionRequest, DecisionResponse, EscalationReason, Tier,
};
pub use errors::AgentError;
pub use model::{RefetchReason, RunStatus, StepRecord, TaskEvent, TaskRunReport, TierUsage};
pub use rule_based::RuleBasedEngine;
pub use runner::TaskRunner;
pub use state_machine::{TaskState, TaskStateMachine, TransitionRecord};
pub use subtask::{
    Checkpoint, Decomposition, Subtask, SubtaskStatus, SubtaskTimelineEvent, SubtaskTimelineReason,
    SubtaskTracker, SubtaskUpdate,
};
