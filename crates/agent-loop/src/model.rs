use ghostpilot_browser_control::{ExecutionResult, MutationSummary};
use ghostpilot_core_types::{ErrorSource, RawDecision, StructuredError};
use ghostpilot_perception::{CacheMetrics, DeficiencySignals};
use serde::{Deserialize, Serialize};

use crate::context_window::ContextWindowMetrics;
use crate::engine::{EscalationReason, Tier};
use crate::state_machine::TransitionRecord;
use crate::subtask::{Checkpoint, Subtask, SubtaskTimelineEvent};

/// Why perception refetched instead of reusing the cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefetchReason {
    Initial,
    Navigation,
    ScrollAction,
    SignificantDomMutation,
    None,
}

/// Where an accepted decision came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    Engine,
    Cache,
    DomBypass,
    EnterHeuristic,
    ErrorRoute,
}

/// Terminal status of one run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Done,
    Failed,
    MaxSteps,
}

/// Tier call accounting across a run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TierUsage {
    pub tier1_calls: u64,
    pub tier2_calls: u64,
    pub tier3_scrolls: u64,
    pub dom_bypass_count: u64,
    pub escalations: Vec<EscalationReason>,
}

/// Everything recorded about one step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub resolved_tier: Tier,
    pub tiers_attempted: Vec<Tier>,
    pub decision: RawDecision,
    pub decision_source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deficiency_signals: Option<DeficiencySignals>,
    pub scroll_count: u32,
    pub perception_cache_hit: bool,
    pub decision_cache_hit: bool,
    pub screenshot_cache_hit: bool,
    pub mutation_summary: MutationSummary,
    pub refetch_reason: RefetchReason,
    pub context_window: ContextWindowMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_error: Option<StructuredError>,
    pub no_progress_streak: u32,
}

/// The structured error observation routed to the decision engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructuredErrorObservation {
    pub source: ErrorSource,
    pub error: StructuredError,
    pub navigator_decision: String,
    pub decision_source: String,
}

/// Events published for external observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskEvent {
    Transition(TransitionRecord),
    SubtaskTimeline(SubtaskTimelineEvent),
    StructuredError(StructuredErrorObservation),
}

/// Final report from `run_task`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRunReport {
    pub status: RunStatus,
    pub final_url: String,
    pub steps_taken: u32,
    /// DONE answer text when the run succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub history: Vec<StepRecord>,
    pub tier_usage: TierUsage,
    pub structured_errors: Vec<StructuredErrorObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Subtask>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    pub context_window: ContextWindowMetrics,
    pub cache_metrics: CacheMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<StructuredError>,
}
