//! Subtask decomposition, checkpoints, and replan triggers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub status: SubtaskStatus,
}

/// Engine-proposed plan for a multi-phase intent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decomposition {
    pub is_decomposed: bool,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

/// Engine-reported status change for one subtask.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtaskUpdate {
    pub id: String,
    pub status: SubtaskStatus,
}

/// Why a subtask's status changed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskTimelineReason {
    Progress,
    RetryFromCheckpoint,
    Redecomposed,
    FailedReplanTrigger,
    DeadlockTriggerReplan,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubtaskTimelineEvent {
    pub subtask_id: String,
    pub from: Option<SubtaskStatus>,
    pub to: SubtaskStatus,
    pub reason: SubtaskTimelineReason,
    pub step: u32,
}

/// Pointer to the last completed subtask plus collected artifacts;
/// recoverable failures resume here.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_completed_subtask_index: Option<usize>,
    pub subtask_artifacts: Vec<Value>,
}

/// Steps a decomposed plan may sit with no status movement before the
/// deadlock replan fires.
const DEADLOCK_STALL_STEPS: u32 = 8;

pub struct SubtaskTracker {
    subtasks: Vec<Subtask>,
    checkpoint: Checkpoint,
    timeline: Vec<SubtaskTimelineEvent>,
    retries: Vec<u32>,
    max_retries: u32,
    steps_since_change: u32,
    redecompose_requested: bool,
}

impl SubtaskTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            subtasks: Vec::new(),
            checkpoint: Checkpoint::default(),
            timeline: Vec::new(),
            retries: Vec::new(),
            max_retries,
            steps_since_change: 0,
            redecompose_requested: false,
        }
    }

    pub fn is_decomposed(&self) -> bool {
        !self.subtasks.is_empty()
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn timeline(&self) -> &[SubtaskTimelineEvent] {
        &self.timeline
    }

    pub fn redecompose_requested(&self) -> bool {
        self.redecompose_requested
    }

    /// Install (or replace) the plan. A replacement while one is
    /// already active is a re-decomposition.
    pub fn apply_decomposition(&mut self, decomposition: &Decomposition, step: u32) {
        if !decomposition.is_decomposed {
            return;
        }
        let reason = if self.is_decomposed() {
            SubtaskTimelineReason::Redecomposed
        } else {
            SubtaskTimelineReason::Progress
        };
        self.subtasks = decomposition.subtasks.clone();
        self.retries = vec![0; self.subtasks.len()];
        self.steps_since_change = 0;
        self.redecompose_requested = false;
        if reason == SubtaskTimelineReason::Redecomposed {
            self.checkpoint = Checkpoint::default();
        }
        for subtask in &self.subtasks {
            self.timeline.push(SubtaskTimelineEvent {
                subtask_id: subtask.id.clone(),
                from: None,
                to: subtask.status,
                reason,
                step,
            });
        }
    }

    /// Apply an engine-reported status change, enforcing the status
    /// vocabulary and driving checkpoint/retry policy.
    pub fn apply_update(&mut self, update: &SubtaskUpdate, step: u32) {
        let Some(idx) = self.subtasks.iter().position(|s| s.id == update.id) else {
            return;
        };
        let from = self.subtasks[idx].status;
        if from == update.status {
            return;
        }
        self.subtasks[idx].status = update.status;
        self.steps_since_change = 0;

        match update.status {
            SubtaskStatus::Complete => {
                self.checkpoint.last_completed_subtask_index = Some(idx);
                self.record(update.id.clone(), Some(from), update.status,
                    SubtaskTimelineReason::Progress, step);
            }
            SubtaskStatus::Failed => {
                if self.retries[idx] < self.max_retries {
                    self.retries[idx] += 1;
                    // Roll the failed subtask back to the checkpoint
                    // and run it again.
                    self.subtasks[idx].status = SubtaskStatus::InProgress;
                    self.record(update.id.clone(), Some(from), SubtaskStatus::Failed,
                        SubtaskTimelineReason::Progress, step);
                    self.record(update.id.clone(), Some(SubtaskStatus::Failed),
                        SubtaskStatus::InProgress,
                        SubtaskTimelineReason::RetryFromCheckpoint, step);
                } else {
                    self.redecompose_requested = true;
                    self.record(update.id.clone(), Some(from), SubtaskStatus::Failed,
                        SubtaskTimelineReason::FailedReplanTrigger, step);
                }
            }
            other => {
                self.record(update.id.clone(), Some(from), other,
                    SubtaskTimelineReason::Progress, step);
            }
        }
    }

    /// Stash an artifact against the current checkpoint.
    pub fn record_artifact(&mut self, artifact: Value) {
        self.checkpoint.subtask_artifacts.push(artifact);
    }

    /// Per-step bookkeeping; detects a deadlocked plan (decomposed,
    /// unfinished, and unmoving) and requests a replan.
    pub fn note_step(&mut self, step: u32) {
        if !self.is_decomposed() || self.all_complete() {
            return;
        }
        self.steps_since_change += 1;
        if self.steps_since_change >= DEADLOCK_STALL_STEPS && !self.redecompose_requested {
            self.redecompose_requested = true;
            let stuck = self
                .subtasks
                .iter()
                .find(|s| s.status != SubtaskStatus::Complete)
                .map(|s| (s.id.clone(), s.status));
            if let Some((id, status)) = stuck {
                self.record(
                    id,
                    Some(status),
                    status,
                    SubtaskTimelineReason::DeadlockTriggerReplan,
                    step,
                );
            }
        }
    }

    pub fn all_complete(&self) -> bool {
        !self.subtasks.is_empty()
            && self
                .subtasks
                .iter()
                .all(|s| s.status == SubtaskStatus::Complete)
    }

    fn record(
        &mut self,
        subtask_id: String,
        from: Option<SubtaskStatus>,
        to: SubtaskStatus,
        reason: SubtaskTimelineReason,
        step: u32,
    ) {
        self.timeline.push(SubtaskTimelineEvent {
            subtask_id,
            from,
            to,
            reason,
            step,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(ids: &[&str]) -> Decomposition {
        Decomposition {
            is_decomposed: true,
            subtasks: ids
                .iter()
                .map(|id| Subtask {
                    id: id.to_string(),
                    status: SubtaskStatus::Pending,
                })
                .collect(),
        }
    }

    fn update(id: &str, status: SubtaskStatus) -> SubtaskUpdate {
        SubtaskUpdate {
            id: id.to_string(),
            status,
        }
    }

    #[test]
    fn completion_advances_checkpoint() {
        let mut tracker = SubtaskTracker::new(2);
        tracker.apply_decomposition(&plan(&["dates", "filter", "extract"]), 1);
        tracker.apply_update(&update("dates", SubtaskStatus::InProgress), 2);
        tracker.apply_update(&update("dates", SubtaskStatus::Complete), 4);

        assert_eq!(tracker.checkpoint().last_completed_subtask_index, Some(0));
        assert!(!tracker.redecompose_requested());
    }

    #[test]
    fn failure_retries_from_checkpoint_then_replans() {
        let mut tracker = SubtaskTracker::new(1);
        tracker.apply_decomposition(&plan(&["a", "b"]), 1);
        tracker.apply_update(&update("a", SubtaskStatus::Complete), 2);
        tracker.apply_update(&update("b", SubtaskStatus::InProgress), 3);

        // First failure: roll back to the checkpoint and retry.
        tracker.apply_update(&update("b", SubtaskStatus::Failed), 4);
        assert_eq!(tracker.subtasks()[1].status, SubtaskStatus::InProgress);
        assert!(tracker
            .timeline()
            .iter()
            .any(|e| e.reason == SubtaskTimelineReason::RetryFromCheckpoint));
        assert!(!tracker.redecompose_requested());

        // Retries exhausted: replan.
        tracker.apply_update(&update("b", SubtaskStatus::Failed), 6);
        assert!(tracker.redecompose_requested());
        assert!(tracker
            .timeline()
            .iter()
            .any(|e| e.reason == SubtaskTimelineReason::FailedReplanTrigger));
    }

    #[test]
    fn redecomposition_resets_plan() {
        let mut tracker = SubtaskTracker::new(1);
        tracker.apply_decomposition(&plan(&["a"]), 1);
        tracker.apply_update(&update("a", SubtaskStatus::Complete), 2);

        tracker.apply_decomposition(&plan(&["x", "y"]), 5);
        assert_eq!(tracker.subtasks().len(), 2);
        assert_eq!(tracker.checkpoint().last_completed_subtask_index, None);
        assert!(tracker
            .timeline()
            .iter()
            .any(|e| e.reason == SubtaskTimelineReason::Redecomposed));
    }

    #[test]
    fn stalled_plan_triggers_deadlock_replan() {
        let mut tracker = SubtaskTracker::new(1);
        tracker.apply_decomposition(&plan(&["a"]), 1);
        for step in 2..=12 {
            tracker.note_step(step);
        }
        assert!(tracker.redecompose_requested());
        assert!(tracker
            .timeline()
            .iter()
            .any(|e| e.reason == SubtaskTimelineReason::DeadlockTriggerReplan));
    }

    #[test]
    fn unknown_subtask_updates_are_ignored() {
        let mut tracker = SubtaskTracker::new(1);
        tracker.apply_decomposition(&plan(&["a"]), 1);
        tracker.apply_update(&update("ghost", SubtaskStatus::Complete), 2);
        assert_eq!(tracker.subtasks()[0].status, SubtaskStatus::Pending);
    }
}
