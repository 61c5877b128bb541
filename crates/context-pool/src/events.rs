use std::time::SystemTime;

use ghostpilot_core_types::{ContextId, TaskId};
use serde::{Deserialize, Serialize};

use crate::model::PoolSnapshot;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolEventKind {
    Enqueued,
    Dispatched,
    Released,
}

/// Pool status event; observers reconstruct queue behaviour from the
/// embedded snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolEvent {
    pub kind: PoolEventKind,
    pub task_id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    pub was_queued: bool,
    pub snapshot: PoolSnapshot,
    pub recorded_at: SystemTime,
}

impl PoolEvent {
    pub fn new(
        kind: PoolEventKind,
        task_id: TaskId,
        context_id: Option<ContextId>,
        was_queued: bool,
        snapshot: PoolSnapshot,
    ) -> Self {
        Self {
            kind,
            task_id,
            context_id,
            was_queued,
            snapshot,
            recorded_at: SystemTime::now(),
        }
    }
}
