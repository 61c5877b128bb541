//! Explicit task state machine.
//!
//! `IDLE → LOADING → PERCEIVING → INFERRING → ACTING → {PERCEIVING |
//! COMPLETE | FAILED}`, terminal states return to IDLE for cleanup.
//! Everything else is a programming error, not an input condition.

use std::time::SystemTime;

use ghostpilot_core_types::StructuredError;
use ghostpilot_event_bus::StatusChannel;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::model::TaskEvent;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Idle,
    Loading,
    Perceiving,
    Inferring,
    Acting,
    Complete,
    Failed,
}

impl TaskState {
    fn allows(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Idle, Loading)
                | (Loading, Perceiving)
                | (Loading, Failed)
                | (Perceiving, Inferring)
                | (Perceiving, Failed)
                | (Inferring, Acting)
                | (Inferring, Failed)
                | (Acting, Perceiving)
                | (Acting, Complete)
                | (Acting, Failed)
                | (Complete, Idle)
                | (Failed, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }
}

/// One recorded transition; the live status feed is built from these.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    pub step: u32,
    pub url: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
    pub timestamp: SystemTime,
}

pub struct TaskStateMachine {
    state: TaskState,
    transitions: Vec<TransitionRecord>,
    events: StatusChannel<TaskEvent>,
}

impl TaskStateMachine {
    pub fn new(events: StatusChannel<TaskEvent>) -> Self {
        Self {
            state: TaskState::Idle,
            transitions: Vec::new(),
            events,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn transition(
        &mut self,
        to: TaskState,
        step: u32,
        url: &str,
        reason: &str,
        error: Option<StructuredError>,
    ) -> Result<(), AgentError> {
        if !self.state.allows(to) {
            return Err(AgentError::IllegalTransition {
                from: self.state,
                to,
            });
        }
        let record = TransitionRecord {
            from: self.state,
            to,
            step,
            url: url.to_string(),
            reason: reason.to_string(),
            error,
            timestamp: SystemTime::now(),
        };
        self.state = to;
        self.events.emit(TaskEvent::Transition(record.clone()));
        self.transitions.push(record);
        Ok(())
    }
}
