//! Shared vocabulary for the ghostpilot engine.
//!
//! Everything that crosses a subsystem boundary lives here: identifiers,
//! the task lifecycle, the tagged action model, and the structured error
//! taxonomy that flows from the browser control layer up through the
//! scheduler's status stream.

pub mod action;
pub mod error;
pub mod ids;

pub use action::{Action, ActionKind, DecisionParseError, Point, RawDecision};
pub use error::{ErrorKind, ErrorSource, NetworkErrorType, StructuredError};
pub use ids::{ContextId, LeaseId, TaskId};

use serde::{Deserialize, Serialize};

/// Priority class for lease acquisition and queue dispatch.
///
/// Any queued foreground request is dequeued before any background
/// request, regardless of arrival order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Foreground,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 2] = [Priority::Foreground, Priority::Background];

    pub fn index(self) -> usize {
        match self {
            Priority::Foreground => 0,
            Priority::Background => 1,
        }
    }
}

/// Terminal lifecycle states of a submitted task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        true
    }
}
