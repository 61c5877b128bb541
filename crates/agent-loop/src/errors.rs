use ghostpilot_browser_control::ControlError;
use thiserror::Error;

use crate::state_machine::TaskState;

/// Errors emitted by the perception-action loop.
///
/// Only `Crash` escapes `run_task`; everything else resolves into a
/// FAILED run report with `error_detail` attached.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A transition outside the state machine's table; programming
    /// error, never input-dependent.
    #[error("illegal task state transition {from:?} -> {to:?}")]
    IllegalTransition { from: TaskState, to: TaskState },

    /// The session died; the scheduler decides whether to retry.
    #[error("session crashed: {0}")]
    Crash(ControlError),

    /// Non-crash control failure that could not be routed to a retry.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// The decision engine refused or returned garbage.
    #[error("decision engine failure: {0}")]
    Engine(String),
}

impl AgentError {
    pub fn from_control(err: ControlError) -> Self {
        if err.is_crash() {
            Self::Crash(err)
        } else {
            Self::Control(err)
        }
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, Self::Crash(_))
    }
}
