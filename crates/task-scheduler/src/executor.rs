//! The task execution seam.
//!
//! The scheduler runs whatever implements [`TaskExecutor`] on each
//! lease; [`AgentTaskExecutor`] is the production binding that drives
//! the perception-action loop with an injected decision engine.

use std::sync::Arc;

use async_trait::async_trait;
use ghostpilot_agent_loop::{
    AgentError, DecisionEngine, TaskCaps, TaskEvent, TaskRunReport, TaskRunner,
};
use ghostpilot_browser_control::GhostSession;
use ghostpilot_context_pool::Lease;
use ghostpilot_core_types::TaskId;
use parking_lot::Mutex;

use crate::model::{FrozenTaskState, TaskInput};

/// Live progress the scheduler can freeze at cancellation.
#[derive(Default)]
pub struct ProgressHandle {
    state: Mutex<FrozenTaskState>,
}

impl ProgressHandle {
    pub fn update(&self, url: &str, label: &str, action: Option<String>) {
        let mut state = self.state.lock();
        state.current_url = url.to_string();
        state.progress_label = label.to_string();
        state.current_action = action;
    }

    pub fn freeze(&self) -> FrozenTaskState {
        self.state.lock().clone()
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(
        &self,
        task_id: &TaskId,
        input: &TaskInput,
        attempt: u32,
        lease: &Lease,
        session: Arc<GhostSession>,
        progress: Arc<ProgressHandle>,
    ) -> Result<TaskRunReport, AgentError>;
}

/// Drives the perception-action loop on the lease's session.
pub struct AgentTaskExecutor {
    engine: Arc<dyn DecisionEngine>,
    default_caps: TaskCaps,
}

impl AgentTaskExecutor {
    pub fn new(engine: Arc<dyn DecisionEngine>, default_caps: TaskCaps) -> Self {
        Self {
            engine,
            default_caps,
        }
    }
}

#[async_trait]
impl TaskExecutor for AgentTaskExecutor {
    async fn run(
        &self,
        task_id: &TaskId,
        input: &TaskInput,
        attempt: u32,
        _lease: &Lease,
        session: Arc<GhostSession>,
        progress: Arc<ProgressHandle>,
    ) -> Result<TaskRunReport, AgentError> {
        tracing::info!(
            target: "ghost-scheduler",
            task = %task_id,
            attempt,
            intent = %input.intent,
            "running agent loop"
        );
        let caps = input.caps.clone().unwrap_or_else(|| self.default_caps.clone());
        let runner = TaskRunner::new(session, self.engine.clone(), caps);

        // Mirror state transitions into the freezable progress handle.
        let mut events = runner.subscribe();
        let forwarder_progress = progress.clone();
        let forwarder = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let TaskEvent::Transition(record) = event {
                    forwarder_progress.update(
                        &record.url,
                        &format!("{:?}", record.to),
                        Some(record.reason.clone()),
                    );
                }
            }
        });

        let result = runner.run_task(&input.intent, &input.start_url).await;
        forwarder.abort();
        result
    }
}
