//! Scheduler implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use ghostpilot_agent_loop::AgentError;
use ghostpilot_browser_control::GhostSession;
use ghostpilot_context_pool::{AcquireRequest, GhostContextPool, Lease};
use ghostpilot_core_types::{ContextId, ErrorKind, StructuredError, TaskId, TaskStatus};
use ghostpilot_event_bus::StatusChannel;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::{ParallelTaskExecutionError, SchedulerError};
use crate::events::{SchedulerEvent, SchedulerEventKind};
use crate::executor::{ProgressHandle, TaskExecutor};
use crate::metrics;
use crate::model::{
    AttemptRecord, AttemptStatus, FrozenTaskState, SchedulerConfig, TaskOutcome, TaskSubmission,
};
use crate::resource::ResourceSampler;

struct RunningTask {
    cancelled: Arc<AtomicBool>,
    progress: Arc<ProgressHandle>,
    context: Option<ContextId>,
    frozen: Option<FrozenTaskState>,
    terminal: bool,
}

pub struct ParallelTaskScheduler {
    pool: Arc<GhostContextPool>,
    executor: Arc<dyn TaskExecutor>,
    sampler: Arc<dyn ResourceSampler>,
    cfg: SchedulerConfig,
    events: StatusChannel<SchedulerEvent>,
    running: DashMap<TaskId, RunningTask>,
}

impl ParallelTaskScheduler {
    pub fn new(
        pool: Arc<GhostContextPool>,
        executor: Arc<dyn TaskExecutor>,
        sampler: Arc<dyn ResourceSampler>,
        cfg: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            executor,
            sampler,
            cfg,
            events: StatusChannel::default(),
            running: DashMap::new(),
        })
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    /// Run a task to a terminal outcome, retrying crashed attempts on
    /// fresh contexts. Sibling tasks on other slots are untouched.
    pub async fn submit_task(&self, submission: TaskSubmission) -> Result<TaskOutcome, SchedulerError> {
        let task_id = submission.task_id.clone();
        if let Some(existing) = self.running.get(&task_id) {
            if !existing.terminal {
                return Err(SchedulerError::DuplicateTask(task_id));
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(ProgressHandle::default());
        self.running.insert(
            task_id.clone(),
            RunningTask {
                cancelled: cancelled.clone(),
                progress: progress.clone(),
                context: None,
                frozen: None,
                terminal: false,
            },
        );
        metrics::record_submitted();

        let max_attempts = self.cfg.max_retries + 1;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut started_emitted = false;

        for attempt in 1..=max_attempts {
            if cancelled.load(Ordering::Acquire) {
                return Ok(self.cancelled_outcome(&task_id, &progress, attempts.len() as u32));
            }

            let lease = match self
                .pool
                .acquire_ghost_tab(AcquireRequest {
                    task_id: task_id.clone(),
                    priority: submission.priority,
                })
                .await
            {
                Ok(lease) => lease,
                Err(err) => {
                    self.finish(&task_id);
                    return Err(SchedulerError::Pool(err));
                }
            };
            let context_id = lease.context_id.clone();
            if let Some(mut entry) = self.running.get_mut(&task_id) {
                entry.context = Some(context_id.clone());
            }

            if !started_emitted {
                started_emitted = true;
                self.events.emit(SchedulerEvent::new(
                    task_id.clone(),
                    SchedulerEventKind::Started,
                    attempt,
                    Some(context_id.clone()),
                ));
            }

            let killed = Arc::new(AtomicBool::new(false));
            let watchdog = self.spawn_watchdog(
                task_id.clone(),
                context_id.clone(),
                lease.session().clone(),
                killed.clone(),
                attempt,
            );

            let result = self
                .executor
                .run(
                    &task_id,
                    &submission.input,
                    attempt,
                    &lease,
                    lease.session().clone(),
                    progress.clone(),
                )
                .await;

            if let Some(handle) = watchdog {
                handle.abort();
            }

            let crash_detected = lease.session().get_last_crash_event().is_some();
            if let Err(err) = self.pool.release(&lease).await {
                warn!(target: "ghost-scheduler", task = %task_id, %err, "lease release failed");
            }

            // Budget enforcement ends the task; never retried.
            if killed.load(Ordering::Acquire) {
                attempts.push(AttemptRecord {
                    attempt,
                    context_id: context_id.clone(),
                    status: AttemptStatus::BudgetKilled,
                    crash_detected,
                });
                self.emit_terminal(&task_id, SchedulerEventKind::Failed, attempt, &context_id);
                metrics::record_failed();
                self.finish(&task_id);
                return Err(SchedulerError::Execution(Box::new(
                    ParallelTaskExecutionError {
                        task_id,
                        attempts_used: attempt,
                        attempts,
                        error_detail: StructuredError::new(
                            ErrorKind::Runtime,
                            "resource budget exceeded; target killed",
                        ),
                    },
                )));
            }

            if cancelled.load(Ordering::Acquire) {
                self.events.emit(SchedulerEvent::new(
                    task_id.clone(),
                    SchedulerEventKind::Cancelled,
                    attempt,
                    Some(context_id.clone()),
                ));
                metrics::record_cancelled();
                return Ok(self.cancelled_outcome(&task_id, &progress, attempt));
            }

            match result {
                Ok(report) => {
                    let run_succeeded =
                        report.status == ghostpilot_agent_loop::RunStatus::Done;
                    attempts.push(AttemptRecord {
                        attempt,
                        context_id: context_id.clone(),
                        status: if run_succeeded {
                            AttemptStatus::Succeeded
                        } else {
                            AttemptStatus::Failed
                        },
                        crash_detected,
                    });
                    let (kind, status) = if run_succeeded {
                        metrics::record_succeeded();
                        (SchedulerEventKind::Succeeded, TaskStatus::Succeeded)
                    } else {
                        metrics::record_failed();
                        (SchedulerEventKind::Failed, TaskStatus::Failed)
                    };
                    self.emit_terminal(&task_id, kind, attempt, &context_id);
                    self.finish(&task_id);
                    info!(
                        target: "ghost-scheduler",
                        task = %task_id,
                        attempt,
                        ?status,
                        "task finished"
                    );
                    return Ok(TaskOutcome {
                        task_id,
                        status,
                        attempts_used: attempt,
                        context_id,
                        report: Some(report),
                        frozen: None,
                    });
                }
                Err(err) if err.is_crash() || crash_detected => {
                    metrics::record_crash();
                    self.events.emit(SchedulerEvent::new(
                        task_id.clone(),
                        SchedulerEventKind::CrashDetected,
                        attempt,
                        Some(context_id.clone()),
                    ));
                    attempts.push(AttemptRecord {
                        attempt,
                        context_id: context_id.clone(),
                        status: AttemptStatus::Crashed,
                        crash_detected: true,
                    });

                    if attempt < max_attempts {
                        metrics::record_retry();
                        self.events.emit(SchedulerEvent::new(
                            task_id.clone(),
                            SchedulerEventKind::Retrying,
                            attempt + 1,
                            None,
                        ));
                        continue;
                    }

                    self.emit_terminal(&task_id, SchedulerEventKind::Failed, attempt, &context_id);
                    metrics::record_failed();
                    self.finish(&task_id);
                    return Err(SchedulerError::Execution(Box::new(
                        ParallelTaskExecutionError {
                            task_id,
                            attempts_used: attempt,
                            attempts,
                            error_detail: crash_error_detail(&err),
                        },
                    )));
                }
                Err(err) => {
                    attempts.push(AttemptRecord {
                        attempt,
                        context_id: context_id.clone(),
                        status: AttemptStatus::Failed,
                        crash_detected,
                    });
                    self.emit_terminal(&task_id, SchedulerEventKind::Failed, attempt, &context_id);
                    metrics::record_failed();
                    self.finish(&task_id);
                    return Err(SchedulerError::Execution(Box::new(
                        ParallelTaskExecutionError {
                            task_id,
                            attempts_used: attempt,
                            attempts,
                            error_detail: agent_error_detail(&err),
                        },
                    )));
                }
            }
        }

        unreachable!("attempt loop always returns");
    }

    /// Mark a running task CANCELLED, destroy its ghost context, and
    /// freeze its last observed progress. Terminal tasks are a no-op.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Option<FrozenTaskState> {
        let (context, frozen) = {
            let mut entry = self.running.get_mut(task_id)?;
            if entry.terminal {
                return None;
            }
            entry.cancelled.store(true, Ordering::Release);
            let frozen = entry.progress.freeze();
            entry.frozen = Some(frozen.clone());
            entry.terminal = true;
            (entry.context.clone(), frozen)
        };

        if let Some(context) = context {
            if let Err(err) = self.pool.destroy_context(&context).await {
                warn!(target: "ghost-scheduler", task = %task_id, %err, "cancel recycle failed");
            }
        }
        info!(target: "ghost-scheduler", task = %task_id, "task cancelled");
        Some(frozen)
    }

    /// Frozen state captured at cancellation, if any.
    pub fn frozen_state(&self, task_id: &TaskId) -> Option<FrozenTaskState> {
        self.running.get(task_id).and_then(|entry| entry.frozen.clone())
    }

    fn cancelled_outcome(
        &self,
        task_id: &TaskId,
        progress: &Arc<ProgressHandle>,
        attempts_used: u32,
    ) -> TaskOutcome {
        let frozen = self
            .running
            .get(task_id)
            .and_then(|entry| entry.frozen.clone())
            .unwrap_or_else(|| progress.freeze());
        self.finish(task_id);
        TaskOutcome {
            task_id: task_id.clone(),
            status: TaskStatus::Cancelled,
            attempts_used,
            context_id: ContextId::slot(0),
            report: None,
            frozen: Some(frozen),
        }
    }

    fn emit_terminal(
        &self,
        task_id: &TaskId,
        kind: SchedulerEventKind,
        attempt: u32,
        context_id: &ContextId,
    ) {
        self.events.emit(SchedulerEvent::new(
            task_id.clone(),
            kind,
            attempt,
            Some(context_id.clone()),
        ));
    }

    fn finish(&self, task_id: &TaskId) {
        if let Some(mut entry) = self.running.get_mut(task_id) {
            entry.terminal = true;
        }
    }

    /// Independent sampler: sustained breach of the budget kills the
    /// target and fails the attempt non-retryably.
    fn spawn_watchdog(
        &self,
        task_id: TaskId,
        context: ContextId,
        session: Arc<GhostSession>,
        killed: Arc<AtomicBool>,
        attempt: u32,
    ) -> Option<JoinHandle<()>> {
        let budget = self.cfg.budget?;
        let sampler = self.sampler.clone();
        let events = self.events.clone();
        let sample_interval = self.cfg.sample_interval;
        let violation_window = self.cfg.violation_window;

        Some(tokio::spawn(async move {
            let mut breach_started: Option<Instant> = None;
            loop {
                tokio::time::sleep(sample_interval).await;
                let Some(sample) = sampler.sample(&context).await else {
                    breach_started = None;
                    continue;
                };
                if budget.breached_by(&sample) {
                    let started = *breach_started.get_or_insert_with(Instant::now);
                    if started.elapsed() >= violation_window {
                        warn!(
                            target: "ghost-scheduler",
                            task = %task_id,
                            context = %context,
                            cpu = sample.cpu_percent,
                            memory_mb = sample.memory_mb,
                            "resource budget breached; killing target"
                        );
                        events.emit(SchedulerEvent::new(
                            task_id.clone(),
                            SchedulerEventKind::ResourceBudgetExceeded,
                            attempt,
                            Some(context.clone()),
                        ));
                        killed.store(true, Ordering::Release);
                        let _ = session.close_target().await;
                        session.close().await;
                        events.emit(SchedulerEvent::new(
                            task_id.clone(),
                            SchedulerEventKind::ResourceBudgetKilled,
                            attempt,
                            Some(context.clone()),
                        ));
                        metrics::record_budget_kill();
                        break;
                    }
                } else {
                    breach_started = None;
                }
            }
        }))
    }
}

fn crash_error_detail(err: &AgentError) -> StructuredError {
    match err {
        AgentError::Crash(control) => control.to_structured(),
        other => StructuredError::new(ErrorKind::TargetClosed, other.to_string()),
    }
}

fn agent_error_detail(err: &AgentError) -> StructuredError {
    match err {
        AgentError::Control(control) => control.to_structured(),
        AgentError::Crash(control) => control.to_structured(),
        other => StructuredError::new(ErrorKind::Runtime, other.to_string()),
    }
}
