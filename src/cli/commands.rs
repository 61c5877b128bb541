//! Subcommand implementations.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use ghostpilot_agent_loop::{RuleBasedEngine, TaskCaps};
use ghostpilot_browser_control::testing::RemoteHostFactory;
use ghostpilot_context_pool::GhostContextPool;
use ghostpilot_core_types::{Priority, TaskId};
use ghostpilot_task_scheduler::{
    AgentTaskExecutor, NullSampler, ParallelTaskScheduler, SchedulerConfig, TaskInput,
    TaskSubmission,
};
use tracing::info;

use crate::config::GhostConfig;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Natural-language intent, e.g. "search for mechanical keyboards".
    #[arg(long)]
    pub intent: String,

    /// Starting URL.
    #[arg(long)]
    pub url: String,

    /// Task identifier; generated when omitted.
    #[arg(long)]
    pub task_id: Option<String>,

    /// Run at background priority.
    #[arg(long)]
    pub background: bool,

    /// Step cap override.
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Navigation timeout, e.g. "30s" or "1500ms".
    #[arg(long, value_parser = humantime::parse_duration)]
    pub navigation_timeout: Option<std::time::Duration>,

    /// Print scheduler status events as TASK_STATUS frames on stdout.
    #[arg(long)]
    pub emit_status: bool,
}

#[derive(Args, Debug)]
pub struct PoolArgs {
    /// Override `GHOST_CONTEXT_COUNT`.
    #[arg(long)]
    pub count: Option<usize>,
}

pub async fn run(cfg: GhostConfig, args: RunArgs) -> anyhow::Result<()> {
    let registry = prometheus::Registry::new();
    ghostpilot_browser_control::metrics::register_metrics(&registry);
    ghostpilot_context_pool::metrics::register_metrics(&registry);

    let pool = GhostContextPool::new(cfg.pool_config(), Arc::new(RemoteHostFactory));
    pool.initialize().await.context("warming context pool")?;

    let mut caps = TaskCaps::default();
    if let Some(max_steps) = args.max_steps {
        caps.max_steps = max_steps;
    }
    caps.navigation_timeout_ms = args
        .navigation_timeout
        .map(|d| d.as_millis() as u64)
        .unwrap_or(cfg.navigation_timeout_ms);

    let executor = Arc::new(AgentTaskExecutor::new(
        Arc::new(RuleBasedEngine::new()),
        caps.clone(),
    ));
    let scheduler = ParallelTaskScheduler::new(
        pool.clone(),
        executor,
        Arc::new(NullSampler),
        SchedulerConfig {
            max_retries: cfg.max_task_retries,
            ..Default::default()
        },
    );

    let task_id = args
        .task_id
        .and_then(TaskId::new)
        .unwrap_or_else(TaskId::random);
    let priority = if args.background {
        Priority::Background
    } else {
        Priority::Foreground
    };
    info!(task = %task_id, intent = %args.intent, "submitting task");

    let status_printer = if args.emit_status {
        let mut events = scheduler.subscribe();
        Some(tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let frame = ghostpilot_ipc_schema::task_status(
                    ghostpilot_ipc_schema::StatusKind::Scheduler,
                    serde_json::json!(event),
                );
                if let Ok(line) = serde_json::to_string(&frame) {
                    println!("{line}");
                }
            }
        }))
    } else {
        None
    };

    let result = scheduler
        .submit_task(TaskSubmission {
            task_id,
            priority,
            input: TaskInput {
                intent: args.intent,
                start_url: args.url,
                caps: Some(caps),
            },
        })
        .await;

    match result {
        Ok(outcome) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "taskId": outcome.task_id,
                    "status": outcome.status,
                    "attempts": outcome.attempts_used,
                    "contextId": outcome.context_id,
                    "finalUrl": outcome.report.as_ref().map(|r| r.final_url.clone()),
                    "answer": outcome.report.as_ref().and_then(|r| r.answer.clone()),
                    "steps": outcome.report.as_ref().map(|r| r.steps_taken),
                }))?
            );
        }
        Err(err) => {
            if let Some(printer) = status_printer {
                printer.abort();
            }
            pool.shutdown().await;
            return Err(anyhow::anyhow!(err).context("task execution failed"));
        }
    }

    if let Some(printer) = status_printer {
        printer.abort();
    }
    pool.shutdown().await;
    Ok(())
}

pub async fn pool_status(cfg: GhostConfig, args: PoolArgs) -> anyhow::Result<()> {
    let mut pool_cfg = cfg.pool_config();
    if let Some(count) = args.count {
        pool_cfg.max = count;
        pool_cfg.min = pool_cfg.min.min(count);
    }

    let pool = GhostContextPool::new(pool_cfg, Arc::new(RemoteHostFactory));
    pool.initialize().await.context("warming context pool")?;

    let snapshot = pool.snapshot();
    let telemetry = pool.telemetry();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "snapshot": snapshot,
            "telemetry": telemetry,
        }))?
    );

    pool.shutdown().await;
    Ok(())
}

pub fn version() {
    println!("ghostpilot {}", env!("CARGO_PKG_VERSION"));
}
