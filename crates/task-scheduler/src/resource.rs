//! Per-context resource sampling and budget enforcement.

use async_trait::async_trait;
use ghostpilot_core_types::ContextId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use ghostpilot_browser_control::GhostSession;

/// CPU is percent of one core; memory is resident MB.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub max_cpu_percent: f64,
    pub max_memory_mb: f64,
}

impl ResourceBudget {
    pub fn breached_by(&self, sample: &ResourceSample) -> bool {
        sample.cpu_percent > self.max_cpu_percent || sample.memory_mb > self.max_memory_mb
    }
}

/// Source of per-context samples. Injectable so tests and non-Chromium
/// hosts can script load shapes.
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self, context: &ContextId) -> Option<ResourceSample>;
}

/// Disables enforcement; the default when no budget is configured.
pub struct NullSampler;

#[async_trait]
impl ResourceSampler for NullSampler {
    async fn sample(&self, _context: &ContextId) -> Option<ResourceSample> {
        None
    }
}

/// Reads renderer process stats from the host's
/// `SystemInfo.getProcessInfo`.
pub struct ProcessInfoSampler {
    session: Arc<GhostSession>,
}

impl ProcessInfoSampler {
    pub fn new(session: Arc<GhostSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ResourceSampler for ProcessInfoSampler {
    async fn sample(&self, _context: &ContextId) -> Option<ResourceSample> {
        let info = self.session.process_info().await.ok()?;
        parse_renderer_sample(&info)
    }
}

/// Pick the renderer row out of a `SystemInfo.getProcessInfo` payload.
pub(crate) fn parse_renderer_sample(info: &Value) -> Option<ResourceSample> {
    let processes = info.get("processInfo")?.as_array()?;
    let renderer = processes
        .iter()
        .find(|p| p.get("type").and_then(Value::as_str) == Some("renderer"))?;
    let cpu = renderer.get("cpuTime").and_then(Value::as_f64).unwrap_or(0.0);
    // cpuTime is cumulative seconds; treat the instantaneous share as
    // reported by the host when present, else derive nothing.
    let cpu_percent = renderer
        .get("cpuPercent")
        .and_then(Value::as_f64)
        .unwrap_or(cpu);
    let memory_mb = renderer
        .get("privateMemoryFootprint")
        .and_then(Value::as_f64)
        .map(|bytes| bytes / (1024.0 * 1024.0))
        .unwrap_or(0.0);
    Some(ResourceSample {
        cpu_percent,
        memory_mb,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn budget_breach_is_either_axis() {
        let budget = ResourceBudget {
            max_cpu_percent: 80.0,
            max_memory_mb: 512.0,
        };
        assert!(budget.breached_by(&ResourceSample {
            cpu_percent: 95.0,
            memory_mb: 100.0
        }));
        assert!(budget.breached_by(&ResourceSample {
            cpu_percent: 10.0,
            memory_mb: 900.0
        }));
        assert!(!budget.breached_by(&ResourceSample {
            cpu_percent: 50.0,
            memory_mb: 400.0
        }));
    }

    #[test]
    fn renderer_sample_parses_process_info() {
        let info = json!({
            "processInfo": [
                { "type": "browser", "cpuPercent": 4.0 },
                { "type": "renderer", "cpuPercent": 87.5,
                  "privateMemoryFootprint": 268435456.0 },
            ]
        });
        let sample = parse_renderer_sample(&info).unwrap();
        assert_eq!(sample.cpu_percent, 87.5);
        assert_eq!(sample.memory_mb, 256.0);
    }
}
