use serde::{Deserialize, Serialize};

/// Per-run caps and thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskCaps {
    /// Iterations before the run ends with MAX_STEPS.
    /// Default: 40
    pub max_steps: u32,

    /// Tier-1 decisions below this confidence escalate to vision.
    /// Default: 0.7
    pub confidence_threshold: f64,

    /// Interactive-element floor under which a loaded, visually rich
    /// page counts as AX-deficient.
    /// Default: 3
    pub ax_deficient_interactive_threshold: usize,

    /// Pixels per tier-3 recovery scroll.
    /// Default: 600
    pub scroll_step_px: i64,

    /// Tier-3 scrolls before the run aborts.
    /// Default: 4
    pub max_scroll_steps: u32,

    /// No-progress steps tolerated before a forced vision escalation.
    /// Default: 2
    pub max_no_progress_steps: u32,

    /// Checkpoint retries per subtask before re-decomposition.
    /// Default: 2
    pub max_subtask_retries: u32,

    /// Observation cache TTL in milliseconds.
    /// Default: 60000
    pub observation_cache_ttl_ms: u64,

    /// Navigation deadline in milliseconds.
    /// Default: 30000
    pub navigation_timeout_ms: u64,

    /// Post-action settle deadline in milliseconds.
    /// Default: 5000
    pub settle_timeout_ms: u64,

    /// Character budget for one normalized AX snapshot.
    /// Default: 30000
    pub ax_char_budget: usize,

    /// Navigation-error retries routed through the engine.
    /// Default: 2
    pub max_navigation_retries: u32,
}

impl Default for TaskCaps {
    fn default() -> Self {
        Self {
            max_steps: 40,
            confidence_threshold: 0.7,
            ax_deficient_interactive_threshold: 3,
            scroll_step_px: 600,
            max_scroll_steps: 4,
            max_no_progress_steps: 2,
            max_subtask_retries: 2,
            observation_cache_ttl_ms: 60_000,
            navigation_timeout_ms: 30_000,
            settle_timeout_ms: 5_000,
            ax_char_budget: 30_000,
            max_navigation_retries: 2,
        }
    }
}

impl TaskCaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight caps for tests.
    pub fn minimal() -> Self {
        Self {
            max_steps: 8,
            confidence_threshold: 0.7,
            ax_deficient_interactive_threshold: 3,
            scroll_step_px: 400,
            max_scroll_steps: 2,
            max_no_progress_steps: 2,
            max_subtask_retries: 1,
            observation_cache_ttl_ms: 5_000,
            navigation_timeout_ms: 2_000,
            settle_timeout_ms: 300,
            ax_char_budget: 10_000,
            max_navigation_retries: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let caps = TaskCaps::default();
        assert!(caps.max_steps > 0);
        assert!((0.0..=1.0).contains(&caps.confidence_threshold));
        assert!(caps.scroll_step_px > 0);
    }
}
