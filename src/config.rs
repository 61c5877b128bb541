//! Environment-layered configuration.
//!
//! Every knob has a `GHOST_*` variable; CLI flags override the
//! environment, the environment overrides defaults.

use anyhow::Context;
use ghostpilot_browser_control::ControlConfig;
use ghostpilot_context_pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostConfig {
    /// `GHOST_REMOTE_DEBUGGING_PORT`
    pub remote_debugging_port: u16,
    /// `GHOST_REMOTE_DEBUGGING_HOST`
    pub remote_debugging_host: String,
    /// `GHOST_CONTEXT_COUNT` — pool `max`.
    pub context_count: usize,
    /// `GHOST_CONTEXT_MIN_WARM` — pool `min`.
    pub context_min_warm: usize,
    /// `GHOST_CONTEXT_AUTO_REPLENISH`
    pub context_auto_replenish: bool,
    /// `GHOST_HEADFUL` — run the local-launch fallback with a window.
    pub headful: bool,
    /// `GHOST_NAVIGATION_TIMEOUT_MS`
    pub navigation_timeout_ms: u64,
    /// `GHOST_MAX_TASK_RETRIES`
    pub max_task_retries: u32,
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            remote_debugging_port: 9333,
            remote_debugging_host: "127.0.0.1".into(),
            context_count: 4,
            context_min_warm: 2,
            context_auto_replenish: true,
            headful: false,
            navigation_timeout_ms: 30_000,
            max_task_retries: 2,
        }
    }
}

impl GhostConfig {
    /// Defaults overlaid with `GHOST_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("GHOST").try_parsing(true))
            .build()
            .context("building configuration")?;
        let mut cfg: GhostConfig = settings
            .try_deserialize()
            .context("deserializing GHOST_* environment")?;
        if cfg.context_min_warm > cfg.context_count {
            cfg.context_min_warm = cfg.context_count;
        }
        Ok(cfg)
    }

    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            debug_host: self.remote_debugging_host.clone(),
            debug_port: self.remote_debugging_port,
            navigation_timeout_ms: self.navigation_timeout_ms,
            headless: !self.headful,
            ..Default::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min: self.context_min_warm,
            max: self.context_count,
            control: self.control_config(),
            auto_replenish: self.context_auto_replenish,
            warm_retry_backoff: Duration::from_millis(500),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_surface() {
        let cfg = GhostConfig::default();
        assert_eq!(cfg.remote_debugging_port, 9333);
        assert!(cfg.context_auto_replenish);
        assert!(!cfg.headful);
    }

    #[test]
    fn min_warm_is_clamped_to_count() {
        let cfg = GhostConfig {
            context_count: 2,
            context_min_warm: 6,
            ..Default::default()
        };
        let pool = PoolConfig {
            min: cfg.context_min_warm.min(cfg.context_count),
            max: cfg.context_count,
            ..Default::default()
        };
        assert_eq!(pool.min, 2);
    }
}
