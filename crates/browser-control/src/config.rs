use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Nominal viewport for every ghost context.
pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 900;

/// Connection settings for one ghost-context session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Remote debugging host.
    pub debug_host: String,
    /// Remote debugging port (`GHOST_REMOTE_DEBUGGING_PORT`).
    pub debug_port: u16,
    /// Deadline applied to individual CDP commands.
    pub default_deadline_ms: u64,
    /// Default navigation timeout when the caller passes none.
    pub navigation_timeout_ms: u64,
    /// Default post-action settle window.
    pub settle_timeout_ms: u64,
    /// Quiescence window inside the settle loop.
    pub quiescence_ms: u64,
    /// Keep-alive probe interval; 0 disables the heartbeat.
    pub heartbeat_interval_ms: u64,
    /// Run a locally launched fallback browser headless.
    pub headless: bool,
    /// Explicit browser executable for the local-launch fallback.
    pub executable: PathBuf,
    /// Profile directory for the local-launch fallback.
    pub user_data_dir: PathBuf,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            debug_host: "127.0.0.1".into(),
            debug_port: 9333,
            default_deadline_ms: 10_000,
            navigation_timeout_ms: 30_000,
            settle_timeout_ms: 5_000,
            quiescence_ms: 400,
            heartbeat_interval_ms: 15_000,
            headless: true,
            executable: PathBuf::new(),
            user_data_dir: PathBuf::from(".ghostpilot-profile"),
            viewport_width: VIEWPORT_WIDTH,
            viewport_height: VIEWPORT_HEIGHT,
        }
    }
}

impl ControlConfig {
    pub fn version_endpoint(&self) -> String {
        format!("http://{}:{}/json/version", self.debug_host, self.debug_port)
    }

    pub fn list_endpoint(&self) -> String {
        format!("http://{}:{}/json/list", self.debug_host, self.debug_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_use_configured_port() {
        let cfg = ControlConfig {
            debug_port: 9444,
            ..Default::default()
        };
        assert_eq!(cfg.version_endpoint(), "http://127.0.0.1:9444/json/version");
        assert_eq!(cfg.list_endpoint(), "http://127.0.0.1:9444/json/list");
    }
}
