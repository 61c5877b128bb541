use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Where a session-fatal event came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrashSource {
    RendererCrash,
    TargetClosed,
    NavigationFatal,
}

/// The last session-fatal event observed on a target. The pool reads
/// this at release time to decide between return-to-available and
/// recycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrashEvent {
    pub source: CrashSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub timestamp: SystemTime,
}

impl CrashEvent {
    pub fn renderer() -> Self {
        Self {
            source: CrashSource::RendererCrash,
            status: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn target_closed() -> Self {
        Self {
            source: CrashSource::TargetClosed,
            status: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn navigation_fatal(status: Option<u16>) -> Self {
        Self {
            source: CrashSource::NavigationFatal,
            status,
            timestamp: SystemTime::now(),
        }
    }
}
