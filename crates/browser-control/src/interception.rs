//! Request-interception policy.
//!
//! `AGENT_FAST` blocks the resource classes an agent never reads
//! (images, media, fonts) while keeping documents, stylesheets,
//! scripts, and JSON APIs flowing. The event pump consults the current
//! mode for every `Fetch.requestPaused` and answers continue or fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterceptionMode {
    /// Everything loads; used for vision-tier captures.
    #[default]
    VisualRender,
    /// Block Image, Media, Font; permit Document, Stylesheet, Script,
    /// XHR/Fetch.
    AgentFast,
}

/// Resource classes blocked under `AGENT_FAST`.
const BLOCKED_CLASSES: [&str; 3] = ["Image", "Media", "Font"];

pub fn blocks(mode: InterceptionMode, resource_type: &str) -> bool {
    matches!(mode, InterceptionMode::AgentFast)
        && BLOCKED_CLASSES
            .iter()
            .any(|class| class.eq_ignore_ascii_case(resource_type))
}

/// Counters exposed on the session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InterceptionMetrics {
    pub blocked_total: u64,
    pub blocked_by_classification: HashMap<String, u64>,
    pub visual_render_pass_count: u64,
}

#[derive(Default)]
pub struct InterceptionState {
    mode: RwLock<InterceptionMode>,
    blocked_total: AtomicU64,
    blocked_by_class: RwLock<HashMap<String, u64>>,
    visual_render_passes: AtomicU64,
}

impl InterceptionState {
    pub fn mode(&self) -> InterceptionMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: InterceptionMode) {
        *self.mode.write() = mode;
    }

    /// Decide a paused request; counts the block when one happens.
    pub fn should_block(&self, resource_type: &str) -> bool {
        let blocked = blocks(self.mode(), resource_type);
        if blocked {
            self.blocked_total.fetch_add(1, Ordering::Relaxed);
            *self
                .blocked_by_class
                .write()
                .entry(resource_type.to_string())
                .or_insert(0) += 1;
        }
        blocked
    }

    pub fn record_visual_render_pass(&self) {
        self.visual_render_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> InterceptionMetrics {
        InterceptionMetrics {
            blocked_total: self.blocked_total.load(Ordering::Relaxed),
            blocked_by_classification: self.blocked_by_class.read().clone(),
            visual_render_pass_count: self.visual_render_passes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_fast_blocks_heavy_classes() {
        for class in ["Image", "Media", "Font"] {
            assert!(blocks(InterceptionMode::AgentFast, class));
        }
        for class in ["Document", "Stylesheet", "Script", "XHR", "Fetch"] {
            assert!(!blocks(InterceptionMode::AgentFast, class));
        }
    }

    #[test]
    fn visual_render_blocks_nothing() {
        for class in ["Image", "Media", "Font", "Document"] {
            assert!(!blocks(InterceptionMode::VisualRender, class));
        }
    }

    #[test]
    fn state_counts_by_classification() {
        let state = InterceptionState::default();
        state.set_mode(InterceptionMode::AgentFast);
        assert!(state.should_block("Image"));
        assert!(state.should_block("Image"));
        assert!(state.should_block("Font"));
        assert!(!state.should_block("Script"));

        let metrics = state.metrics();
        assert_eq!(metrics.blocked_total, 3);
        assert_eq!(metrics.blocked_by_classification["Image"], 2);
        assert_eq!(metrics.blocked_by_classification["Font"], 1);
    }

    #[test]
    fn set_get_round_trips() {
        let state = InterceptionState::default();
        state.set_mode(InterceptionMode::AgentFast);
        assert_eq!(state.mode(), InterceptionMode::AgentFast);
        state.set_mode(InterceptionMode::VisualRender);
        assert_eq!(state.mode(), InterceptionMode::VisualRender);
    }
}
