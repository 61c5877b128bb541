//! The decision-engine seam.
//!
//! The engine is an injected collaborator: it maps (intent,
//! observation) to the next action, may return a subtask
//! decomposition, and summarizes history pairs for the context window.

use async_trait::async_trait;
use ghostpilot_core_types::RawDecision;
use ghostpilot_perception::{InteractiveElement, ScreenshotData};
use serde::{Deserialize, Serialize};

use crate::context_window::HistoryPair;
use crate::model::StructuredErrorObservation;
use crate::subtask::{Decomposition, SubtaskUpdate};

/// Perception strategy level for one engine call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "TIER_1_AX")]
    Tier1Ax,
    #[serde(rename = "TIER_2_VISION")]
    Tier2Vision,
    #[serde(rename = "TIER_3_SCROLL")]
    Tier3Scroll,
}

/// Why a call left tier 1.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationReason {
    LowConfidence,
    AxDeficient,
    NoProgress,
    UnsafeAction,
    RetryAfterScroll,
}

/// Prompting mode hint. Unknown wire values deserialize to `Unknown`
/// and are treated as `Standard` rather than erroring.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionMode {
    #[default]
    Standard,
    ReadScreen,
    ComputerUse,
    #[serde(other)]
    Unknown,
}

impl DecisionMode {
    pub fn normalize(self) -> Self {
        match self {
            DecisionMode::Unknown => DecisionMode::Standard,
            known => known,
        }
    }
}

/// Everything the engine sees for one decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub intent: String,
    pub current_url: String,
    pub tier: Tier,
    pub decision_mode: DecisionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<EscalationReason>,
    /// Columnar encoding of the interactive index plus tree context.
    pub encoded_observation: String,
    pub index: Vec<InteractiveElement>,
    /// Present only on tier-2 calls; never on navigation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_error: Option<StructuredErrorObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    pub recent_pairs: Vec<HistoryPair>,
    /// Set when subtask retries are exhausted and the loop wants a
    /// fresh decomposition.
    #[serde(default)]
    pub redecompose: bool,
    /// Set when the loop needs a different action than the repeated
    /// no-progress fingerprint.
    #[serde(default)]
    pub diversify: bool,
}

/// Engine output for one call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub decision: RawDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<Decomposition>,
    #[serde(default)]
    pub subtask_updates: Vec<SubtaskUpdate>,
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse, String>;

    /// Compress older history pairs into one text block. The default
    /// keeps first lines; model-backed engines override this.
    async fn summarize(&self, pairs: &[HistoryPair]) -> Result<String, String> {
        let mut summary = String::new();
        for pair in pairs {
            summary.push_str(&format!("{} => {}\n", pair.action, pair.observation));
        }
        if summary.len() > 2_000 {
            summary.truncate(2_000);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_decision_modes_normalize_to_standard() {
        let mode: DecisionMode = serde_json::from_str("\"SPECULATIVE_FUTURE_MODE\"").unwrap();
        assert_eq!(mode, DecisionMode::Unknown);
        assert_eq!(mode.normalize(), DecisionMode::Standard);

        let known: DecisionMode = serde_json::from_str("\"COMPUTER_USE\"").unwrap();
        assert_eq!(known.normalize(), DecisionMode::ComputerUse);
    }

    #[test]
    fn tier_serializes_wire_names() {
        assert_eq!(
            serde_json::to_string(&Tier::Tier1Ax).unwrap(),
            "\"TIER_1_AX\""
        );
        assert_eq!(
            serde_json::to_string(&Tier::Tier2Vision).unwrap(),
            "\"TIER_2_VISION\""
        );
    }
}
