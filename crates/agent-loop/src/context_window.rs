//! Context-window accounting.
//!
//! The most recent five {action, observation summary} pairs ride along
//! verbatim; older pairs collapse into one engine-produced summary
//! block. The per-step metric formulas are part of the public contract
//! and are asserted by tests.

use ghostpilot_perception::estimate_prompt_tokens;
use serde::{Deserialize, Serialize};

use crate::engine::DecisionEngine;

/// Pairs kept verbatim.
pub const RECENT_PAIR_LIMIT: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryPair {
    pub action: String,
    pub observation: String,
}

/// Metrics recorded on every step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextWindowMetrics {
    pub recent_pair_count: usize,
    pub summarized_pair_count: usize,
    pub summary_included: bool,
    pub summary_char_count: usize,
    pub estimated_tier1_prompt_tokens: u64,
    pub estimated_tier2_prompt_tokens: u64,
    pub summary_refresh_count: u64,
}

pub struct ContextWindow {
    pairs: Vec<HistoryPair>,
    summary: Option<String>,
    summarized_len: usize,
    summary_refresh_count: u64,
}

impl ContextWindow {
    pub fn new() -> Self {
        Self {
            pairs: Vec::new(),
            summary: None,
            summarized_len: 0,
            summary_refresh_count: 0,
        }
    }

    pub fn push(&mut self, pair: HistoryPair) {
        self.pairs.push(pair);
    }

    pub fn recent(&self) -> Vec<HistoryPair> {
        let start = self.pairs.len().saturating_sub(RECENT_PAIR_LIMIT);
        self.pairs[start..].to_vec()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    fn older(&self) -> &[HistoryPair] {
        let end = self.pairs.len().saturating_sub(RECENT_PAIR_LIMIT);
        &self.pairs[..end]
    }

    /// Refresh the summary when pairs have aged out of the verbatim
    /// window since the last refresh.
    pub async fn maybe_refresh(&mut self, engine: &dyn DecisionEngine) -> Result<(), String> {
        let older_len = self.older().len();
        if older_len == 0 || older_len == self.summarized_len {
            return Ok(());
        }
        let summary = engine.summarize(self.older()).await?;
        self.summary = Some(summary);
        self.summarized_len = older_len;
        self.summary_refresh_count += 1;
        Ok(())
    }

    /// Metrics for `step` (1-based): `recent = min(step-1, 5)`,
    /// `summarized = max(step-1-5, 0)`.
    pub fn metrics_for_step(&self, step: u32, encoded_chars: usize) -> ContextWindowMetrics {
        let prior = step.saturating_sub(1) as usize;
        let recent_pair_count = prior.min(RECENT_PAIR_LIMIT);
        let summarized_pair_count = prior.saturating_sub(RECENT_PAIR_LIMIT);
        let summary_char_count = self.summary.as_deref().map_or(0, str::len);

        let recent_chars: usize = self
            .recent()
            .iter()
            .map(|p| p.action.len() + p.observation.len())
            .sum();
        let tier1_chars = encoded_chars + recent_chars + summary_char_count;
        // Vision prompts carry the screenshot; reserve a flat token
        // block for the image on top of the text.
        let tier2_chars = tier1_chars + 6_000;

        ContextWindowMetrics {
            recent_pair_count,
            summarized_pair_count,
            summary_included: summarized_pair_count > 0,
            summary_char_count,
            estimated_tier1_prompt_tokens: estimate_prompt_tokens(tier1_chars),
            estimated_tier2_prompt_tokens: estimate_prompt_tokens(tier2_chars),
            summary_refresh_count: self.summary_refresh_count,
        }
    }
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::engine::{DecisionRequest, DecisionResponse};

    struct EchoEngine;

    #[async_trait]
    impl DecisionEngine for EchoEngine {
        async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionResponse, String> {
            Ok(DecisionResponse::default())
        }
    }

    fn pair(i: usize) -> HistoryPair {
        HistoryPair {
            action: format!("CLICK #{i}"),
            observation: format!("page {i}"),
        }
    }

    #[test]
    fn step_formulas_hold() {
        let window = ContextWindow::new();
        for (step, recent, summarized) in
            [(1u32, 0usize, 0usize), (2, 1, 0), (6, 5, 0), (7, 5, 1), (10, 5, 4)]
        {
            let metrics = window.metrics_for_step(step, 1_000);
            assert_eq!(metrics.recent_pair_count, recent, "step {step}");
            assert_eq!(metrics.summarized_pair_count, summarized, "step {step}");
            assert_eq!(metrics.summary_included, summarized > 0);
        }
    }

    #[test]
    fn token_estimates_are_nonzero_and_ordered() {
        let window = ContextWindow::new();
        let metrics = window.metrics_for_step(3, 2_000);
        assert!(metrics.estimated_tier1_prompt_tokens > 0);
        assert!(metrics.estimated_tier2_prompt_tokens > metrics.estimated_tier1_prompt_tokens);
    }

    #[tokio::test]
    async fn summary_refreshes_as_pairs_age_out() {
        let mut window = ContextWindow::new();
        for i in 0..5 {
            window.push(pair(i));
        }
        window.maybe_refresh(&EchoEngine).await.unwrap();
        assert!(window.summary().is_none());

        window.push(pair(5));
        window.maybe_refresh(&EchoEngine).await.unwrap();
        let metrics = window.metrics_for_step(7, 0);
        assert!(window.summary().is_some());
        assert_eq!(metrics.summary_refresh_count, 1);
        assert!(metrics.summary_char_count > 0);

        window.push(pair(6));
        window.maybe_refresh(&EchoEngine).await.unwrap();
        assert_eq!(window.metrics_for_step(8, 0).summary_refresh_count, 2);
    }

    #[test]
    fn recent_holds_last_five() {
        let mut window = ContextWindow::new();
        for i in 0..8 {
            window.push(pair(i));
        }
        let recent = window.recent();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].action, "CLICK #3");
    }
}
