use ghostpilot_perception::ScreenshotMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an executed action did to the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Input dispatched, task continues.
    Acted,
    /// Terminal DONE action.
    Done,
    /// Terminal FAILED action.
    Failed,
}

/// Mutation counters accumulated by the in-page observer between two
/// settle reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSummary {
    pub added_removed: u64,
    pub interactive_role_mutations: u64,
    pub child_list: u64,
    pub attribute: u64,
}

impl MutationSummary {
    /// Significance threshold for node churn.
    pub const SIGNIFICANT_ADDED_REMOVED: u64 = 3;

    pub fn any(&self) -> bool {
        self.added_removed > 0 || self.child_list > 0 || self.attribute > 0
    }

    pub fn significant(&self) -> bool {
        self.added_removed >= Self::SIGNIFICANT_ADDED_REMOVED
            || self.interactive_role_mutations > 0
    }

    pub fn delta_since(&self, earlier: &MutationSummary) -> MutationSummary {
        MutationSummary {
            added_removed: self.added_removed.saturating_sub(earlier.added_removed),
            interactive_role_mutations: self
                .interactive_role_mutations
                .saturating_sub(earlier.interactive_role_mutations),
            child_list: self.child_list.saturating_sub(earlier.child_list),
            attribute: self.attribute.saturating_sub(earlier.attribute),
        }
    }
}

/// Outcome of `execute_action`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub current_url: String,
    pub navigation_observed: bool,
    pub dom_mutation_observed: bool,
    pub significant_dom_mutation_observed: bool,
    pub mutation_summary: MutationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn acted(current_url: String) -> Self {
        Self {
            status: ExecutionStatus::Acted,
            current_url,
            navigation_observed: false,
            dom_mutation_observed: false,
            significant_dom_mutation_observed: false,
            mutation_summary: MutationSummary::default(),
            extracted_data: None,
            message: None,
        }
    }
}

/// Screenshot capture request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreenshotRequest {
    pub mode: ScreenshotMode,
    pub quality: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_surface: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_scroll_steps: Option<u32>,
}

impl Default for ScreenshotRequest {
    fn default() -> Self {
        Self {
            mode: ScreenshotMode::Viewport,
            quality: 70,
            from_surface: None,
            max_scroll_steps: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrefetchStatus {
    Prefetched,
    Failed,
    Skipped,
}

/// Result of a best-effort prefetch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrefetchOutcome {
    pub status: PrefetchStatus,
    pub normalized_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn significance_thresholds() {
        let quiet = MutationSummary::default();
        assert!(!quiet.any());
        assert!(!quiet.significant());

        let churn = MutationSummary {
            added_removed: 3,
            ..Default::default()
        };
        assert!(churn.significant());

        let role_change = MutationSummary {
            interactive_role_mutations: 1,
            added_removed: 1,
            ..Default::default()
        };
        assert!(role_change.significant());

        let attr_only = MutationSummary {
            attribute: 5,
            ..Default::default()
        };
        assert!(attr_only.any());
        assert!(!attr_only.significant());
    }

    #[test]
    fn delta_subtracts_saturating() {
        let earlier = MutationSummary {
            added_removed: 2,
            child_list: 1,
            ..Default::default()
        };
        let later = MutationSummary {
            added_removed: 6,
            child_list: 1,
            ..Default::default()
        };
        let delta = later.delta_since(&earlier);
        assert_eq!(delta.added_removed, 4);
        assert_eq!(delta.child_list, 0);
    }
}
