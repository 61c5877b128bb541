//! AX-deficiency classification.
//!
//! A page is deficient when it has finished loading, clearly renders
//! content, and still exposes almost nothing through the accessibility
//! tree (canvas apps, some WebGL frontends). The load and visual gates
//! keep mid-load pages from being flagged.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeficiencySignals {
    pub ready_state: String,
    pub is_load_complete: bool,
    pub has_significant_visual_content: bool,
    pub visible_element_count: u32,
    pub text_char_count: u64,
    pub media_element_count: u32,
    pub dom_interactive_candidate_count: u32,
}

/// `deficient = load_complete ∧ visual_content ∧ interactive < threshold`.
pub fn classify_deficiency(
    signals: &DeficiencySignals,
    interactive_count: usize,
    threshold: usize,
) -> bool {
    signals.is_load_complete
        && signals.has_significant_visual_content
        && interactive_count < threshold
}
