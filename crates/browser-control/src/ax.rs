//! Accessibility-tree extraction and the DOM fallback.

use std::collections::HashMap;
use std::time::Instant;

use ghostpilot_perception::{
    build_interactive_index, normalize_tree, AxExtraction, AxRawNode, BoundingBox, DomCandidate,
    IndexExtraction, NormalizeBudget,
};
use ghostpilot_perception::deficiency::DeficiencySignals;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::ControlError;
use crate::session::GhostSession;

/// Bounding boxes are fetched per interactive node; cap the fanout so a
/// link farm cannot stall perception.
const MAX_BOX_LOOKUPS: usize = 120;

/// Script behind `extract_dom_interactive_elements`.
const DOM_CANDIDATES_SCRIPT: &str = r#"JSON.stringify(
  Array.from(document.querySelectorAll('a, button, input, select, textarea, [role], [onclick]'))
    .slice(0, 200)
    .map((el) => {
      const rect = el.getBoundingClientRect();
      return {
        tag: el.tagName.toLowerCase(),
        text: (el.innerText || el.value || el.getAttribute('aria-label') || '').slice(0, 80),
        x: rect.x, y: rect.y, width: rect.width, height: rect.height,
        clickable: rect.width > 0 && rect.height > 0,
      };
    })
    .filter((c) => c.clickable)
)"#;

/// Script behind `get_ax_deficiency_signals`.
const DEFICIENCY_SCRIPT: &str = r#"JSON.stringify({
  readyState: document.readyState,
  isLoadComplete: document.readyState === 'complete',
  hasSignificantVisualContent: (() => {
    const body = document.body;
    if (!body) return false;
    const rect = body.getBoundingClientRect();
    return rect.width > 200 && rect.height > 200 &&
      (body.querySelectorAll('canvas, video, img, svg').length > 0 ||
       (body.innerText || '').length > 100);
  })(),
  visibleElementCount: document.querySelectorAll('body *').length,
  textCharCount: (document.body ? document.body.innerText || '' : '').length,
  mediaElementCount: document.querySelectorAll('canvas, video, img, svg').length,
  domInteractiveCandidateCount: document.querySelectorAll(
    'a, button, input, select, textarea, [role=button], [role=link], [onclick]'
  ).length,
})"#;

impl GhostSession {
    /// Pull the full AX tree and normalize it under the given budgets.
    pub async fn extract_normalized_ax_tree(
        &self,
        char_budget: usize,
        time_budget_ms: u64,
        include_bounding_boxes: bool,
    ) -> Result<AxExtraction, ControlError> {
        let started = Instant::now();
        let response = self
            .shared()
            .send("Accessibility.getFullAXTree", json!({}))
            .await?;
        let raw_nodes: Vec<AxRawNode> = response
            .get("nodes")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| ControlError::Protocol(format!("bad ax payload: {err}")))?
            .unwrap_or_default();

        let boxes = if include_bounding_boxes {
            self.fetch_boxes(&raw_nodes).await
        } else {
            HashMap::new()
        };

        let budget = NormalizeBudget {
            char_budget,
            time_budget_ms: time_budget_ms.saturating_sub(started.elapsed().as_millis() as u64),
        };
        let mut extraction = normalize_tree(&raw_nodes, budget, &boxes);
        extraction.duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            target: "ghost-session",
            context = %self.context_id(),
            raw = extraction.raw_count,
            normalized = extraction.normalized_count,
            interactive = extraction.interactive_count,
            truncated = extraction.truncated,
            "ax tree extracted"
        );
        Ok(extraction)
    }

    /// Interactive element index plus the tree it was derived from.
    pub async fn extract_interactive_element_index(
        &self,
        char_budget: usize,
        include_bounding_boxes: bool,
    ) -> Result<IndexExtraction, ControlError> {
        let tree = self
            .extract_normalized_ax_tree(char_budget, 1_000, include_bounding_boxes)
            .await?;
        Ok(build_interactive_index(tree))
    }

    /// DOM-derived candidates; the bypass path when the AX tree is
    /// deficient but the DOM clearly is not.
    pub async fn extract_dom_interactive_elements(
        &self,
    ) -> Result<Vec<DomCandidate>, ControlError> {
        let value = self.evaluate(DOM_CANDIDATES_SCRIPT, true).await?;
        let text = value.as_str().unwrap_or("[]");
        serde_json::from_str(text)
            .map_err(|err| ControlError::Runtime(format!("bad dom candidates: {err}")))
    }

    pub async fn get_ax_deficiency_signals(&self) -> Result<DeficiencySignals, ControlError> {
        let value = self.evaluate(DEFICIENCY_SCRIPT, true).await?;
        let text = value.as_str().unwrap_or("{}");
        serde_json::from_str(text)
            .map_err(|err| ControlError::Runtime(format!("bad deficiency signals: {err}")))
    }

    /// Resolve boxes for interactive-looking nodes, bounded fanout.
    async fn fetch_boxes(&self, raw_nodes: &[AxRawNode]) -> HashMap<i64, BoundingBox> {
        let mut boxes = HashMap::new();
        let candidates = raw_nodes
            .iter()
            .filter(|node| {
                node.backend_dom_node_id.is_some()
                    && node
                        .role
                        .as_deref()
                        .map(|role| {
                            ghostpilot_perception::InteractiveRole::parse(role).is_some()
                        })
                        .unwrap_or(false)
            })
            .take(MAX_BOX_LOOKUPS);

        for node in candidates {
            let backend_id = node.backend_dom_node_id.unwrap_or_default();
            let response = self
                .shared()
                .send("DOM.getBoxModel", json!({ "backendNodeId": backend_id }))
                .await;
            if let Ok(response) = response {
                if let Some(bbox) = border_box(&response) {
                    boxes.insert(backend_id, bbox);
                }
            }
        }
        boxes
    }
}

/// The CDP box model's border quad is eight numbers, clockwise from
/// the top-left corner.
fn border_box(response: &Value) -> Option<BoundingBox> {
    let quad = response.get("model")?.get("border")?.as_array()?;
    if quad.len() < 8 {
        return None;
    }
    let x = quad[0].as_f64()?;
    let y = quad[1].as_f64()?;
    let right = quad[2].as_f64()?;
    let bottom = quad[5].as_f64()?;
    Some(BoundingBox {
        x,
        y,
        width: (right - x).max(0.0),
        height: (bottom - y).max(0.0),
    })
}
