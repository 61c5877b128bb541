//! Deterministic keyword/role fallback engine.
//!
//! Used by the CLI demo and tests; production injects a model-backed
//! engine behind the same trait. The heuristics cover the common
//! search-page shape: focus the search box, type the intent, submit,
//! then follow the best-matching link.

use async_trait::async_trait;
use ghostpilot_core_types::{ActionKind, Point, RawDecision};
use ghostpilot_perception::{InteractiveElement, InteractiveRole};

use crate::engine::{DecisionEngine, DecisionRequest, DecisionResponse};

pub struct RuleBasedEngine;

impl RuleBasedEngine {
    pub fn new() -> Self {
        Self
    }

    fn search_box(index: &[InteractiveElement]) -> Option<&InteractiveElement> {
        index.iter().find(|e| {
            matches!(
                e.role,
                InteractiveRole::Searchbox | InteractiveRole::Textbox | InteractiveRole::Combobox
            )
        })
    }

    fn matching_link<'a>(
        index: &'a [InteractiveElement],
        intent: &str,
    ) -> Option<&'a InteractiveElement> {
        let keywords: Vec<String> = intent
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .map(str::to_lowercase)
            .collect();
        index
            .iter()
            .filter(|e| matches!(e.role, InteractiveRole::Link | InteractiveRole::Button))
            .find(|e| {
                let name = e.name.to_lowercase();
                keywords.iter().any(|k| name.contains(k.as_str()))
            })
    }

    fn click(element: &InteractiveElement, reasoning: &str) -> RawDecision {
        let (x, y) = element.bounding_box.center();
        RawDecision {
            action: Some(ActionKind::Click),
            target: Some(Point { x, y }),
            confidence: 0.9,
            reasoning: reasoning.into(),
            ..Default::default()
        }
    }

    fn last_action_kind(request: &DecisionRequest) -> Option<&str> {
        request
            .recent_pairs
            .last()
            .map(|pair| pair.action.split_whitespace().next().unwrap_or(""))
    }
}

impl Default for RuleBasedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionEngine for RuleBasedEngine {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse, String> {
        // Error observations: retry what the taxonomy says is
        // retryable, fail the rest.
        if let Some(observation) = &request.structured_error {
            let decision = if observation.error.retryable {
                RawDecision {
                    action: Some(ActionKind::Wait),
                    text: Some("1000".into()),
                    confidence: 0.9,
                    reasoning: "retryable error; backing off".into(),
                    ..Default::default()
                }
            } else {
                RawDecision {
                    action: Some(ActionKind::Failed),
                    text: Some(observation.error.message.clone()),
                    confidence: 0.9,
                    reasoning: "non-retryable error".into(),
                    ..Default::default()
                }
            };
            return Ok(DecisionResponse {
                decision,
                ..Default::default()
            });
        }

        let last = Self::last_action_kind(request);

        // Results page reached after a submit: call it done.
        if matches!(last, Some("PRESS_KEY")) && !request.index.is_empty() {
            let decision = RawDecision {
                action: Some(ActionKind::Done),
                text: Some(format!(
                    "results for {:?} at {}",
                    request.intent, request.current_url
                )),
                confidence: 0.85,
                reasoning: "search submitted and results rendered".into(),
                ..Default::default()
            };
            return Ok(DecisionResponse {
                decision,
                ..Default::default()
            });
        }

        if matches!(last, Some("TYPE")) {
            let decision = RawDecision {
                action: Some(ActionKind::PressKey),
                key: Some("Enter".into()),
                confidence: 0.9,
                reasoning: "submit the typed query".into(),
                ..Default::default()
            };
            return Ok(DecisionResponse {
                decision,
                ..Default::default()
            });
        }

        if matches!(last, Some("CLICK")) {
            if let Some(_box_) = Self::search_box(&request.index) {
                let decision = RawDecision {
                    action: Some(ActionKind::Type),
                    text: Some(request.intent.clone()),
                    confidence: 0.9,
                    reasoning: "search box focused; typing the intent".into(),
                    ..Default::default()
                };
                return Ok(DecisionResponse {
                    decision,
                    ..Default::default()
                });
            }
        }

        if let Some(link) = Self::matching_link(&request.index, &request.intent) {
            return Ok(DecisionResponse {
                decision: Self::click(link, "link text matches the intent"),
                ..Default::default()
            });
        }

        if let Some(search) = Self::search_box(&request.index) {
            return Ok(DecisionResponse {
                decision: Self::click(search, "focusing the search box"),
                ..Default::default()
            });
        }

        // Nothing actionable in view; low confidence pushes the loop
        // toward its recovery tiers.
        Ok(DecisionResponse {
            decision: RawDecision {
                action: Some(ActionKind::Scroll),
                text: Some("600".into()),
                confidence: 0.3,
                reasoning: "no actionable element in view".into(),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DecisionMode, Tier};
    use ghostpilot_perception::BoundingBox;

    fn element(role: InteractiveRole, name: &str) -> InteractiveElement {
        InteractiveElement {
            node_id: "1".into(),
            role,
            name: name.into(),
            value: None,
            bounding_box: BoundingBox {
                x: 100.0,
                y: 40.0,
                width: 200.0,
                height: 30.0,
            },
            backend_dom_node_id: None,
        }
    }

    fn request(index: Vec<InteractiveElement>) -> DecisionRequest {
        DecisionRequest {
            intent: "search for mechanical keyboards".into(),
            current_url: "https://search.test/".into(),
            tier: Tier::Tier1Ax,
            decision_mode: DecisionMode::Standard,
            escalation_reason: None,
            encoded_observation: String::new(),
            index,
            screenshot: None,
            structured_error: None,
            context_summary: None,
            recent_pairs: Vec::new(),
            redecompose: false,
            diversify: false,
        }
    }

    #[tokio::test]
    async fn clicks_search_box_first() {
        let engine = RuleBasedEngine::new();
        let response = engine
            .decide(&request(vec![element(InteractiveRole::Searchbox, "Search")]))
            .await
            .unwrap();
        assert_eq!(response.decision.action, Some(ActionKind::Click));
        let target = response.decision.target.unwrap();
        assert_eq!((target.x, target.y), (200.0, 55.0));
    }

    #[tokio::test]
    async fn follows_matching_link() {
        let engine = RuleBasedEngine::new();
        let response = engine
            .decide(&request(vec![element(
                InteractiveRole::Link,
                "Mechanical keyboards on sale",
            )]))
            .await
            .unwrap();
        assert_eq!(response.decision.action, Some(ActionKind::Click));
    }

    #[tokio::test]
    async fn scrolls_with_low_confidence_when_empty() {
        let engine = RuleBasedEngine::new();
        let response = engine.decide(&request(Vec::new())).await.unwrap();
        assert_eq!(response.decision.action, Some(ActionKind::Scroll));
        assert!(response.decision.confidence < 0.5);
    }
}
