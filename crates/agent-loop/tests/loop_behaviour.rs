//! End-to-end loop behaviour against the fake host.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ghostpilot_agent_loop::{
    AgentError, DecisionEngine, DecisionRequest, DecisionResponse, EscalationReason, RunStatus,
    TaskCaps, TaskRunner, Tier,
};
use ghostpilot_agent_loop::model::DecisionSource;
use ghostpilot_browser_control::testing::{FakeHost, FakeTransport, SessionFactory};
use ghostpilot_browser_control::{ControlConfig, GhostSession};
use ghostpilot_core_types::{ActionKind, ContextId, Point, RawDecision};
use serde_json::json;

/// Engine that pops scripted responses and records every request.
struct ScriptedEngine {
    responses: Mutex<VecDeque<DecisionResponse>>,
    requests: Mutex<Vec<DecisionRequest>>,
    fallback: RawDecision,
}

impl ScriptedEngine {
    fn new(responses: Vec<RawDecision>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|decision| DecisionResponse {
                        decision,
                        ..Default::default()
                    })
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
            fallback: low_confidence_scroll(),
        })
    }

    fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse, String> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| DecisionResponse {
                decision: self.fallback.clone(),
                ..Default::default()
            }))
    }
}

fn click(x: f64, y: f64, confidence: f64) -> RawDecision {
    RawDecision {
        action: Some(ActionKind::Click),
        target: Some(Point { x, y }),
        confidence,
        reasoning: "scripted click".into(),
        ..Default::default()
    }
}

fn done(text: &str) -> RawDecision {
    RawDecision {
        action: Some(ActionKind::Done),
        text: Some(text.into()),
        confidence: 0.95,
        reasoning: "scripted done".into(),
        ..Default::default()
    }
}

fn type_text(text: &str) -> RawDecision {
    RawDecision {
        action: Some(ActionKind::Type),
        text: Some(text.into()),
        confidence: 0.9,
        reasoning: "scripted type".into(),
        ..Default::default()
    }
}

fn wait_ms(ms: u64) -> RawDecision {
    RawDecision {
        action: Some(ActionKind::Wait),
        text: Some(ms.to_string()),
        confidence: 0.9,
        reasoning: "scripted wait".into(),
        ..Default::default()
    }
}

fn low_confidence_scroll() -> RawDecision {
    RawDecision {
        action: Some(ActionKind::Scroll),
        text: Some("600".into()),
        confidence: 0.2,
        reasoning: "cannot commit".into(),
        ..Default::default()
    }
}

fn searchbox_tree() -> serde_json::Value {
    json!({
        "nodes": [
            { "nodeId": "1", "role": { "value": "RootWebArea" }, "name": { "value": "page" },
              "childIds": ["2", "3", "4", "5", "6"] },
            { "nodeId": "2", "role": { "value": "searchbox" }, "name": { "value": "Search" },
              "childIds": [] },
            { "nodeId": "3", "role": { "value": "button" }, "name": { "value": "Go" },
              "childIds": [] },
            { "nodeId": "4", "role": { "value": "link" }, "name": { "value": "Deals" },
              "childIds": [] },
            { "nodeId": "5", "role": { "value": "link" }, "name": { "value": "Support" },
              "childIds": [] },
            { "nodeId": "6", "role": { "value": "link" }, "name": { "value": "Cart" },
              "childIds": [] },
        ]
    })
}

async fn session_with_tree(
    tree: Option<serde_json::Value>,
) -> (Arc<GhostSession>, Arc<FakeTransport>) {
    let host = FakeHost::new();
    let context = ContextId::slot(0);
    let session = host.warm(&ControlConfig::default(), &context).await.unwrap();
    let transport = host.transport_for(&context).unwrap();
    if let Some(tree) = tree {
        transport.script_response("Accessibility.getFullAXTree", tree);
    }
    (Arc::new(session), transport)
}

#[tokio::test]
async fn standard_page_resolves_at_tier_1() {
    let (session, _transport) = session_with_tree(Some(searchbox_tree())).await;
    let engine = ScriptedEngine::new(vec![click(150.0, 50.0, 0.9), done("found it")]);
    let runner = TaskRunner::new(session.clone(), engine.clone(), TaskCaps::minimal());

    let report = runner
        .run_task("search for mechanical keyboards", "https://shop.test/")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.answer.as_deref(), Some("found it"));
    assert!(report.tier_usage.tier1_calls > 0);
    assert_eq!(report.tier_usage.tier2_calls, 0);
    assert!(report.tier_usage.escalations.is_empty());

    // Step 2 reused the cached observation: same url, no progress
    // signals in between.
    assert!(report.history[1].perception_cache_hit);

    // Tier-1 acceptances all cleared the confidence gate.
    for record in &report.history {
        if record.resolved_tier == Tier::Tier1Ax
            && record.decision_source == DecisionSource::Engine
        {
            assert!(record.decision.confidence >= 0.7);
        }
    }
    session.close().await;
}

#[tokio::test]
async fn deficient_page_escalates_to_vision() {
    // Empty AX tree + visually rich signals = AX_DEFICIENT.
    let (session, _transport) = session_with_tree(None).await;
    let engine = ScriptedEngine::new(vec![done("read from pixels")]);
    let runner = TaskRunner::new(session.clone(), engine.clone(), TaskCaps::minimal());

    let report = runner
        .run_task("read the canvas dashboard", "https://canvas.test/")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.tier_usage.tier2_calls, 1);
    assert!(report
        .tier_usage
        .escalations
        .contains(&EscalationReason::AxDeficient));

    // The vision request carried a screenshot.
    let requests = engine.requests();
    assert_eq!(requests[0].tier, Tier::Tier2Vision);
    assert!(requests[0].screenshot.is_some());
    session.close().await;
}

#[tokio::test]
async fn undecidable_page_scrolls_then_fails() {
    let (session, _transport) = session_with_tree(Some(searchbox_tree())).await;
    // Every response is a low-confidence scroll: tier 1 and tier 2
    // never commit, tier 3 burns its scroll budget.
    let engine = ScriptedEngine::new(Vec::new());
    let caps = TaskCaps::minimal();
    let runner = TaskRunner::new(session.clone(), engine.clone(), caps.clone());

    let report = runner
        .run_task("find the below-fold widget", "https://long.test/")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.tier_usage.tier3_scrolls, caps.max_scroll_steps as u64);
    assert!(report
        .tier_usage
        .escalations
        .contains(&EscalationReason::RetryAfterScroll));
    assert!(report.error_detail.is_some());
    session.close().await;
}

#[tokio::test]
async fn navigation_error_routes_without_screenshot_then_retries() {
    let (session, transport) = session_with_tree(Some(searchbox_tree())).await;
    transport.enqueue_response(
        "Page.navigate",
        Ok(json!({ "frameId": "main", "errorText": "net::ERR_CONNECTION_RESET" })),
    );
    let engine = ScriptedEngine::new(vec![wait_ms(50), done("after retry")]);
    let runner = TaskRunner::new(session.clone(), engine.clone(), TaskCaps::minimal());

    let report = runner
        .run_task("reach the flaky host", "https://flaky.test/")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Done);
    assert_eq!(report.structured_errors.len(), 1);
    assert_eq!(
        report.structured_errors[0].error.error_type,
        Some(ghostpilot_core_types::NetworkErrorType::ConnectionReset)
    );

    let requests = engine.requests();
    let error_request = &requests[0];
    assert!(error_request.structured_error.is_some());
    assert!(error_request.screenshot.is_none());
    session.close().await;
}

#[tokio::test]
async fn type_without_navigation_queues_synthetic_enter() {
    let (session, _transport) = session_with_tree(Some(searchbox_tree())).await;
    let engine = ScriptedEngine::new(vec![
        type_text("mechanical keyboards"),
        done("submitted"),
    ]);
    let runner = TaskRunner::new(session.clone(), engine.clone(), TaskCaps::minimal());

    let report = runner
        .run_task("search for mechanical keyboards", "https://shop.test/")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Done);
    let synthetic = report
        .history
        .iter()
        .find(|r| r.decision_source == DecisionSource::EnterHeuristic)
        .expect("synthetic Enter step missing");
    assert_eq!(synthetic.decision.key.as_deref(), Some("Enter"));
    session.close().await;
}

#[tokio::test]
async fn crash_during_run_escapes_for_retry() {
    let (session, transport) = session_with_tree(Some(searchbox_tree())).await;
    let engine = ScriptedEngine::new(vec![click(150.0, 50.0, 0.9)]);
    let runner = TaskRunner::new(session.clone(), engine, TaskCaps::minimal());

    transport.push_event("Inspector.targetCrashed", json!({}));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let err = runner
        .run_task("anything", "https://crash.test/")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Crash(_)));
    session.close().await;
}

#[tokio::test]
async fn context_window_formulas_hold_across_a_run() {
    let (session, transport) = session_with_tree(Some(searchbox_tree())).await;

    // Every settle read sees fresh node churn, so each click counts as
    // progress and the loop never trips its repeat guard.
    let mutations = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let hook_counter = mutations.clone();
    transport.set_eval_hook(move |expression| {
        if expression.contains("__ghostMutations") {
            let n = hook_counter.fetch_add(5, std::sync::atomic::Ordering::Relaxed) + 5;
            Some(serde_json::json!(format!(
                "{{\"addedRemoved\":{n},\"interactiveRoleMutations\":0,\"childList\":1,\"attribute\":0}}"
            )))
        } else {
            None
        }
    });

    // Seven clicks, then done: enough steps to age pairs out of the
    // verbatim window.
    let mut script: Vec<RawDecision> =
        (0..7).map(|i| click(50.0 + 40.0 * i as f64, 80.0, 0.9)).collect();
    script.push(done("finally"));
    let engine = ScriptedEngine::new(script);
    let mut caps = TaskCaps::minimal();
    caps.max_steps = 10;
    let runner = TaskRunner::new(session.clone(), engine, caps);

    let report = runner
        .run_task("walk the steps", "https://steps.test/")
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Done);
    for record in &report.history {
        let prior = (record.step - 1) as usize;
        assert_eq!(record.context_window.recent_pair_count, prior.min(5));
        assert_eq!(
            record.context_window.summarized_pair_count,
            prior.saturating_sub(5)
        );
        assert_eq!(
            record.context_window.summary_included,
            record.context_window.summarized_pair_count > 0
        );
    }
    session.close().await;
}
