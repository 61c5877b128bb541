//! Session operations exercised against the in-process fake host.

use std::time::Duration;

use ghostpilot_browser_control::testing::{FakeHost, FakeTransport, SessionFactory};
use ghostpilot_browser_control::{
    ControlConfig, ControlError, ExecutionStatus, GhostSession, HttpCachePolicy, InterceptionMode,
    PrefetchStatus, ScreenshotRequest,
};
use ghostpilot_core_types::{Action, ContextId, NetworkErrorType, Point};
use ghostpilot_perception::ScreenshotMode;
use serde_json::json;

async fn fake_session() -> (GhostSession, std::sync::Arc<FakeTransport>) {
    let host = FakeHost::new();
    let context = ContextId::slot(0);
    let session = host.warm(&ControlConfig::default(), &context).await.unwrap();
    let transport = host.transport_for(&context).unwrap();
    (session, transport)
}

#[tokio::test]
async fn navigate_commits_and_tracks_url() {
    let (session, _transport) = fake_session().await;
    session.navigate("https://example.test/search", 5_000).await.unwrap();
    assert_eq!(
        session.get_current_url().await.unwrap(),
        "https://example.test/search"
    );
    session.close().await;
}

#[tokio::test]
async fn navigate_times_out_without_commit() {
    let (session, transport) = fake_session().await;
    transport.set_auto_commit_navigation(false);
    let err = session
        .navigate("https://stalled.test/", 200)
        .await
        .unwrap_err();
    match err {
        ControlError::Network { error_type, .. } => {
            assert_eq!(error_type, NetworkErrorType::Timeout)
        }
        other => panic!("expected network timeout, got {other:?}"),
    }
    session.close().await;
}

#[tokio::test]
async fn navigate_surfaces_http_status() {
    let (session, transport) = fake_session().await;
    transport.set_auto_commit_navigation(false);

    let pusher = transport.clone();
    let push_task = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        pusher.push_event(
            "Network.requestWillBeSent",
            json!({
                "requestId": "req-main",
                "type": "Document",
                "request": { "url": "https://missing.test/" },
            }),
        );
        pusher.push_event(
            "Network.responseReceived",
            json!({
                "requestId": "req-main",
                "response": { "url": "https://missing.test/", "status": 404, "connectionId": 3 },
            }),
        );
        pusher.push_event(
            "Page.frameNavigated",
            json!({ "frame": { "id": "main", "url": "https://missing.test/" } }),
        );
    });

    let err = session
        .navigate("https://missing.test/", 2_000)
        .await
        .unwrap_err();
    push_task.await.unwrap();
    match err {
        ControlError::Network {
            error_type, status, ..
        } => {
            assert_eq!(error_type, NetworkErrorType::Http4xx);
            assert_eq!(status, Some(404));
        }
        other => panic!("expected http error, got {other:?}"),
    }
    session.close().await;
}

#[tokio::test]
async fn navigate_classifies_dns_failure() {
    let (session, transport) = fake_session().await;
    transport.enqueue_response(
        "Page.navigate",
        Ok(json!({ "frameId": "main", "errorText": "net::ERR_NAME_NOT_RESOLVED" })),
    );
    let err = session
        .navigate("https://no.such.host/", 2_000)
        .await
        .unwrap_err();
    match err {
        ControlError::Network { error_type, .. } => {
            assert_eq!(error_type, NetworkErrorType::DnsFailure)
        }
        other => panic!("expected dns failure, got {other:?}"),
    }
    session.close().await;
}

#[tokio::test]
async fn click_dispatches_press_and_release() {
    let (session, transport) = fake_session().await;
    let result = session
        .execute_action(
            &Action::Click {
                target: Point { x: 100.0, y: 200.0 },
            },
            Some(300),
        )
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Acted);

    let mouse_events: Vec<_> = transport
        .sent()
        .into_iter()
        .filter(|c| c.method == "Input.dispatchMouseEvent")
        .collect();
    assert_eq!(mouse_events.len(), 2);
    assert_eq!(mouse_events[0].params["type"], "mousePressed");
    assert_eq!(mouse_events[1].params["type"], "mouseReleased");
    session.close().await;
}

#[tokio::test]
async fn done_action_is_terminal_without_dispatch() {
    let (session, transport) = fake_session().await;
    let result = session
        .execute_action(
            &Action::Done {
                text: "found it".into(),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Done);
    assert_eq!(result.message.as_deref(), Some("found it"));
    assert!(!transport
        .sent_methods()
        .iter()
        .any(|m| m.starts_with("Input.")));
    session.close().await;
}

#[tokio::test]
async fn extract_returns_page_value() {
    let (session, transport) = fake_session().await;
    transport.set_eval_hook(|expression| {
        if expression.contains("document.title") {
            Some(json!("Mechanical Keyboards — Shop"))
        } else {
            None
        }
    });
    let result = session
        .execute_action(
            &Action::Extract {
                expression: "document.title".into(),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        result.extracted_data,
        Some(json!("Mechanical Keyboards — Shop"))
    );
    session.close().await;
}

#[tokio::test]
async fn crash_event_invalidates_session() {
    let (session, _transport) = fake_session().await;
    session.crash_renderer_for_testing().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let crash = session.get_last_crash_event().expect("crash recorded");
    assert_eq!(
        crash.source,
        ghostpilot_browser_control::CrashSource::RendererCrash
    );

    let err = session
        .navigate("https://example.test/", 1_000)
        .await
        .unwrap_err();
    assert!(err.is_crash());
    session.close().await;
}

#[tokio::test]
async fn interception_mode_round_trips_and_arms_fetch() {
    let (session, transport) = fake_session().await;
    session
        .set_request_interception_mode(InterceptionMode::AgentFast)
        .await
        .unwrap();
    assert_eq!(session.interception_mode(), InterceptionMode::AgentFast);
    assert!(transport.sent_methods().contains(&"Fetch.enable".to_string()));

    session
        .set_request_interception_mode(InterceptionMode::VisualRender)
        .await
        .unwrap();
    assert_eq!(session.interception_mode(), InterceptionMode::VisualRender);
    assert!(transport.sent_methods().contains(&"Fetch.disable".to_string()));
    session.close().await;
}

#[tokio::test]
async fn paused_requests_blocked_under_agent_fast() {
    let (session, transport) = fake_session().await;
    session
        .set_request_interception_mode(InterceptionMode::AgentFast)
        .await
        .unwrap();

    transport.push_event(
        "Fetch.requestPaused",
        json!({ "requestId": "r1", "resourceType": "Image" }),
    );
    transport.push_event(
        "Fetch.requestPaused",
        json!({ "requestId": "r2", "resourceType": "Script" }),
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let methods = transport.sent_methods();
    assert!(methods.contains(&"Fetch.failRequest".to_string()));
    assert!(methods.contains(&"Fetch.continueRequest".to_string()));

    let metrics = session.interception_metrics();
    assert_eq!(metrics.blocked_total, 1);
    assert_eq!(metrics.blocked_by_classification["Image"], 1);
    session.close().await;
}

#[tokio::test]
async fn visual_render_pass_restores_prior_mode_once() {
    let (session, _transport) = fake_session().await;
    session
        .set_request_interception_mode(InterceptionMode::AgentFast)
        .await
        .unwrap();

    let captured_mode = session
        .with_visual_render_pass(|| async {
            Ok::<_, ControlError>(session.interception_mode())
        })
        .await
        .unwrap();
    assert_eq!(captured_mode, InterceptionMode::VisualRender);
    assert_eq!(session.interception_mode(), InterceptionMode::AgentFast);
    assert_eq!(session.interception_metrics().visual_render_pass_count, 1);
    session.close().await;
}

#[tokio::test]
async fn cache_policy_set_get_round_trips() {
    let (session, _transport) = fake_session().await;
    let policy = HttpCachePolicy::OverrideTtl { ttl_ms: 2_000 };
    session.set_http_cache_policy(policy).await.unwrap();
    assert_eq!(session.http_cache_policy(), policy);

    let err = session
        .set_http_cache_policy(HttpCachePolicy::OverrideTtl { ttl_ms: 0 })
        .await;
    assert!(err.is_err());
    session.close().await;
}

#[tokio::test]
async fn force_refresh_disables_cache_on_navigate() {
    let (session, transport) = fake_session().await;
    session
        .set_http_cache_policy(HttpCachePolicy::ForceRefresh)
        .await
        .unwrap();
    session.navigate("https://cache.test/", 2_000).await.unwrap();

    let disable = transport
        .sent()
        .into_iter()
        .filter(|c| c.method == "Network.setCacheDisabled")
        .last()
        .unwrap();
    assert_eq!(disable.params["cacheDisabled"], true);
    session.close().await;
}

#[tokio::test]
async fn full_page_screenshot_truncates_at_step_cap() {
    let (session, transport) = fake_session().await;
    transport.script_response(
        "Page.getLayoutMetrics",
        json!({ "cssContentSize": { "width": 1280, "height": 2700 } }),
    );

    let shot = session
        .capture_screenshot(&ScreenshotRequest {
            mode: ScreenshotMode::FullPage,
            quality: 60,
            from_surface: None,
            max_scroll_steps: Some(1),
        })
        .await
        .unwrap();
    assert!(shot.truncated);
    assert_eq!(shot.scroll_steps, 1);
    assert_eq!(shot.captured_segments, 1);
    assert_eq!(shot.mime, "image/jpeg");
    session.close().await;
}

#[tokio::test]
async fn cache_policy_is_partitioned_per_context() {
    let host = FakeHost::new();
    let ctx1 = ContextId::slot(1);
    let ctx2 = ContextId::slot(2);
    let session1 = host.warm(&ControlConfig::default(), &ctx1).await.unwrap();
    let session2 = host.warm(&ControlConfig::default(), &ctx2).await.unwrap();

    session1
        .set_http_cache_policy(HttpCachePolicy::ForceRefresh)
        .await
        .unwrap();
    session2
        .set_http_cache_policy(HttpCachePolicy::OverrideTtl { ttl_ms: 2_000 })
        .await
        .unwrap();

    // Each context keeps its own policy and its own freshness book.
    assert_eq!(session1.http_cache_policy(), HttpCachePolicy::ForceRefresh);
    assert_eq!(
        session2.http_cache_policy(),
        HttpCachePolicy::OverrideTtl { ttl_ms: 2_000 }
    );

    session1.navigate("https://cache.test/page", 2_000).await.unwrap();
    session2.navigate("https://cache.test/page", 2_000).await.unwrap();

    let transport1 = host.transport_for(&ctx1).unwrap();
    let transport2 = host.transport_for(&ctx2).unwrap();
    let bypass = |transport: &std::sync::Arc<FakeTransport>| {
        transport
            .sent()
            .into_iter()
            .filter(|c| c.method == "Network.setCacheDisabled")
            .last()
            .map(|c| c.params["cacheDisabled"] == true)
            .unwrap()
    };
    assert!(bypass(&transport1), "FORCE_REFRESH context must bypass");
    assert!(
        !bypass(&transport2),
        "OVERRIDE_TTL context within ttl must reuse"
    );

    session1.close().await;
    session2.close().await;
}

#[tokio::test]
async fn prefetch_skips_non_http_schemes() {
    let (session, _transport) = fake_session().await;
    let outcome = session.prefetch("javascript:alert(1)").await.unwrap();
    assert_eq!(outcome.status, PrefetchStatus::Skipped);

    let outcome = session.prefetch("https://example.test/next").await.unwrap();
    assert_eq!(outcome.status, PrefetchStatus::Prefetched);
    assert_eq!(outcome.normalized_url, "https://example.test/next");
    session.close().await;
}

#[tokio::test]
async fn network_trace_collects_connection_ids() {
    let (session, _transport) = fake_session().await;
    let ((), trace) = session
        .trace_network_connections(
            || async {
                session.navigate("https://traced.test/", 2_000).await?;
                Ok(())
            },
            50,
        )
        .await
        .unwrap();
    assert!(!trace.entries.is_empty());
    assert_eq!(trace.unique_connection_ids, vec![17]);
    session.close().await;
}

#[tokio::test]
async fn ax_extraction_prunes_and_indexes() {
    let (session, transport) = fake_session().await;
    transport.script_response(
        "Accessibility.getFullAXTree",
        json!({
            "nodes": [
                { "nodeId": "1", "role": { "value": "RootWebArea" }, "name": { "value": "page" },
                  "childIds": ["2", "3"] },
                { "nodeId": "2", "role": { "value": "generic" }, "name": { "value": "" },
                  "childIds": [] },
                { "nodeId": "3", "role": { "value": "searchbox" }, "name": { "value": "Search" },
                  "childIds": [], "backendDOMNodeId": 11 },
            ]
        }),
    );

    let result = session
        .extract_interactive_element_index(30_000, false)
        .await
        .unwrap();
    assert_eq!(result.tree.raw_count, 3);
    assert_eq!(result.tree.normalized_count, 2);
    assert_eq!(result.index.len(), 1);
    assert_eq!(result.index[0].name, "Search");
    assert!(result.index_char_count < result.tree.normalized_char_count);
    session.close().await;
}

#[tokio::test]
async fn deficiency_signals_decode() {
    let (session, _transport) = fake_session().await;
    let signals = session.get_ax_deficiency_signals().await.unwrap();
    assert!(signals.is_load_complete);
    assert!(signals.has_significant_visual_content);
    assert_eq!(signals.dom_interactive_candidate_count, 10);
    session.close().await;
}
