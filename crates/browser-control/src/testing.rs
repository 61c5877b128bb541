//! In-process fake CDP host.
//!
//! `FakeTransport` answers commands from scripted queues with sensible
//! protocol defaults, auto-commits navigations, and lets tests inject
//! protocol events (crashes, mutations, paused requests). `FakeHost`
//! warms whole sessions for pool and scheduler tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ghostpilot_core_types::ContextId;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::config::ControlConfig;
use crate::errors::ControlError;
use crate::session::GhostSession;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

/// A command observed by the fake host.
#[derive(Clone, Debug)]
pub struct RecordedCommand {
    pub method: String,
    pub params: Value,
}

type EvalHook = dyn Fn(&str) -> Option<Value> + Send + Sync;

pub struct FakeTransport {
    alive: AtomicBool,
    auto_commit_navigation: AtomicBool,
    commands: Mutex<Vec<RecordedCommand>>,
    one_shot: RwLock<HashMap<String, VecDeque<Result<Value, ControlError>>>>,
    sticky: RwLock<HashMap<String, Value>>,
    eval_hook: RwLock<Option<Box<EvalHook>>>,
    last_url: RwLock<String>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            alive: AtomicBool::new(true),
            auto_commit_navigation: AtomicBool::new(true),
            commands: Mutex::new(Vec::new()),
            one_shot: RwLock::new(HashMap::new()),
            sticky: RwLock::new(HashMap::new()),
            eval_hook: RwLock::new(None),
            last_url: RwLock::new("about:blank".into()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
        })
    }

    /// Inject a protocol event as if the browser emitted it.
    pub fn push_event(&self, method: &str, params: Value) {
        let _ = self.events_tx.send(TransportEvent {
            method: method.to_string(),
            params,
            session_id: None,
        });
    }

    /// Queue a one-shot response for a method.
    pub fn enqueue_response(&self, method: &str, response: Result<Value, ControlError>) {
        self.one_shot
            .write()
            .entry(method.to_string())
            .or_default()
            .push_back(response);
    }

    /// Install a sticky response for a method.
    pub fn script_response(&self, method: &str, response: Value) {
        self.sticky.write().insert(method.to_string(), response);
    }

    /// Answer `Runtime.evaluate` expressions; return None to fall back
    /// to the built-in defaults.
    pub fn set_eval_hook<F>(&self, hook: F)
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        *self.eval_hook.write() = Some(Box::new(hook));
    }

    pub fn set_auto_commit_navigation(&self, enabled: bool) {
        self.auto_commit_navigation.store(enabled, Ordering::Relaxed);
    }

    pub fn sent(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.commands.lock().iter().map(|c| c.method.clone()).collect()
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    fn default_response(&self, method: &str, params: &Value) -> Value {
        match method {
            "Target.createTarget" => json!({ "targetId": "fake-target" }),
            "Target.attachToTarget" => json!({ "sessionId": "fake-session" }),
            "Page.navigate" => {
                let url = params["url"].as_str().unwrap_or("about:blank").to_string();
                *self.last_url.write() = url.clone();
                if self.auto_commit_navigation.load(Ordering::Relaxed) {
                    self.push_event(
                        "Network.requestWillBeSent",
                        json!({
                            "requestId": "req-main",
                            "type": "Document",
                            "request": { "url": url },
                        }),
                    );
                    self.push_event(
                        "Network.responseReceived",
                        json!({
                            "requestId": "req-main",
                            "response": { "url": url, "status": 200, "connectionId": 17 },
                        }),
                    );
                    self.push_event(
                        "Page.frameNavigated",
                        json!({ "frame": { "id": "main", "url": url } }),
                    );
                    self.push_event("Page.loadEventFired", json!({}));
                }
                json!({ "frameId": "main" })
            }
            "Page.crash" => {
                self.push_event("Inspector.targetCrashed", json!({}));
                json!({})
            }
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or("");
                let value = self.evaluate_default(expression);
                json!({ "result": { "value": value } })
            }
            "Accessibility.getFullAXTree" => json!({ "nodes": [] }),
            "Page.captureScreenshot" => json!({ "data": "ZmFrZS1qcGVn" }),
            "Page.getLayoutMetrics" => json!({
                "cssContentSize": { "width": 1280, "height": 900 }
            }),
            _ => json!({}),
        }
    }

    fn evaluate_default(&self, expression: &str) -> Value {
        if let Some(hook) = self.eval_hook.read().as_ref() {
            if let Some(value) = hook(expression) {
                return value;
            }
        }
        if expression.contains("__ghostDomFingerprint") {
            return Value::String("fp-stable".into());
        }
        if expression.contains("__ghostMutations") {
            return Value::String(
                r#"{"addedRemoved":0,"interactiveRoleMutations":0,"childList":0,"attribute":0}"#
                    .into(),
            );
        }
        if expression.contains("location.href") {
            return Value::String(self.last_url.read().clone());
        }
        if expression.contains("readyState") {
            return Value::String(
                json!({
                    "readyState": "complete",
                    "isLoadComplete": true,
                    "hasSignificantVisualContent": true,
                    "visibleElementCount": 50,
                    "textCharCount": 2000,
                    "mediaElementCount": 2,
                    "domInteractiveCandidateCount": 10,
                })
                .to_string(),
            );
        }
        if expression.contains("querySelectorAll") {
            return Value::String("[]".into());
        }
        Value::Null
    }
}

#[async_trait]
impl CdpTransport for FakeTransport {
    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        params: Value,
        _deadline: Duration,
    ) -> Result<Value, ControlError> {
        if !self.is_alive() {
            return Err(ControlError::TargetClosed("fake transport killed".into()));
        }
        self.commands.lock().push(RecordedCommand {
            method: method.to_string(),
            params: params.clone(),
        });

        if let Some(queue) = self.one_shot.write().get_mut(method) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        if let Some(response) = self.sticky.read().get(method) {
            return Ok(response.clone());
        }
        Ok(self.default_response(method, &params))
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn shutdown(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

/// How sessions are warmed; the pool calls this per slot.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn warm(
        &self,
        cfg: &ControlConfig,
        context: &ContextId,
    ) -> Result<GhostSession, ControlError>;
}

/// Production factory: discover the host endpoint and attach by
/// fragment marker.
pub struct RemoteHostFactory;

#[async_trait]
impl SessionFactory for RemoteHostFactory {
    async fn warm(
        &self,
        cfg: &ControlConfig,
        context: &ContextId,
    ) -> Result<GhostSession, ControlError> {
        GhostSession::connect(cfg.clone(), context.clone()).await
    }
}

/// Fake host for pool and scheduler tests: every warm call builds a
/// session over a fresh `FakeTransport`.
pub struct FakeHost {
    transports: Mutex<Vec<(ContextId, Arc<FakeTransport>)>>,
    warm_failures: AtomicUsize,
    warm_count: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(Vec::new()),
            warm_failures: AtomicUsize::new(0),
            warm_count: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` warm attempts fail.
    pub fn fail_next_warms(&self, n: usize) {
        self.warm_failures.store(n, Ordering::Relaxed);
    }

    pub fn warm_count(&self) -> usize {
        self.warm_count.load(Ordering::Relaxed)
    }

    /// Latest transport warmed for a context.
    pub fn transport_for(&self, context: &ContextId) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .iter()
            .rev()
            .find(|(ctx, _)| ctx == context)
            .map(|(_, transport)| transport.clone())
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            transports: Mutex::new(Vec::new()),
            warm_failures: AtomicUsize::new(0),
            warm_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionFactory for FakeHost {
    async fn warm(
        &self,
        cfg: &ControlConfig,
        context: &ContextId,
    ) -> Result<GhostSession, ControlError> {
        self.warm_count.fetch_add(1, Ordering::Relaxed);
        let remaining = self.warm_failures.load(Ordering::Relaxed);
        if remaining > 0 {
            self.warm_failures.store(remaining - 1, Ordering::Relaxed);
            return Err(ControlError::Protocol("scripted warm failure".into()));
        }

        let transport = FakeTransport::new();
        self.transports
            .lock()
            .push((context.clone(), transport.clone()));
        GhostSession::attach(
            transport,
            cfg.clone(),
            context.clone(),
            Some("fake-target".into()),
            None,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_transport_answers_defaults() {
        let transport = FakeTransport::new();
        let response = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({}),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(response["sessionId"], "fake-session");
    }

    #[tokio::test]
    async fn one_shot_responses_drain_in_order() {
        let transport = FakeTransport::new();
        transport.enqueue_response("X.y", Ok(json!({ "n": 1 })));
        transport.enqueue_response("X.y", Ok(json!({ "n": 2 })));
        for expected in [1, 2] {
            let response = transport
                .send_command(CommandTarget::Browser, "X.y", json!({}), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(response["n"], expected);
        }
        // queue exhausted, defaults take over
        let response = transport
            .send_command(CommandTarget::Browser, "X.y", json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, json!({}));
    }

    #[tokio::test]
    async fn fake_host_warms_sessions() {
        let host = FakeHost::new();
        let session = host
            .warm(&ControlConfig::default(), &ContextId::slot(0))
            .await
            .unwrap();
        assert_eq!(session.context_id().as_str(), "ctx-0");
        assert!(host.transport_for(&ContextId::slot(0)).is_some());
        session.close().await;
    }

    #[tokio::test]
    async fn scripted_warm_failure_surfaces() {
        let host = FakeHost::new();
        host.fail_next_warms(1);
        assert!(host
            .warm(&ControlConfig::default(), &ContextId::slot(1))
            .await
            .is_err());
        assert!(host
            .warm(&ControlConfig::default(), &ContextId::slot(1))
            .await
            .is_ok());
    }
}
