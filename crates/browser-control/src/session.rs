//! The typed ghost-context session.
//!
//! One `GhostSession` owns one attached CDP target. A background event
//! pump consumes transport events and maintains navigation state, crash
//! observations, interception verdicts, and the network trace; the
//! typed operations below suspend on the command channel and read that
//! shared state.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::async_process::Child;
use ghostpilot_core_types::{Action, ContextId, NetworkErrorType};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache_policy::{CachePolicyState, HttpCachePolicy};
use crate::config::ControlConfig;
use crate::crash::CrashEvent;
use crate::discovery;
use crate::errors::ControlError;
use crate::interception::{InterceptionMetrics, InterceptionMode, InterceptionState};
use crate::metrics;
use crate::model::{ExecutionResult, ExecutionStatus, MutationSummary};
use crate::trace::{NetworkTrace, TraceCollector, TraceEntry, TracePhase};
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// Script installed on every new document: mutation counters plus a
/// cheap top-level DOM fingerprint.
const OBSERVER_SCRIPT: &str = r#"(() => {
  if (window.__ghostMutations) return;
  const counters = { addedRemoved: 0, interactiveRoleMutations: 0, childList: 0, attribute: 0 };
  window.__ghostMutations = counters;
  const INTERACTIVE = new Set(['BUTTON', 'A', 'INPUT', 'SELECT', 'TEXTAREA']);
  const counts = (node) =>
    node.nodeType === 1 && (INTERACTIVE.has(node.tagName) || node.hasAttribute('role'));
  const observer = new MutationObserver((records) => {
    for (const record of records) {
      if (record.type === 'childList') {
        counters.childList += 1;
        counters.addedRemoved += record.addedNodes.length + record.removedNodes.length;
        for (const n of record.addedNodes) if (counts(n)) counters.interactiveRoleMutations += 1;
        for (const n of record.removedNodes) if (counts(n)) counters.interactiveRoleMutations += 1;
      } else if (record.type === 'attributes') {
        counters.attribute += 1;
        if (record.attributeName === 'role') counters.interactiveRoleMutations += 1;
      }
    }
  });
  const start = () =>
    observer.observe(document.documentElement, { subtree: true, childList: true, attributes: true });
  if (document.documentElement) start();
  else document.addEventListener('DOMContentLoaded', start);
  window.__ghostDomFingerprint = () => {
    const body = document.body;
    if (!body) return 'empty';
    let sig = body.childElementCount + ':';
    for (const child of body.children) sig += child.tagName + '.' + child.childElementCount + ';';
    return sig;
  };
})()"#;

#[derive(Default)]
struct NavState {
    current_url: String,
    load_complete: bool,
    last_net_error: Option<String>,
    last_status: Option<u16>,
    main_request_id: Option<String>,
}

pub(crate) struct SessionShared {
    pub context: ContextId,
    pub cfg: ControlConfig,
    pub transport: Arc<dyn CdpTransport>,
    cdp_session: RwLock<Option<String>>,
    target_id: RwLock<Option<String>>,
    nav: Mutex<NavState>,
    commit_seq: AtomicU64,
    commit_notify: Notify,
    pub interception: InterceptionState,
    pub cache_policy: CachePolicyState,
    pub trace: TraceCollector,
    crash: RwLock<Option<CrashEvent>>,
}

impl SessionShared {
    pub(crate) async fn send(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, ControlError> {
        let target = match self.cdp_session.read().clone() {
            Some(session) => CommandTarget::Session(session),
            None => CommandTarget::Browser,
        };
        metrics::record_command();
        self.transport
            .send_command(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.default_deadline_ms),
            )
            .await
    }

    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, ControlError> {
        metrics::record_command();
        self.transport
            .send_command(
                CommandTarget::Browser,
                method,
                params,
                Duration::from_millis(self.cfg.default_deadline_ms),
            )
            .await
    }

    fn record_crash(&self, event: CrashEvent) {
        let source = format!("{:?}", event.source);
        let mut guard = self.crash.write();
        if guard.is_none() {
            metrics::record_crash(&source);
            *guard = Some(event);
        }
    }
}

/// A typed session over one ghost-context target.
pub struct GhostSession {
    shared: Arc<SessionShared>,
    pump: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
}

impl GhostSession {
    /// Connect to the host's debugging endpoint and attach to the
    /// target carrying this context's fragment marker.
    pub async fn connect(cfg: ControlConfig, context: ContextId) -> Result<Self, ControlError> {
        let ws_url = discovery::browser_ws_url(&cfg).await?;
        let transport: Arc<dyn CdpTransport> = Arc::new(
            ChromiumTransport::connect(
                &ws_url,
                Duration::from_millis(cfg.heartbeat_interval_ms),
            )
            .await?,
        );
        let target_id = discovery::find_target_id(&cfg, &context.fragment_marker()).await?;
        Self::attach(transport, cfg, context, Some(target_id), None).await
    }

    /// Launch a local browser, open a tab carrying the fragment marker,
    /// and attach. Development fallback when no host is running.
    pub async fn launch_local(cfg: ControlConfig, context: ContextId) -> Result<Self, ControlError> {
        let (child, ws_url) = discovery::launch_local(&cfg).await?;
        let transport: Arc<dyn CdpTransport> = Arc::new(
            ChromiumTransport::connect(
                &ws_url,
                Duration::from_millis(cfg.heartbeat_interval_ms),
            )
            .await?,
        );
        let session = Self::attach(transport, cfg, context, None, Some(child)).await?;
        Ok(session)
    }

    /// Attach over an existing transport. Tests inject a fake transport
    /// here; production goes through [`GhostSession::connect`].
    pub async fn attach(
        transport: Arc<dyn CdpTransport>,
        cfg: ControlConfig,
        context: ContextId,
        known_target: Option<String>,
        child: Option<Child>,
    ) -> Result<Self, ControlError> {
        let shared = Arc::new(SessionShared {
            context: context.clone(),
            cfg,
            transport,
            cdp_session: RwLock::new(None),
            target_id: RwLock::new(None),
            nav: Mutex::new(NavState::default()),
            commit_seq: AtomicU64::new(0),
            commit_notify: Notify::new(),
            interception: InterceptionState::default(),
            cache_policy: CachePolicyState::default(),
            trace: TraceCollector::default(),
            crash: RwLock::new(None),
        });

        let target_id = match known_target {
            Some(id) => id,
            None => {
                // Create a fresh tab carrying the fragment marker.
                let created = shared
                    .send_browser(
                        "Target.createTarget",
                        json!({ "url": format!("about:blank{}", context.fragment_marker()) }),
                    )
                    .await?;
                created
                    .get("targetId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ControlError::Protocol("createTarget without targetId".into()))?
            }
        };

        let attached = shared
            .send_browser(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ControlError::Protocol("attachToTarget without sessionId".into()))?;

        *shared.cdp_session.write() = Some(session_id);
        *shared.target_id.write() = Some(target_id);

        let session = Self {
            shared: shared.clone(),
            pump: Mutex::new(None),
            child: Mutex::new(child),
        };
        session.enable_domains().await?;
        session.start_pump();
        info!(
            target: "ghost-session",
            context = %shared.context,
            "session attached"
        );
        Ok(session)
    }

    async fn enable_domains(&self) -> Result<(), ControlError> {
        for method in ["Page.enable", "Runtime.enable", "Network.enable", "DOM.enable"] {
            self.shared.send(method, json!({})).await?;
        }
        // Accessibility has no events; enabling keeps the full tree warm.
        let _ = self.shared.send("Accessibility.enable", json!({})).await;
        self.shared
            .send(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": self.shared.cfg.viewport_width,
                    "height": self.shared.cfg.viewport_height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            )
            .await?;
        self.shared
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": OBSERVER_SCRIPT }),
            )
            .await?;
        // Cover the document that was already loaded at attach time.
        let _ = self
            .shared
            .send(
                "Runtime.evaluate",
                json!({ "expression": OBSERVER_SCRIPT, "returnByValue": false }),
            )
            .await;
        Ok(())
    }

    fn start_pump(&self) {
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = shared.transport.next_event().await {
                pump_event(&shared, event).await;
            }
            shared.record_crash(CrashEvent::target_closed());
            debug!(target: "ghost-session", context = %shared.context, "event pump ended");
        });
        *self.pump.lock() = Some(handle);
    }

    pub fn context_id(&self) -> &ContextId {
        &self.shared.context
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Navigate and wait for the main-document commit.
    pub async fn navigate(&self, url: &str, timeout_ms: u64) -> Result<(), ControlError> {
        self.ensure_alive()?;

        let bypass = self.shared.cache_policy.bypass_cache(url);
        self.shared
            .send("Network.setCacheDisabled", json!({ "cacheDisabled": bypass }))
            .await?;

        let seq_before = self.shared.commit_seq.load(Ordering::Acquire);
        {
            let mut nav = self.shared.nav.lock();
            nav.load_complete = false;
            nav.last_net_error = None;
            nav.last_status = None;
            nav.main_request_id = None;
        }

        let response = self.shared.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                metrics::record_navigation("error");
                return Err(classify_net_error(error_text, url));
            }
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if self.shared.commit_seq.load(Ordering::Acquire) > seq_before {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                metrics::record_navigation("timeout");
                return Err(ControlError::Network {
                    error_type: NetworkErrorType::Timeout,
                    status: None,
                    url: Some(url.to_string()),
                    message: format!("no commit within {timeout_ms} ms"),
                });
            }
            let notified = self.shared.commit_notify.notified();
            if tokio::time::timeout(remaining.min(Duration::from_millis(100)), notified)
                .await
                .is_err()
            {
                continue;
            }
        }

        let (net_error, status) = {
            let nav = self.shared.nav.lock();
            (nav.last_net_error.clone(), nav.last_status)
        };
        if let Some(error_text) = net_error {
            metrics::record_navigation("error");
            return Err(classify_net_error(&error_text, url));
        }
        if let Some(status) = status {
            if status >= 400 {
                metrics::record_navigation("http_error");
                let error_type = NetworkErrorType::from_status(status)
                    .unwrap_or(NetworkErrorType::Http5xx);
                return Err(ControlError::network_with_status(
                    error_type,
                    status,
                    url,
                    format!("document responded {status}"),
                ));
            }
        }

        metrics::record_navigation("committed");
        Ok(())
    }

    /// Has the current document fired its load event?
    pub fn load_complete(&self) -> bool {
        self.shared.nav.lock().load_complete
    }

    pub async fn get_current_url(&self) -> Result<String, ControlError> {
        let url = self.shared.nav.lock().current_url.clone();
        if !url.is_empty() {
            return Ok(url);
        }
        let value = self
            .evaluate("window.location.href", true)
            .await?;
        Ok(value.as_str().unwrap_or("about:blank").to_string())
    }

    /// Run an expression in the page, optionally returning its value.
    pub async fn evaluate(
        &self,
        expression: &str,
        return_by_value: bool,
    ) -> Result<Value, ControlError> {
        self.ensure_alive()?;
        let response = self
            .shared
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": return_by_value,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(exception) = response.get("exceptionDetails") {
            let text = exception
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("evaluation threw");
            return Err(ControlError::Runtime(text.to_string()));
        }
        Ok(response
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Hash of the page's top-level structure; cache key component.
    pub async fn dom_fingerprint(&self) -> Result<u64, ControlError> {
        let value = self
            .evaluate(
                "window.__ghostDomFingerprint ? window.__ghostDomFingerprint() : ''",
                true,
            )
            .await?;
        let text = value.as_str().unwrap_or("");
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Ok(hasher.finish())
    }

    /// Read the observer's mutation counters.
    pub async fn mutation_counters(&self) -> Result<MutationSummary, ControlError> {
        let value = self
            .evaluate(
                "window.__ghostMutations ? JSON.stringify(window.__ghostMutations) : '{}'",
                true,
            )
            .await?;
        let text = value.as_str().unwrap_or("{}");
        serde_json::from_str(text)
            .map_err(|err| ControlError::Runtime(format!("bad mutation counters: {err}")))
    }

    /// Execute a validated action and settle.
    pub async fn execute_action(
        &self,
        action: &Action,
        settle_timeout_ms: Option<u64>,
    ) -> Result<ExecutionResult, ControlError> {
        self.ensure_alive()?;

        match action {
            Action::Done { text } => {
                let mut result =
                    ExecutionResult::acted(self.get_current_url().await.unwrap_or_default());
                result.status = ExecutionStatus::Done;
                result.message = Some(text.clone());
                return Ok(result);
            }
            Action::Failed { reason } => {
                let mut result =
                    ExecutionResult::acted(self.get_current_url().await.unwrap_or_default());
                result.status = ExecutionStatus::Failed;
                result.message = Some(reason.clone());
                return Ok(result);
            }
            _ => {}
        }

        let seq_before = self.shared.commit_seq.load(Ordering::Acquire);
        let counters_before = self.mutation_counters().await.unwrap_or_default();

        let mut extracted = None;
        match action {
            Action::Click { target } => {
                for event_type in ["mousePressed", "mouseReleased"] {
                    self.shared
                        .send(
                            "Input.dispatchMouseEvent",
                            json!({
                                "type": event_type,
                                "x": target.x,
                                "y": target.y,
                                "button": "left",
                                "clickCount": 1,
                            }),
                        )
                        .await?;
                }
            }
            Action::Type { text } => {
                self.shared
                    .send("Input.insertText", json!({ "text": text }))
                    .await?;
            }
            Action::PressKey { key } => {
                self.dispatch_key(key).await?;
            }
            Action::Scroll { pixels } => {
                let cx = f64::from(self.shared.cfg.viewport_width) / 2.0;
                let cy = f64::from(self.shared.cfg.viewport_height) / 2.0;
                self.shared
                    .send(
                        "Input.dispatchMouseEvent",
                        json!({
                            "type": "mouseWheel",
                            "x": cx,
                            "y": cy,
                            "deltaX": 0,
                            "deltaY": pixels,
                        }),
                    )
                    .await?;
            }
            Action::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            Action::Extract { expression } => {
                extracted = Some(self.evaluate(expression, true).await?);
            }
            Action::Done { .. } | Action::Failed { .. } => unreachable!("handled above"),
        }

        let settle_ms = settle_timeout_ms.unwrap_or(self.shared.cfg.settle_timeout_ms);
        let needs_settle = matches!(
            action,
            Action::Click { .. } | Action::Type { .. } | Action::PressKey { .. } | Action::Scroll { .. }
        );

        let (navigated, summary) = if needs_settle {
            self.settle(seq_before, &counters_before, settle_ms).await
        } else {
            (false, MutationSummary::default())
        };

        if let Some(crash) = self.get_last_crash_event() {
            return Err(match crash.source {
                crate::crash::CrashSource::RendererCrash => {
                    ControlError::RendererCrash("renderer crashed during action".into())
                }
                _ => ControlError::TargetClosed("target closed during action".into()),
            });
        }

        Ok(ExecutionResult {
            status: ExecutionStatus::Acted,
            current_url: self.get_current_url().await.unwrap_or_default(),
            navigation_observed: navigated,
            dom_mutation_observed: summary.any(),
            significant_dom_mutation_observed: summary.significant(),
            mutation_summary: summary,
            extracted_data: extracted,
            message: None,
        })
    }

    /// Wait for navigation, a significant mutation, or quiescence.
    async fn settle(
        &self,
        seq_before: u64,
        counters_before: &MutationSummary,
        settle_ms: u64,
    ) -> (bool, MutationSummary) {
        let deadline = Instant::now() + Duration::from_millis(settle_ms);
        let quiescence = Duration::from_millis(self.shared.cfg.quiescence_ms);
        let mut last_change = Instant::now();
        let mut last_summary = MutationSummary::default();

        loop {
            if self.shared.commit_seq.load(Ordering::Acquire) > seq_before {
                // Navigation resets in-page counters with the document.
                return (true, last_summary);
            }

            let now_summary = match self.mutation_counters().await {
                Ok(counters) => counters.delta_since(counters_before),
                Err(_) => last_summary,
            };
            if now_summary.significant() {
                return (false, now_summary);
            }
            if now_summary != last_summary {
                last_change = Instant::now();
                last_summary = now_summary;
            }

            if last_change.elapsed() >= quiescence || Instant::now() >= deadline {
                return (false, last_summary);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn dispatch_key(&self, key: &str) -> Result<(), ControlError> {
        let (code, text) = key_code(key);
        let mut down = json!({
            "type": if text.is_some() { "keyDown" } else { "rawKeyDown" },
            "key": key,
            "windowsVirtualKeyCode": code,
            "nativeVirtualKeyCode": code,
        });
        if let Some(text) = text {
            down["text"] = Value::String(text.to_string());
        }
        self.shared.send("Input.dispatchKeyEvent", down).await?;
        self.shared
            .send(
                "Input.dispatchKeyEvent",
                json!({
                    "type": "keyUp",
                    "key": key,
                    "windowsVirtualKeyCode": code,
                    "nativeVirtualKeyCode": code,
                }),
            )
            .await?;
        Ok(())
    }

    /// Interception policy. AGENT_FAST arms the Fetch domain so the
    /// pump can veto paused requests.
    pub async fn set_request_interception_mode(
        &self,
        mode: InterceptionMode,
    ) -> Result<(), ControlError> {
        match mode {
            InterceptionMode::AgentFast => {
                self.shared
                    .send(
                        "Fetch.enable",
                        json!({ "patterns": [{ "urlPattern": "*" }] }),
                    )
                    .await?;
            }
            InterceptionMode::VisualRender => {
                let _ = self.shared.send("Fetch.disable", json!({})).await;
            }
        }
        self.shared.interception.set_mode(mode);
        Ok(())
    }

    pub fn interception_mode(&self) -> InterceptionMode {
        self.shared.interception.mode()
    }

    pub fn interception_metrics(&self) -> InterceptionMetrics {
        self.shared.interception.metrics()
    }

    /// Temporarily reinstate VISUAL_RENDER, reload previously blocked
    /// subresources, run `f`, and restore the prior mode.
    pub async fn with_visual_render_pass<F, Fut, T>(&self, f: F) -> Result<T, ControlError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ControlError>>,
    {
        let prior = self.interception_mode();
        self.set_request_interception_mode(InterceptionMode::VisualRender)
            .await?;
        let _ = self
            .evaluate(
                "document.querySelectorAll('img').forEach(i => { const s = i.src; i.src = ''; i.src = s; })",
                false,
            )
            .await;
        self.shared.interception.record_visual_render_pass();

        let result = f().await;

        self.set_request_interception_mode(prior).await?;
        result
    }

    pub async fn set_http_cache_policy(
        &self,
        policy: HttpCachePolicy,
    ) -> Result<(), ControlError> {
        self.shared.cache_policy.set_policy(policy)?;
        if policy == HttpCachePolicy::ForceRefresh {
            let _ = self.shared.send("Network.clearBrowserCache", json!({})).await;
        }
        Ok(())
    }

    pub fn http_cache_policy(&self) -> HttpCachePolicy {
        self.shared.cache_policy.policy()
    }

    /// Capture network events during `f` plus a settle window after.
    pub async fn trace_network_connections<F, Fut, T>(
        &self,
        f: F,
        settle_ms: u64,
    ) -> Result<(T, NetworkTrace), ControlError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ControlError>>,
    {
        self.shared.trace.arm();
        let result = f().await;
        tokio::time::sleep(Duration::from_millis(settle_ms)).await;
        let trace = self.shared.trace.disarm();
        result.map(|value| (value, trace))
    }

    /// Test hook; exercises the same path a spontaneous crash takes.
    pub async fn crash_renderer_for_testing(&self) {
        // Page.crash never acks; the Inspector event arrives instead.
        let _ = tokio::time::timeout(
            Duration::from_millis(500),
            self.shared.send("Page.crash", json!({})),
        )
        .await;
    }

    pub fn get_last_crash_event(&self) -> Option<CrashEvent> {
        self.shared.crash.read().clone()
    }

    /// Browser-level process table; feeds the scheduler's resource
    /// sampler.
    pub async fn process_info(&self) -> Result<Value, ControlError> {
        self.shared
            .send_browser("SystemInfo.getProcessInfo", json!({}))
            .await
    }

    pub async fn close_target(&self) -> Result<(), ControlError> {
        let target_id = self.shared.target_id.read().clone();
        if let Some(target_id) = target_id {
            let _ = self
                .shared
                .send_browser("Target.closeTarget", json!({ "targetId": target_id }))
                .await;
        }
        Ok(())
    }

    /// Tear down the transport. Idempotent.
    pub async fn close(&self) {
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        self.shared.transport.shutdown();
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            tokio::spawn(async move {
                if let Err(err) = child.kill().await {
                    warn!(target: "ghost-session", %err, "failed to kill local browser");
                }
            });
        }
    }

    fn ensure_alive(&self) -> Result<(), ControlError> {
        if let Some(crash) = self.get_last_crash_event() {
            return Err(match crash.source {
                crate::crash::CrashSource::RendererCrash => {
                    ControlError::RendererCrash("session invalidated by crash".into())
                }
                _ => ControlError::TargetClosed("session invalidated".into()),
            });
        }
        if !self.shared.transport.is_alive() {
            return Err(ControlError::TargetClosed("transport is down".into()));
        }
        Ok(())
    }
}

/// Classify Chromium net error strings into the navigation taxonomy.
fn classify_net_error(error_text: &str, url: &str) -> ControlError {
    let error_type = if error_text.contains("ERR_NAME_NOT_RESOLVED")
        || error_text.contains("ERR_NAME_RESOLUTION_FAILED")
        || error_text.contains("ERR_DNS")
    {
        NetworkErrorType::DnsFailure
    } else if error_text.contains("ERR_CONNECTION_RESET")
        || error_text.contains("ERR_CONNECTION_CLOSED")
        || error_text.contains("ERR_CONNECTION_REFUSED")
    {
        NetworkErrorType::ConnectionReset
    } else if error_text.contains("ERR_TIMED_OUT") || error_text.contains("TIMEOUT") {
        NetworkErrorType::Timeout
    } else {
        NetworkErrorType::ConnectionReset
    };
    ControlError::Network {
        error_type,
        status: None,
        url: Some(url.to_string()),
        message: error_text.to_string(),
    }
}

async fn pump_event(shared: &Arc<SessionShared>, event: TransportEvent) {
    match event.method.as_str() {
        "Page.frameNavigated" => {
            let frame = &event.params["frame"];
            let is_main = frame.get("parentId").is_none();
            if is_main {
                if let Some(url) = frame.get("url").and_then(Value::as_str) {
                    shared.nav.lock().current_url = url.to_string();
                }
                shared.commit_seq.fetch_add(1, Ordering::AcqRel);
                shared.commit_notify.notify_waiters();
            }
        }
        "Page.navigatedWithinDocument" => {
            if let Some(url) = event.params.get("url").and_then(Value::as_str) {
                shared.nav.lock().current_url = url.to_string();
            }
            shared.commit_seq.fetch_add(1, Ordering::AcqRel);
            shared.commit_notify.notify_waiters();
        }
        "Page.loadEventFired" => {
            shared.nav.lock().load_complete = true;
        }
        "Inspector.targetCrashed" => {
            shared.record_crash(CrashEvent::renderer());
            shared.commit_notify.notify_waiters();
        }
        "Target.detachedFromTarget" => {
            shared.record_crash(CrashEvent::target_closed());
            shared.commit_notify.notify_waiters();
        }
        "Fetch.requestPaused" => {
            let request_id = event.params["requestId"].as_str().unwrap_or_default().to_string();
            let resource_type = event.params["resourceType"].as_str().unwrap_or_default();
            if shared.interception.should_block(resource_type) {
                metrics::record_blocked_request(resource_type);
                let _ = shared
                    .send(
                        "Fetch.failRequest",
                        json!({ "requestId": request_id, "errorReason": "BlockedByClient" }),
                    )
                    .await;
            } else {
                let _ = shared
                    .send("Fetch.continueRequest", json!({ "requestId": request_id }))
                    .await;
            }
        }
        "Network.requestWillBeSent" => {
            let request_id = event.params["requestId"].as_str().unwrap_or_default();
            let url = event.params["request"]["url"].as_str().unwrap_or_default();
            if event.params["type"].as_str() == Some("Document") {
                shared.nav.lock().main_request_id = Some(request_id.to_string());
            }
            shared.trace.record(TraceEntry {
                request_id: request_id.to_string(),
                url: url.to_string(),
                connection_id: None,
                phase: TracePhase::RequestSent,
            });
        }
        "Network.responseReceived" => {
            let request_id = event.params["requestId"].as_str().unwrap_or_default();
            let response = &event.params["response"];
            let url = response["url"].as_str().unwrap_or_default();
            let status = response["status"].as_u64().map(|s| s as u16);
            let connection_id = response["connectionId"].as_i64();

            {
                let mut nav = shared.nav.lock();
                if nav.main_request_id.as_deref() == Some(request_id) {
                    nav.last_status = status;
                }
            }
            shared.cache_policy.record_arrival(url);
            shared.trace.record(TraceEntry {
                request_id: request_id.to_string(),
                url: url.to_string(),
                connection_id,
                phase: TracePhase::ResponseReceived,
            });
        }
        "Network.loadingFailed" => {
            let request_id = event.params["requestId"].as_str().unwrap_or_default();
            let error_text = event.params["errorText"].as_str().unwrap_or_default();
            {
                let mut nav = shared.nav.lock();
                if nav.main_request_id.as_deref() == Some(request_id) {
                    nav.last_net_error = Some(error_text.to_string());
                }
            }
            shared.trace.record(TraceEntry {
                request_id: request_id.to_string(),
                url: String::new(),
                connection_id: None,
                phase: TracePhase::Failed,
            });
            shared.commit_notify.notify_waiters();
        }
        _ => {}
    }
}

/// Windows virtual key codes plus committed text for common keys.
fn key_code(key: &str) -> (u32, Option<&'static str>) {
    match key {
        "Enter" => (13, Some("\r")),
        "Tab" => (9, None),
        "Escape" => (27, None),
        "Backspace" => (8, None),
        "Delete" => (46, None),
        "ArrowUp" => (38, None),
        "ArrowDown" => (40, None),
        "ArrowLeft" => (37, None),
        "ArrowRight" => (39, None),
        "PageUp" => (33, None),
        "PageDown" => (34, None),
        "Home" => (36, None),
        "End" => (35, None),
        " " | "Space" => (32, Some(" ")),
        _ => (0, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_error_classification() {
        let err = classify_net_error("net::ERR_NAME_NOT_RESOLVED", "https://no.such.host/");
        assert!(matches!(
            err,
            ControlError::Network {
                error_type: NetworkErrorType::DnsFailure,
                ..
            }
        ));

        let err = classify_net_error("net::ERR_CONNECTION_RESET", "https://a.test/");
        assert!(matches!(
            err,
            ControlError::Network {
                error_type: NetworkErrorType::ConnectionReset,
                ..
            }
        ));

        let err = classify_net_error("net::ERR_TIMED_OUT", "https://a.test/");
        assert!(matches!(
            err,
            ControlError::Network {
                error_type: NetworkErrorType::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn key_codes_cover_submit_keys() {
        assert_eq!(key_code("Enter"), (13, Some("\r")));
        assert_eq!(key_code("Tab").0, 9);
        assert_eq!(key_code("unknown-key").0, 0);
    }
}
