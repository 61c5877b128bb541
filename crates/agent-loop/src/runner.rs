//! The per-task perceive → decide → act loop.

use std::sync::Arc;
use std::time::Duration;

use ghostpilot_browser_control::{ControlError, ExecutionResult, ExecutionStatus, GhostSession};
use ghostpilot_core_types::{
    Action, ActionKind, ErrorKind, ErrorSource, Point, RawDecision, StructuredError,
};
use ghostpilot_event_bus::StatusChannel;
use ghostpilot_perception::{
    classify_deficiency, encode_columnar, CachedDecision, CachedPerception, DeficiencySignals,
    DomCandidate, ObservationCache, ScreenshotMode,
};
use ghostpilot_browser_control::ScreenshotRequest;
use tracing::{debug, info, warn};

use crate::config::TaskCaps;
use crate::context_window::{ContextWindow, HistoryPair};
use crate::engine::{
    DecisionEngine, DecisionMode, DecisionRequest, DecisionResponse, EscalationReason, Tier,
};
use crate::errors::AgentError;
use crate::fingerprint::{ActionFingerprint, RepeatTracker, MAX_FINGERPRINT_REPEATS};
use crate::model::{
    DecisionSource, RefetchReason, RunStatus, StepRecord, StructuredErrorObservation, TaskEvent,
    TaskRunReport, TierUsage,
};
use crate::state_machine::{TaskState, TaskStateMachine};
use crate::subtask::SubtaskTracker;

/// Steps a synthetic Enter stays queued after a TYPE that did not
/// navigate.
const ENTER_HEURISTIC_STEPS: u32 = 2;

pub struct TaskRunner {
    session: Arc<GhostSession>,
    engine: Arc<dyn DecisionEngine>,
    caps: TaskCaps,
    events: StatusChannel<TaskEvent>,
}

struct RunState {
    sm: TaskStateMachine,
    cache: ObservationCache,
    window: ContextWindow,
    tracker: SubtaskTracker,
    repeats: RepeatTracker,
    tier_usage: TierUsage,
    history: Vec<StepRecord>,
    structured_errors: Vec<StructuredErrorObservation>,
    scroll_count: u32,
    no_progress_streak: u32,
    pending_escalation: Option<EscalationReason>,
    synthetic_enter: u32,
    last_action_kind: Option<ActionKind>,
    last_navigation_observed: bool,
    last_significant_mutation: bool,
    emitted_timeline: usize,
}

/// What the decision phase settled on.
struct Resolved {
    decision: RawDecision,
    action: Action,
    source: DecisionSource,
    tier: Tier,
    tiers_attempted: Vec<Tier>,
    decision_cache_hit: bool,
    screenshot_cache_hit: bool,
}

enum Routed {
    Retry(u64),
    Fail(StructuredError),
}

impl TaskRunner {
    pub fn new(
        session: Arc<GhostSession>,
        engine: Arc<dyn DecisionEngine>,
        caps: TaskCaps,
    ) -> Self {
        Self {
            session,
            engine,
            caps,
            events: StatusChannel::default(),
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Drive the session until DONE, FAILED, or the step cap.
    ///
    /// Crashes escape as errors so the scheduler can retry on a fresh
    /// context; every other outcome resolves into a report.
    pub async fn run_task(&self, intent: &str, start_url: &str) -> Result<TaskRunReport, AgentError> {
        let mut run = RunState {
            sm: TaskStateMachine::new(self.events.clone()),
            cache: ObservationCache::new(
                self.session.context_id().clone(),
                Duration::from_millis(self.caps.observation_cache_ttl_ms),
                64,
            ),
            window: ContextWindow::new(),
            tracker: SubtaskTracker::new(self.caps.max_subtask_retries),
            repeats: RepeatTracker::default(),
            tier_usage: TierUsage::default(),
            history: Vec::new(),
            structured_errors: Vec::new(),
            scroll_count: 0,
            no_progress_streak: 0,
            pending_escalation: None,
            synthetic_enter: 0,
            last_action_kind: None,
            last_navigation_observed: false,
            last_significant_mutation: false,
            emitted_timeline: 0,
        };

        run.sm
            .transition(TaskState::Loading, 0, start_url, "navigate to start url", None)?;

        if let Some(error) = self.navigate_with_retries(intent, start_url, &mut run).await? {
            run.sm.transition(
                TaskState::Failed,
                0,
                start_url,
                "start navigation failed",
                Some(error.clone()),
            )?;
            run.sm
                .transition(TaskState::Idle, 0, start_url, "cleanup", None)?;
            return Ok(self.report(run, RunStatus::Failed, start_url.into(), 0, None, Some(error)));
        }

        let mut step = 0;
        while step < self.caps.max_steps {
            step += 1;

            let current_url = self
                .session
                .get_current_url()
                .await
                .map_err(AgentError::from_control)?;
            let enter_reason = if run.sm.state() == TaskState::Loading {
                "navigation committed"
            } else {
                "action settled"
            };
            run.sm
                .transition(TaskState::Perceiving, step, &current_url, enter_reason, None)?;

            // -- perceive ------------------------------------------------
            let refetch_reason = self.refetch_reason(step, &run);
            let fingerprint = self
                .session
                .dom_fingerprint()
                .await
                .map_err(AgentError::from_control)?;
            match refetch_reason {
                RefetchReason::Navigation => run.cache.invalidate_all(),
                RefetchReason::ScrollAction | RefetchReason::SignificantDomMutation => {
                    run.cache.invalidate_url(&current_url)
                }
                _ => {}
            }

            let mut perception_cache_hit = false;
            let perception = if refetch_reason == RefetchReason::None {
                run.cache.get_perception(&current_url, fingerprint)
            } else {
                None
            };
            let perception = match perception {
                Some(hit) => {
                    perception_cache_hit = true;
                    hit
                }
                None => {
                    let extraction = match self
                        .session
                        .extract_interactive_element_index(self.caps.ax_char_budget, true)
                        .await
                    {
                        Ok(extraction) => extraction,
                        Err(err) if err.is_crash() => {
                            return Err(AgentError::Crash(err));
                        }
                        Err(err) => {
                            match self
                                .route_error(intent, ErrorSource::Perception, err, step, &current_url, &mut run)
                                .await?
                            {
                                Routed::Retry(ms) => {
                                    tokio::time::sleep(Duration::from_millis(ms)).await;
                                    run.sm.transition(
                                        TaskState::Inferring,
                                        step,
                                        &current_url,
                                        "perception error routed",
                                        None,
                                    )?;
                                    run.sm.transition(
                                        TaskState::Acting,
                                        step,
                                        &current_url,
                                        "waiting before re-perceiving",
                                        None,
                                    )?;
                                    continue;
                                }
                                Routed::Fail(error) => {
                                    return self.fail(run, step, &current_url, error);
                                }
                            }
                        }
                    };
                    let perception = CachedPerception {
                        index: extraction.index,
                        tree: extraction.tree,
                    };
                    run.cache
                        .put_perception(&current_url, fingerprint, perception.clone());
                    perception
                }
            };

            let signals = self
                .session
                .get_ax_deficiency_signals()
                .await
                .unwrap_or_default();
            let deficient = classify_deficiency(
                &signals,
                perception.index.len(),
                self.caps.ax_deficient_interactive_threshold,
            );

            run.sm.transition(
                TaskState::Inferring,
                step,
                &current_url,
                "observation ready",
                None,
            )?;

            // -- decide --------------------------------------------------
            run.window
                .maybe_refresh(self.engine.as_ref())
                .await
                .map_err(AgentError::Engine)?;

            let encoded = encode_columnar(&perception.index, &perception.tree);
            let outcome = self
                .decide_tiered(
                    intent,
                    &current_url,
                    &perception,
                    &encoded,
                    &signals,
                    deficient,
                    fingerprint,
                    step,
                    &mut run,
                )
                .await?;

            let resolved = match outcome {
                TierOutcome::Resolved(resolved) => resolved,
                TierOutcome::ForceFailed(message) => {
                    let error = StructuredError::new(ErrorKind::Runtime, message)
                        .with_url(current_url.clone())
                        .with_step(step);
                    run.sm.transition(
                        TaskState::Acting,
                        step,
                        &current_url,
                        "aborting",
                        None,
                    )?;
                    return self.fail(run, step, &current_url, error);
                }
            };

            // -- anti-repeat ---------------------------------------------
            let resolved = self
                .anti_repeat(intent, &current_url, &encoded, resolved, step, &mut run)
                .await?;
            let resolved = match resolved {
                TierOutcome::Resolved(resolved) => resolved,
                TierOutcome::ForceFailed(message) => {
                    let error = StructuredError::new(ErrorKind::Runtime, message)
                        .with_url(current_url.clone())
                        .with_step(step);
                    run.sm.transition(
                        TaskState::Acting,
                        step,
                        &current_url,
                        "repeat guard tripped",
                        None,
                    )?;
                    return self.fail(run, step, &current_url, error);
                }
            };

            // -- act -----------------------------------------------------
            run.sm.transition(
                TaskState::Acting,
                step,
                &current_url,
                &format!("executing {:?}", resolved.action.kind()),
                None,
            )?;

            if let Action::Click { target } = &resolved.action {
                self.prefetch_link_target(&current_url, *target).await;
            }

            let execution = match self
                .session
                .execute_action(&resolved.action, Some(self.caps.settle_timeout_ms))
                .await
            {
                Ok(execution) => execution,
                Err(err) if err.is_crash() => return Err(AgentError::Crash(err)),
                Err(err) => {
                    match self
                        .route_error(intent, ErrorSource::Action, err, step, &current_url, &mut run)
                        .await?
                    {
                        Routed::Retry(ms) => {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            self.push_step(&mut run, step, &resolved, None, &signals,
                                perception_cache_hit, refetch_reason, &encoded);
                            continue;
                        }
                        Routed::Fail(error) => {
                            return self.fail(run, step, &current_url, error);
                        }
                    }
                }
            };

            // -- terminal? -----------------------------------------------
            match execution.status {
                ExecutionStatus::Done => {
                    let answer = execution.message.clone();
                    let final_url = execution.current_url.clone();
                    self.push_step(&mut run, step, &resolved, Some(execution), &signals,
                        perception_cache_hit, refetch_reason, &encoded);
                    run.sm.transition(
                        TaskState::Complete,
                        step,
                        &final_url,
                        "terminal DONE",
                        None,
                    )?;
                    run.sm
                        .transition(TaskState::Idle, step, &final_url, "cleanup", None)?;
                    info!(target: "ghost-agent", %final_url, steps = step, "task done");
                    return Ok(self.report(run, RunStatus::Done, final_url, step, answer, None));
                }
                ExecutionStatus::Failed => {
                    let reason = execution
                        .message
                        .clone()
                        .unwrap_or_else(|| "decision engine gave up".into());
                    let final_url = execution.current_url.clone();
                    self.push_step(&mut run, step, &resolved, Some(execution), &signals,
                        perception_cache_hit, refetch_reason, &encoded);
                    let error = StructuredError::new(ErrorKind::Runtime, reason)
                        .with_url(final_url.clone())
                        .with_step(step);
                    return self.fail(run, step, &final_url, error);
                }
                ExecutionStatus::Acted => {}
            }

            // -- post-action analysis ------------------------------------
            let progress =
                execution.navigation_observed || execution.significant_dom_mutation_observed;
            let action_fp = ActionFingerprint::of(&resolved.action);
            if progress {
                run.no_progress_streak = 0;
                run.repeats.reset();
            } else {
                run.no_progress_streak += 1;
                run.repeats.record(action_fp);
                run.cache.invalidate_decisions();
                if run.no_progress_streak > self.caps.max_no_progress_steps {
                    run.pending_escalation = Some(EscalationReason::NoProgress);
                }
            }

            if resolved.action.kind() == ActionKind::Type && !execution.navigation_observed {
                run.synthetic_enter = ENTER_HEURISTIC_STEPS;
            }

            if progress
                && resolved.source == DecisionSource::Engine
                && matches!(resolved.tier, Tier::Tier1Ax | Tier::Tier2Vision)
            {
                run.cache.put_decision(
                    &current_url,
                    fingerprint,
                    CachedDecision {
                        decision: resolved.decision.clone(),
                        fingerprint,
                    },
                );
            }

            run.window.push(HistoryPair {
                action: describe_action(&resolved.action),
                observation: format!(
                    "{} ({} interactive)",
                    execution.current_url,
                    perception.index.len()
                ),
            });

            run.last_action_kind = Some(resolved.action.kind());
            run.last_navigation_observed = execution.navigation_observed;
            run.last_significant_mutation = execution.significant_dom_mutation_observed;

            self.push_step(&mut run, step, &resolved, Some(execution), &signals,
                perception_cache_hit, refetch_reason, &encoded);
            run.tracker.note_step(step);
            self.drain_timeline(&mut run);
        }

        let final_url = self
            .session
            .get_current_url()
            .await
            .unwrap_or_else(|_| start_url.to_string());
        if run.sm.state() == TaskState::Acting {
            run.sm.transition(
                TaskState::Failed,
                step,
                &final_url,
                "max steps exhausted",
                None,
            )?;
            run.sm
                .transition(TaskState::Idle, step, &final_url, "cleanup", None)?;
        }
        Ok(self.report(run, RunStatus::MaxSteps, final_url, step, None, None))
    }

    fn refetch_reason(&self, step: u32, run: &RunState) -> RefetchReason {
        if step == 1 {
            RefetchReason::Initial
        } else if run.last_navigation_observed {
            RefetchReason::Navigation
        } else if run.last_action_kind == Some(ActionKind::Scroll) {
            RefetchReason::ScrollAction
        } else if run.last_significant_mutation {
            RefetchReason::SignificantDomMutation
        } else {
            RefetchReason::None
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn decide_tiered(
        &self,
        intent: &str,
        current_url: &str,
        perception: &CachedPerception,
        encoded: &str,
        signals: &DeficiencySignals,
        deficient: bool,
        fingerprint: u64,
        step: u32,
        run: &mut RunState,
    ) -> Result<TierOutcome, AgentError> {
        let mut tiers_attempted = Vec::new();

        // A TYPE without navigation usually needs an Enter to submit.
        if run.synthetic_enter > 0 {
            run.synthetic_enter -= 1;
            if run.last_action_kind == Some(ActionKind::Type) && !run.last_navigation_observed {
                let decision = RawDecision {
                    action: Some(ActionKind::PressKey),
                    key: Some("Enter".into()),
                    confidence: 1.0,
                    reasoning: "typed text without navigation; submitting".into(),
                    ..Default::default()
                };
                let action = decision.parse().expect("synthetic Enter always parses");
                return Ok(TierOutcome::Resolved(Resolved {
                    decision,
                    action,
                    source: DecisionSource::EnterHeuristic,
                    tier: Tier::Tier1Ax,
                    tiers_attempted: vec![Tier::Tier1Ax],
                    decision_cache_hit: false,
                    screenshot_cache_hit: false,
                }));
            }
        }

        let forced = run.pending_escalation.take();
        let mut escalation = forced;
        if deficient && escalation.is_none() {
            escalation = Some(EscalationReason::AxDeficient);
        }

        if escalation.is_none() {
            tiers_attempted.push(Tier::Tier1Ax);

            if let Some(cached) = run
                .cache
                .get_decision(current_url, fingerprint, run.no_progress_streak)
            {
                if let Ok(action) = cached.decision.parse() {
                    debug!(target: "ghost-agent", step, "decision cache hit");
                    return Ok(TierOutcome::Resolved(Resolved {
                        decision: cached.decision,
                        action,
                        source: DecisionSource::Cache,
                        tier: Tier::Tier1Ax,
                        tiers_attempted,
                        decision_cache_hit: true,
                        screenshot_cache_hit: false,
                    }));
                }
            }

            run.tier_usage.tier1_calls += 1;
            let request = self.request(
                intent, current_url, Tier::Tier1Ax, DecisionMode::Standard, None, encoded,
                perception, None, run,
            );
            let response = self.engine.decide(&request).await.map_err(AgentError::Engine)?;
            self.absorb_plan(&response, step, run);

            match response.decision.parse() {
                Ok(action) if response.decision.confidence >= self.caps.confidence_threshold => {
                    return Ok(TierOutcome::Resolved(Resolved {
                        decision: response.decision,
                        action,
                        source: DecisionSource::Engine,
                        tier: Tier::Tier1Ax,
                        tiers_attempted,
                        decision_cache_hit: false,
                        screenshot_cache_hit: false,
                    }));
                }
                Ok(action) => {
                    // Sparse tree, rich DOM: one-shot fallback before
                    // paying for vision.
                    if perception.index.len() < self.caps.ax_deficient_interactive_threshold
                        && signals.dom_interactive_candidate_count as usize
                            >= self.caps.ax_deficient_interactive_threshold * 2
                    {
                        if let Ok(candidates) = self.session.extract_dom_interactive_elements().await
                        {
                            if decision_resolves_on_dom(&action, &candidates) {
                                run.tier_usage.dom_bypass_count += 1;
                                return Ok(TierOutcome::Resolved(Resolved {
                                    decision: response.decision,
                                    action,
                                    source: DecisionSource::DomBypass,
                                    tier: Tier::Tier1Ax,
                                    tiers_attempted,
                                    decision_cache_hit: false,
                                    screenshot_cache_hit: false,
                                }));
                            }
                        }
                    }
                    escalation = Some(EscalationReason::LowConfidence);
                }
                Err(parse_err) => {
                    debug!(target: "ghost-agent", step, %parse_err, "unsafe tier-1 decision");
                    escalation = Some(EscalationReason::UnsafeAction);
                }
            }
        }

        // -- tier 2: vision ---------------------------------------------
        tiers_attempted.push(Tier::Tier2Vision);
        let escalation_reason = escalation.unwrap_or(EscalationReason::LowConfidence);
        run.tier_usage.escalations.push(escalation_reason);

        let mut screenshot_cache_hit = false;
        let screenshot = match run.cache.get_screenshot(current_url, fingerprint) {
            Some(shot) => {
                screenshot_cache_hit = true;
                shot
            }
            None => {
                let shot = self
                    .session
                    .capture_screenshot(&ScreenshotRequest {
                        mode: ScreenshotMode::Viewport,
                        quality: 70,
                        from_surface: None,
                        max_scroll_steps: None,
                    })
                    .await
                    .map_err(AgentError::from_control)?;
                run.cache
                    .put_screenshot(current_url, fingerprint, shot.clone());
                shot
            }
        };

        run.tier_usage.tier2_calls += 1;
        let mode = if escalation_reason == EscalationReason::AxDeficient {
            DecisionMode::ComputerUse
        } else {
            DecisionMode::Standard
        };
        let request = self.request(
            intent, current_url, Tier::Tier2Vision, mode, Some(escalation_reason), encoded,
            perception, Some(screenshot), run,
        );
        let response = self.engine.decide(&request).await.map_err(AgentError::Engine)?;
        self.absorb_plan(&response, step, run);

        match response.decision.parse() {
            Ok(action)
                if response.decision.confidence >= self.caps.confidence_threshold
                    && !matches!(action, Action::Scroll { .. } | Action::Failed { .. }) =>
            {
                return Ok(TierOutcome::Resolved(Resolved {
                    decision: response.decision,
                    action,
                    source: DecisionSource::Engine,
                    tier: Tier::Tier2Vision,
                    tiers_attempted,
                    decision_cache_hit: false,
                    screenshot_cache_hit,
                }));
            }
            _ => {}
        }

        // -- tier 3: bounded scroll recovery -----------------------------
        tiers_attempted.push(Tier::Tier3Scroll);
        if run.scroll_count >= self.caps.max_scroll_steps {
            return Ok(TierOutcome::ForceFailed(format!(
                "target not found after {} recovery scrolls",
                run.scroll_count
            )));
        }
        run.scroll_count += 1;
        run.tier_usage.tier3_scrolls += 1;
        run.pending_escalation = Some(EscalationReason::RetryAfterScroll);

        let decision = RawDecision {
            action: Some(ActionKind::Scroll),
            text: Some(self.caps.scroll_step_px.to_string()),
            confidence: 1.0,
            reasoning: "below-fold recovery scroll".into(),
            ..Default::default()
        };
        let action = decision.parse().expect("recovery scroll always parses");
        Ok(TierOutcome::Resolved(Resolved {
            decision,
            action,
            source: DecisionSource::Engine,
            tier: Tier::Tier3Scroll,
            tiers_attempted,
            decision_cache_hit: false,
            screenshot_cache_hit: false,
        }))
    }

    /// Repeated no-progress fingerprints bypass the cache and ask the
    /// engine to diversify; a third collision forces FAILED.
    async fn anti_repeat(
        &self,
        intent: &str,
        current_url: &str,
        encoded: &str,
        resolved: Resolved,
        step: u32,
        run: &mut RunState,
    ) -> Result<TierOutcome, AgentError> {
        // Recovery scrolls and the Enter heuristic repeat on purpose.
        if run.no_progress_streak == 0
            || resolved.source == DecisionSource::EnterHeuristic
            || resolved.tier == Tier::Tier3Scroll
        {
            return Ok(TierOutcome::Resolved(resolved));
        }
        let fp = ActionFingerprint::of(&resolved.action);
        if !run.repeats.collides(&fp) {
            return Ok(TierOutcome::Resolved(resolved));
        }
        if run.repeats.repeats(&fp) > MAX_FINGERPRINT_REPEATS {
            return Ok(TierOutcome::ForceFailed(
                "same no-progress action repeated beyond the retry budget".into(),
            ));
        }

        warn!(target: "ghost-agent", step, "no-progress fingerprint collision; diversifying");
        run.tier_usage.escalations.push(EscalationReason::NoProgress);
        let mut request = self.request(
            intent,
            current_url,
            resolved.tier,
            DecisionMode::Standard,
            Some(EscalationReason::NoProgress),
            encoded,
            &CachedPerception {
                index: Vec::new(),
                tree: Default::default(),
            },
            None,
            run,
        );
        request.diversify = true;
        let response = self.engine.decide(&request).await.map_err(AgentError::Engine)?;
        self.absorb_plan(&response, step, run);

        match response.decision.parse() {
            Ok(action) => {
                let new_fp = ActionFingerprint::of(&action);
                if run.repeats.repeats(&new_fp) > MAX_FINGERPRINT_REPEATS {
                    return Ok(TierOutcome::ForceFailed(
                        "engine keeps returning the same no-progress action".into(),
                    ));
                }
                Ok(TierOutcome::Resolved(Resolved {
                    decision: response.decision,
                    action,
                    source: DecisionSource::Engine,
                    tier: resolved.tier,
                    tiers_attempted: resolved.tiers_attempted,
                    decision_cache_hit: false,
                    screenshot_cache_hit: resolved.screenshot_cache_hit,
                }))
            }
            Err(_) => Ok(TierOutcome::Resolved(resolved)),
        }
    }

    /// Same-origin link under a CLICK target warms the cache before the
    /// navigation that usually follows. Failures stay silent.
    async fn prefetch_link_target(&self, current_url: &str, target: Point) {
        let expression = format!(
            "(() => {{ const el = document.elementFromPoint({}, {}); \
             const a = el && el.closest ? el.closest('a') : null; \
             return a ? a.href : null; }})()",
            target.x, target.y
        );
        let Ok(value) = self.session.evaluate(&expression, true).await else {
            return;
        };
        let Some(href) = value.as_str() else { return };
        let same_origin = match (url::Url::parse(current_url), url::Url::parse(href)) {
            (Ok(current), Ok(link)) => current.origin() == link.origin(),
            _ => false,
        };
        if same_origin {
            if let Ok(outcome) = self.session.prefetch(href).await {
                debug!(
                    target: "ghost-agent",
                    url = %outcome.normalized_url,
                    status = ?outcome.status,
                    "prefetched click target"
                );
            }
        }
    }

    /// Route a non-crash failure to the engine as a structured error
    /// observation. Navigation errors never carry a screenshot.
    async fn route_error(
        &self,
        intent: &str,
        source: ErrorSource,
        err: ControlError,
        step: u32,
        url: &str,
        run: &mut RunState,
    ) -> Result<Routed, AgentError> {
        let structured = err.to_structured().with_step(step).with_url(url.to_string());
        let mut observation = StructuredErrorObservation {
            source,
            error: structured.clone(),
            navigator_decision: String::new(),
            decision_source: "ENGINE".into(),
        };

        let mut request = self.request(
            intent,
            url,
            Tier::Tier1Ax,
            DecisionMode::Standard,
            None,
            "",
            &CachedPerception {
                index: Vec::new(),
                tree: Default::default(),
            },
            None,
            run,
        );
        request.structured_error = Some(observation.clone());

        let routed = match self.engine.decide(&request).await {
            Ok(response) => match response.decision.parse() {
                Ok(Action::Wait { ms }) if structured.retryable => {
                    observation.navigator_decision = format!("WAIT {ms}ms then retry");
                    Routed::Retry(ms)
                }
                Ok(Action::Failed { reason }) => {
                    observation.navigator_decision = format!("FAILED: {reason}");
                    Routed::Fail(structured)
                }
                _ => {
                    observation.navigator_decision = "unusable decision; failing".into();
                    Routed::Fail(structured)
                }
            },
            Err(engine_err) => {
                observation.navigator_decision = format!("engine error: {engine_err}");
                Routed::Fail(structured)
            }
        };

        self.events
            .emit(TaskEvent::StructuredError(observation.clone()));
        run.structured_errors.push(observation);
        Ok(routed)
    }

    async fn navigate_with_retries(
        &self,
        intent: &str,
        start_url: &str,
        run: &mut RunState,
    ) -> Result<Option<StructuredError>, AgentError> {
        let mut attempts = 0;
        loop {
            match self
                .session
                .navigate(start_url, self.caps.navigation_timeout_ms)
                .await
            {
                Ok(()) => return Ok(None),
                Err(err) if err.is_crash() => return Err(AgentError::Crash(err)),
                Err(err) => {
                    let routed = self
                        .route_error(intent, ErrorSource::Navigation, err, 0, start_url, run)
                        .await?;
                    match routed {
                        Routed::Retry(ms) if attempts < self.caps.max_navigation_retries => {
                            attempts += 1;
                            tokio::time::sleep(Duration::from_millis(ms.min(5_000))).await;
                        }
                        Routed::Retry(_) | Routed::Fail(_) => {
                            let error = match routed {
                                Routed::Fail(error) => error,
                                Routed::Retry(_) => run
                                    .structured_errors
                                    .last()
                                    .map(|o| o.error.clone())
                                    .unwrap_or_else(|| {
                                        StructuredError::new(
                                            ErrorKind::Network,
                                            "navigation retries exhausted",
                                        )
                                    }),
                            };
                            return Ok(Some(error));
                        }
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn request(
        &self,
        intent: &str,
        current_url: &str,
        tier: Tier,
        mode: DecisionMode,
        escalation_reason: Option<EscalationReason>,
        encoded: &str,
        perception: &CachedPerception,
        screenshot: Option<ghostpilot_perception::ScreenshotData>,
        run: &RunState,
    ) -> DecisionRequest {
        DecisionRequest {
            intent: intent.to_string(),
            current_url: current_url.to_string(),
            tier,
            decision_mode: mode.normalize(),
            escalation_reason,
            encoded_observation: encoded.to_string(),
            index: perception.index.clone(),
            screenshot,
            structured_error: None,
            context_summary: run.window.summary().map(str::to_string),
            recent_pairs: run.window.recent(),
            redecompose: run.tracker.redecompose_requested(),
            diversify: false,
        }
    }

    fn absorb_plan(&self, response: &DecisionResponse, step: u32, run: &mut RunState) {
        if let Some(decomposition) = &response.decomposition {
            run.tracker.apply_decomposition(decomposition, step);
        }
        for update in &response.subtask_updates {
            run.tracker.apply_update(update, step);
        }
        self.drain_timeline(run);
    }

    fn drain_timeline(&self, run: &mut RunState) {
        let timeline = run.tracker.timeline();
        for event in &timeline[run.emitted_timeline..] {
            self.events.emit(TaskEvent::SubtaskTimeline(event.clone()));
        }
        run.emitted_timeline = timeline.len();
    }

    #[allow(clippy::too_many_arguments)]
    fn push_step(
        &self,
        run: &mut RunState,
        step: u32,
        resolved: &Resolved,
        execution: Option<ExecutionResult>,
        signals: &DeficiencySignals,
        perception_cache_hit: bool,
        refetch_reason: RefetchReason,
        encoded: &str,
    ) {
        let mutation_summary = execution
            .as_ref()
            .map(|e| e.mutation_summary)
            .unwrap_or_default();
        run.history.push(StepRecord {
            step,
            resolved_tier: resolved.tier,
            tiers_attempted: resolved.tiers_attempted.clone(),
            decision: resolved.decision.clone(),
            decision_source: resolved.source,
            execution,
            deficiency_signals: Some(signals.clone()),
            scroll_count: run.scroll_count,
            perception_cache_hit,
            decision_cache_hit: resolved.decision_cache_hit,
            screenshot_cache_hit: resolved.screenshot_cache_hit,
            mutation_summary,
            refetch_reason,
            context_window: run.window.metrics_for_step(step, encoded.len()),
            structured_error: None,
            no_progress_streak: run.no_progress_streak,
        });
    }

    fn fail(
        &self,
        mut run: RunState,
        step: u32,
        url: &str,
        error: StructuredError,
    ) -> Result<TaskRunReport, AgentError> {
        if !run.sm.state().is_terminal() && run.sm.state() != TaskState::Idle {
            run.sm.transition(
                TaskState::Failed,
                step,
                url,
                "terminal FAILED",
                Some(error.clone()),
            )?;
            run.sm.transition(TaskState::Idle, step, url, "cleanup", None)?;
        }
        Ok(self.report(run, RunStatus::Failed, url.to_string(), step, None, Some(error)))
    }

    fn report(
        &self,
        run: RunState,
        status: RunStatus,
        final_url: String,
        steps_taken: u32,
        answer: Option<String>,
        error_detail: Option<StructuredError>,
    ) -> TaskRunReport {
        let context_window = run.window.metrics_for_step(steps_taken + 1, 0);
        TaskRunReport {
            status,
            final_url,
            steps_taken,
            answer,
            subtasks: if run.tracker.is_decomposed() {
                Some(run.tracker.subtasks().to_vec())
            } else {
                None
            },
            checkpoint: if run.tracker.is_decomposed() {
                Some(run.tracker.checkpoint().clone())
            } else {
                None
            },
            history: run.history,
            tier_usage: run.tier_usage,
            structured_errors: run.structured_errors,
            context_window,
            cache_metrics: run.cache.metrics(),
            error_detail,
        }
    }
}

enum TierOutcome {
    Resolved(Resolved),
    ForceFailed(String),
}

/// Does the decision land on a real DOM candidate?
fn decision_resolves_on_dom(action: &Action, candidates: &[DomCandidate]) -> bool {
    match action {
        Action::Click { target } => candidates.iter().any(|c| {
            target.x >= c.x
                && target.x <= c.x + c.width
                && target.y >= c.y
                && target.y <= c.y + c.height
        }),
        Action::Type { .. } | Action::PressKey { .. } => candidates
            .iter()
            .any(|c| matches!(c.tag.as_str(), "input" | "textarea" | "select")),
        _ => false,
    }
}

fn describe_action(action: &Action) -> String {
    match action {
        Action::Click { target } => format!("CLICK ({:.0},{:.0})", target.x, target.y),
        Action::Type { text } => format!("TYPE {text:?}"),
        Action::PressKey { key } => format!("PRESS_KEY {key}"),
        Action::Scroll { pixels } => format!("SCROLL {pixels}px"),
        Action::Wait { ms } => format!("WAIT {ms}ms"),
        Action::Extract { expression } => format!("EXTRACT {expression:?}"),
        Action::Done { text } => format!("DONE {text:?}"),
        Action::Failed { reason } => format!("FAILED {reason:?}"),
    }
}
