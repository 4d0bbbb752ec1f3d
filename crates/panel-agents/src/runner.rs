//! Agent runner — one independent control loop per panelist.
//!
//! The runner observes the bus, runs the ask-now heuristic, pre-generates
//! candidates ahead of need, requests the floor, and drives exchanges from
//! the seat the coordinator hands it. It never grants itself the floor and
//! never blocks other agents: every wait is a suspension point on its own
//! task, and generation runs on a side task so a slide change can supersede
//! it mid-flight.
//!
//! Failure posture: a runner that cannot produce a candidate sits out the
//! cycle; a runner that cannot continue a granted exchange abandons it so
//! the coordinator can resolve deterministically. Nothing here can take the
//! session down.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use orchestration::{
    AgentDirective, AgentState, CandidateQuestion, CandidateRequest, ClaimMatcher,
    ContextFingerprint, CoordinatorHandle, EvaluationOutcome, EvaluationRequest, ExchangePrompt,
    FloorDecision, FloorRequest, Freshness, GatewayError, GeneratedCandidate, LatencyCompensator,
    SessionConfig, SessionEvent, SharedContextStore, SharedEventBus, SharedGateway, SpokenKind,
    UtteranceIntent, UtteranceRequest,
};

use crate::heuristics::{evaluate_trigger, AgentView, TriggerConfig, TriggerDecision};
use crate::persona::Persona;
use crate::state::AgentStateMachine;
use crate::urgency::{UrgencyConfig, UrgencyMeter};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    /// Ask-now heuristic thresholds.
    pub trigger: TriggerConfig,
    /// Candidate pre-generation refresh interval.
    pub candidate_refresh_secs: u64,
    /// Urgency dynamics.
    pub urgency: UrgencyConfig,
    /// Focus score above which a mentioned claim counts as "ours".
    pub focus_threshold: f64,
    /// Turn limit forwarded to evaluation requests for pressure calibration.
    pub max_turns: u32,
}

impl Default for AgentRunnerConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerConfig::default(),
            candidate_refresh_secs: 25,
            urgency: UrgencyConfig::default(),
            focus_threshold: 0.3,
            max_turns: 3,
        }
    }
}

impl AgentRunnerConfig {
    /// Derive runner thresholds from the session configuration.
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            trigger: TriggerConfig {
                warmup_words: config.warmup_words,
                refresh_interval_secs: (config.quiet_period_secs / 3).max(10) as i64,
                cooldown_secs: config.agent_cooldown_secs as i64,
            },
            max_turns: config.max_turns(),
            ..Default::default()
        }
    }
}

/// Completed (or failed) generation delivered back to the control loop.
struct GenerationResult {
    result: Result<GeneratedCandidate, GatewayError>,
    fingerprint: ContextFingerprint,
    reason: String,
}

/// One panelist's control loop.
pub struct AgentRunner {
    persona: Persona,
    store: SharedContextStore,
    bus: SharedEventBus,
    gateway: SharedGateway,
    compensator: Arc<LatencyCompensator>,
    coordinator: CoordinatorHandle,
    config: AgentRunnerConfig,
    cancel: CancellationToken,

    machine: AgentStateMachine,
    matcher: ClaimMatcher,
    urgency: UrgencyMeter,
    last_evaluated_at: Option<chrono::DateTime<Utc>>,
    last_spoke_at: Option<chrono::DateTime<Utc>>,
    has_spoken: bool,
    new_claim_activity: bool,
    slide_changed: bool,
    focus_claim: Option<String>,
    pending_request: bool,
    current_question: String,
    gen_cancel: Option<CancellationToken>,
    gen_tx: mpsc::Sender<GenerationResult>,
    gen_rx: Option<mpsc::Receiver<GenerationResult>>,
}

impl AgentRunner {
    /// Create a runner for one persona.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persona: Persona,
        store: SharedContextStore,
        bus: SharedEventBus,
        gateway: SharedGateway,
        compensator: Arc<LatencyCompensator>,
        coordinator: CoordinatorHandle,
        config: AgentRunnerConfig,
        cancel: CancellationToken,
    ) -> Self {
        let machine = AgentStateMachine::new(&persona.id, bus.clone());
        let (gen_tx, gen_rx) = mpsc::channel(4);
        Self {
            persona,
            store,
            bus,
            gateway,
            compensator,
            coordinator,
            config,
            cancel,
            machine,
            matcher: ClaimMatcher::new(),
            urgency: UrgencyMeter::default(),
            last_evaluated_at: None,
            last_spoke_at: None,
            has_spoken: false,
            new_claim_activity: false,
            slide_changed: false,
            focus_claim: None,
            pending_request: false,
            current_question: String::new(),
            gen_cancel: None,
            gen_tx,
            gen_rx: Some(gen_rx),
        }
    }

    /// Spawn the runner task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let agent_id = self.persona.id.clone();
        let mut directives = match self
            .coordinator
            .register_agent(&agent_id, &self.persona.name)
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                warn!(agent_id = %agent_id, "Could not register with coordinator: {}", e);
                return;
            }
        };

        let mut gen_rx = self.gen_rx.take().expect("runner spawned twice");
        let mut bus_rx = self.bus.subscribe();
        let mut refresh = tokio::time::interval(std::time::Duration::from_secs(
            self.config.candidate_refresh_secs.max(1),
        ));
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(agent_id = %agent_id, "Agent runner started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Some(token) = self.gen_cancel.take() {
                        token.cancel();
                    }
                    self.machine.shutdown("runner cancelled");
                    break;
                }

                directive = directives.recv() => {
                    match directive {
                        Some(AgentDirective::FloorGranted(grant)) => {
                            self.pending_request = false;
                            self.run_exchange(grant).await;
                        }
                        Some(AgentDirective::SessionEnding) => {
                            if let Some(token) = self.gen_cancel.take() {
                                token.cancel();
                            }
                            self.machine.shutdown("session ending");
                            break;
                        }
                        None => {
                            self.machine.shutdown("coordinator gone");
                            break;
                        }
                    }
                }

                Some(generation) = gen_rx.recv() => {
                    self.on_generation_complete(generation).await;
                }

                event = bus_rx.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(agent_id = %agent_id, skipped = n, "Runner lagged on the bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            self.machine.shutdown("bus closed");
                            break;
                        }
                    }
                }

                _ = refresh.tick() => {
                    self.maybe_refresh_candidate().await;
                    self.maybe_evaluate().await;
                }
            }
        }

        debug!(agent_id = %agent_id, "Agent runner stopped");
    }

    // ── Event intake ────────────────────────────────────────────────────

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TranscriptAppended { segment, .. } => {
                if !(segment.speaker.is_presenter() && segment.is_final) {
                    return;
                }
                self.maybe_leave_loading();
                self.maybe_evaluate().await;
            }
            SessionEvent::SlideChanged { .. } => {
                self.slide_changed = true;
                // Supersede any in-flight generation keyed to the old slide;
                // the cancelled result re-enters the loop and re-triggers.
                if let Some(token) = self.gen_cancel.take() {
                    debug!(agent_id = %self.persona.id, "Slide changed; superseding generation");
                    token.cancel();
                }
                self.maybe_evaluate().await;
            }
            SessionEvent::ClaimMentioned { claim_id, .. } => {
                self.new_claim_activity = true;
                let focus = self
                    .store
                    .claims()
                    .iter()
                    .find(|c| c.id == claim_id)
                    .map(|c| self.persona.focus_score(c, &self.matcher))
                    .unwrap_or(0.0);
                if focus >= self.config.focus_threshold {
                    self.focus_claim = Some(claim_id);
                    self.urgency.on_focus_claim();
                }
                self.maybe_evaluate().await;
            }
            _ => {}
        }
    }

    fn maybe_leave_loading(&mut self) {
        if self.machine.current() != AgentState::Loading {
            return;
        }
        if self.store.manifest_loaded()
            && self.store.presenter_words() >= self.config.trigger.warmup_words
        {
            let _ = self.machine.advance(AgentState::Listening, "warmup threshold reached");
        }
    }

    /// Staleness watchdog for a held candidate while Ready.
    async fn maybe_refresh_candidate(&mut self) {
        if self.machine.current() != AgentState::Ready {
            return;
        }
        let Some(candidate) = self.store.candidate(&self.persona.id) else {
            self.machine.settle_to_listening("candidate vanished");
            return;
        };
        let contradicted = candidate
            .claim_id
            .as_deref()
            .map(|id| self.store.claim_contradicted(id))
            .unwrap_or(false);
        let freshness = self.compensator.freshness_policy().validate(
            &candidate,
            &self.store.fingerprint(),
            contradicted,
            Utc::now(),
        );
        if let Freshness::Stale(reason) = freshness {
            debug!(agent_id = %self.persona.id, reason = %reason, "Held candidate went stale");
            // A pending request whose premise died is withdrawn, not left
            // to be granted on stale context.
            if self.pending_request {
                let _ = self.coordinator.retract_floor(&self.persona.id).await;
                self.pending_request = false;
            }
            // Drop back and let the next trigger rebuild it.
            self.machine.settle_to_listening("candidate stale");
            self.new_claim_activity = true;
        }
    }

    // ── The ask cycle ───────────────────────────────────────────────────

    async fn maybe_evaluate(&mut self) {
        if self.cancel.is_cancelled() || self.pending_request {
            return;
        }
        if !matches!(
            self.machine.current(),
            AgentState::Listening | AgentState::Ready
        ) {
            return;
        }

        let view = AgentView {
            has_spoken: self.has_spoken,
            last_spoke_at: self.last_spoke_at,
            last_evaluated_at: self.last_evaluated_at,
            words_observed: self.store.presenter_words(),
            new_claim_activity: self.new_claim_activity,
            slide_changed: self.slide_changed,
            focus_claim: self.focus_claim.clone(),
        };
        let decision = evaluate_trigger(&view, &self.config.trigger, Utc::now());

        let TriggerDecision::Trigger(reason) = decision else {
            return;
        };
        debug!(agent_id = %self.persona.id, reason = %reason, "Ask trigger fired");

        self.last_evaluated_at = Some(Utc::now());
        self.slide_changed = false;
        self.new_claim_activity = false;
        let target_claim_id = self.focus_claim.take();

        // Reuse a still-fresh candidate instead of regenerating.
        if self.machine.current() == AgentState::Ready {
            if let Some(candidate) = self.store.candidate(&self.persona.id) {
                self.request_floor_with(&candidate, &reason.to_string()).await;
                return;
            }
            self.machine.settle_to_listening("regenerating");
        }

        let _ = self.machine.advance(AgentState::Evaluating, &reason.to_string());
        let _ = self.machine.advance(AgentState::Generating, "candidate needed");
        self.start_generation(&reason.to_string(), target_claim_id);
    }

    /// Kick generation off on a side task so the loop keeps observing —
    /// a slide change can cancel this call while it runs.
    fn start_generation(&mut self, reason: &str, target_claim_id: Option<String>) {
        let token = self.cancel.child_token();
        self.gen_cancel = Some(token.clone());

        let fingerprint = self.store.fingerprint();
        let context = self.store.build_context(&self.persona.id);
        let target_claim = target_claim_id.and_then(|id| {
            let claims = self.store.claims();
            claims.iter().find(|c| c.id == id).cloned()
        });

        let request = CandidateRequest {
            agent_id: self.persona.id.clone(),
            persona: self.persona.prompt_block(),
            context: context.render(),
            slide_index: fingerprint.slide_index,
            target_claim,
        };

        let gateway = self.gateway.clone();
        let tx = self.gen_tx.clone();
        let reason = reason.to_string();
        tokio::spawn(async move {
            let result = gateway.generate_candidate(request, token).await;
            let _ = tx
                .send(GenerationResult {
                    result,
                    fingerprint,
                    reason,
                })
                .await;
        });
    }

    async fn on_generation_complete(&mut self, generation: GenerationResult) {
        self.gen_cancel = None;

        if self.machine.current() != AgentState::Generating {
            // Shutdown or an exchange landed in between; the result is moot.
            return;
        }

        match generation.result {
            Ok(generated) => {
                let candidate = CandidateQuestion::new(
                    &self.persona.id,
                    &generated.text,
                    generated.claim_id,
                    generation.fingerprint,
                );
                self.store.set_candidate(candidate.clone());
                let _ = self.machine.advance(AgentState::Ready, "candidate ready");
                self.request_floor_with(&candidate, &generation.reason).await;
            }
            Err(GatewayError::Cancelled) => {
                self.machine.settle_to_listening("generation superseded");
                // Flags set by the superseding event re-trigger immediately.
                self.maybe_evaluate().await;
            }
            Err(e) => {
                // This agent sits out the cycle; the session goes on.
                warn!(agent_id = %self.persona.id, "Candidate generation failed: {}", e);
                self.machine.settle_to_listening("generation failed");
            }
        }
    }

    async fn request_floor_with(&mut self, candidate: &CandidateQuestion, reason: &str) {
        let focus_score = candidate
            .claim_id
            .as_deref()
            .and_then(|id| {
                let claims = self.store.claims();
                claims
                    .iter()
                    .find(|c| c.id == id)
                    .map(|c| self.persona.focus_score(c, &self.matcher))
            })
            .unwrap_or_else(|| {
                if candidate.slide_index == self.store.slide_index() {
                    0.5
                } else {
                    0.0
                }
            });

        let request = FloorRequest {
            agent_id: self.persona.id.clone(),
            urgency: self.urgency.score(),
            focus_score,
            candidate_generated_at: Some(candidate.generated_at),
            requested_at: Utc::now(),
            reason: reason.to_string(),
        };

        match self.coordinator.request_floor(request).await {
            Ok(FloorDecision::Granted(grant)) => {
                self.run_exchange(grant).await;
            }
            Ok(FloorDecision::Queued { position }) => {
                debug!(agent_id = %self.persona.id, position, "Floor request queued");
                self.pending_request = true;
                self.urgency.on_queued();
            }
            Ok(FloorDecision::Denied { reason }) => {
                debug!(agent_id = %self.persona.id, reason = %reason, "Floor request denied");
                self.machine.settle_to_listening("floor denied");
            }
            Err(e) => {
                warn!(agent_id = %self.persona.id, "Floor request failed: {}", e);
                self.machine.settle_to_listening("coordinator unreachable");
            }
        }
    }

    // ── Exchange execution ──────────────────────────────────────────────

    async fn run_exchange(&mut self, mut grant: orchestration::FloorGrant) {
        let exchange_id = grant.exchange_id.clone();
        self.enter_exchange_state();

        while let Some(prompt) = grant.prompts.recv().await {
            match prompt {
                ExchangePrompt::Open {
                    is_pile_on: true, ..
                } => {
                    self.speak_pile_on(&exchange_id).await;
                }
                ExchangePrompt::Open { .. } => {
                    self.speak_opening(&exchange_id).await;
                }
                ExchangePrompt::Evaluate {
                    turn,
                    presenter_text,
                    ..
                } => {
                    self.evaluate_and_respond(&exchange_id, turn, &presenter_text)
                        .await;
                }
                ExchangePrompt::Concluded { state, .. } => {
                    debug!(agent_id = %self.persona.id, exchange_id = %exchange_id, state = %state, "Exchange concluded");
                    break;
                }
            }
        }

        self.machine.settle_to_listening("exchange over");
        self.has_spoken = true;
        self.last_spoke_at = Some(Utc::now());
        self.pending_request = false;
        self.urgency.on_spoke();
    }

    fn enter_exchange_state(&mut self) {
        // Proactive grants can arrive while Listening; walk the legal chain.
        if self.machine.current() == AgentState::Listening {
            let _ = self.machine.advance(AgentState::Evaluating, "proactive grant");
            let _ = self.machine.advance(AgentState::Generating, "proactive grant");
            let _ = self.machine.advance(AgentState::Ready, "proactive grant");
        }
        let _ = self.machine.advance(AgentState::InExchange, "floor granted");
    }

    async fn speak_opening(&mut self, exchange_id: &str) {
        let Some(candidate) = self.store.candidate(&self.persona.id) else {
            warn!(agent_id = %self.persona.id, "Granted floor with no candidate; abandoning");
            let _ = self
                .coordinator
                .abandon_exchange(exchange_id, "no candidate available")
                .await;
            return;
        };

        let basis = candidate
            .claim_id
            .as_deref()
            .and_then(|id| {
                let claims = self.store.claims();
                claims.iter().find(|c| c.id == id).map(|c| c.text.clone())
            })
            .unwrap_or_else(|| candidate.text.clone());
        let fallback = UtteranceRequest {
            agent_id: self.persona.id.clone(),
            persona: self.persona.prompt_block(),
            context: self.store.build_context(&self.persona.id).render(),
            intent: UtteranceIntent::Question,
            basis,
        };

        let delivery = self
            .compensator
            .speak_candidate(&candidate, fallback, self.cancel.child_token())
            .await;
        self.store.clear_candidate(&self.persona.id);

        match delivery {
            Ok(report) if !report.text.is_empty() => {
                self.current_question = report.text.clone();
                let _ = self
                    .coordinator
                    .report_turn_spoken(
                        exchange_id,
                        &self.persona.id,
                        SpokenKind::Opening,
                        &report.text,
                        report.duration_ms,
                    )
                    .await;
            }
            Ok(_) | Err(_) => {
                warn!(agent_id = %self.persona.id, "Opening delivery failed; abandoning exchange");
                let _ = self
                    .coordinator
                    .abandon_exchange(exchange_id, "opening delivery failed")
                    .await;
            }
        }
    }

    async fn evaluate_and_respond(&mut self, exchange_id: &str, turn: u32, presenter_text: &str) {
        let context = self.store.build_context(&self.persona.id);
        let request = EvaluationRequest {
            agent_id: self.persona.id.clone(),
            persona: self.persona.prompt_block(),
            context: context.render(),
            question: self.current_question.clone(),
            presenter_response: presenter_text.to_string(),
            turn,
            max_turns: self.config.max_turns,
        };

        let evaluation = match self
            .gateway
            .evaluate_response(request, self.cancel.child_token())
            .await
        {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(agent_id = %self.persona.id, "Evaluation failed: {}", e);
                let _ = self
                    .coordinator
                    .abandon_exchange(exchange_id, "evaluation unavailable")
                    .await;
                return;
            }
        };

        let outcome = evaluation.outcome;
        let spoken_text = evaluation.spoken_text.clone();
        let verdict = match self
            .coordinator
            .report_evaluation(exchange_id, evaluation)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(agent_id = %self.persona.id, "Evaluation report failed: {}", e);
                return;
            }
        };

        match verdict {
            orchestration::EvaluationVerdict::Continue => {
                if outcome == EvaluationOutcome::Escalate {
                    self.urgency.on_escalation();
                }
                let report = self.compensator.speak_text(&self.persona.id, &spoken_text);
                self.current_question = spoken_text.clone();
                let kind = match outcome {
                    EvaluationOutcome::Escalate => SpokenKind::Escalation,
                    _ => SpokenKind::FollowUp,
                };
                let _ = self
                    .coordinator
                    .report_turn_spoken(
                        exchange_id,
                        &self.persona.id,
                        kind,
                        &spoken_text,
                        report.duration_ms,
                    )
                    .await;
            }
            orchestration::EvaluationVerdict::ConcludeSatisfied => {
                let report = self.compensator.speak_text(&self.persona.id, &spoken_text);
                let _ = self
                    .coordinator
                    .report_turn_spoken(
                        exchange_id,
                        &self.persona.id,
                        SpokenKind::Acknowledgment,
                        &spoken_text,
                        report.duration_ms,
                    )
                    .await;
            }
            orchestration::EvaluationVerdict::ConcludeIntervened => {
                // The moderator has already cut in; stay quiet.
            }
        }
    }

    async fn speak_pile_on(&mut self, exchange_id: &str) {
        let Some(candidate) = self.store.candidate(&self.persona.id) else {
            let _ = self
                .coordinator
                .decline_pile_on(exchange_id, &self.persona.id)
                .await;
            return;
        };

        // A pile-on is a single cheap remark — a stale candidate is
        // declined, never replaced with live generation.
        let contradicted = candidate
            .claim_id
            .as_deref()
            .map(|id| self.store.claim_contradicted(id))
            .unwrap_or(false);
        let freshness = self.compensator.freshness_policy().validate(
            &candidate,
            &self.store.fingerprint(),
            contradicted,
            Utc::now(),
        );
        if !freshness.is_fresh() {
            debug!(agent_id = %self.persona.id, "Pile-on candidate stale; declining");
            self.store.clear_candidate(&self.persona.id);
            let _ = self
                .coordinator
                .decline_pile_on(exchange_id, &self.persona.id)
                .await;
            return;
        }

        let report = self.compensator.speak_text(&self.persona.id, &candidate.text);
        self.store.clear_candidate(&self.persona.id);
        let _ = self
            .coordinator
            .report_turn_spoken(
                exchange_id,
                &self.persona.id,
                SpokenKind::PileOnStatement,
                &candidate.text,
                report.duration_ms,
            )
            .await;
    }
}
