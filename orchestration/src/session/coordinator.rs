//! Session coordinator — the global scheduler and floor arbiter.
//!
//! All session-wide mutable state (phase, active exchange, floor queue,
//! grant times, speaking-time accounting) lives inside one task; every
//! other component interacts with it only through messages. That single-
//! writer discipline is what makes the crosstalk invariant hold: at most
//! one agent is ever in an exchange, globally, with no locks anywhere.
//!
//! ```text
//! AgentRunner ──RequestFloor──▶ ┌─────────────┐ ──FloorDecision──▶
//! AgentRunner ──TurnSpoken────▶ │ Coordinator │ ──ExchangePrompt─▶ seat
//! EventBus ────transcript─────▶ │    task     │ ──SessionEvent──▶ bus
//! timer ───────tick───────────▶ └─────────────┘
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::archive::{SessionArchive, SpeakingTime};
use super::config::{InteractionMode, SessionConfig};
use super::floor::{selection_cmp, AgentStanding, DenyReason, FloorQueue, FloorRequest};
use super::moderator::Moderator;
use super::phase::{PhaseMachine, SessionPhase};
use crate::context::SharedContextStore;
use crate::events::{ModeratorPurpose, SessionEvent, SharedEventBus};
use crate::exchange::{
    Evaluation, ExchangeDriver, ExchangeState, InterventionReason, PileOn, TurnKind,
};
use crate::types::{AgentId, ClaimId, ExchangeId};

/// Error type for coordinator handle operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator task is gone")]
    ChannelClosed,
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Prompt delivered to the agent holding the floor.
#[derive(Debug)]
pub enum ExchangePrompt {
    /// Speak your opening utterance now.
    Open {
        exchange_id: ExchangeId,
        claim_id: Option<ClaimId>,
        is_pile_on: bool,
    },
    /// The presenter responded — evaluate and report.
    Evaluate {
        exchange_id: ExchangeId,
        turn: u32,
        presenter_text: String,
    },
    /// The exchange is over; release the floor.
    Concluded {
        exchange_id: ExchangeId,
        state: ExchangeState,
    },
}

/// A granted floor: the seat the agent drives its exchange from.
#[derive(Debug)]
pub struct FloorGrant {
    pub exchange_id: ExchangeId,
    /// Moderator acknowledgment line for replayed queued requests.
    pub acknowledgment: Option<String>,
    pub is_pile_on: bool,
    /// Ordered prompts from the coordinator.
    pub prompts: mpsc::Receiver<ExchangePrompt>,
}

/// Immediate reply to a floor request.
#[derive(Debug)]
pub enum FloorDecision {
    /// Granted now — the seat is attached.
    Granted(FloorGrant),
    /// Queued; a later grant arrives as a directive.
    Queued { position: usize },
    /// Denied outright.
    Denied { reason: DenyReason },
}

/// Out-of-band message from the coordinator to one agent runner.
#[derive(Debug)]
pub enum AgentDirective {
    /// A queued or proactive grant.
    FloorGranted(FloorGrant),
    /// The session is ending; enter cooldown.
    SessionEnding,
}

/// What kind of utterance a runner just delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpokenKind {
    Opening,
    FollowUp,
    Escalation,
    Acknowledgment,
    PileOnStatement,
}

/// Coordinator ruling on a reported evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationVerdict {
    /// Speak your follow-up/escalation; the exchange continues.
    Continue,
    /// Satisfied — speak your acknowledgment and release the floor.
    ConcludeSatisfied,
    /// Turn limit reached — the coordinator has intervened; stay quiet.
    ConcludeIntervened,
}

enum Command {
    Register {
        agent_id: AgentId,
        display_name: String,
        directives: mpsc::Sender<AgentDirective>,
    },
    RequestFloor {
        request: FloorRequest,
        reply: oneshot::Sender<FloorDecision>,
    },
    RetractFloor {
        agent_id: AgentId,
    },
    TurnSpoken {
        exchange_id: ExchangeId,
        agent_id: AgentId,
        kind: SpokenKind,
        text: String,
        duration_ms: u64,
    },
    EvaluationReported {
        exchange_id: ExchangeId,
        evaluation: Evaluation,
        reply: oneshot::Sender<EvaluationVerdict>,
    },
    AbandonExchange {
        exchange_id: ExchangeId,
        reason: String,
    },
    DeclinePileOn {
        exchange_id: ExchangeId,
        agent_id: AgentId,
    },
    EndSession {
        reply: oneshot::Sender<SessionArchive>,
    },
}

/// Cloneable handle — the only way into the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    /// Register an agent runner; returns its directive channel.
    pub async fn register_agent(
        &self,
        agent_id: &str,
        display_name: &str,
    ) -> CoordinatorResult<mpsc::Receiver<AgentDirective>> {
        let (tx, rx) = mpsc::channel(8);
        self.tx
            .send(Command::Register {
                agent_id: agent_id.to_string(),
                display_name: display_name.to_string(),
                directives: tx,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        Ok(rx)
    }

    /// Request the floor; the reply is the immediate decision.
    pub async fn request_floor(&self, request: FloorRequest) -> CoordinatorResult<FloorDecision> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::RequestFloor { request, reply })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Withdraw a pending floor request.
    pub async fn retract_floor(&self, agent_id: &str) -> CoordinatorResult<()> {
        self.tx
            .send(Command::RetractFloor {
                agent_id: agent_id.to_string(),
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Report a delivered utterance.
    pub async fn report_turn_spoken(
        &self,
        exchange_id: &str,
        agent_id: &str,
        kind: SpokenKind,
        text: &str,
        duration_ms: u64,
    ) -> CoordinatorResult<()> {
        self.tx
            .send(Command::TurnSpoken {
                exchange_id: exchange_id.to_string(),
                agent_id: agent_id.to_string(),
                kind,
                text: text.to_string(),
                duration_ms,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Report an evaluation; the reply is the coordinator's ruling.
    pub async fn report_evaluation(
        &self,
        exchange_id: &str,
        evaluation: Evaluation,
    ) -> CoordinatorResult<EvaluationVerdict> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::EvaluationReported {
                exchange_id: exchange_id.to_string(),
                evaluation,
                reply,
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Abandon a granted exchange the agent cannot continue.
    pub async fn abandon_exchange(&self, exchange_id: &str, reason: &str) -> CoordinatorResult<()> {
        self.tx
            .send(Command::AbandonExchange {
                exchange_id: exchange_id.to_string(),
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// Decline an offered pile-on (candidate went stale).
    pub async fn decline_pile_on(&self, exchange_id: &str, agent_id: &str) -> CoordinatorResult<()> {
        self.tx
            .send(Command::DeclinePileOn {
                exchange_id: exchange_id.to_string(),
                agent_id: agent_id.to_string(),
            })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)
    }

    /// End the session and collect the archive.
    pub async fn end_session(&self) -> CoordinatorResult<SessionArchive> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::EndSession { reply })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchTrigger {
    RequestArrival,
    Pause,
    SlideChange,
    Tick,
    PostResolution,
}

struct ActiveExchange {
    driver: ExchangeDriver,
    agent_id: AgentId,
    seat: mpsc::Sender<ExchangePrompt>,
    /// Set when a satisfied verdict was issued and the closing
    /// acknowledgment is still outstanding.
    concluding_deadline: Option<DateTime<Utc>>,
}

struct PileOnRun {
    agent_id: AgentId,
    seat: mpsc::Sender<ExchangePrompt>,
    statement: Option<String>,
    since: DateTime<Utc>,
}

struct PostExchange {
    driver: ExchangeDriver,
    pile_on: Option<PileOnRun>,
}

/// The coordinator task state. Constructed and consumed by [`spawn`].
struct Coordinator {
    config: SessionConfig,
    store: SharedContextStore,
    bus: SharedEventBus,
    moderator: Moderator,
    session_id: String,
    phase: PhaseMachine,
    queue: FloorQueue,
    standings: HashMap<AgentId, AgentStanding>,
    display_names: HashMap<AgentId, String>,
    directives: HashMap<AgentId, mpsc::Sender<AgentDirective>>,
    last_grant: HashMap<AgentId, DateTime<Utc>>,
    active: Option<ActiveExchange>,
    resolving: Option<PostExchange>,
    speaking_secs: HashMap<AgentId, f64>,
    started_at: DateTime<Utc>,
    last_exchange_end: DateTime<Utc>,
    grant_window_until: Option<DateTime<Utc>>,
    ending: bool,
    exchange_counter: u32,
}

/// Spawn the coordinator task over the shared store and bus.
pub fn spawn(
    store: SharedContextStore,
    bus: SharedEventBus,
    config: SessionConfig,
) -> CoordinatorHandle {
    let (tx, rx) = mpsc::channel(64);
    let now = Utc::now();
    let coordinator = Coordinator {
        config,
        store,
        bus,
        moderator: Moderator::new(),
        session_id: Uuid::new_v4().to_string(),
        phase: PhaseMachine::new(),
        queue: FloorQueue::new(),
        standings: HashMap::new(),
        display_names: HashMap::new(),
        directives: HashMap::new(),
        last_grant: HashMap::new(),
        active: None,
        resolving: None,
        speaking_secs: HashMap::new(),
        started_at: now,
        last_exchange_end: now,
        grant_window_until: None,
        ending: false,
        exchange_counter: 0,
    };
    tokio::spawn(coordinator.run(rx));
    CoordinatorHandle { tx }
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut bus_rx = self.bus.subscribe();
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(session_id = %self.session_id, "Session coordinator started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::EndSession { reply }) => {
                            let archive = self.end_session();
                            let _ = reply.send(archive);
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                event = bus_rx.recv() => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "Coordinator lagged on the event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = ticker.tick() => self.handle_tick(),
            }
        }

        debug!(session_id = %self.session_id, "Session coordinator stopped");
    }

    // ── Command handling ────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register {
                agent_id,
                display_name,
                directives,
            } => {
                let position = self.standings.len();
                self.standings.insert(
                    agent_id.clone(),
                    AgentStanding {
                        roster_position: position,
                        last_spoke_at: None,
                    },
                );
                self.display_names.insert(agent_id.clone(), display_name);
                self.directives.insert(agent_id.clone(), directives);
                debug!(agent_id = %agent_id, position, "Agent registered");
            }

            Command::RequestFloor { request, reply } => {
                let decision = self.handle_floor_request(request);
                let _ = reply.send(decision);
            }

            Command::RetractFloor { agent_id } => {
                if self.queue.retract(&agent_id) {
                    let _ = self.bus.publish(SessionEvent::FloorRetracted {
                        agent_id,
                        timestamp: Utc::now(),
                    });
                }
            }

            Command::TurnSpoken {
                exchange_id,
                agent_id,
                kind,
                text,
                duration_ms,
            } => {
                *self.speaking_secs.entry(agent_id.clone()).or_insert(0.0) +=
                    duration_ms as f64 / 1_000.0;
                if let Some(standing) = self.standings.get_mut(&agent_id) {
                    standing.last_spoke_at = Some(Utc::now());
                }
                self.handle_turn_spoken(&exchange_id, &agent_id, kind, &text);
            }

            Command::EvaluationReported {
                exchange_id,
                evaluation,
                reply,
            } => {
                let verdict = self.handle_evaluation(&exchange_id, evaluation);
                let _ = reply.send(verdict);
            }

            Command::AbandonExchange { exchange_id, reason } => {
                if self.active.as_ref().map(|a| a.driver.exchange().id.clone())
                    == Some(exchange_id.clone())
                {
                    warn!(exchange_id = %exchange_id, reason, "Exchange abandoned by agent");
                    self.conclude_active(Some(InterventionReason::AgentUnavailable));
                }
            }

            Command::DeclinePileOn { exchange_id, agent_id } => {
                let declined = matches!(
                    &self.resolving,
                    Some(post) if post.driver.exchange().id == exchange_id
                        && post.pile_on.as_ref().map(|p| p.agent_id.as_str()) == Some(agent_id.as_str())
                );
                if declined {
                    debug!(agent_id = %agent_id, "Pile-on declined");
                    if let Some(post) = self.resolving.as_mut() {
                        post.pile_on = None;
                    }
                    self.finish_resolution();
                }
            }

            Command::EndSession { .. } => unreachable!("handled in run loop"),
        }
    }

    fn handle_floor_request(&mut self, request: FloorRequest) -> FloorDecision {
        if self.ending || self.phase.current().is_terminal() {
            return FloorDecision::Denied {
                reason: DenyReason::SessionEnding,
            };
        }

        let agent_id = request.agent_id.clone();
        let _ = self.bus.publish(SessionEvent::FloorRequested {
            agent_id: agent_id.clone(),
            urgency: request.urgency,
            reason: request.reason.clone(),
            timestamp: Utc::now(),
        });

        let position = self.queue.push(request, &self.standings);

        if let Some(winner) = self.try_dispatch(DispatchTrigger::RequestArrival) {
            if winner.agent_id == agent_id {
                let grant = self.open_exchange(winner, false);
                return FloorDecision::Granted(grant);
            }
            // Someone else outranked the new arrival — they get the grant
            // via their directive channel; the new request stays queued.
            self.grant_via_directive(winner, false);
        }

        let _ = self.bus.publish(SessionEvent::FloorQueued {
            agent_id: agent_id.clone(),
            position,
            timestamp: Utc::now(),
        });
        FloorDecision::Queued { position }
    }

    fn handle_turn_spoken(
        &mut self,
        exchange_id: &str,
        agent_id: &str,
        kind: SpokenKind,
        text: &str,
    ) {
        let now = Utc::now();

        if kind == SpokenKind::PileOnStatement {
            if let Some(post) = self.resolving.as_mut() {
                if post.driver.exchange().id == exchange_id {
                    if let Some(pile) = post.pile_on.as_mut() {
                        pile.statement = Some(text.to_string());
                        pile.since = now;
                    }
                }
            }
            return;
        }

        if kind == SpokenKind::Acknowledgment {
            let _ = self.bus.publish(SessionEvent::AcknowledgmentIssued {
                agent_id: agent_id.to_string(),
                exchange_id: exchange_id.to_string(),
                text: text.to_string(),
                timestamp: now,
            });
            let awaiting_ack = matches!(
                &self.active,
                Some(active) if active.driver.exchange().id == exchange_id
                    && active.concluding_deadline.is_some()
            );
            if awaiting_ack {
                self.conclude_active(None);
            }
            return;
        }

        let Some(active) = self.active.as_mut() else {
            warn!(exchange_id, "Turn spoken with no active exchange");
            return;
        };
        if active.driver.exchange().id != exchange_id {
            warn!(exchange_id, "Turn spoken for a different exchange");
            return;
        }

        let turn_kind = match kind {
            SpokenKind::Opening => TurnKind::Opening,
            SpokenKind::FollowUp => TurnKind::FollowUp,
            SpokenKind::Escalation => TurnKind::Escalation,
            _ => unreachable!(),
        };

        match active.driver.record_agent_turn(text, turn_kind, now) {
            Ok(_) => {
                let turn = active.driver.exchange().turn_count();
                let event = match kind {
                    SpokenKind::Opening => SessionEvent::QuestionAsked {
                        agent_id: agent_id.to_string(),
                        exchange_id: exchange_id.to_string(),
                        turn,
                        text: text.to_string(),
                        timestamp: now,
                    },
                    SpokenKind::FollowUp => SessionEvent::FollowUpIssued {
                        agent_id: agent_id.to_string(),
                        exchange_id: exchange_id.to_string(),
                        turn,
                        text: text.to_string(),
                        timestamp: now,
                    },
                    _ => SessionEvent::EscalationIssued {
                        agent_id: agent_id.to_string(),
                        exchange_id: exchange_id.to_string(),
                        turn,
                        text: text.to_string(),
                        timestamp: now,
                    },
                };
                let _ = self.bus.publish(event);
            }
            Err(e) => warn!(exchange_id, "Rejected agent turn: {}", e),
        }
    }

    fn handle_evaluation(&mut self, exchange_id: &str, evaluation: Evaluation) -> EvaluationVerdict {
        let now = Utc::now();
        let Some(active) = self.active.as_mut() else {
            warn!(exchange_id, "Evaluation reported with no active exchange");
            return EvaluationVerdict::ConcludeIntervened;
        };
        if active.driver.exchange().id != exchange_id {
            warn!(exchange_id, "Evaluation reported for a different exchange");
            return EvaluationVerdict::ConcludeIntervened;
        }

        let turn = active.driver.exchange().turn_count();
        let _ = self.bus.publish(SessionEvent::ExchangeTurnRecorded {
            exchange_id: exchange_id.to_string(),
            turn,
            outcome: evaluation.outcome,
            timestamp: now,
        });

        match active.driver.apply_evaluation(&evaluation, now) {
            Ok(crate::exchange::NextStep::Complete) => {
                if active.driver.exchange().state == ExchangeState::ResolvedSatisfied {
                    // Let the agent speak its acknowledgment before the
                    // moderator bridges back; the tick timer backstops a
                    // runner that never does.
                    active.concluding_deadline = Some(
                        now + Duration::seconds(self.config.exchange_timeout_secs as i64),
                    );
                    EvaluationVerdict::ConcludeSatisfied
                } else {
                    self.conclude_active(None);
                    EvaluationVerdict::ConcludeIntervened
                }
            }
            Ok(_) => EvaluationVerdict::Continue,
            Err(e) => {
                warn!(exchange_id, "Rejected evaluation: {}", e);
                EvaluationVerdict::Continue
            }
        }
    }

    // ── Bus event handling ──────────────────────────────────────────────

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TranscriptAppended { segment, .. } => {
                if !(segment.speaker.is_presenter() && segment.is_final) {
                    return;
                }
                if self.route_presenter_response(&segment.text) {
                    return;
                }
                // A presenter pause with no exchange pending is a grant
                // opportunity.
                if let Some(winner) = self.try_dispatch(DispatchTrigger::Pause) {
                    self.grant_via_directive(winner, true);
                }
            }
            SessionEvent::SlideChanged { .. } => {
                if self.config.mode == InteractionMode::SectionBreaks {
                    self.grant_window_until = Some(
                        Utc::now()
                            + Duration::seconds(self.config.section_break_window_secs as i64),
                    );
                }
                if let Some(winner) = self.try_dispatch(DispatchTrigger::SlideChange) {
                    self.grant_via_directive(winner, true);
                }
            }
            _ => {}
        }
    }

    /// Feed a final presenter segment into the active exchange or pile-on.
    /// Returns true when the segment was consumed as a response.
    fn route_presenter_response(&mut self, text: &str) -> bool {
        let now = Utc::now();

        if let Some(active) = self.active.as_mut() {
            if active.concluding_deadline.is_none()
                && active.driver.next_step() == crate::exchange::NextStep::AwaitPresenter
            {
                let exchange_id = active.driver.exchange().id.clone();
                if active.driver.record_presenter_response(text, now).is_ok() {
                    let turn = active.driver.exchange().turn_count();
                    let prompt = ExchangePrompt::Evaluate {
                        exchange_id,
                        turn,
                        presenter_text: text.to_string(),
                    };
                    if active.seat.try_send(prompt).is_err() {
                        warn!("Exchange seat full; evaluation prompt dropped");
                    }
                    return true;
                }
            }
            return false;
        }

        if let Some(post) = self.resolving.as_mut() {
            if let Some(pile) = post.pile_on.as_mut() {
                if let Some(statement) = pile.statement.take() {
                    let pile_record = PileOn {
                        agent_id: pile.agent_id.clone(),
                        statement,
                        presenter_response: Some(text.to_string()),
                        executed_at: now,
                    };
                    self.complete_pile_on(pile_record);
                    return true;
                }
            }
        }

        false
    }

    // ── Periodic checks ─────────────────────────────────────────────────

    fn handle_tick(&mut self) {
        let now = Utc::now();

        // Exchange timeout: the presenter went quiet mid-exchange.
        let timed_out = self
            .active
            .as_ref()
            .map(|a| a.driver.presenter_timed_out(now))
            .unwrap_or(false);
        if timed_out {
            info!("Exchange timed out awaiting presenter response");
            self.conclude_active(Some(InterventionReason::PresenterTimeout));
            return;
        }

        // Acknowledgment backstop after a satisfied verdict.
        let ack_overdue = self
            .active
            .as_ref()
            .and_then(|a| a.concluding_deadline)
            .map(|d| now >= d)
            .unwrap_or(false);
        if ack_overdue {
            self.conclude_active(None);
            return;
        }

        // Pile-on backstop: statement spoken but presenter moved on, or
        // the invited agent never spoke.
        let pile_overdue = self
            .resolving
            .as_ref()
            .and_then(|p| p.pile_on.as_ref())
            .map(|p| now - p.since >= Duration::seconds(self.config.exchange_timeout_secs as i64))
            .unwrap_or(false);
        if pile_overdue {
            let statement = self
                .resolving
                .as_mut()
                .and_then(|p| p.pile_on.as_mut())
                .and_then(|p| p.statement.take());
            match statement {
                Some(statement) => {
                    let agent_id = self
                        .resolving
                        .as_ref()
                        .and_then(|p| p.pile_on.as_ref())
                        .map(|p| p.agent_id.clone())
                        .unwrap_or_default();
                    self.complete_pile_on(PileOn {
                        agent_id,
                        statement,
                        presenter_response: None,
                        executed_at: now,
                    });
                }
                None => {
                    if let Some(post) = self.resolving.as_mut() {
                        post.pile_on = None;
                    }
                    self.finish_resolution();
                }
            }
            return;
        }

        // Engagement backstop: the session has gone quiet.
        let quiet = now - self.last_exchange_end
            >= Duration::seconds(self.config.quiet_period_secs as i64);
        if quiet && self.grant_allowed_now() {
            if let Some(winner) = self.try_dispatch(DispatchTrigger::PostResolution) {
                info!(agent_id = %winner.agent_id, "Engagement backstop dispatching queued request");
                self.grant_via_directive(winner, true);
                return;
            }
            if let Some(request) = self.backstop_candidate_request() {
                info!(agent_id = %request.agent_id, "Engagement backstop prompting agent");
                self.grant_via_directive(request, false);
                return;
            }
        }

        if let Some(winner) = self.try_dispatch(DispatchTrigger::Tick) {
            self.grant_via_directive(winner, true);
        }
    }

    /// Build a synthetic request for the best agent holding a candidate.
    fn backstop_candidate_request(&self) -> Option<FloorRequest> {
        let now = Utc::now();
        let slide = self.store.slide_index();
        let mut requests: Vec<FloorRequest> = self
            .store
            .candidates()
            .into_values()
            .filter(|c| self.directives.contains_key(&c.agent_id))
            .filter(|c| self.cooldown_ok(&c.agent_id, now))
            .map(|c| FloorRequest {
                agent_id: c.agent_id.clone(),
                urgency: 0.0,
                focus_score: if c.slide_index == slide { 1.0 } else { 0.0 },
                candidate_generated_at: Some(c.generated_at),
                requested_at: now,
                reason: "engagement backstop".to_string(),
            })
            .collect();
        requests.sort_by(|a, b| selection_cmp(a, b, &self.standings));
        requests.into_iter().next()
    }

    // ── Floor dispatch ──────────────────────────────────────────────────

    fn cooldown_ok(&self, agent_id: &str, now: DateTime<Utc>) -> bool {
        match self.last_grant.get(agent_id) {
            Some(last) => now - *last >= Duration::seconds(self.config.agent_cooldown_secs as i64),
            None => true,
        }
    }

    fn throttled(&self) -> bool {
        let elapsed = (Utc::now() - self.started_at).num_milliseconds() as f64 / 1_000.0;
        if elapsed <= 0.0 {
            return false;
        }
        let spoken: f64 = self.speaking_secs.values().sum();
        spoken / elapsed > self.config.speaking_time_ceiling
    }

    fn grant_allowed_now(&self) -> bool {
        self.phase.current() == SessionPhase::Presenting
            && !self.ending
            && self.active.is_none()
            && self.resolving.is_none()
            && !self.throttled()
    }

    fn mode_allows(&self, trigger: DispatchTrigger) -> bool {
        // A freed floor always replays the queue, regardless of mode — a
        // queued request must never be stranded.
        if trigger == DispatchTrigger::PostResolution {
            return true;
        }
        match self.config.mode {
            InteractionMode::Opportunistic => true,
            InteractionMode::HandRaise => trigger == DispatchTrigger::Pause,
            InteractionMode::SectionBreaks => self
                .grant_window_until
                .map(|until| Utc::now() <= until)
                .unwrap_or(false),
        }
    }

    fn try_dispatch(&mut self, trigger: DispatchTrigger) -> Option<FloorRequest> {
        if !self.grant_allowed_now() || !self.mode_allows(trigger) {
            return None;
        }
        let now = Utc::now();
        let directives = &self.directives;
        let last_grant = &self.last_grant;
        let cooldown = Duration::seconds(self.config.agent_cooldown_secs as i64);
        self.queue.pop_best(&self.standings, |request| {
            directives.contains_key(&request.agent_id)
                && match last_grant.get(&request.agent_id) {
                    Some(last) => now - *last >= cooldown,
                    None => true,
                }
        })
    }

    /// Open an exchange for a winning request and build the grant.
    fn open_exchange(&mut self, request: FloorRequest, replayed: bool) -> FloorGrant {
        let now = Utc::now();
        self.exchange_counter += 1;
        let exchange_id = format!("ex-{}", self.exchange_counter);
        let agent_id = request.agent_id.clone();
        let display_name = self
            .display_names
            .get(&agent_id)
            .cloned()
            .unwrap_or_else(|| agent_id.clone());

        let claim_id = self.store.candidate(&agent_id).and_then(|c| c.claim_id);
        let slide_index = self.store.slide_index();

        let _ = self.phase.advance(SessionPhase::QaTrigger, &request.reason);
        let _ = self.bus.publish(SessionEvent::PhaseChanged {
            from: SessionPhase::Presenting,
            to: SessionPhase::QaTrigger,
            timestamp: now,
        });

        let (line, purpose, acknowledgment) = if replayed {
            let line = self.moderator.acknowledge(&display_name);
            (line.clone(), ModeratorPurpose::Acknowledgment, Some(line))
        } else {
            (
                self.moderator.announce(&display_name),
                ModeratorPurpose::Announcement,
                None,
            )
        };
        let _ = self.bus.publish(SessionEvent::ModeratorSpoke {
            line,
            purpose,
            timestamp: now,
        });

        let _ = self.phase.advance(SessionPhase::InExchange, "announcement delivered");
        let _ = self.bus.publish(SessionEvent::PhaseChanged {
            from: SessionPhase::QaTrigger,
            to: SessionPhase::InExchange,
            timestamp: now,
        });

        let driver = ExchangeDriver::new(
            &exchange_id,
            &agent_id,
            slide_index,
            claim_id.clone(),
            self.config.max_turns(),
            Duration::seconds(self.config.exchange_timeout_secs as i64),
            now,
        );

        let (seat_tx, seat_rx) = mpsc::channel(8);
        let _ = seat_tx.try_send(ExchangePrompt::Open {
            exchange_id: exchange_id.clone(),
            claim_id: claim_id.clone(),
            is_pile_on: false,
        });

        self.last_grant.insert(agent_id.clone(), now);
        self.active = Some(ActiveExchange {
            driver,
            agent_id: agent_id.clone(),
            seat: seat_tx,
            concluding_deadline: None,
        });

        let _ = self.bus.publish(SessionEvent::FloorGranted {
            agent_id: agent_id.clone(),
            exchange_id: exchange_id.clone(),
            replayed,
            timestamp: now,
        });
        let _ = self.bus.publish(SessionEvent::ExchangeStarted {
            exchange_id: exchange_id.clone(),
            agent_id,
            slide_index,
            claim_id,
            timestamp: now,
        });

        FloorGrant {
            exchange_id,
            acknowledgment,
            is_pile_on: false,
            prompts: seat_rx,
        }
    }

    fn grant_via_directive(&mut self, request: FloorRequest, replayed: bool) {
        let agent_id = request.agent_id.clone();
        let tx = self.directives.get(&agent_id).cloned();
        let grant = self.open_exchange(request, replayed);
        match tx {
            Some(tx) => {
                if tx.try_send(AgentDirective::FloorGranted(grant)).is_err() {
                    warn!(agent_id = %agent_id, "Directive channel full; grant dropped, resolving exchange");
                    self.conclude_active(Some(InterventionReason::AgentUnavailable));
                }
            }
            None => {
                warn!(agent_id = %agent_id, "Grant for unregistered agent");
                self.conclude_active(Some(InterventionReason::AgentUnavailable));
            }
        }
    }

    // ── Resolution ──────────────────────────────────────────────────────

    /// Resolve the active exchange (forcing with `reason` if still open)
    /// and move into the resolving phase with an optional pile-on.
    fn conclude_active(&mut self, force_reason: Option<InterventionReason>) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let now = Utc::now();

        if let Some(reason) = force_reason {
            active.driver.force_resolve(reason, now);
        }

        let exchange = active.driver.exchange();
        let exchange_id = exchange.id.clone();
        let state = exchange.state;
        let turns = exchange.turn_count();
        let claim_id = exchange.claim_id.clone();

        let _ = self.bus.publish(SessionEvent::ExchangeResolved {
            exchange_id: exchange_id.clone(),
            agent_id: active.agent_id.clone(),
            state,
            turns,
            timestamp: now,
        });
        let _ = active.seat.try_send(ExchangePrompt::Concluded {
            exchange_id: exchange_id.clone(),
            state,
        });

        let _ = self.phase.advance(SessionPhase::Resolving, "exchange resolved");
        let _ = self.bus.publish(SessionEvent::PhaseChanged {
            from: SessionPhase::InExchange,
            to: SessionPhase::Resolving,
            timestamp: now,
        });

        let line = self.moderator.bridge_back();
        let _ = self.bus.publish(SessionEvent::ModeratorSpoke {
            line,
            purpose: ModeratorPurpose::BridgeBack,
            timestamp: now,
        });

        let pile_on = if self.ending {
            None
        } else {
            self.invite_pile_on(&exchange_id, &active.agent_id, claim_id.as_deref(), now)
        };

        self.resolving = Some(PostExchange {
            driver: active.driver,
            pile_on,
        });

        if self.resolving.as_ref().map(|p| p.pile_on.is_none()).unwrap_or(false) {
            self.finish_resolution();
        }
    }

    /// Gate and start at most one pile-on: another agent whose candidate
    /// references the resolved exchange's claim, with session time left.
    fn invite_pile_on(
        &mut self,
        exchange_id: &str,
        primary_agent: &str,
        claim_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<PileOnRun> {
        let claim_id = claim_id?;

        let elapsed = (now - self.started_at).num_seconds() as u64;
        let remaining = self.config.session_budget_secs.saturating_sub(elapsed);
        if remaining < self.config.pile_on_min_remaining_secs {
            return None;
        }

        let mut candidates: Vec<_> = self
            .store
            .candidates()
            .into_values()
            .filter(|c| c.agent_id != primary_agent)
            .filter(|c| c.claim_id.as_deref() == Some(claim_id))
            .filter(|c| self.directives.contains_key(&c.agent_id))
            .filter(|c| self.cooldown_ok(&c.agent_id, now))
            .collect();
        candidates.sort_by_key(|c| {
            self.standings
                .get(&c.agent_id)
                .map(|s| s.roster_position)
                .unwrap_or(usize::MAX)
        });
        let candidate = candidates.into_iter().next()?;
        let agent_id = candidate.agent_id.clone();

        let (seat_tx, seat_rx) = mpsc::channel(4);
        let _ = seat_tx.try_send(ExchangePrompt::Open {
            exchange_id: exchange_id.to_string(),
            claim_id: Some(claim_id.to_string()),
            is_pile_on: true,
        });

        let grant = FloorGrant {
            exchange_id: exchange_id.to_string(),
            acknowledgment: None,
            is_pile_on: true,
            prompts: seat_rx,
        };
        let tx = self.directives.get(&agent_id)?.clone();
        if tx.try_send(AgentDirective::FloorGranted(grant)).is_err() {
            return None;
        }

        self.last_grant.insert(agent_id.clone(), now);
        debug!(agent_id = %agent_id, exchange_id, "Pile-on invited");
        Some(PileOnRun {
            agent_id,
            seat: seat_tx,
            statement: None,
            since: now,
        })
    }

    fn complete_pile_on(&mut self, record: PileOn) {
        let now = Utc::now();
        if let Some(post) = self.resolving.as_mut() {
            let exchange_id = post.driver.exchange().id.clone();
            let agent_id = record.agent_id.clone();
            if let Err(e) = post.driver.attach_pile_on(record) {
                warn!(exchange_id = %exchange_id, "Pile-on rejected: {}", e);
            } else {
                let _ = self.bus.publish(SessionEvent::PileOnExecuted {
                    exchange_id: exchange_id.clone(),
                    agent_id,
                    timestamp: now,
                });
            }
            if let Some(pile) = post.pile_on.take() {
                let _ = pile.seat.try_send(ExchangePrompt::Concluded {
                    exchange_id,
                    state: post.driver.exchange().state,
                });
            }
        }
        self.finish_resolution();
    }

    /// Archive the resolved exchange and return to presenting.
    fn finish_resolution(&mut self) {
        let Some(post) = self.resolving.take() else {
            return;
        };
        let now = Utc::now();
        let (exchange, challenge) = post.driver.into_parts();

        if let Err(e) = self.store.record_exchange(exchange, challenge) {
            warn!("Could not record exchange: {}", e);
        }
        self.last_exchange_end = now;

        if !self.phase.current().is_terminal() {
            let _ = self.phase.advance(SessionPhase::Presenting, "bridge-back delivered");
            let _ = self.bus.publish(SessionEvent::PhaseChanged {
                from: SessionPhase::Resolving,
                to: SessionPhase::Presenting,
                timestamp: now,
            });
        }

        if let Some(winner) = self.try_dispatch(DispatchTrigger::PostResolution) {
            self.grant_via_directive(winner, true);
        }
    }

    // ── Session end ─────────────────────────────────────────────────────

    fn end_session(&mut self) -> SessionArchive {
        let now = Utc::now();
        self.ending = true;
        info!(session_id = %self.session_id, "Session ending");

        let _ = self.bus.publish(SessionEvent::SessionEnding {
            session_id: self.session_id.clone(),
            timestamp: now,
        });

        // A session ending mid-exchange forces immediate resolution as
        // intervened before any agent reaches cooldown.
        if self.active.is_some() {
            self.conclude_active(Some(InterventionReason::SessionEnded));
        }
        if self.resolving.is_some() {
            if let Some(post) = self.resolving.as_mut() {
                if let Some(pile) = post.pile_on.take() {
                    let _ = pile.seat.try_send(ExchangePrompt::Concluded {
                        exchange_id: post.driver.exchange().id.clone(),
                        state: post.driver.exchange().state,
                    });
                }
            }
            self.finish_resolution();
        }

        self.queue.drain();
        for (agent_id, tx) in &self.directives {
            if tx.try_send(AgentDirective::SessionEnding).is_err() {
                warn!(agent_id = %agent_id, "Could not deliver session-ending directive");
            }
        }

        let _ = self.phase.advance(SessionPhase::Ended, "session ended");

        let exchanges = self.store.exchanges();
        let archive = SessionArchive {
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            ended_at: now,
            transcript: self.store.transcript(),
            exchanges,
            unresolved_challenges: self.store.unresolved_challenges(),
            profiles: self.store.profiles(),
            speaking_time: SpeakingTime {
                per_agent_secs: self.speaking_secs.clone(),
                elapsed_secs: (now - self.started_at).num_milliseconds() as f64 / 1_000.0,
            },
        };

        let _ = self.bus.publish(SessionEvent::SessionEnded {
            session_id: self.session_id.clone(),
            exchanges: archive.exchanges.len() as u32,
            timestamp: now,
        });

        info!("{}", archive.summary_line());
        archive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextBudget, ContextStore};
    use crate::events::EventBus;
    use crate::exchange::EvaluationOutcome;
    use std::sync::Arc;

    fn fixture() -> (CoordinatorHandle, SharedEventBus, Arc<ContextStore>) {
        let store = ContextStore::new(ContextBudget::default()).shared();
        store.load_claims(vec![]);
        let bus = EventBus::new().shared();
        let config = SessionConfig {
            agent_cooldown_secs: 0,
            tick_interval_ms: 20,
            ..Default::default()
        };
        let handle = spawn(store.clone(), bus.clone(), config);
        (handle, bus, store)
    }

    fn request(agent_id: &str, urgency: f64) -> FloorRequest {
        FloorRequest {
            agent_id: agent_id.to_string(),
            urgency,
            focus_score: 0.5,
            candidate_generated_at: Some(Utc::now()),
            requested_at: Utc::now(),
            reason: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_grant() {
        let (handle, _bus, _store) = fixture();
        let _directives = handle.register_agent("vera", "Vera").await.unwrap();

        let decision = handle.request_floor(request("vera", 0.5)).await.unwrap();
        let grant = match decision {
            FloorDecision::Granted(grant) => grant,
            other => panic!("expected grant, got {:?}", other),
        };
        assert!(!grant.is_pile_on);
        assert!(grant.acknowledgment.is_none());
    }

    #[tokio::test]
    async fn test_second_request_queued_while_exchange_open() {
        let (handle, _bus, _store) = fixture();
        let _v = handle.register_agent("vera", "Vera").await.unwrap();
        let _m = handle.register_agent("marcus", "Marcus").await.unwrap();

        let first = handle.request_floor(request("vera", 0.5)).await.unwrap();
        assert!(matches!(first, FloorDecision::Granted(_)));

        let second = handle.request_floor(request("marcus", 0.9)).await.unwrap();
        assert!(matches!(second, FloorDecision::Queued { .. }));
    }

    #[tokio::test]
    async fn test_seat_opens_and_opening_turn_recorded() {
        let (handle, bus, _store) = fixture();
        let mut events = bus.subscribe();
        let _d = handle.register_agent("vera", "Vera").await.unwrap();

        let decision = handle.request_floor(request("vera", 0.5)).await.unwrap();
        let mut grant = match decision {
            FloorDecision::Granted(grant) => grant,
            other => panic!("expected grant, got {:?}", other),
        };

        let prompt = grant.prompts.recv().await.unwrap();
        assert!(matches!(prompt, ExchangePrompt::Open { is_pile_on: false, .. }));

        handle
            .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "q1", 1_000)
            .await
            .unwrap();

        let mut saw_question = false;
        for _ in 0..10 {
            match events.try_recv() {
                Ok(event) if event.event_type() == "question_asked" => {
                    saw_question = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        }
        assert!(saw_question);
    }

    #[tokio::test]
    async fn test_evaluation_without_presenter_response_rejected() {
        let (handle, _bus, _store) = fixture();
        let _d = handle.register_agent("vera", "Vera").await.unwrap();

        let decision = handle.request_floor(request("vera", 0.5)).await.unwrap();
        let grant = match decision {
            FloorDecision::Granted(grant) => grant,
            other => panic!("expected grant, got {:?}", other),
        };

        handle
            .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "q1", 1_000)
            .await
            .unwrap();

        // No presenter response was routed yet — the driver rejects the
        // evaluation and the coordinator rules Continue (the runner retries
        // after the next Evaluate prompt).
        let verdict = handle
            .report_evaluation(
                &grant.exchange_id,
                Evaluation {
                    outcome: EvaluationOutcome::Satisfied,
                    spoken_text: "thanks".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(verdict, EvaluationVerdict::Continue);
    }

    #[tokio::test]
    async fn test_end_session_produces_archive() {
        let (handle, _bus, _store) = fixture();
        let _d = handle.register_agent("vera", "Vera").await.unwrap();

        let archive = handle.end_session().await.unwrap();
        assert_eq!(archive.exchanges.len(), 0);
        assert!(archive.summary_line().contains("0 exchanges"));
    }

    #[tokio::test]
    async fn test_request_after_end_denied() {
        let (handle, _bus, _store) = fixture();
        let _d = handle.register_agent("vera", "Vera").await.unwrap();
        let _ = handle.end_session().await.unwrap();

        // The coordinator task has exited; the channel is closed.
        assert!(handle.request_floor(request("vera", 0.5)).await.is_err());
    }
}
