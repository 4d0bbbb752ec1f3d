//! Exchange entities — turns, outcomes, resolution states, pile-ons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, ClaimId, ExchangeId};

/// Resolution state of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// Exchange is in progress.
    Open,
    /// Agent reported its concern was addressed.
    ResolvedSatisfied,
    /// Coordinator force-resolved (turn limit, timeout, session end).
    ResolvedIntervened,
}

impl ExchangeState {
    /// Whether the exchange has reached a terminal state.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::ResolvedSatisfied => write!(f, "resolved_satisfied"),
            Self::ResolvedIntervened => write!(f, "resolved_intervened"),
        }
    }
}

/// The agent's verdict on one presenter response.
///
/// This is the closed set of outcome tags the coordinator branches on.
/// The accompanying free text is never parsed for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// Concern adequately addressed — exchange ends.
    Satisfied,
    /// Response partial or vague — one targeted follow-up.
    FollowUp,
    /// Response weak, evasive, or contradictory — pointed escalation.
    Escalate,
}

impl std::fmt::Display for EvaluationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Satisfied => write!(f, "satisfied"),
            Self::FollowUp => write!(f, "follow_up"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// One evaluation result: outcome tag plus the text the agent will speak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// The outcome tag — the only part control flow may branch on.
    pub outcome: EvaluationOutcome,
    /// Spoken text (acknowledgment, follow-up, or escalation statement).
    pub spoken_text: String,
}

/// What kind of agent utterance opened a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// The exchange's opening question.
    Opening,
    /// A follow-up targeting a specific gap.
    FollowUp,
    /// A pointed statement naming a contradiction.
    Escalation,
}

impl std::fmt::Display for TurnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::FollowUp => write!(f, "follow_up"),
            Self::Escalation => write!(f, "escalation"),
        }
    }
}

/// One turn: an agent utterance plus the presenter's response and its
/// evaluation, once both have arrived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Turn number within the exchange (1-indexed).
    pub number: u32,
    /// What the agent said.
    pub agent_text: String,
    /// Kind of agent utterance.
    pub kind: TurnKind,
    /// The presenter's response, once observed.
    pub presenter_text: Option<String>,
    /// The agent's evaluation of the response, once reported.
    pub outcome: Option<EvaluationOutcome>,
    /// When the agent utterance was delivered.
    pub asked_at: DateTime<Utc>,
    /// When the presenter response was observed.
    pub responded_at: Option<DateTime<Utc>>,
}

/// Why the coordinator force-resolved an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionReason {
    /// Configured turn limit reached without satisfaction.
    TurnLimitReached,
    /// Presenter did not respond within the exchange timeout.
    PresenterTimeout,
    /// Session ended while the exchange was open.
    SessionEnded,
    /// The agent could not continue (generation unavailable).
    AgentUnavailable,
}

impl std::fmt::Display for InterventionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TurnLimitReached => write!(f, "turn_limit_reached"),
            Self::PresenterTimeout => write!(f, "presenter_timeout"),
            Self::SessionEnded => write!(f, "session_ended"),
            Self::AgentUnavailable => write!(f, "agent_unavailable"),
        }
    }
}

/// Record of a challenge the presenter never adequately answered.
///
/// Created whenever an exchange resolves as intervened. First-class outcome
/// data for the debrief, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnresolvedChallenge {
    /// Exchange that produced this record.
    pub exchange_id: ExchangeId,
    /// Agent whose concern went unanswered.
    pub agent_id: AgentId,
    /// The claim under challenge, if the exchange targeted one.
    pub claim_id: Option<ClaimId>,
    /// Why the exchange was cut off.
    pub reason: InterventionReason,
    /// When the record was created.
    pub noted_at: DateTime<Utc>,
}

/// A single extra remark from a second agent after an exchange resolves.
///
/// Structurally a degenerate one-turn exchange: exactly one statement and
/// one presenter response, never recursable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PileOn {
    /// The piling-on agent.
    pub agent_id: AgentId,
    /// The single statement.
    pub statement: String,
    /// The presenter's single response (None if the presenter moved on).
    pub presenter_response: Option<String>,
    /// When the statement was delivered.
    pub executed_at: DateTime<Utc>,
}

/// A bounded multi-turn dialogue between one agent and the presenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    /// Unique exchange identifier.
    pub id: ExchangeId,
    /// Slide the exchange is anchored to.
    pub slide_index: u32,
    /// The primary (questioning) agent.
    pub agent_id: AgentId,
    /// The claim that originated the question, if any.
    pub claim_id: Option<ClaimId>,
    /// Ordered turns.
    pub turns: Vec<Turn>,
    /// Current resolution state.
    pub state: ExchangeState,
    /// When the floor was granted.
    pub opened_at: DateTime<Utc>,
    /// When the exchange resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// At most one pile-on, attached after resolution.
    pub pile_on: Option<PileOn>,
    /// Why the exchange was intervened, if it was.
    pub intervention: Option<InterventionReason>,
}

impl Exchange {
    /// Create a new open exchange.
    pub fn new(
        id: &str,
        agent_id: &str,
        slide_index: u32,
        claim_id: Option<ClaimId>,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.to_string(),
            slide_index,
            agent_id: agent_id.to_string(),
            claim_id,
            turns: Vec::new(),
            state: ExchangeState::Open,
            opened_at,
            resolved_at: None,
            pile_on: None,
            intervention: None,
        }
    }

    /// Number of turns opened so far.
    pub fn turn_count(&self) -> u32 {
        self.turns.len() as u32
    }

    /// The most recent reported evaluation outcome, if any.
    pub fn last_outcome(&self) -> Option<EvaluationOutcome> {
        self.turns.iter().rev().find_map(|t| t.outcome)
    }

    /// Whether the exchange has resolved.
    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// Whether any turn escalated.
    pub fn escalated(&self) -> bool {
        self.turns
            .iter()
            .any(|t| t.kind == TurnKind::Escalation || t.outcome == Some(EvaluationOutcome::Escalate))
    }

    /// Compact status line for logging.
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] {} turns | agent={} slide={}",
            self.state,
            self.turn_count(),
            self.agent_id,
            self.slide_index
        )
    }
}
