//! Core identifier and shared runtime types used across the engine.

use serde::{Deserialize, Serialize};

/// Unique identifier for a rehearsal session.
pub type SessionId = String;

/// Unique identifier for a panelist agent.
pub type AgentId = String;

/// Unique identifier for an exchange.
pub type ExchangeId = String;

/// Unique identifier for a transcript segment.
pub type SegmentId = String;

/// Unique identifier for an extracted claim.
pub type ClaimId = String;

/// Who produced a unit of speech.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The human presenter.
    Presenter,
    /// The session moderator voice (coordinator-driven).
    Moderator,
    /// A panelist agent.
    Panelist(AgentId),
}

impl Speaker {
    /// Whether this speaker is the presenter.
    pub fn is_presenter(&self) -> bool {
        matches!(self, Self::Presenter)
    }

    /// The agent id, if this speaker is a panelist.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Panelist(id) => Some(id),
            _ => None,
        }
    }

    /// Stable key identifying this speaker's stream for ordering checks.
    pub fn stream_key(&self) -> String {
        match self {
            Self::Presenter => "presenter".to_string(),
            Self::Moderator => "moderator".to_string(),
            Self::Panelist(id) => format!("panelist:{}", id),
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Presenter => write!(f, "presenter"),
            Self::Moderator => write!(f, "moderator"),
            Self::Panelist(id) => write!(f, "panelist:{}", id),
        }
    }
}

/// Runtime state of a panelist agent.
///
/// `Loading` is the pre-session warmup phase; `Cooldown` is entered only on
/// session termination and is terminal. Normal turn-taking never passes
/// through `Cooldown` — post-exchange suppression is handled by the per-agent
/// cooldown timer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Persona and claims loading, observing warmup speech.
    Loading,
    /// Passively following the presentation.
    Listening,
    /// Running the ask-now heuristic.
    Evaluating,
    /// A candidate generation call is in flight.
    Generating,
    /// Holding a validated candidate, floor requested or requestable.
    Ready,
    /// Holding the floor in an active exchange.
    InExchange,
    /// Session has ended — terminal.
    Cooldown,
}

impl AgentState {
    /// Whether this is the terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cooldown)
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(self) -> &'static [AgentState] {
        match self {
            Self::Loading => &[Self::Listening],
            Self::Listening => &[Self::Evaluating, Self::Cooldown],
            Self::Evaluating => &[Self::Generating, Self::Listening],
            Self::Generating => &[Self::Ready, Self::Evaluating, Self::Listening],
            Self::Ready => &[Self::InExchange, Self::Evaluating, Self::Listening],
            Self::InExchange => &[Self::Listening],
            Self::Cooldown => &[],
        }
    }

    /// Whether a transition to `to` is legal.
    pub fn can_advance_to(self, to: AgentState) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "loading"),
            Self::Listening => write!(f, "listening"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Generating => write!(f, "generating"),
            Self::Ready => write!(f, "ready"),
            Self::InExchange => write!(f, "in_exchange"),
            Self::Cooldown => write!(f, "cooldown"),
        }
    }
}
