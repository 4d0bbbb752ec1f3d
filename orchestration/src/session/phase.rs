//! Session phase machine — presentation flow with explicit legal transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a rehearsal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Presenter is speaking; agents listen and pre-generate.
    Presenting,
    /// An agent was selected; the moderator announcement is being delivered.
    QaTrigger,
    /// One agent holds the floor in an active exchange.
    InExchange,
    /// Bridge-back delivery and optional single pile-on.
    Resolving,
    /// Session over — terminal.
    Ended,
}

impl SessionPhase {
    /// Whether this is the terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ended)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [SessionPhase] {
        match self {
            Self::Presenting => &[Self::QaTrigger, Self::Ended],
            Self::QaTrigger => &[Self::InExchange, Self::Ended],
            Self::InExchange => &[Self::Resolving, Self::Ended],
            Self::Resolving => &[Self::Presenting, Self::Ended],
            Self::Ended => &[],
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Presenting => write!(f, "presenting"),
            Self::QaTrigger => write!(f, "qa_trigger"),
            Self::InExchange => write!(f, "in_exchange"),
            Self::Resolving => write!(f, "resolving"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// A recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for illegal phase transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid phase transition {from} → {to}")]
pub struct PhaseError {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// Tracks the current phase and its transition history.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: SessionPhase,
    transitions: Vec<PhaseTransition>,
}

impl PhaseMachine {
    /// Create a machine starting at `Presenting`.
    pub fn new() -> Self {
        Self {
            current: SessionPhase::Presenting,
            transitions: Vec::new(),
        }
    }

    /// Current phase.
    pub fn current(&self) -> SessionPhase {
        self.current
    }

    /// Attempt a transition, recording it on success.
    pub fn advance(&mut self, to: SessionPhase, reason: &str) -> Result<(), PhaseError> {
        if !self.current.valid_transitions().contains(&to) {
            return Err(PhaseError {
                from: self.current,
                to,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.current,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        tracing::debug!(from = %self.current, to = %to, reason, "Phase transition");
        self.current = to;
        Ok(())
    }

    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Full transition log.
    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
