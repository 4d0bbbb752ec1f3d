//! Per-agent state machine — legal transition guards and a published log.
//!
//! Wraps the engine's `AgentState` graph with an audit log and bus
//! notifications so every state change is observable by the UI.

use chrono::{DateTime, Utc};
use orchestration::{AgentState, SessionEvent, SharedEventBus};
use serde::{Deserialize, Serialize};

/// A recorded agent state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal agent transition {from} → {to}")]
pub struct IllegalAgentTransition {
    pub from: AgentState,
    pub to: AgentState,
}

/// Tracks one agent's runtime state.
pub struct AgentStateMachine {
    agent_id: String,
    current: AgentState,
    transitions: Vec<AgentTransition>,
    bus: SharedEventBus,
}

impl AgentStateMachine {
    /// Create a machine starting at `Loading`.
    pub fn new(agent_id: &str, bus: SharedEventBus) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            current: AgentState::Loading,
            transitions: Vec::new(),
            bus,
        }
    }

    /// Current state.
    pub fn current(&self) -> AgentState {
        self.current
    }

    /// Attempt a transition; publishes the change on success.
    pub fn advance(&mut self, to: AgentState, reason: &str) -> Result<(), IllegalAgentTransition> {
        if !self.current.can_advance_to(to) {
            return Err(IllegalAgentTransition {
                from: self.current,
                to,
            });
        }

        let from = self.current;
        self.transitions.push(AgentTransition {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.current = to;

        tracing::debug!(agent_id = %self.agent_id, from = %from, to = %to, reason, "Agent state");
        let _ = self.bus.publish(SessionEvent::AgentStateChanged {
            agent_id: self.agent_id.clone(),
            from,
            to,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Walk back to `Listening` through legal edges, wherever we are.
    ///
    /// Used when a cycle is abandoned (generation failed, floor denied) and
    /// on shutdown before entering cooldown.
    pub fn settle_to_listening(&mut self, reason: &str) {
        loop {
            match self.current {
                AgentState::Listening | AgentState::Cooldown => break,
                AgentState::Loading => {
                    let _ = self.advance(AgentState::Listening, reason);
                }
                AgentState::Evaluating | AgentState::Generating | AgentState::Ready => {
                    let _ = self.advance(AgentState::Listening, reason);
                }
                AgentState::InExchange => {
                    let _ = self.advance(AgentState::Listening, reason);
                }
            }
        }
    }

    /// Enter terminal cooldown (via `Listening` if needed).
    pub fn shutdown(&mut self, reason: &str) {
        self.settle_to_listening(reason);
        if self.current == AgentState::Listening {
            let _ = self.advance(AgentState::Cooldown, reason);
        }
    }

    /// Full transition log.
    pub fn transitions(&self) -> &[AgentTransition] {
        &self.transitions
    }
}
