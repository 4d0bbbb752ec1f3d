//! Panelist agents for the panel rehearsal engine.
//!
//! Each panelist is an independent runner task built on the orchestration
//! crate: persona configuration, the per-agent state machine, the ask-now
//! heuristic, the urgency model, and the exchange-execution loop.

pub mod heuristics;
pub mod persona;
pub mod runner;
pub mod state;
pub mod urgency;

pub use heuristics::{
    evaluate_trigger, AgentView, HoldReason, TriggerConfig, TriggerDecision, TriggerReason,
};
pub use persona::{Persona, Roster, RosterError, VoiceProfile};
pub use runner::{AgentRunner, AgentRunnerConfig};
pub use state::{AgentStateMachine, AgentTransition, IllegalAgentTransition};
pub use urgency::{UrgencyConfig, UrgencyMeter};
