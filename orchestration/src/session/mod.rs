//! Session orchestration — phase machine, floor arbitration, coordinator.
//!
//! # Modules
//!
//! - [`phase`] — session phase machine with explicit legal transitions
//! - [`config`] — interaction mode, intensity, and timing configuration
//! - [`floor`] — floor requests, queue, and deterministic priority orders
//! - [`moderator`] — announcement/acknowledgment/bridge-back line banks
//! - [`coordinator`] — the single-writer scheduler task
//! - [`archive`] — immutable end-of-session handover

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod floor;
pub mod moderator;
pub mod phase;

pub use archive::{SessionArchive, SpeakingTime};
pub use config::{ConfigError, InteractionMode, IntensityLevel, SessionConfig, TurnLimits};
pub use coordinator::{
    spawn as spawn_coordinator, AgentDirective, CoordinatorError, CoordinatorHandle,
    CoordinatorResult, EvaluationVerdict, ExchangePrompt, FloorDecision, FloorGrant, SpokenKind,
};
pub use floor::{conflict_cmp, selection_cmp, AgentStanding, DenyReason, FloorQueue, FloorRequest};
pub use moderator::{LineBank, Moderator};
pub use phase::{PhaseError, PhaseMachine, PhaseTransition, SessionPhase};
