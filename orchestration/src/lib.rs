//! Panel Rehearsal Orchestration Engine
//!
//! The session orchestration and exchange engine behind a live panel
//! rehearsal: a human presenter speaks against a deck while autonomous
//! panelists listen, decide when to speak, hold bounded multi-turn
//! exchanges, and hide multi-second generation latency so the room feels
//! live.
//!
//! # Architecture
//!
//! - [`events`] — typed pub/sub bus; the only coordination fabric
//! - [`context`] — accumulating session knowledge with bounded payloads
//! - [`exchange`] — the bounded multi-turn exchange state machine
//! - [`session`] — the coordinator task owning phase, floor, and timing
//! - [`latency`] — candidates, freshness, streaming, and masking
//! - [`gateway`] — the generation/synthesis collaborator boundary
//!
//! # Data flow
//!
//! ```text
//! STT ─▶ TranscriptIngest ─▶ ContextStore + EventBus
//!                                 │
//!            AgentRunner ◀────────┴──▶ SessionCoordinator
//!                 │      RequestFloor / grants / prompts
//!                 ▼
//!         LatencyCompensator ─▶ SpeechFragment events ─▶ UI / synthesis
//! ```

pub mod context;
pub mod events;
pub mod exchange;
pub mod gateway;
pub mod latency;
pub mod session;
pub mod types;

// Re-export key event types
pub use events::{
    spawn_handler, EventBus, EventBusError, EventBusExt, EventFilter, FilteredReceiver,
    ModeratorPurpose, SessionEvent, SharedEventBus,
};

// Re-export key context types
pub use context::{
    AgentContext, Claim, ClaimKind, ClaimMatcher, ClaimStrength, ContextBudget, ContextError,
    ContextStore, PresenterProfile, ResponsePattern, SharedContextStore, SlideManifest,
    TranscriptIngest, TranscriptSegment,
};

// Re-export key exchange types
pub use exchange::{
    Evaluation, EvaluationOutcome, Exchange, ExchangeDriver, ExchangeState, InterventionReason,
    PileOn, Turn, TurnKind, UnresolvedChallenge,
};

// Re-export key session types
pub use session::{
    spawn_coordinator, AgentDirective, CoordinatorHandle, EvaluationVerdict, ExchangePrompt,
    FloorDecision, FloorGrant, FloorRequest, InteractionMode, IntensityLevel, SessionArchive,
    SessionConfig, SessionPhase, SpokenKind,
};

// Re-export key latency types
pub use latency::{
    CandidateQuestion, CompensatorConfig, ContextFingerprint, DeliveryReport, Freshness,
    FreshnessPolicy, LatencyCompensator, MaskingStage, StaleReason,
};

// Re-export key gateway types
pub use gateway::{
    CandidateRequest, EvaluationRequest, GatewayError, GeneratedCandidate, GenerationGateway,
    HttpGateway, ScriptedGateway, SharedGateway, UtteranceEvent, UtteranceIntent, UtteranceRequest,
};

// Re-export core identifier types
pub use types::{AgentId, AgentState, ClaimId, ExchangeId, SegmentId, SessionId, Speaker};
