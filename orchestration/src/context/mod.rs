//! Context store — accumulating, session-scoped knowledge.
//!
//! The single source of truth for the running transcript, deck claims,
//! exchange history, per-agent presenter profiles, and candidate slots.
//! Read-optimized for assembling a bounded generation payload per agent.
//!
//! # Modules
//!
//! - [`transcript`] — immutable transcript segments
//! - [`claims`] — deck claims and mention matching
//! - [`profile`] — per-agent presenter profiles
//! - [`budget`] — bounded-compression policy for payload assembly
//! - [`store`] — the store itself
//! - [`ingest`] — STT-boundary adapter deriving slide/claim events

pub mod budget;
pub mod claims;
pub mod ingest;
pub mod profile;
pub mod store;
pub mod transcript;

pub use budget::{ContextBudget, TokenEstimator, WordCountEstimator};
pub use claims::{Claim, ClaimKind, ClaimMatcher, ClaimStrength, Slide, SlideManifest};
pub use ingest::TranscriptIngest;
pub use profile::{PresenterProfile, ReadinessLevel, ResponseObservation, ResponsePattern};
pub use store::{
    AgentContext, AppendOutcome, ContextError, ContextResult, ContextStore, SharedContextStore,
};
pub use transcript::TranscriptSegment;
