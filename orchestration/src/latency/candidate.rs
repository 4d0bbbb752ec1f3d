//! Pre-generated candidates and the freshness check.
//!
//! A candidate is a cache entry, not a commitment: it is speculatively
//! generated while the presenter talks, tagged with the context snapshot it
//! came from, and must pass a cheap freshness check immediately before use.
//! A stale candidate is never spoken — the fallback is live streaming
//! generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentId, ClaimId};

/// Compact snapshot of the context a candidate was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFingerprint {
    /// Global transcript sequence at generation time.
    pub transcript_seq: u64,
    /// Slide on screen at generation time.
    pub slide_index: u32,
    /// Number of contradicted claims at generation time.
    pub contradicted_claims: u32,
}

/// A speculative, pre-generated utterance owned by exactly one agent runner.
///
/// Overwritten, never appended: at most one live candidate per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateQuestion {
    /// Unique candidate identifier.
    pub id: String,
    /// Owning agent.
    pub agent_id: AgentId,
    /// The question text.
    pub text: String,
    /// Pre-synthesized audio, if the synthesis collaborator produced any.
    pub audio: Option<Vec<u8>>,
    /// Claim the question targets, if any.
    pub claim_id: Option<ClaimId>,
    /// Slide the question is anchored to.
    pub slide_index: u32,
    /// Context snapshot the candidate was generated from.
    pub fingerprint: ContextFingerprint,
    /// When generation completed.
    pub generated_at: DateTime<Utc>,
}

impl CandidateQuestion {
    /// Create a candidate from generation output.
    pub fn new(
        agent_id: &str,
        text: &str,
        claim_id: Option<ClaimId>,
        fingerprint: ContextFingerprint,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            text: text.to_string(),
            audio: None,
            claim_id,
            slide_index: fingerprint.slide_index,
            fingerprint,
            generated_at: Utc::now(),
        }
    }

    /// Age of the candidate in seconds at `now`.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.generated_at).num_seconds().max(0)
    }
}

/// Why a candidate failed the freshness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The slide moved on since generation.
    SlideChanged { from: u32, to: u32 },
    /// Too much new transcript arrived since generation.
    TranscriptMovedOn { new_segments: u64, allowed: u64 },
    /// The candidate aged out.
    Expired { age_secs: i64, max_secs: i64 },
    /// The target claim has since been contradicted — the premise is dead.
    ClaimContradicted { claim_id: ClaimId },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SlideChanged { from, to } => write!(f, "slide changed {} → {}", from, to),
            Self::TranscriptMovedOn {
                new_segments,
                allowed,
            } => write!(f, "{} new segments (allowed {})", new_segments, allowed),
            Self::Expired { age_secs, max_secs } => {
                write!(f, "candidate {}s old (max {}s)", age_secs, max_secs)
            }
            Self::ClaimContradicted { claim_id } => {
                write!(f, "target claim {} contradicted", claim_id)
            }
        }
    }
}

/// Result of the freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Still matches current context — safe to speak.
    Fresh,
    /// Stale — fall back to live generation.
    Stale(StaleReason),
}

impl Freshness {
    /// Whether the candidate may be spoken.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Configuration for the cheap pre-use relevance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    /// Maximum candidate age in seconds.
    pub max_age_secs: i64,
    /// Maximum transcript segments that may have arrived since generation.
    pub max_new_segments: u64,
    /// Whether the candidate must match the current slide.
    pub require_same_slide: bool,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            max_age_secs: 90,
            max_new_segments: 6,
            require_same_slide: true,
        }
    }
}

impl FreshnessPolicy {
    /// Validate a candidate against the current context fingerprint.
    ///
    /// `claim_contradicted` reports whether the candidate's target claim has
    /// been contradicted since generation. Checks run cheapest-first; the
    /// first failure wins.
    pub fn validate(
        &self,
        candidate: &CandidateQuestion,
        current: &ContextFingerprint,
        claim_contradicted: bool,
        now: DateTime<Utc>,
    ) -> Freshness {
        if self.require_same_slide && candidate.fingerprint.slide_index != current.slide_index {
            return Freshness::Stale(StaleReason::SlideChanged {
                from: candidate.fingerprint.slide_index,
                to: current.slide_index,
            });
        }

        if claim_contradicted {
            if let Some(claim_id) = &candidate.claim_id {
                return Freshness::Stale(StaleReason::ClaimContradicted {
                    claim_id: claim_id.clone(),
                });
            }
        }

        let new_segments = current
            .transcript_seq
            .saturating_sub(candidate.fingerprint.transcript_seq);
        if new_segments > self.max_new_segments {
            return Freshness::Stale(StaleReason::TranscriptMovedOn {
                new_segments,
                allowed: self.max_new_segments,
            });
        }

        let age = candidate.age_secs(now);
        if age > self.max_age_secs {
            return Freshness::Stale(StaleReason::Expired {
                age_secs: age,
                max_secs: self.max_age_secs,
            });
        }

        Freshness::Fresh
    }
}
