//! Context store — the single source of truth for accumulated session
//! knowledge, read-optimized for "assemble everything this agent needs now".
//!
//! Sharing discipline: the transcript is append-only with a total order
//! assigned at append time; per-agent fields (profile, candidate slot) are
//! written only by that agent's own runner and readable by anyone. No lock
//! is ever held across an await — the store is fully synchronous.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::budget::{ContextBudget, TokenEstimator, WordCountEstimator};
use super::claims::Claim;
use super::profile::{PresenterProfile, ReadinessLevel, ResponseObservation, ResponsePattern};
use super::transcript::TranscriptSegment;
use crate::exchange::{Exchange, ExchangeState, UnresolvedChallenge};
use crate::latency::candidate::{CandidateQuestion, ContextFingerprint};
use crate::types::{AgentId, ClaimId};

/// Error type for context store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("out-of-order append on stream {stream} (segment {segment_id})")]
    OrderViolation { stream: String, segment_id: String },

    #[error("exchange {0} already recorded")]
    ExchangeAlreadyRecorded(String),

    #[error("unknown claim {0}")]
    UnknownClaim(String),
}

/// Result type for context store operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// Shared reference to the context store.
pub type SharedContextStore = Arc<ContextStore>;

/// Outcome of an append: the assigned sequence and whether the segment had
/// already been seen (idempotent re-append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub seq: u64,
    pub duplicate: bool,
}

/// Read-only payload assembled for one generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub slide_index: u32,
    pub transcript_seq: u64,
    /// All deck claims with their current challenge flags.
    pub claims: Vec<Claim>,
    /// Recent transcript window, verbatim.
    pub recent_transcript: Vec<TranscriptSegment>,
    /// Older material compressed to per-slide key lines.
    pub older_summary: Vec<String>,
    /// One line per resolved exchange.
    pub exchange_summaries: Vec<String>,
    /// This agent's presenter-profile lines, newest first.
    pub profile_lines: Vec<String>,
    /// This agent's current candidate, if any.
    pub candidate: Option<CandidateQuestion>,
    /// Estimated token size of the rendered payload.
    pub estimated_tokens: u64,
}

impl AgentContext {
    /// Render the payload as deterministic prompt text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("slide: {}\n", self.slide_index));

        out.push_str("claims:\n");
        for claim in &self.claims {
            out.push_str(&format!(
                "- [{}] ({}) {}{}{}\n",
                claim.id,
                claim.kind,
                claim.text,
                if claim.challenged { " [challenged]" } else { "" },
                if claim.contradicted { " [contradicted]" } else { "" },
            ));
        }

        if !self.older_summary.is_empty() {
            out.push_str("earlier:\n");
            for line in &self.older_summary {
                out.push_str(&format!("- {}\n", line));
            }
        }

        if !self.exchange_summaries.is_empty() {
            out.push_str("exchanges:\n");
            for line in &self.exchange_summaries {
                out.push_str(&format!("- {}\n", line));
            }
        }

        if !self.profile_lines.is_empty() {
            out.push_str("presenter behavior:\n");
            for line in &self.profile_lines {
                out.push_str(&format!("- {}\n", line));
            }
        }

        out.push_str("recent transcript:\n");
        for seg in &self.recent_transcript {
            out.push_str(&format!("{}: {}\n", seg.speaker, seg.text));
        }

        out
    }
}

#[derive(Default)]
struct Inner {
    segments: Vec<(u64, TranscriptSegment)>,
    seen_ids: HashSet<String>,
    last_start_per_stream: HashMap<String, chrono::DateTime<chrono::Utc>>,
    next_seq: u64,
    claims: Vec<Claim>,
    manifest_loaded: bool,
    slide_index: u32,
    presenter_words: u64,
    exchanges: Vec<Exchange>,
    unresolved: Vec<UnresolvedChallenge>,
    profiles: HashMap<AgentId, PresenterProfile>,
    candidates: HashMap<AgentId, CandidateQuestion>,
}

/// Accumulating, session-scoped mutable state.
pub struct ContextStore {
    inner: RwLock<Inner>,
    budget: ContextBudget,
    estimator: Box<dyn TokenEstimator>,
}

impl ContextStore {
    /// Create a store with the given context budget.
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            budget,
            estimator: Box::new(WordCountEstimator::default()),
        }
    }

    /// Create a shared reference to this store.
    pub fn shared(self) -> SharedContextStore {
        Arc::new(self)
    }

    /// Load the write-once deck claims.
    pub fn load_claims(&self, claims: Vec<Claim>) {
        let mut inner = self.inner.write().expect("context store poisoned");
        inner.claims = claims;
        inner.manifest_loaded = true;
        debug!(claims = inner.claims.len(), "Deck claims loaded");
    }

    /// Whether the deck manifest has been loaded.
    pub fn manifest_loaded(&self) -> bool {
        self.inner.read().expect("context store poisoned").manifest_loaded
    }

    /// Append a transcript segment, assigning the next global sequence.
    ///
    /// Idempotent w.r.t. segment id. An append that would run backwards
    /// within one speaker stream is rejected and leaves the store serving
    /// its last known-good state.
    pub fn append_transcript(&self, segment: TranscriptSegment) -> ContextResult<AppendOutcome> {
        let mut inner = self.inner.write().expect("context store poisoned");

        if inner.seen_ids.contains(&segment.id) {
            let seq = inner
                .segments
                .iter()
                .find(|(_, s)| s.id == segment.id)
                .map(|(seq, _)| *seq)
                .unwrap_or(0);
            return Ok(AppendOutcome {
                seq,
                duplicate: true,
            });
        }

        let stream = segment.speaker.stream_key();
        if let Some(last) = inner.last_start_per_stream.get(&stream) {
            if segment.started_at < *last {
                warn!(
                    stream = %stream,
                    segment_id = %segment.id,
                    "Rejected out-of-order transcript append"
                );
                return Err(ContextError::OrderViolation {
                    stream,
                    segment_id: segment.id,
                });
            }
        }

        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.last_start_per_stream.insert(stream, segment.started_at);
        inner.seen_ids.insert(segment.id.clone());
        if segment.speaker.is_presenter() && segment.is_final {
            inner.presenter_words += segment.word_count();
        }
        inner.slide_index = segment.slide_index;
        inner.segments.push((seq, segment));

        Ok(AppendOutcome {
            seq,
            duplicate: false,
        })
    }

    /// Current global transcript sequence.
    pub fn current_seq(&self) -> u64 {
        self.inner.read().expect("context store poisoned").next_seq
    }

    /// Current slide index (from the latest appended segment).
    pub fn slide_index(&self) -> u32 {
        self.inner.read().expect("context store poisoned").slide_index
    }

    /// Total final presenter words observed (warmup gating input).
    pub fn presenter_words(&self) -> u64 {
        self.inner.read().expect("context store poisoned").presenter_words
    }

    /// Snapshot of all claims with current flags.
    pub fn claims(&self) -> Vec<Claim> {
        self.inner.read().expect("context store poisoned").claims.clone()
    }

    /// Whether a claim is currently marked contradicted.
    pub fn claim_contradicted(&self, claim_id: &str) -> bool {
        self.inner
            .read()
            .expect("context store poisoned")
            .claims
            .iter()
            .any(|c| c.id == claim_id && c.contradicted)
    }

    /// Compact fingerprint of the current context, for freshness checks.
    pub fn fingerprint(&self) -> ContextFingerprint {
        let inner = self.inner.read().expect("context store poisoned");
        ContextFingerprint {
            transcript_seq: inner.next_seq,
            slide_index: inner.slide_index,
            contradicted_claims: inner.claims.iter().filter(|c| c.contradicted).count() as u32,
        }
    }

    /// Record a resolved exchange: archive it, flag its claim, and update
    /// the owning agent's presenter profile.
    pub fn record_exchange(
        &self,
        exchange: Exchange,
        challenge: Option<UnresolvedChallenge>,
    ) -> ContextResult<()> {
        let mut inner = self.inner.write().expect("context store poisoned");

        if inner.exchanges.iter().any(|e| e.id == exchange.id) {
            return Err(ContextError::ExchangeAlreadyRecorded(exchange.id));
        }

        let escalated = exchange.escalated();
        if let Some(claim_id) = &exchange.claim_id {
            if let Some(claim) = inner.claims.iter_mut().find(|c| &c.id == claim_id) {
                claim.challenged = true;
                if escalated {
                    claim.contradicted = true;
                }
            }
        }

        let pattern = match (exchange.state, escalated) {
            (ExchangeState::ResolvedSatisfied, _) => ResponsePattern::ProvidesData,
            (_, true) => ResponsePattern::Contradicts,
            _ => ResponsePattern::Deflects,
        };
        let readiness = match exchange.state {
            ExchangeState::ResolvedSatisfied if exchange.turn_count() <= 1 => {
                ReadinessLevel::Prepared
            }
            ExchangeState::ResolvedSatisfied => ReadinessLevel::Shaky,
            _ => ReadinessLevel::Unprepared,
        };
        let topic = exchange
            .claim_id
            .clone()
            .unwrap_or_else(|| format!("slide-{}", exchange.slide_index));

        let agent_id = exchange.agent_id.clone();
        let note = format!(
            "{} after {} turns on slide {}",
            exchange.state,
            exchange.turn_count(),
            exchange.slide_index
        );
        let observation = ResponseObservation {
            exchange_id: exchange.id.clone(),
            claim_id: exchange.claim_id.clone(),
            pattern,
            note,
            observed_at: exchange.resolved_at.unwrap_or_else(chrono::Utc::now),
        };

        let profile = inner
            .profiles
            .entry(agent_id.clone())
            .or_insert_with(|| PresenterProfile::new(&agent_id));
        profile.record(observation);
        profile.assess(&topic, readiness);

        if let Some(challenge) = challenge {
            inner.unresolved.push(challenge);
        }
        inner.exchanges.push(exchange);

        Ok(())
    }

    /// Snapshot of the exchange history.
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.inner.read().expect("context store poisoned").exchanges.clone()
    }

    /// Snapshot of unresolved-challenge records.
    pub fn unresolved_challenges(&self) -> Vec<UnresolvedChallenge> {
        self.inner.read().expect("context store poisoned").unresolved.clone()
    }

    /// Snapshot of the full transcript, in append order.
    pub fn transcript(&self) -> Vec<TranscriptSegment> {
        self.inner
            .read()
            .expect("context store poisoned")
            .segments
            .iter()
            .map(|(_, s)| s.clone())
            .collect()
    }

    /// One agent's presenter profile (empty if nothing recorded yet).
    pub fn profile(&self, agent_id: &str) -> PresenterProfile {
        self.inner
            .read()
            .expect("context store poisoned")
            .profiles
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| PresenterProfile::new(agent_id))
    }

    /// All presenter profiles (archive handover).
    pub fn profiles(&self) -> HashMap<AgentId, PresenterProfile> {
        self.inner.read().expect("context store poisoned").profiles.clone()
    }

    /// Replace an agent's candidate. Called only by the owning runner.
    pub fn set_candidate(&self, candidate: CandidateQuestion) {
        let mut inner = self.inner.write().expect("context store poisoned");
        inner.candidates.insert(candidate.agent_id.clone(), candidate);
    }

    /// Clear an agent's candidate (after it was spoken or abandoned).
    pub fn clear_candidate(&self, agent_id: &str) {
        let mut inner = self.inner.write().expect("context store poisoned");
        inner.candidates.remove(agent_id);
    }

    /// One agent's current candidate, if any.
    pub fn candidate(&self, agent_id: &str) -> Option<CandidateQuestion> {
        self.inner
            .read()
            .expect("context store poisoned")
            .candidates
            .get(agent_id)
            .cloned()
    }

    /// Snapshot of all current candidates (pile-on gating input).
    pub fn candidates(&self) -> HashMap<AgentId, CandidateQuestion> {
        self.inner.read().expect("context store poisoned").candidates.clone()
    }

    /// Assemble the read-only generation payload for one agent.
    ///
    /// Deterministic: identical store state yields an identical payload.
    /// The result is bounded by the configured context budget — the recent
    /// window stays verbatim, older material is compressed to per-slide key
    /// lines.
    pub fn build_context(&self, agent_id: &str) -> AgentContext {
        let inner = self.inner.read().expect("context store poisoned");

        let claim_lines: Vec<String> = inner
            .claims
            .iter()
            .map(|c| format!("[{}] {}", c.id, c.text))
            .collect();
        let exchange_summaries: Vec<String> =
            inner.exchanges.iter().map(|e| e.summary_line()).collect();
        let profile_lines = inner
            .profiles
            .get(agent_id)
            .map(|p| p.context_lines(self.budget.max_profile_lines))
            .unwrap_or_default();

        let reserved: u64 = claim_lines
            .iter()
            .chain(exchange_summaries.iter())
            .chain(profile_lines.iter())
            .map(|l| self.estimator.estimate(l) as u64)
            .sum();

        let segment_tokens: Vec<u32> = inner
            .segments
            .iter()
            .map(|(_, s)| self.estimator.estimate(&s.text))
            .collect();
        let window = self.budget.verbatim_window(&segment_tokens, reserved);
        let split = inner.segments.len() - window;

        let recent_transcript: Vec<TranscriptSegment> =
            inner.segments[split..].iter().map(|(_, s)| s.clone()).collect();

        // Older material: one key line per slide visited, claims included.
        let mut older_summary: Vec<String> = Vec::new();
        let mut seen_slides: Vec<u32> = Vec::new();
        for (_, seg) in &inner.segments[..split] {
            if !seen_slides.contains(&seg.slide_index) {
                seen_slides.push(seg.slide_index);
            }
        }
        for slide in seen_slides {
            let segments = inner.segments[..split]
                .iter()
                .filter(|(_, s)| s.slide_index == slide)
                .count();
            let claim_ids: Vec<&str> = inner
                .claims
                .iter()
                .filter(|c| c.slide_index == slide)
                .map(|c| c.id.as_str())
                .collect();
            older_summary.push(format!(
                "slide {}: {} segments covered, claims: {}",
                slide,
                segments,
                if claim_ids.is_empty() {
                    "none".to_string()
                } else {
                    claim_ids.join(", ")
                }
            ));
        }

        let mut ctx = AgentContext {
            agent_id: agent_id.to_string(),
            slide_index: inner.slide_index,
            transcript_seq: inner.next_seq,
            claims: inner.claims.clone(),
            recent_transcript,
            older_summary,
            exchange_summaries,
            profile_lines,
            candidate: inner.candidates.get(agent_id).cloned(),
            estimated_tokens: 0,
        };
        ctx.estimated_tokens = self.estimator.estimate(&ctx.render()) as u64;
        ctx
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextBudget::default())
    }
}
