//! Floor requests and the arbitration queue.
//!
//! The floor is modeled strictly as messages into the coordinator task —
//! no other component ever touches floor state. Losing requests are queued,
//! never dropped, and replayed with an acknowledgment once the floor frees
//! up.
//!
//! Two orderings matter and both are deterministic:
//!
//! - **Selection priority** (used when the coordinator picks an agent):
//!   (1) best focus match for the current slide/claim, (2) longest without
//!   speaking, (3) freshest validated candidate, (4) fixed roster order.
//! - **Conflict priority** (competing requests): urgency first, then the
//!   selection ordering as the tie-break. Moderator control actions are
//!   handled before either inside the coordinator.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AgentId;

/// Per-agent facts the comparators need.
#[derive(Debug, Clone, Default)]
pub struct AgentStanding {
    /// Fixed position in the roster (round-robin fallback order).
    pub roster_position: usize,
    /// When the agent last finished speaking, if ever.
    pub last_spoke_at: Option<DateTime<Utc>>,
}

/// A pending request for the floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorRequest {
    /// Requesting agent.
    pub agent_id: AgentId,
    /// Opaque comparable urgency score supplied by agent state.
    pub urgency: f64,
    /// Focus match against the current slide/claims (0.0–1.0).
    pub focus_score: f64,
    /// When the agent's current candidate was generated, if it has one.
    pub candidate_generated_at: Option<DateTime<Utc>>,
    /// When the request was made.
    pub requested_at: DateTime<Utc>,
    /// Human-readable trigger reason (for events and logs).
    pub reason: String,
}

/// Why a request was denied outright (as opposed to queued).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Agent speaking time is over the configured ceiling.
    Throttled,
    /// The session is shutting down.
    SessionEnding,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Throttled => write!(f, "throttled"),
            Self::SessionEnding => write!(f, "session_ending"),
        }
    }
}

fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Selection ordering: returns `Less` when `a` should be picked before `b`.
pub fn selection_cmp(
    a: &FloorRequest,
    b: &FloorRequest,
    standings: &HashMap<AgentId, AgentStanding>,
) -> Ordering {
    // (1) Focus match, best first.
    let by_focus = cmp_f64_desc(a.focus_score, b.focus_score);
    if by_focus != Ordering::Equal {
        return by_focus;
    }

    // (2) Longest without speaking: never-spoke beats spoke, earlier beats later.
    let a_spoke = standings.get(&a.agent_id).and_then(|s| s.last_spoke_at);
    let b_spoke = standings.get(&b.agent_id).and_then(|s| s.last_spoke_at);
    let by_silence = match (a_spoke, b_spoke) {
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_t), Some(b_t)) => a_t.cmp(&b_t),
        (None, None) => Ordering::Equal,
    };
    if by_silence != Ordering::Equal {
        return by_silence;
    }

    // (3) Freshest candidate: newer generation wins, no candidate loses.
    let by_freshness = match (a.candidate_generated_at, b.candidate_generated_at) {
        (Some(a_t), Some(b_t)) => b_t.cmp(&a_t),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    if by_freshness != Ordering::Equal {
        return by_freshness;
    }

    // (4) Fixed roster order.
    let a_pos = standings.get(&a.agent_id).map(|s| s.roster_position).unwrap_or(usize::MAX);
    let b_pos = standings.get(&b.agent_id).map(|s| s.roster_position).unwrap_or(usize::MAX);
    a_pos.cmp(&b_pos)
}

/// Conflict ordering: urgency first, selection ordering as tie-break.
pub fn conflict_cmp(
    a: &FloorRequest,
    b: &FloorRequest,
    standings: &HashMap<AgentId, AgentStanding>,
) -> Ordering {
    cmp_f64_desc(a.urgency, b.urgency).then_with(|| selection_cmp(a, b, standings))
}

/// Queue of pending floor requests.
///
/// At most one pending request per agent — a newer request from the same
/// agent replaces the old one in place.
#[derive(Debug, Default)]
pub struct FloorQueue {
    entries: Vec<FloorRequest>,
}

impl FloorQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a request; returns the queue position (0-based) under
    /// conflict ordering.
    pub fn push(
        &mut self,
        request: FloorRequest,
        standings: &HashMap<AgentId, AgentStanding>,
    ) -> usize {
        self.entries.retain(|r| r.agent_id != request.agent_id);
        self.entries.push(request.clone());
        self.entries
            .iter()
            .filter(|r| conflict_cmp(r, &request, standings) == Ordering::Less)
            .count()
    }

    /// Withdraw an agent's pending request. Returns whether one existed.
    pub fn retract(&mut self, agent_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.agent_id != agent_id);
        self.entries.len() != before
    }

    /// Pop the best eligible request under conflict ordering.
    ///
    /// `eligible` filters out agents that cannot be granted right now
    /// (cooldown, unregistered); ineligible requests stay queued.
    pub fn pop_best(
        &mut self,
        standings: &HashMap<AgentId, AgentStanding>,
        eligible: impl Fn(&FloorRequest) -> bool,
    ) -> Option<FloorRequest> {
        let best_idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, r)| eligible(r))
            .min_by(|(_, a), (_, b)| conflict_cmp(a, b, standings))
            .map(|(i, _)| i)?;
        Some(self.entries.remove(best_idx))
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an agent has a pending request.
    pub fn contains(&self, agent_id: &str) -> bool {
        self.entries.iter().any(|r| r.agent_id == agent_id)
    }

    /// Drain every pending request (session shutdown).
    pub fn drain(&mut self) -> Vec<FloorRequest> {
        std::mem::take(&mut self.entries)
    }
}
