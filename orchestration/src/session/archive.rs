//! Session archive — the immutable end-of-session handover.
//!
//! The scoring/debrief collaborator pulls this once; the engine performs no
//! scoring itself.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{PresenterProfile, TranscriptSegment};
use crate::exchange::{Exchange, ExchangeState, UnresolvedChallenge};
use crate::types::{AgentId, SessionId};

/// Speaking-time accounting for the throttle and the debrief.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakingTime {
    /// Seconds spoken per agent.
    pub per_agent_secs: HashMap<AgentId, f64>,
    /// Total session elapsed seconds.
    pub elapsed_secs: f64,
}

impl SpeakingTime {
    /// Total agent speaking seconds.
    pub fn agent_total_secs(&self) -> f64 {
        self.per_agent_secs.values().sum()
    }

    /// Agent share of elapsed session time (0.0 when nothing elapsed).
    pub fn agent_share(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.agent_total_secs() / self.elapsed_secs
    }
}

/// Immutable archive handed to the scoring collaborator at session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionArchive {
    /// Session identifier.
    pub session_id: SessionId,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session ended.
    pub ended_at: DateTime<Utc>,
    /// The full merged transcript in append order.
    pub transcript: Vec<TranscriptSegment>,
    /// Every exchange, resolved, in order.
    pub exchanges: Vec<Exchange>,
    /// Unresolved-challenge records.
    pub unresolved_challenges: Vec<UnresolvedChallenge>,
    /// Per-agent presenter profiles.
    pub profiles: HashMap<AgentId, PresenterProfile>,
    /// Speaking-time accounting.
    pub speaking_time: SpeakingTime,
}

impl SessionArchive {
    /// Count of exchanges that resolved satisfied.
    pub fn satisfied_count(&self) -> usize {
        self.exchanges
            .iter()
            .filter(|e| e.state == ExchangeState::ResolvedSatisfied)
            .count()
    }

    /// Count of exchanges that were intervened.
    pub fn intervened_count(&self) -> usize {
        self.exchanges
            .iter()
            .filter(|e| e.state == ExchangeState::ResolvedIntervened)
            .count()
    }

    /// Compact summary line for logs.
    pub fn summary_line(&self) -> String {
        format!(
            "session {} | {} exchanges ({} satisfied, {} intervened) | {} unresolved challenges | {:.0}% agent airtime",
            self.session_id,
            self.exchanges.len(),
            self.satisfied_count(),
            self.intervened_count(),
            self.unresolved_challenges.len(),
            self.speaking_time.agent_share() * 100.0,
        )
    }
}
