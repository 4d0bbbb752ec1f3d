//! Presenter profiles — per-agent behavioral memory.
//!
//! Each agent accumulates its own observations of how the presenter handles
//! that agent's challenges. Profiles are append-only, updated only when an
//! exchange resolves, and never shared across agents or sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{AgentId, ClaimId, ExchangeId};

/// How the presenter handled a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePattern {
    /// Answered with concrete data.
    ProvidesData,
    /// Dodged or deferred the question.
    Deflects,
    /// Conceded the gap openly.
    Acknowledges,
    /// Contradicted earlier material.
    Contradicts,
}

impl std::fmt::Display for ResponsePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProvidesData => write!(f, "provides_data"),
            Self::Deflects => write!(f, "deflects"),
            Self::Acknowledges => write!(f, "acknowledges"),
            Self::Contradicts => write!(f, "contradicts"),
        }
    }
}

/// Presenter readiness on a topic, as judged by one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessLevel {
    Unprepared,
    Shaky,
    Prepared,
}

impl std::fmt::Display for ReadinessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unprepared => write!(f, "unprepared"),
            Self::Shaky => write!(f, "shaky"),
            Self::Prepared => write!(f, "prepared"),
        }
    }
}

/// One observation recorded after an exchange resolves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObservation {
    /// Exchange that produced this observation.
    pub exchange_id: ExchangeId,
    /// Claim under discussion, if any.
    pub claim_id: Option<ClaimId>,
    /// Observed handling pattern.
    pub pattern: ResponsePattern,
    /// Short free-text note for later prompt assembly.
    pub note: String,
    /// When the observation was made.
    pub observed_at: DateTime<Utc>,
}

/// Per-agent accumulating behavioral model of the presenter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenterProfile {
    /// Owning agent.
    pub agent_id: AgentId,
    /// Append-only observation log.
    pub observations: Vec<ResponseObservation>,
    /// Readiness assessment per topic keyword.
    pub readiness: BTreeMap<String, ReadinessLevel>,
}

impl PresenterProfile {
    /// Create an empty profile for one agent.
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            observations: Vec::new(),
            readiness: BTreeMap::new(),
        }
    }

    /// Append an observation.
    pub fn record(&mut self, observation: ResponseObservation) {
        self.observations.push(observation);
    }

    /// Set the readiness assessment for a topic.
    pub fn assess(&mut self, topic: &str, level: ReadinessLevel) {
        self.readiness.insert(topic.to_string(), level);
    }

    /// Count of observations showing a given pattern.
    pub fn pattern_count(&self, pattern: ResponsePattern) -> usize {
        self.observations
            .iter()
            .filter(|o| o.pattern == pattern)
            .count()
    }

    /// Render the profile as compact prompt-context lines, newest first,
    /// capped at `max_lines`.
    pub fn context_lines(&self, max_lines: usize) -> Vec<String> {
        self.observations
            .iter()
            .rev()
            .take(max_lines)
            .map(|o| {
                format!(
                    "{}: {}{}",
                    o.pattern,
                    o.note,
                    o.claim_id
                        .as_deref()
                        .map(|c| format!(" (claim {})", c))
                        .unwrap_or_default()
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(pattern: ResponsePattern, note: &str) -> ResponseObservation {
        ResponseObservation {
            exchange_id: "ex-1".to_string(),
            claim_id: Some("c-1".to_string()),
            pattern,
            note: note.to_string(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_count() {
        let mut profile = PresenterProfile::new("vera");
        profile.record(obs(ResponsePattern::Deflects, "dodged the denominator"));
        profile.record(obs(ResponsePattern::Deflects, "pointed at appendix"));
        profile.record(obs(ResponsePattern::ProvidesData, "gave the cohort number"));

        assert_eq!(profile.observations.len(), 3);
        assert_eq!(profile.pattern_count(ResponsePattern::Deflects), 2);
        assert_eq!(profile.pattern_count(ResponsePattern::Contradicts), 0);
    }

    #[test]
    fn test_context_lines_newest_first_and_capped() {
        let mut profile = PresenterProfile::new("vera");
        profile.record(obs(ResponsePattern::Deflects, "first"));
        profile.record(obs(ResponsePattern::ProvidesData, "second"));
        profile.record(obs(ResponsePattern::Acknowledges, "third"));

        let lines = profile.context_lines(2);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("third"));
        assert!(lines[1].contains("second"));
    }

    #[test]
    fn test_readiness_assessment() {
        let mut profile = PresenterProfile::new("vera");
        profile.assess("churn", ReadinessLevel::Shaky);
        profile.assess("churn", ReadinessLevel::Unprepared);
        assert_eq!(
            profile.readiness.get("churn"),
            Some(&ReadinessLevel::Unprepared)
        );
    }

    #[test]
    fn test_pattern_display() {
        assert_eq!(ResponsePattern::ProvidesData.to_string(), "provides_data");
        assert_eq!(ResponsePattern::Deflects.to_string(), "deflects");
        assert_eq!(ResponsePattern::Acknowledges.to_string(), "acknowledges");
        assert_eq!(ResponsePattern::Contradicts.to_string(), "contradicts");
    }

    #[test]
    fn test_profile_serde_roundtrip() {
        let mut profile = PresenterProfile::new("vera");
        profile.record(obs(ResponsePattern::Deflects, "note"));
        let json = serde_json::to_string(&profile).unwrap();
        let parsed: PresenterProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.agent_id, "vera");
        assert_eq!(parsed.observations.len(), 1);
    }
}
