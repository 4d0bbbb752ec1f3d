//! Urgency meter — the opaque comparable priority for floor conflicts.
//!
//! The coordinator only ever compares urgency values; nothing parses them.
//! The meter rises when the agent's concerns go unanswered (escalations,
//! queued requests) and settles once the agent gets to speak.

use serde::{Deserialize, Serialize};

/// Tunable urgency dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrgencyConfig {
    /// Added when the agent escalates inside an exchange.
    pub escalation_boost: f64,
    /// Added each time a floor request is queued instead of granted.
    pub queued_boost: f64,
    /// Added when a focus-area claim goes unchallenged.
    pub focus_boost: f64,
    /// Multiplier applied after the agent speaks.
    pub spoken_decay: f64,
}

impl Default for UrgencyConfig {
    fn default() -> Self {
        Self {
            escalation_boost: 0.3,
            queued_boost: 0.15,
            focus_boost: 0.1,
            spoken_decay: 0.25,
        }
    }
}

/// Per-agent urgency accumulator, clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct UrgencyMeter {
    score: f64,
    config: UrgencyConfig,
}

impl UrgencyMeter {
    /// Create a meter at zero.
    pub fn new(config: UrgencyConfig) -> Self {
        Self { score: 0.0, config }
    }

    /// Current score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// The agent escalated — its concern is not landing.
    pub fn on_escalation(&mut self) {
        self.bump(self.config.escalation_boost);
    }

    /// A floor request was queued behind someone else.
    pub fn on_queued(&mut self) {
        self.bump(self.config.queued_boost);
    }

    /// A focus-area claim went by without a challenge.
    pub fn on_focus_claim(&mut self) {
        self.bump(self.config.focus_boost);
    }

    /// The agent spoke; pressure releases.
    pub fn on_spoke(&mut self) {
        self.score *= self.config.spoken_decay;
    }

    fn bump(&mut self, amount: f64) {
        self.score = (self.score + amount).clamp(0.0, 1.0);
    }
}

impl Default for UrgencyMeter {
    fn default() -> Self {
        Self::new(UrgencyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(UrgencyMeter::default().score(), 0.0);
    }

    #[test]
    fn test_boosts_accumulate_and_clamp() {
        let mut meter = UrgencyMeter::default();
        for _ in 0..10 {
            meter.on_escalation();
        }
        assert!((meter.score() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_speaking_releases_pressure() {
        let mut meter = UrgencyMeter::default();
        meter.on_escalation();
        meter.on_queued();
        let before = meter.score();
        meter.on_spoke();
        assert!(meter.score() < before);
    }

    #[test]
    fn test_queued_agent_outranks_quiet_agent() {
        let mut queued = UrgencyMeter::default();
        queued.on_queued();
        queued.on_queued();
        let quiet = UrgencyMeter::default();
        assert!(queued.score() > quiet.score());
    }
}
