//! The "should I ask now" heuristic.
//!
//! A lightweight, pure check evaluated on meaningful transcript/context
//! changes, never per token. Trigger conditions, most specific first: a
//! focus-area claim was mentioned, the slide changed, the first question is
//! due after warmup, or the periodic refresh elapsed with new claim
//! activity. The per-agent cooldown suppresses everything — that is what
//! keeps post-exchange re-triggering out of the picture without any extra
//! agent state.

use chrono::{DateTime, Duration, Utc};
use orchestration::ClaimId;
use serde::{Deserialize, Serialize};

/// Tunable trigger thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Presenter words required before the first question.
    pub warmup_words: u64,
    /// Refresh interval between periodic evaluations.
    pub refresh_interval_secs: i64,
    /// Minimum time since this agent last spoke.
    pub cooldown_secs: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            warmup_words: 120,
            refresh_interval_secs: 40,
            cooldown_secs: 45,
        }
    }
}

/// What the runner observed since its last evaluation.
#[derive(Debug, Clone, Default)]
pub struct AgentView {
    /// Whether this agent has asked anything yet this session.
    pub has_spoken: bool,
    /// When the agent last finished speaking.
    pub last_spoke_at: Option<DateTime<Utc>>,
    /// When the heuristic last ran.
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Final presenter words observed so far.
    pub words_observed: u64,
    /// Claim activity (mentions) since the last evaluation.
    pub new_claim_activity: bool,
    /// The slide changed since the last evaluation.
    pub slide_changed: bool,
    /// A claim matching this agent's focus areas was just mentioned.
    pub focus_claim: Option<ClaimId>,
}

/// Why the agent should ask now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerReason {
    /// Focus-area claim detected.
    FocusClaimMentioned(ClaimId),
    /// The slide changed.
    SlideChanged,
    /// First question after warmup.
    FirstQuestionReady,
    /// Periodic refresh with new claim activity.
    PeriodicRefresh,
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FocusClaimMentioned(id) => write!(f, "focus claim {}", id),
            Self::SlideChanged => write!(f, "slide changed"),
            Self::FirstQuestionReady => write!(f, "first question ready"),
            Self::PeriodicRefresh => write!(f, "periodic refresh"),
        }
    }
}

/// Why the agent should stay quiet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldReason {
    /// Warmup word count not reached.
    WarmingUp { observed: u64, required: u64 },
    /// Per-agent cooldown still running.
    CoolingDown { remaining_secs: i64 },
    /// No trigger condition met.
    NothingNew,
}

/// Result of one heuristic evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    Trigger(TriggerReason),
    Hold(HoldReason),
}

impl TriggerDecision {
    /// Whether the agent should move to evaluating/generating.
    pub fn should_ask(&self) -> bool {
        matches!(self, Self::Trigger(_))
    }
}

/// Evaluate the ask-now heuristic.
pub fn evaluate_trigger(
    view: &AgentView,
    config: &TriggerConfig,
    now: DateTime<Utc>,
) -> TriggerDecision {
    // Cooldown suppresses every trigger.
    if let Some(last_spoke) = view.last_spoke_at {
        let since = now - last_spoke;
        let cooldown = Duration::seconds(config.cooldown_secs);
        if since < cooldown {
            return TriggerDecision::Hold(HoldReason::CoolingDown {
                remaining_secs: (cooldown - since).num_seconds(),
            });
        }
    }

    // Nothing leaves warmup before the threshold.
    if !view.has_spoken && view.words_observed < config.warmup_words {
        return TriggerDecision::Hold(HoldReason::WarmingUp {
            observed: view.words_observed,
            required: config.warmup_words,
        });
    }

    if let Some(claim_id) = &view.focus_claim {
        return TriggerDecision::Trigger(TriggerReason::FocusClaimMentioned(claim_id.clone()));
    }

    if view.slide_changed {
        return TriggerDecision::Trigger(TriggerReason::SlideChanged);
    }

    if !view.has_spoken {
        return TriggerDecision::Trigger(TriggerReason::FirstQuestionReady);
    }

    let refresh_due = match view.last_evaluated_at {
        Some(last) => now - last >= Duration::seconds(config.refresh_interval_secs),
        None => true,
    };
    if refresh_due && view.new_claim_activity {
        return TriggerDecision::Trigger(TriggerReason::PeriodicRefresh);
    }

    TriggerDecision::Hold(HoldReason::NothingNew)
}
