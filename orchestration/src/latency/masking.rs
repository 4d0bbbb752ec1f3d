//! Masking devices — hiding generation gaps behind natural-seeming pauses.
//!
//! The ladder runs: direct delivery → spoken lead-in → visible thinking
//! indicator → text-only degraded mode. Masking is presentation-layer only
//! and always yields once real content arrives — no overlap, no content
//! loss.

use serde::{Deserialize, Serialize};

/// The escalating masking stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingStage {
    /// Content arrived fast enough — nothing to hide.
    Direct,
    /// A short pre-recorded lead-in plays while the response streams in.
    LeadIn,
    /// A visible thinking indicator covers a longer gap.
    Thinking,
    /// Delivery degraded to text-only.
    TextOnly,
}

impl std::fmt::Display for MaskingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::LeadIn => write!(f, "lead_in"),
            Self::Thinking => write!(f, "thinking"),
            Self::TextOnly => write!(f, "text_only"),
        }
    }
}

/// Bounded time budgets for each masking escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskingBudget {
    /// Gap after which the lead-in plays.
    pub lead_in_after_ms: u64,
    /// Gap after which the thinking indicator shows.
    pub thinking_after_ms: u64,
    /// Gap after which delivery degrades to text-only.
    pub text_only_after_ms: u64,
}

impl Default for MaskingBudget {
    fn default() -> Self {
        Self {
            lead_in_after_ms: 350,
            thinking_after_ms: 2_000,
            text_only_after_ms: 10_000,
        }
    }
}

impl MaskingBudget {
    /// The stage appropriate for a gap of `gap_ms`.
    pub fn stage_for_gap(&self, gap_ms: u64) -> MaskingStage {
        if gap_ms >= self.text_only_after_ms {
            MaskingStage::TextOnly
        } else if gap_ms >= self.thinking_after_ms {
            MaskingStage::Thinking
        } else if gap_ms >= self.lead_in_after_ms {
            MaskingStage::LeadIn
        } else {
            MaskingStage::Direct
        }
    }

    /// Validate that the ladder is strictly increasing.
    pub fn validate(&self) -> Result<(), String> {
        if self.lead_in_after_ms >= self.thinking_after_ms
            || self.thinking_after_ms >= self.text_only_after_ms
        {
            return Err(format!(
                "masking ladder must be strictly increasing: {} < {} < {}",
                self.lead_in_after_ms, self.thinking_after_ms, self.text_only_after_ms
            ));
        }
        Ok(())
    }
}

/// Deterministic rotation of short lead-in lines.
#[derive(Debug, Clone)]
pub struct LeadInBank {
    lines: Vec<String>,
    next: usize,
}

impl LeadInBank {
    /// Create a bank from the given lines.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines, next: 0 }
    }

    /// The next lead-in line, rotating through the bank.
    pub fn next_line(&mut self) -> String {
        if self.lines.is_empty() {
            return "Hm, let me think about that for a second.".to_string();
        }
        let line = self.lines[self.next % self.lines.len()].clone();
        self.next += 1;
        line
    }
}

impl Default for LeadInBank {
    fn default() -> Self {
        Self::new(vec![
            "Right, so — here's what I keep coming back to.".to_string(),
            "Okay, let me push on this a bit.".to_string(),
            "Hm. One thing I want to pin down.".to_string(),
            "So, following up on that point.".to_string(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ladder() {
        let budget = MaskingBudget::default();
        assert_eq!(budget.stage_for_gap(0), MaskingStage::Direct);
        assert_eq!(budget.stage_for_gap(349), MaskingStage::Direct);
        assert_eq!(budget.stage_for_gap(350), MaskingStage::LeadIn);
        assert_eq!(budget.stage_for_gap(2_000), MaskingStage::Thinking);
        assert_eq!(budget.stage_for_gap(10_000), MaskingStage::TextOnly);
    }

    #[test]
    fn test_stage_ordering() {
        assert!(MaskingStage::Direct < MaskingStage::LeadIn);
        assert!(MaskingStage::LeadIn < MaskingStage::Thinking);
        assert!(MaskingStage::Thinking < MaskingStage::TextOnly);
    }

    #[test]
    fn test_budget_validation() {
        assert!(MaskingBudget::default().validate().is_ok());
        let bad = MaskingBudget {
            lead_in_after_ms: 5_000,
            thinking_after_ms: 2_000,
            text_only_after_ms: 10_000,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_lead_in_rotation_is_deterministic() {
        let mut bank = LeadInBank::new(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(bank.next_line(), "a");
        assert_eq!(bank.next_line(), "b");
        assert_eq!(bank.next_line(), "a");
    }

    #[test]
    fn test_empty_bank_fallback() {
        let mut bank = LeadInBank::new(vec![]);
        assert!(!bank.next_line().is_empty());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(MaskingStage::Direct.to_string(), "direct");
        assert_eq!(MaskingStage::LeadIn.to_string(), "lead_in");
        assert_eq!(MaskingStage::Thinking.to_string(), "thinking");
        assert_eq!(MaskingStage::TextOnly.to_string(), "text_only");
    }
}
