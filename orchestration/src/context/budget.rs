//! Context budgeting — bounded compression for generation payloads.
//!
//! `build_context` output must stay within a fixed size budget regardless of
//! session length: the recent transcript window is kept verbatim and older
//! material is reduced to claim keys and exchange summaries. This is a hard
//! functional requirement — unbounded growth must never silently degrade or
//! fail a generation call.

use serde::{Deserialize, Serialize};

/// Trait for estimating token counts from text.
pub trait TokenEstimator: Send + Sync {
    /// Estimate the number of tokens in the given text.
    fn estimate(&self, text: &str) -> u32;

    /// Estimator name for logging.
    fn name(&self) -> &str;
}

/// Simple word-count based estimator (words × factor).
///
/// Uses the approximation of ~1.3 tokens per word for English text.
#[derive(Debug, Clone)]
pub struct WordCountEstimator {
    /// Tokens per word multiplier.
    pub factor: f64,
}

impl Default for WordCountEstimator {
    fn default() -> Self {
        Self { factor: 1.3 }
    }
}

impl TokenEstimator for WordCountEstimator {
    fn estimate(&self, text: &str) -> u32 {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.factor).ceil() as u32
    }

    fn name(&self) -> &str {
        "word_count"
    }
}

/// Size budget for one assembled context payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBudget {
    /// Maximum estimated tokens for the whole payload.
    pub max_tokens: u64,
    /// Preferred number of recent segments kept verbatim.
    pub recent_window: usize,
    /// Minimum recent segments kept verbatim even under pressure.
    pub min_recent: usize,
    /// Maximum profile observation lines included.
    pub max_profile_lines: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_tokens: 6_000,
            recent_window: 40,
            min_recent: 8,
            max_profile_lines: 12,
        }
    }
}

impl ContextBudget {
    /// Validate budget configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_recent == 0 || self.min_recent > self.recent_window {
            return Err(format!(
                "min_recent ({}) must be in 1..=recent_window ({})",
                self.min_recent, self.recent_window
            ));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be positive".to_string());
        }
        Ok(())
    }

    /// Decide how many trailing segments to keep verbatim.
    ///
    /// `segment_tokens` lists the estimated tokens per segment in append
    /// order; `reserved` is the token cost of everything else in the payload
    /// (claims, summaries, profile). The window shrinks from `recent_window`
    /// down to `min_recent` until the verbatim portion fits the remainder of
    /// the budget.
    pub fn verbatim_window(&self, segment_tokens: &[u32], reserved: u64) -> usize {
        let available = self.max_tokens.saturating_sub(reserved);
        let mut window = self.recent_window.min(segment_tokens.len());

        while window > self.min_recent {
            let cost: u64 = segment_tokens[segment_tokens.len() - window..]
                .iter()
                .map(|&t| t as u64)
                .sum();
            if cost <= available {
                break;
            }
            window -= 1;
        }

        window.min(segment_tokens.len())
    }
}
