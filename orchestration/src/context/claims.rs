//! Deck claims — extracted assertions and mention matching.
//!
//! Claims arrive write-once from the deck-analysis collaborator at session
//! start. During the run their challenged/contradicted flags evolve as
//! exchanges reference them, and presenter speech is matched against them to
//! drive focus triggers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::ClaimId;

/// Classification of an extracted claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// A quantitative figure ("churn dropped 40%").
    Metric,
    /// A forward-looking promise ("we will ship in Q2").
    Commitment,
    /// A relative statement ("faster than every competitor").
    Comparison,
    /// A general assertion.
    Assertion,
}

impl std::fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::Commitment => write!(f, "commitment"),
            Self::Comparison => write!(f, "comparison"),
            Self::Assertion => write!(f, "assertion"),
        }
    }
}

/// How strongly the claim was asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStrength {
    /// Hedged language ("roughly", "we think").
    Hedged,
    /// Plain statement.
    Moderate,
    /// Absolute or superlative language.
    Strong,
}

/// An extracted assertion tied to a slide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// Unique claim identifier.
    pub id: ClaimId,
    /// Slide the claim appears on.
    pub slide_index: u32,
    /// Claim text as extracted.
    pub text: String,
    /// Classification.
    pub kind: ClaimKind,
    /// Assertion strength.
    pub strength: ClaimStrength,
    /// Whether an exchange has challenged this claim.
    pub challenged: bool,
    /// Whether an exchange surfaced a contradiction of this claim.
    pub contradicted: bool,
}

impl Claim {
    /// Create an unchallenged claim.
    pub fn new(id: &str, slide_index: u32, text: &str, kind: ClaimKind, strength: ClaimStrength) -> Self {
        Self {
            id: id.to_string(),
            slide_index,
            text: text.to_string(),
            kind,
            strength,
            challenged: false,
            contradicted: false,
        }
    }
}

/// One slide of the deck manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slide {
    /// Zero-based slide position.
    pub index: u32,
    /// Slide title.
    pub title: String,
    /// Extracted body text.
    pub body: String,
}

/// The ordered slide manifest provided by the deck collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlideManifest {
    pub slides: Vec<Slide>,
}

impl SlideManifest {
    /// Number of slides.
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Slide by index, if present.
    pub fn slide(&self, index: u32) -> Option<&Slide> {
        self.slides.iter().find(|s| s.index == index)
    }
}

/// Matches live speech against claim texts.
///
/// Matching is deliberately cheap: significant-word overlap, no model call.
/// A mention requires either `min_overlap` shared significant words or
/// coverage of half the claim's significant words, whichever is lower.
pub struct ClaimMatcher {
    word: Regex,
    min_overlap: usize,
}

impl ClaimMatcher {
    /// Create a matcher with the default overlap threshold.
    pub fn new() -> Self {
        Self {
            word: Regex::new(r"[A-Za-z0-9%]+").expect("static regex"),
            min_overlap: 3,
        }
    }

    /// Significant words of a text: lowercase, length > 3 (numbers always count).
    fn significant_words(&self, text: &str) -> HashSet<String> {
        self.word
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .filter(|w| w.len() > 3 || w.chars().any(|c| c.is_ascii_digit()))
            .collect()
    }

    /// Whether `speech` mentions `claim`.
    pub fn mentions(&self, speech: &str, claim: &Claim) -> bool {
        let spoken = self.significant_words(speech);
        let claimed = self.significant_words(&claim.text);
        if claimed.is_empty() {
            return false;
        }
        let overlap = claimed.intersection(&spoken).count();
        let needed = self.min_overlap.min(claimed.len().div_ceil(2));
        overlap >= needed.max(1)
    }

    /// All claims mentioned in `speech`.
    pub fn mentioned<'a>(&self, speech: &str, claims: &'a [Claim]) -> Vec<&'a Claim> {
        claims.iter().filter(|c| self.mentions(speech, c)).collect()
    }

    /// Overlap score (0.0–1.0) between a set of focus keywords and a claim.
    pub fn focus_score(&self, focus_areas: &[String], claim: &Claim) -> f64 {
        if focus_areas.is_empty() {
            return 0.0;
        }
        let claim_text = claim.text.to_lowercase();
        let matched = focus_areas
            .iter()
            .filter(|area| {
                let area = area.to_lowercase();
                self.significant_words(&area)
                    .iter()
                    .any(|w| claim_text.contains(w.as_str()))
            })
            .count();
        matched as f64 / focus_areas.len() as f64
    }
}

impl Default for ClaimMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn churn_claim() -> Claim {
        Claim::new(
            "c-1",
            3,
            "Customer churn dropped 40% after the pricing change",
            ClaimKind::Metric,
            ClaimStrength::Strong,
        )
    }

    #[test]
    fn test_mention_detected() {
        let matcher = ClaimMatcher::new();
        let claim = churn_claim();
        assert!(matcher.mentions(
            "as you can see, churn dropped a full 40% once we changed pricing",
            &claim
        ));
    }

    #[test]
    fn test_unrelated_speech_not_matched() {
        let matcher = ClaimMatcher::new();
        let claim = churn_claim();
        assert!(!matcher.mentions("moving on to the team slide now", &claim));
    }

    #[test]
    fn test_mentioned_filters_claims() {
        let matcher = ClaimMatcher::new();
        let claims = vec![
            churn_claim(),
            Claim::new(
                "c-2",
                5,
                "We are the fastest platform in the market",
                ClaimKind::Comparison,
                ClaimStrength::Strong,
            ),
        ];
        let hits = matcher.mentioned("churn dropped 40% with the new pricing", &claims);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c-1");
    }

    #[test]
    fn test_focus_score() {
        let matcher = ClaimMatcher::new();
        let claim = churn_claim();
        let focus = vec!["churn metrics".to_string(), "hiring plan".to_string()];
        let score = matcher.focus_score(&focus, &claim);
        assert!((score - 0.5).abs() < f64::EPSILON);
        assert!((matcher.focus_score(&[], &claim)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_manifest_lookup() {
        let manifest = SlideManifest {
            slides: vec![Slide {
                index: 0,
                title: "Intro".to_string(),
                body: "hello".to_string(),
            }],
        };
        assert_eq!(manifest.len(), 1);
        assert!(manifest.slide(0).is_some());
        assert!(manifest.slide(9).is_none());
    }

    #[test]
    fn test_claim_kind_display() {
        assert_eq!(ClaimKind::Metric.to_string(), "metric");
        assert_eq!(ClaimKind::Commitment.to_string(), "commitment");
        assert_eq!(ClaimKind::Comparison.to_string(), "comparison");
        assert_eq!(ClaimKind::Assertion.to_string(), "assertion");
    }

    #[test]
    fn test_strength_ordering() {
        assert!(ClaimStrength::Strong > ClaimStrength::Moderate);
        assert!(ClaimStrength::Moderate > ClaimStrength::Hedged);
    }
}
