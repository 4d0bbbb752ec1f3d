//! Transcript segments — immutable, timestamped units of speech.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{SegmentId, Speaker};

/// One immutable unit of presenter or agent speech.
///
/// Segments are append-only: once created they are never mutated. Ordering
/// within one speaker's stream is non-decreasing in `started_at`; the merged
/// session view is ordered by arrival sequence assigned at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Unique segment identifier (idempotence key for appends).
    pub id: SegmentId,
    /// Who spoke.
    pub speaker: Speaker,
    /// Recognized or delivered text.
    pub text: String,
    /// When speech started.
    pub started_at: DateTime<Utc>,
    /// When speech ended.
    pub ended_at: DateTime<Utc>,
    /// Slide on screen at time of speech.
    pub slide_index: u32,
    /// Whether this is a final (non-interim) recognition result.
    pub is_final: bool,
    /// Recognition confidence (1.0 for agent/moderator speech).
    pub confidence: f32,
}

impl TranscriptSegment {
    /// Create a final presenter segment.
    pub fn presenter(text: &str, slide_index: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            speaker: Speaker::Presenter,
            text: text.to_string(),
            started_at,
            ended_at: started_at,
            slide_index,
            is_final: true,
            confidence: 1.0,
        }
    }

    /// Create a final panelist segment.
    pub fn panelist(agent_id: &str, text: &str, slide_index: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            speaker: Speaker::Panelist(agent_id.to_string()),
            text: text.to_string(),
            started_at: now,
            ended_at: now,
            slide_index,
            is_final: true,
            confidence: 1.0,
        }
    }

    /// Number of words in this segment.
    pub fn word_count(&self) -> u64 {
        self.text.split_whitespace().count() as u64
    }

    /// Duration of the segment in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presenter_segment() {
        let seg = TranscriptSegment::presenter("our churn dropped 40%", 3, Utc::now());
        assert!(seg.speaker.is_presenter());
        assert!(seg.is_final);
        assert_eq!(seg.slide_index, 3);
        assert_eq!(seg.word_count(), 4);
    }

    #[test]
    fn test_panelist_segment() {
        let seg = TranscriptSegment::panelist("vera", "What's the denominator?", 3);
        assert_eq!(seg.speaker.agent_id(), Some("vera"));
        assert!((seg.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_segment_serde_roundtrip() {
        let seg = TranscriptSegment::presenter("hello", 0, Utc::now());
        let json = serde_json::to_string(&seg).unwrap();
        let parsed: TranscriptSegment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, seg.id);
        assert_eq!(parsed.text, "hello");
    }
}
