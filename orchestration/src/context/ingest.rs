//! Transcript ingest — the speech-to-text boundary adapter.
//!
//! Segments arrive shaped by the STT collaborator and are appended verbatim,
//! then republished on the bus. Slide changes and claim mentions are derived
//! here so downstream components stay purely event-driven.

use chrono::Utc;
use tracing::{debug, warn};

use super::claims::ClaimMatcher;
use super::store::{ContextError, SharedContextStore};
use super::transcript::TranscriptSegment;
use crate::events::{SessionEvent, SharedEventBus};

/// Appends incoming segments and derives context-change events.
pub struct TranscriptIngest {
    store: SharedContextStore,
    bus: SharedEventBus,
    matcher: ClaimMatcher,
}

impl TranscriptIngest {
    /// Create an ingest adapter over the given store and bus.
    pub fn new(store: SharedContextStore, bus: SharedEventBus) -> Self {
        Self {
            store,
            bus,
            matcher: ClaimMatcher::new(),
        }
    }

    /// Ingest one segment: append, republish, derive slide/claim events.
    ///
    /// An out-of-order segment is rejected and logged; the session keeps
    /// running on the last known-good transcript.
    pub fn ingest(&self, segment: TranscriptSegment) -> Result<u64, ContextError> {
        let previous_slide = self.store.slide_index();
        let had_segments = self.store.current_seq() > 0;

        let outcome = match self.store.append_transcript(segment.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(segment_id = %segment.id, "Transcript segment rejected: {}", e);
                return Err(e);
            }
        };
        if outcome.duplicate {
            debug!(segment_id = %segment.id, "Duplicate transcript segment ignored");
            return Ok(outcome.seq);
        }

        let _ = self.bus.publish(SessionEvent::TranscriptAppended {
            segment: segment.clone(),
            seq: outcome.seq,
            timestamp: Utc::now(),
        });

        if had_segments && segment.slide_index != previous_slide {
            let _ = self.bus.publish(SessionEvent::SlideChanged {
                slide_index: segment.slide_index,
                previous: previous_slide,
                timestamp: Utc::now(),
            });
        }

        if segment.is_final && segment.speaker.is_presenter() {
            let claims = self.store.claims();
            for claim in self.matcher.mentioned(&segment.text, &claims) {
                let _ = self.bus.publish(SessionEvent::ClaimMentioned {
                    claim_id: claim.id.clone(),
                    slide_index: claim.slide_index,
                    timestamp: Utc::now(),
                });
            }
        }

        Ok(outcome.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::budget::ContextBudget;
    use crate::context::claims::{Claim, ClaimKind, ClaimStrength};
    use crate::context::store::ContextStore;
    use crate::events::EventBus;
    use chrono::Duration;

    fn setup() -> (TranscriptIngest, SharedEventBus) {
        let store = ContextStore::new(ContextBudget::default()).shared();
        store.load_claims(vec![Claim::new(
            "c-1",
            3,
            "Customer churn dropped 40% after the pricing change",
            ClaimKind::Metric,
            ClaimStrength::Strong,
        )]);
        let bus = EventBus::new().shared();
        (TranscriptIngest::new(store, bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_ingest_republishes_append() {
        let (ingest, bus) = setup();
        let mut rx = bus.subscribe();

        ingest
            .ingest(TranscriptSegment::presenter("hello everyone", 0, Utc::now()))
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "transcript_appended");
    }

    #[tokio::test]
    async fn test_slide_change_derived() {
        let (ingest, bus) = setup();
        let mut rx = bus.subscribe();
        let t = Utc::now();

        ingest
            .ingest(TranscriptSegment::presenter("on slide zero", 0, t))
            .unwrap();
        ingest
            .ingest(TranscriptSegment::presenter(
                "now slide one",
                1,
                t + Duration::seconds(2),
            ))
            .unwrap();

        let mut saw_slide_change = false;
        for _ in 0..3 {
            if let Ok(event) = rx.recv().await {
                if let SessionEvent::SlideChanged {
                    slide_index,
                    previous,
                    ..
                } = event
                {
                    assert_eq!(slide_index, 1);
                    assert_eq!(previous, 0);
                    saw_slide_change = true;
                }
            }
        }
        assert!(saw_slide_change);
    }

    #[tokio::test]
    async fn test_claim_mention_derived() {
        let (ingest, bus) = setup();
        let mut rx = bus.subscribe();

        ingest
            .ingest(TranscriptSegment::presenter(
                "churn dropped 40% after we changed pricing",
                3,
                Utc::now(),
            ))
            .unwrap();

        let mut saw_mention = false;
        for _ in 0..2 {
            if let Ok(event) = rx.recv().await {
                if let SessionEvent::ClaimMentioned { claim_id, .. } = event {
                    assert_eq!(claim_id, "c-1");
                    saw_mention = true;
                }
            }
        }
        assert!(saw_mention);
    }

    #[tokio::test]
    async fn test_duplicate_not_republished() {
        let (ingest, bus) = setup();
        let mut rx = bus.subscribe();

        let seg = TranscriptSegment::presenter("hello", 0, Utc::now());
        ingest.ingest(seg.clone()).unwrap();
        ingest.ingest(seg).unwrap();

        // Only one append event on the bus.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type(), "transcript_appended");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_out_of_order_rejected_but_session_survives() {
        let (ingest, _bus) = setup();
        let t = Utc::now();
        ingest
            .ingest(TranscriptSegment::presenter("later", 0, t))
            .unwrap();

        let earlier = TranscriptSegment::presenter("earlier", 0, t - Duration::seconds(9));
        assert!(ingest.ingest(earlier).is_err());

        // Subsequent well-ordered appends still work.
        ingest
            .ingest(TranscriptSegment::presenter(
                "even later",
                0,
                t + Duration::seconds(1),
            ))
            .unwrap();
    }
}
