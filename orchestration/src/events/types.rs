//! Event types for session coordination.
//!
//! Every coordination signal between components travels as one of these
//! variants. Each carries enough identifying data (agent id, exchange id,
//! turn number, timestamp) for a front end to render without querying back
//! into the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::transcript::TranscriptSegment;
use crate::exchange::{EvaluationOutcome, ExchangeState};
use crate::session::phase::SessionPhase;
use crate::types::{AgentId, AgentState, ClaimId, ExchangeId, SessionId};

/// Unique identifier for events.
pub type EventId = String;

/// Why the moderator spoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorPurpose {
    /// Handing the floor to an agent.
    Announcement,
    /// Replaying a queued request ("you had a point — go ahead").
    Acknowledgment,
    /// Returning the floor to the presenter.
    BridgeBack,
}

impl std::fmt::Display for ModeratorPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Announcement => write!(f, "announcement"),
            Self::Acknowledgment => write!(f, "acknowledgment"),
            Self::BridgeBack => write!(f, "bridge_back"),
        }
    }
}

/// All session coordination events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A transcript segment was appended to the context store.
    TranscriptAppended {
        segment: TranscriptSegment,
        seq: u64,
        timestamp: DateTime<Utc>,
    },

    /// The presenter advanced (or went back) a slide.
    SlideChanged {
        slide_index: u32,
        previous: u32,
        timestamp: DateTime<Utc>,
    },

    /// The presenter's speech referenced an extracted claim.
    ClaimMentioned {
        claim_id: ClaimId,
        slide_index: u32,
        timestamp: DateTime<Utc>,
    },

    /// A panelist's runtime state changed.
    AgentStateChanged {
        agent_id: AgentId,
        from: AgentState,
        to: AgentState,
        timestamp: DateTime<Utc>,
    },

    /// An agent asked for the floor (hand-raise pending notice).
    FloorRequested {
        agent_id: AgentId,
        urgency: f64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A floor request was queued behind the current exchange.
    FloorQueued {
        agent_id: AgentId,
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// The coordinator granted the floor.
    FloorGranted {
        agent_id: AgentId,
        exchange_id: ExchangeId,
        replayed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A pending floor request was withdrawn by its agent.
    FloorRetracted {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// The session phase changed.
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
        timestamp: DateTime<Utc>,
    },

    /// The moderator delivered a line.
    ModeratorSpoke {
        line: String,
        purpose: ModeratorPurpose,
        timestamp: DateTime<Utc>,
    },

    /// An agent asked its opening question.
    QuestionAsked {
        agent_id: AgentId,
        exchange_id: ExchangeId,
        turn: u32,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent issued a follow-up.
    FollowUpIssued {
        agent_id: AgentId,
        exchange_id: ExchangeId,
        turn: u32,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent escalated with a pointed statement.
    EscalationIssued {
        agent_id: AgentId,
        exchange_id: ExchangeId,
        turn: u32,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent acknowledged a satisfying answer.
    AcknowledgmentIssued {
        agent_id: AgentId,
        exchange_id: ExchangeId,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// An exchange was opened.
    ExchangeStarted {
        exchange_id: ExchangeId,
        agent_id: AgentId,
        slide_index: u32,
        claim_id: Option<ClaimId>,
        timestamp: DateTime<Utc>,
    },

    /// A turn completed (presenter responded and the agent evaluated).
    ExchangeTurnRecorded {
        exchange_id: ExchangeId,
        turn: u32,
        outcome: EvaluationOutcome,
        timestamp: DateTime<Utc>,
    },

    /// An exchange reached a terminal state.
    ExchangeResolved {
        exchange_id: ExchangeId,
        agent_id: AgentId,
        state: ExchangeState,
        turns: u32,
        timestamp: DateTime<Utc>,
    },

    /// A second agent added its single pile-on remark.
    PileOnExecuted {
        exchange_id: ExchangeId,
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// An agent's thinking indicator turned on (masking a generation gap).
    ThinkingStarted {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// An agent's thinking indicator turned off.
    ThinkingStopped {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// One speech fragment of an agent utterance.
    SpeechFragment {
        agent_id: AgentId,
        utterance_id: String,
        seq: u32,
        text: String,
        is_last: bool,
        timestamp: DateTime<Utc>,
    },

    /// The engine degraded (e.g. to text-only delivery).
    DegradedMode {
        reason: String,
        text_only: bool,
        timestamp: DateTime<Utc>,
    },

    /// The session is shutting down; agents should enter cooldown.
    SessionEnding {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    /// The session ended and the archive is available.
    SessionEnded {
        session_id: SessionId,
        exchanges: u32,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    /// Get the timestamp of this event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::TranscriptAppended { timestamp, .. } => *timestamp,
            SessionEvent::SlideChanged { timestamp, .. } => *timestamp,
            SessionEvent::ClaimMentioned { timestamp, .. } => *timestamp,
            SessionEvent::AgentStateChanged { timestamp, .. } => *timestamp,
            SessionEvent::FloorRequested { timestamp, .. } => *timestamp,
            SessionEvent::FloorQueued { timestamp, .. } => *timestamp,
            SessionEvent::FloorGranted { timestamp, .. } => *timestamp,
            SessionEvent::FloorRetracted { timestamp, .. } => *timestamp,
            SessionEvent::PhaseChanged { timestamp, .. } => *timestamp,
            SessionEvent::ModeratorSpoke { timestamp, .. } => *timestamp,
            SessionEvent::QuestionAsked { timestamp, .. } => *timestamp,
            SessionEvent::FollowUpIssued { timestamp, .. } => *timestamp,
            SessionEvent::EscalationIssued { timestamp, .. } => *timestamp,
            SessionEvent::AcknowledgmentIssued { timestamp, .. } => *timestamp,
            SessionEvent::ExchangeStarted { timestamp, .. } => *timestamp,
            SessionEvent::ExchangeTurnRecorded { timestamp, .. } => *timestamp,
            SessionEvent::ExchangeResolved { timestamp, .. } => *timestamp,
            SessionEvent::PileOnExecuted { timestamp, .. } => *timestamp,
            SessionEvent::ThinkingStarted { timestamp, .. } => *timestamp,
            SessionEvent::ThinkingStopped { timestamp, .. } => *timestamp,
            SessionEvent::SpeechFragment { timestamp, .. } => *timestamp,
            SessionEvent::DegradedMode { timestamp, .. } => *timestamp,
            SessionEvent::SessionEnding { timestamp, .. } => *timestamp,
            SessionEvent::SessionEnded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::TranscriptAppended { .. } => "transcript_appended",
            SessionEvent::SlideChanged { .. } => "slide_changed",
            SessionEvent::ClaimMentioned { .. } => "claim_mentioned",
            SessionEvent::AgentStateChanged { .. } => "agent_state_changed",
            SessionEvent::FloorRequested { .. } => "floor_requested",
            SessionEvent::FloorQueued { .. } => "floor_queued",
            SessionEvent::FloorGranted { .. } => "floor_granted",
            SessionEvent::FloorRetracted { .. } => "floor_retracted",
            SessionEvent::PhaseChanged { .. } => "phase_changed",
            SessionEvent::ModeratorSpoke { .. } => "moderator_spoke",
            SessionEvent::QuestionAsked { .. } => "question_asked",
            SessionEvent::FollowUpIssued { .. } => "follow_up_issued",
            SessionEvent::EscalationIssued { .. } => "escalation_issued",
            SessionEvent::AcknowledgmentIssued { .. } => "acknowledgment_issued",
            SessionEvent::ExchangeStarted { .. } => "exchange_started",
            SessionEvent::ExchangeTurnRecorded { .. } => "exchange_turn_recorded",
            SessionEvent::ExchangeResolved { .. } => "exchange_resolved",
            SessionEvent::PileOnExecuted { .. } => "pile_on_executed",
            SessionEvent::ThinkingStarted { .. } => "thinking_started",
            SessionEvent::ThinkingStopped { .. } => "thinking_stopped",
            SessionEvent::SpeechFragment { .. } => "speech_fragment",
            SessionEvent::DegradedMode { .. } => "degraded_mode",
            SessionEvent::SessionEnding { .. } => "session_ending",
            SessionEvent::SessionEnded { .. } => "session_ended",
        }
    }

    /// Get the agent id if this event is agent-scoped.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            SessionEvent::TranscriptAppended { segment, .. } => segment.speaker.agent_id(),
            SessionEvent::AgentStateChanged { agent_id, .. } => Some(agent_id),
            SessionEvent::FloorRequested { agent_id, .. } => Some(agent_id),
            SessionEvent::FloorQueued { agent_id, .. } => Some(agent_id),
            SessionEvent::FloorGranted { agent_id, .. } => Some(agent_id),
            SessionEvent::FloorRetracted { agent_id, .. } => Some(agent_id),
            SessionEvent::QuestionAsked { agent_id, .. } => Some(agent_id),
            SessionEvent::FollowUpIssued { agent_id, .. } => Some(agent_id),
            SessionEvent::EscalationIssued { agent_id, .. } => Some(agent_id),
            SessionEvent::AcknowledgmentIssued { agent_id, .. } => Some(agent_id),
            SessionEvent::ExchangeStarted { agent_id, .. } => Some(agent_id),
            SessionEvent::ExchangeResolved { agent_id, .. } => Some(agent_id),
            SessionEvent::PileOnExecuted { agent_id, .. } => Some(agent_id),
            SessionEvent::ThinkingStarted { agent_id, .. } => Some(agent_id),
            SessionEvent::ThinkingStopped { agent_id, .. } => Some(agent_id),
            SessionEvent::SpeechFragment { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }

    /// Get the exchange id if this event is exchange-scoped.
    pub fn exchange_id(&self) -> Option<&str> {
        match self {
            SessionEvent::FloorGranted { exchange_id, .. } => Some(exchange_id),
            SessionEvent::QuestionAsked { exchange_id, .. } => Some(exchange_id),
            SessionEvent::FollowUpIssued { exchange_id, .. } => Some(exchange_id),
            SessionEvent::EscalationIssued { exchange_id, .. } => Some(exchange_id),
            SessionEvent::AcknowledgmentIssued { exchange_id, .. } => Some(exchange_id),
            SessionEvent::ExchangeStarted { exchange_id, .. } => Some(exchange_id),
            SessionEvent::ExchangeTurnRecorded { exchange_id, .. } => Some(exchange_id),
            SessionEvent::ExchangeResolved { exchange_id, .. } => Some(exchange_id),
            SessionEvent::PileOnExecuted { exchange_id, .. } => Some(exchange_id),
            _ => None,
        }
    }

    /// Create a new unique event ID.
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::FloorGranted {
            agent_id: "vera".to_string(),
            exchange_id: "ex-1".to_string(),
            replayed: false,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"floor_granted\""));
        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "floor_granted");
    }

    #[test]
    fn test_event_accessors() {
        let event = SessionEvent::QuestionAsked {
            agent_id: "vera".to_string(),
            exchange_id: "ex-1".to_string(),
            turn: 1,
            text: "What's behind that number?".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.agent_id(), Some("vera"));
        assert_eq!(event.exchange_id(), Some("ex-1"));
        assert_eq!(event.event_type(), "question_asked");
    }

    #[test]
    fn test_phase_event_has_no_agent() {
        let event = SessionEvent::PhaseChanged {
            from: SessionPhase::Presenting,
            to: SessionPhase::QaTrigger,
            timestamp: Utc::now(),
        };
        assert_eq!(event.agent_id(), None);
        assert_eq!(event.exchange_id(), None);
    }

    #[test]
    fn test_transcript_event_agent_id_follows_speaker() {
        let seg = TranscriptSegment::panelist("marcus", "one more thing", 2);
        let event = SessionEvent::TranscriptAppended {
            segment: seg,
            seq: 7,
            timestamp: Utc::now(),
        };
        assert_eq!(event.agent_id(), Some("marcus"));
    }

    #[test]
    fn test_moderator_purpose_display() {
        assert_eq!(ModeratorPurpose::Announcement.to_string(), "announcement");
        assert_eq!(ModeratorPurpose::Acknowledgment.to_string(), "acknowledgment");
        assert_eq!(ModeratorPurpose::BridgeBack.to_string(), "bridge_back");
    }
}
