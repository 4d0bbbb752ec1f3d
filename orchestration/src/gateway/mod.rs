//! Generation/speech gateway — the external collaborator boundary.
//!
//! The engine issues two kinds of requests: one-shot structured calls
//! (candidate generation, response evaluation) and streaming utterance
//! calls delivering an ordered fragment feed. Every call site tolerates
//! arbitrary delay and honors cancellation — a cancelled call must free
//! resources promptly and emit nothing afterwards.

pub mod http;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::Claim;
use crate::exchange::Evaluation;
use crate::types::{AgentId, ClaimId};

pub use http::HttpGateway;
pub use scripted::ScriptedGateway;

/// Error type for gateway operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("generation service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed service response: {0}")]
    InvalidResponse(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("http error: {0}")]
    Http(String),
}

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Shared reference to a gateway implementation.
pub type SharedGateway = Arc<dyn GenerationGateway>;

/// One-shot request for a speculative candidate question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRequest {
    /// Requesting agent.
    pub agent_id: AgentId,
    /// Opaque persona block — passed through, never parsed here.
    pub persona: String,
    /// Rendered context payload from the context store.
    pub context: String,
    /// Slide the question should anchor to.
    pub slide_index: u32,
    /// Claim to target, if the trigger was claim-driven.
    pub target_claim: Option<Claim>,
}

/// Result of a candidate generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCandidate {
    /// The question text.
    pub text: String,
    /// Claim the generator chose to target, if any.
    pub claim_id: Option<ClaimId>,
}

/// One-shot request to evaluate a presenter response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Evaluating agent.
    pub agent_id: AgentId,
    /// Opaque persona block.
    pub persona: String,
    /// Rendered context payload.
    pub context: String,
    /// The agent utterance the presenter was responding to.
    pub question: String,
    /// The presenter's response text.
    pub presenter_response: String,
    /// Current turn number.
    pub turn: u32,
    /// Configured turn limit (so the generator can calibrate pressure).
    pub max_turns: u32,
}

/// What a streamed utterance is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceIntent {
    /// A live replacement for a stale candidate question.
    Question,
    /// A follow-up inside an exchange.
    FollowUp,
    /// An escalation statement inside an exchange.
    Escalation,
}

impl std::fmt::Display for UtteranceIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Question => write!(f, "question"),
            Self::FollowUp => write!(f, "follow_up"),
            Self::Escalation => write!(f, "escalation"),
        }
    }
}

/// Streaming request for live generation + synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceRequest {
    /// Speaking agent.
    pub agent_id: AgentId,
    /// Opaque persona block.
    pub persona: String,
    /// Rendered context payload.
    pub context: String,
    /// What the utterance is for.
    pub intent: UtteranceIntent,
    /// Free-text basis (the gap being targeted, the stale premise, ...).
    pub basis: String,
}

/// One event in a streamed utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UtteranceEvent {
    /// An incremental text delta.
    Delta { text: String },
    /// The stream finished cleanly.
    Completed,
    /// The stream failed; no further events follow.
    Failed { error: String },
}

/// The generation/synthesis boundary.
///
/// Implementations must never assume synchronous completion and must stop
/// promptly when the cancellation token fires.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Generate a candidate question for an agent.
    async fn generate_candidate(
        &self,
        request: CandidateRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<GeneratedCandidate>;

    /// Evaluate a presenter response, returning exactly one outcome tag
    /// plus spoken text.
    async fn evaluate_response(
        &self,
        request: EvaluationRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<Evaluation>;

    /// Stream a live utterance as an ordered fragment feed terminated by
    /// `Completed` or `Failed`.
    async fn stream_utterance(
        &self,
        request: UtteranceRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<mpsc::Receiver<UtteranceEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_event_serde() {
        let event = UtteranceEvent::Delta {
            text: "What's the".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"delta\""));

        let parsed: UtteranceEvent = serde_json::from_str("{\"type\":\"completed\"}").unwrap();
        assert!(matches!(parsed, UtteranceEvent::Completed));
    }

    #[test]
    fn test_intent_display() {
        assert_eq!(UtteranceIntent::Question.to_string(), "question");
        assert_eq!(UtteranceIntent::FollowUp.to_string(), "follow_up");
        assert_eq!(UtteranceIntent::Escalation.to_string(), "escalation");
    }
}
