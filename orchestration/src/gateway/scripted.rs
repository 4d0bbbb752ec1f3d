//! Scripted gateway — deterministic offline implementation.
//!
//! Replays pre-loaded candidates, evaluations, and stream texts in order,
//! with a configurable artificial latency per call. Used by integration
//! tests and the demo binary; no network involved.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    CandidateRequest, EvaluationRequest, GatewayError, GatewayResult, GeneratedCandidate,
    GenerationGateway, UtteranceEvent, UtteranceRequest,
};
use crate::exchange::{Evaluation, EvaluationOutcome};

#[derive(Default)]
struct Script {
    candidates: VecDeque<GeneratedCandidate>,
    evaluations: VecDeque<Evaluation>,
    streams: VecDeque<String>,
    fail_streams: bool,
    fail_candidates: bool,
}

/// Log of requests the gateway has served, for test assertions.
#[derive(Debug, Clone, Default)]
pub struct RequestLog {
    pub candidate_requests: Vec<CandidateRequest>,
    pub evaluation_requests: Vec<EvaluationRequest>,
    pub stream_requests: Vec<UtteranceRequest>,
}

/// Deterministic scripted gateway.
pub struct ScriptedGateway {
    script: Mutex<Script>,
    log: Mutex<RequestLog>,
    latency: Duration,
}

impl ScriptedGateway {
    /// Create a gateway with the given per-call latency.
    pub fn new(latency: Duration) -> Self {
        Self {
            script: Mutex::new(Script::default()),
            log: Mutex::new(RequestLog::default()),
            latency,
        }
    }

    /// Queue a candidate result.
    pub fn push_candidate(&self, text: &str, claim_id: Option<&str>) {
        self.script
            .lock()
            .expect("script poisoned")
            .candidates
            .push_back(GeneratedCandidate {
                text: text.to_string(),
                claim_id: claim_id.map(String::from),
            });
    }

    /// Queue an evaluation result.
    pub fn push_evaluation(&self, outcome: EvaluationOutcome, spoken_text: &str) {
        self.script
            .lock()
            .expect("script poisoned")
            .evaluations
            .push_back(Evaluation {
                outcome,
                spoken_text: spoken_text.to_string(),
            });
    }

    /// Queue a streamed utterance text (delivered in word-sized deltas).
    pub fn push_stream(&self, text: &str) {
        self.script
            .lock()
            .expect("script poisoned")
            .streams
            .push_back(text.to_string());
    }

    /// Make all subsequent stream calls fail.
    pub fn fail_streams(&self) {
        self.script.lock().expect("script poisoned").fail_streams = true;
    }

    /// Make all subsequent candidate calls fail.
    pub fn fail_candidates(&self) {
        self.script.lock().expect("script poisoned").fail_candidates = true;
    }

    /// Snapshot of the request log.
    pub fn request_log(&self) -> RequestLog {
        self.log.lock().expect("log poisoned").clone()
    }

    async fn simulate_latency(&self, cancel: &CancellationToken) -> GatewayResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            _ = tokio::time::sleep(self.latency) => Ok(()),
        }
    }
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate_candidate(
        &self,
        request: CandidateRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<GeneratedCandidate> {
        self.log
            .lock()
            .expect("log poisoned")
            .candidate_requests
            .push(request.clone());
        self.simulate_latency(&cancel).await?;

        let mut script = self.script.lock().expect("script poisoned");
        if script.fail_candidates {
            return Err(GatewayError::Unavailable("scripted failure".to_string()));
        }
        Ok(script.candidates.pop_front().unwrap_or(GeneratedCandidate {
            text: format!(
                "Can you walk us through the basis for what you just said on slide {}?",
                request.slide_index
            ),
            claim_id: request.target_claim.map(|c| c.id),
        }))
    }

    async fn evaluate_response(
        &self,
        request: EvaluationRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<Evaluation> {
        self.log
            .lock()
            .expect("log poisoned")
            .evaluation_requests
            .push(request);
        self.simulate_latency(&cancel).await?;

        let mut script = self.script.lock().expect("script poisoned");
        Ok(script.evaluations.pop_front().unwrap_or(Evaluation {
            outcome: EvaluationOutcome::Satisfied,
            spoken_text: "Fair enough, that answers it.".to_string(),
        }))
    }

    async fn stream_utterance(
        &self,
        request: UtteranceRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<mpsc::Receiver<UtteranceEvent>> {
        self.log
            .lock()
            .expect("log poisoned")
            .stream_requests
            .push(request.clone());

        let (fail, text) = {
            let mut script = self.script.lock().expect("script poisoned");
            let text = script.streams.pop_front().unwrap_or_else(|| {
                format!("Let me push on that — {}?", request.basis)
            });
            (script.fail_streams, text)
        };

        let (tx, rx) = mpsc::channel(16);
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(latency) => {}
            }

            if fail {
                let _ = tx
                    .send(UtteranceEvent::Failed {
                        error: "scripted stream failure".to_string(),
                    })
                    .await;
                return;
            }

            // Word-sized deltas, the way a token stream actually arrives.
            for word in text.split_inclusive(' ') {
                if cancel.is_cancelled() {
                    return;
                }
                if tx
                    .send(UtteranceEvent::Delta {
                        text: word.to_string(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx.send(UtteranceEvent::Completed).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_request() -> CandidateRequest {
        CandidateRequest {
            agent_id: "vera".to_string(),
            persona: "persona".to_string(),
            context: "context".to_string(),
            slide_index: 3,
            target_claim: None,
        }
    }

    fn stream_request() -> UtteranceRequest {
        UtteranceRequest {
            agent_id: "vera".to_string(),
            persona: "persona".to_string(),
            context: "context".to_string(),
            intent: super::super::UtteranceIntent::Question,
            basis: "the churn premise".to_string(),
        }
    }

    #[tokio::test]
    async fn test_scripted_candidate_order() {
        let gw = ScriptedGateway::new(Duration::from_millis(1));
        gw.push_candidate("first?", Some("c-1"));
        gw.push_candidate("second?", None);

        let a = gw
            .generate_candidate(candidate_request(), CancellationToken::new())
            .await
            .unwrap();
        let b = gw
            .generate_candidate(candidate_request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(a.text, "first?");
        assert_eq!(a.claim_id.as_deref(), Some("c-1"));
        assert_eq!(b.text, "second?");
        assert_eq!(gw.request_log().candidate_requests.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_call() {
        let gw = ScriptedGateway::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = gw
            .generate_candidate(candidate_request(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_delivers_deltas_then_completed() {
        let gw = ScriptedGateway::new(Duration::from_millis(1));
        gw.push_stream("one two three");

        let mut rx = gw
            .stream_utterance(stream_request(), CancellationToken::new())
            .await
            .unwrap();

        let mut text = String::new();
        let mut completed = false;
        while let Some(event) = rx.recv().await {
            match event {
                UtteranceEvent::Delta { text: t } => text.push_str(&t),
                UtteranceEvent::Completed => completed = true,
                UtteranceEvent::Failed { error } => panic!("unexpected failure: {}", error),
            }
        }
        assert_eq!(text, "one two three");
        assert!(completed);
    }

    #[tokio::test]
    async fn test_stream_failure_mode() {
        let gw = ScriptedGateway::new(Duration::from_millis(1));
        gw.fail_streams();

        let mut rx = gw
            .stream_utterance(stream_request(), CancellationToken::new())
            .await
            .unwrap();
        match rx.recv().await {
            Some(UtteranceEvent::Failed { .. }) => {}
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_stream_emits_nothing() {
        let gw = ScriptedGateway::new(Duration::from_millis(50));
        gw.push_stream("should never arrive");
        let cancel = CancellationToken::new();

        let mut rx = gw
            .stream_utterance(stream_request(), cancel.clone())
            .await
            .unwrap();
        cancel.cancel();

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_default_evaluation_is_satisfied() {
        let gw = ScriptedGateway::new(Duration::from_millis(1));
        let eval = gw
            .evaluate_response(
                EvaluationRequest {
                    agent_id: "vera".to_string(),
                    persona: String::new(),
                    context: String::new(),
                    question: "q".to_string(),
                    presenter_response: "a".to_string(),
                    turn: 1,
                    max_turns: 3,
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(eval.outcome, EvaluationOutcome::Satisfied);
    }
}
