//! HTTP gateway adapter — thin reqwest shim over the generation service.
//!
//! One-shot calls are plain JSON POSTs; streaming calls read a
//! line-delimited JSON event feed. The adapter maps transport errors into
//! the gateway taxonomy and never lets a slow service block cancellation.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    CandidateRequest, EvaluationRequest, GatewayError, GatewayResult, GeneratedCandidate,
    GenerationGateway, UtteranceEvent, UtteranceRequest,
};
use crate::exchange::{Evaluation, EvaluationOutcome};

/// Configuration for the HTTP gateway.
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Service base URL.
    pub base_url: String,
    /// Per-request timeout in seconds (streaming excluded).
    pub timeout_secs: u64,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("PANEL_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:8089/v1".to_string()),
            timeout_secs: 120,
        }
    }
}

/// Wire shape of an evaluation response.
#[derive(Debug, Deserialize)]
struct EvaluationDto {
    outcome: String,
    text: String,
}

impl EvaluationDto {
    fn into_evaluation(self) -> GatewayResult<Evaluation> {
        let outcome = match self.outcome.as_str() {
            "satisfied" => EvaluationOutcome::Satisfied,
            "follow_up" => EvaluationOutcome::FollowUp,
            "escalate" => EvaluationOutcome::Escalate,
            other => {
                return Err(GatewayError::InvalidResponse(format!(
                    "unknown outcome tag '{}'",
                    other
                )))
            }
        };
        Ok(Evaluation {
            outcome,
            spoken_text: self.text,
        })
    }
}

/// Wire shape of a candidate response.
#[derive(Debug, Serialize, Deserialize)]
struct CandidateDto {
    text: String,
    #[serde(default)]
    claim_id: Option<String>,
}

/// Wire shape of one streamed line.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLineDto {
    Delta { text: String },
    Completed,
    Failed { error: String },
}

/// reqwest-backed gateway adapter.
pub struct HttpGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    /// Create an adapter with the given configuration.
    pub fn new(config: HttpGatewayConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
        cancel: &CancellationToken,
    ) -> GatewayResult<Resp> {
        let request = self.client.post(self.url(path)).json(body).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            r = request => r.map_err(|e| GatewayError::Http(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "{} returned {}",
                path,
                response.status()
            )));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl GenerationGateway for HttpGateway {
    async fn generate_candidate(
        &self,
        request: CandidateRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<GeneratedCandidate> {
        debug!(agent_id = %request.agent_id, slide = request.slide_index, "Candidate request");
        let dto: CandidateDto = self.post_json("candidate", &request, &cancel).await?;
        Ok(GeneratedCandidate {
            text: dto.text,
            claim_id: dto.claim_id,
        })
    }

    async fn evaluate_response(
        &self,
        request: EvaluationRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<Evaluation> {
        debug!(agent_id = %request.agent_id, turn = request.turn, "Evaluation request");
        let dto: EvaluationDto = self.post_json("evaluate", &request, &cancel).await?;
        dto.into_evaluation()
    }

    async fn stream_utterance(
        &self,
        request: UtteranceRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<mpsc::Receiver<UtteranceEvent>> {
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            r = self.client.post(self.url("stream")).json(&request).send() => {
                r.map_err(|e| GatewayError::Http(e.to_string()))?
            }
        };

        if !response.status().is_success() {
            return Err(GatewayError::Unavailable(format!(
                "stream returned {}",
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buf = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => return,
                    c = stream.next() => c,
                };
                let chunk = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(UtteranceEvent::Failed {
                                error: e.to_string(),
                            })
                            .await;
                        return;
                    }
                    None => return,
                };

                buf.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buf.find('\n') {
                    let line: String = buf.drain(..=pos).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StreamLineDto>(line) {
                        Ok(StreamLineDto::Delta { text }) => {
                            if tx.send(UtteranceEvent::Delta { text }).await.is_err() {
                                return;
                            }
                        }
                        Ok(StreamLineDto::Completed) => {
                            let _ = tx.send(UtteranceEvent::Completed).await;
                            return;
                        }
                        Ok(StreamLineDto::Failed { error }) => {
                            let _ = tx.send(UtteranceEvent::Failed { error }).await;
                            return;
                        }
                        Err(e) => {
                            warn!("Unparseable stream line dropped: {}", e);
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_dto_mapping() {
        let dto = EvaluationDto {
            outcome: "follow_up".to_string(),
            text: "Which cohort?".to_string(),
        };
        let eval = dto.into_evaluation().unwrap();
        assert_eq!(eval.outcome, EvaluationOutcome::FollowUp);
        assert_eq!(eval.spoken_text, "Which cohort?");
    }

    #[test]
    fn test_evaluation_dto_rejects_unknown_tag() {
        let dto = EvaluationDto {
            outcome: "maybe".to_string(),
            text: String::new(),
        };
        assert!(matches!(
            dto.into_evaluation(),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_stream_line_parsing() {
        let delta: StreamLineDto =
            serde_json::from_str("{\"type\":\"delta\",\"text\":\"hi \"}").unwrap();
        assert!(matches!(delta, StreamLineDto::Delta { .. }));

        let done: StreamLineDto = serde_json::from_str("{\"type\":\"completed\"}").unwrap();
        assert!(matches!(done, StreamLineDto::Completed));

        let failed: StreamLineDto =
            serde_json::from_str("{\"type\":\"failed\",\"error\":\"boom\"}").unwrap();
        assert!(matches!(failed, StreamLineDto::Failed { .. }));
    }

    #[test]
    fn test_url_join() {
        let gw = HttpGateway::new(HttpGatewayConfig {
            base_url: "http://svc:1234/v1/".to_string(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(gw.url("candidate"), "http://svc:1234/v1/candidate");
    }
}
