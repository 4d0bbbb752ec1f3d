//! Latency compensator — making a multi-second pipeline feel instantaneous.
//!
//! Three delivery paths, cheapest first:
//!
//! 1. **Pre-generated candidate** — validated for freshness immediately
//!    before use; a fresh candidate is spoken with zero generation latency.
//! 2. **Live streaming** — for stale candidates and mid-exchange content;
//!    deltas are assembled into speech-boundary fragments while the masking
//!    ladder (lead-in → thinking indicator → text-only) covers the opening
//!    gap.
//! 3. **Text-only degradation** — a failed or over-budget stream degrades
//!    to a text event so the session never silently stalls.

use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::candidate::{CandidateQuestion, Freshness, FreshnessPolicy};
use super::masking::{LeadInBank, MaskingBudget, MaskingStage};
use super::streaming::{fragment_text, FragmentAssembler, FragmentPolicy};
use crate::context::{SharedContextStore, TranscriptSegment};
use crate::events::{SessionEvent, SharedEventBus};
use crate::gateway::{GatewayError, GatewayResult, SharedGateway, UtteranceEvent, UtteranceRequest};

/// Configuration for the compensator.
#[derive(Debug, Clone, Default)]
pub struct CompensatorConfig {
    /// Fragment boundary policy.
    pub fragment: FragmentPolicy,
    /// Masking escalation budgets.
    pub masking: MaskingBudget,
    /// Candidate freshness policy.
    pub freshness: FreshnessPolicy,
}

/// What a delivery actually did.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Utterance identifier carried on every fragment event.
    pub utterance_id: String,
    /// Full delivered text (lead-in included).
    pub text: String,
    /// Fragments emitted.
    pub fragments: u32,
    /// Highest masking stage reached.
    pub peak_masking: MaskingStage,
    /// Whether delivery degraded to text-only.
    pub degraded: bool,
    /// Whether a pre-generated candidate was spoken.
    pub spoke_candidate: bool,
    /// Wall-clock delivery duration.
    pub duration_ms: u64,
}

/// Cross-cutting delivery engine shared by agent runners.
pub struct LatencyCompensator {
    bus: SharedEventBus,
    store: SharedContextStore,
    gateway: SharedGateway,
    config: CompensatorConfig,
    lead_ins: Mutex<LeadInBank>,
}

impl LatencyCompensator {
    /// Create a compensator over the shared bus, store, and gateway.
    pub fn new(
        bus: SharedEventBus,
        store: SharedContextStore,
        gateway: SharedGateway,
        config: CompensatorConfig,
    ) -> Self {
        Self {
            bus,
            store,
            gateway,
            config,
            lead_ins: Mutex::new(LeadInBank::default()),
        }
    }

    /// The configured freshness policy.
    pub fn freshness_policy(&self) -> &FreshnessPolicy {
        &self.config.freshness
    }

    /// Speak text that is already fully known (acknowledgments, follow-ups
    /// whose text came back with the evaluation, fresh candidates).
    pub fn speak_text(&self, agent_id: &str, text: &str) -> DeliveryReport {
        let started = Instant::now();
        let utterance_id = SessionEvent::new_id();
        let fragments = fragment_text(text, self.config.fragment.clone());
        let count = fragments.len() as u32;

        for fragment in fragments {
            let _ = self.bus.publish(SessionEvent::SpeechFragment {
                agent_id: agent_id.to_string(),
                utterance_id: utterance_id.clone(),
                seq: fragment.seq,
                text: fragment.text,
                is_last: fragment.is_last,
                timestamp: Utc::now(),
            });
        }

        self.append_agent_speech(agent_id, text);

        DeliveryReport {
            utterance_id,
            text: text.to_string(),
            fragments: count,
            peak_masking: MaskingStage::Direct,
            degraded: false,
            spoke_candidate: false,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Speak a candidate if it is still fresh; otherwise fall back to live
    /// streaming with `fallback`. The stale candidate itself is never
    /// spoken.
    pub async fn speak_candidate(
        &self,
        candidate: &CandidateQuestion,
        fallback: UtteranceRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<DeliveryReport> {
        let fingerprint = self.store.fingerprint();
        let contradicted = candidate
            .claim_id
            .as_deref()
            .map(|id| self.store.claim_contradicted(id))
            .unwrap_or(false);

        match self.config.freshness.validate(candidate, &fingerprint, contradicted, Utc::now()) {
            Freshness::Fresh => {
                let mut report = self.speak_text(&candidate.agent_id, &candidate.text);
                report.spoke_candidate = true;
                Ok(report)
            }
            Freshness::Stale(reason) => {
                debug!(
                    agent_id = %candidate.agent_id,
                    reason = %reason,
                    "Candidate stale, falling back to live generation"
                );
                self.stream_live(fallback, cancel).await
            }
        }
    }

    /// Stream a live utterance with masking, fragment assembly, and the
    /// degradation ladder.
    pub async fn stream_live(
        &self,
        request: UtteranceRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<DeliveryReport> {
        let agent_id = request.agent_id.clone();
        let rx = self
            .gateway
            .stream_utterance(request, cancel.child_token())
            .await?;
        self.consume_stream(&agent_id, rx, cancel).await
    }

    async fn consume_stream(
        &self,
        agent_id: &str,
        mut rx: Receiver<UtteranceEvent>,
        cancel: CancellationToken,
    ) -> GatewayResult<DeliveryReport> {
        let started = Instant::now();
        let utterance_id = SessionEvent::new_id();
        let mut assembler = FragmentAssembler::new(self.config.fragment.clone());
        let budget = &self.config.masking;

        let mut full_text = String::new();
        let mut seq: u32 = 0;
        let mut peak = MaskingStage::Direct;
        let mut thinking_shown = false;
        let mut degraded = false;
        let mut content_started = false;
        let mut suppressed: Vec<String> = Vec::new();
        let mut failure: Option<String> = None;

        loop {
            let elapsed = started.elapsed().as_millis() as u64;
            // Masking only covers the opening gap — once content flows,
            // fragments themselves carry the pacing.
            let next_deadline_ms = if !content_started && !degraded {
                if peak < MaskingStage::LeadIn && elapsed < budget.lead_in_after_ms {
                    Some(budget.lead_in_after_ms - elapsed)
                } else if peak < MaskingStage::Thinking && elapsed < budget.thinking_after_ms {
                    Some(budget.thinking_after_ms - elapsed)
                } else if elapsed < budget.text_only_after_ms {
                    Some(budget.text_only_after_ms - elapsed)
                } else {
                    None
                }
            } else {
                None
            };

            let event = if let Some(deadline) = next_deadline_ms {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    event = rx.recv() => Some(event),
                    _ = tokio::time::sleep(std::time::Duration::from_millis(deadline)) => None,
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    event = rx.recv() => Some(event),
                }
            };

            match event {
                // Masking deadline fired before content arrived.
                None => {
                    let gap = started.elapsed().as_millis() as u64;
                    match budget.stage_for_gap(gap) {
                        MaskingStage::LeadIn if peak < MaskingStage::LeadIn => {
                            peak = MaskingStage::LeadIn;
                            let line = self.lead_ins.lock().expect("lead-in bank poisoned").next_line();
                            full_text.push_str(&line);
                            full_text.push(' ');
                            let _ = self.bus.publish(SessionEvent::SpeechFragment {
                                agent_id: agent_id.to_string(),
                                utterance_id: utterance_id.clone(),
                                seq,
                                text: line,
                                is_last: false,
                                timestamp: Utc::now(),
                            });
                            seq += 1;
                        }
                        MaskingStage::Thinking if peak < MaskingStage::Thinking => {
                            peak = MaskingStage::Thinking;
                            thinking_shown = true;
                            let _ = self.bus.publish(SessionEvent::ThinkingStarted {
                                agent_id: agent_id.to_string(),
                                timestamp: Utc::now(),
                            });
                        }
                        MaskingStage::TextOnly if peak < MaskingStage::TextOnly => {
                            peak = MaskingStage::TextOnly;
                            degraded = true;
                            let _ = self.bus.publish(SessionEvent::DegradedMode {
                                reason: "generation exceeded masking budget".to_string(),
                                text_only: true,
                                timestamp: Utc::now(),
                            });
                        }
                        _ => {}
                    }
                }

                Some(Some(UtteranceEvent::Delta { text })) => {
                    content_started = true;
                    full_text.push_str(&text);
                    if thinking_shown {
                        thinking_shown = false;
                        let _ = self.bus.publish(SessionEvent::ThinkingStopped {
                            agent_id: agent_id.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    for fragment in assembler.push(&text) {
                        if degraded {
                            suppressed.push(fragment.text);
                            continue;
                        }
                        let _ = self.bus.publish(SessionEvent::SpeechFragment {
                            agent_id: agent_id.to_string(),
                            utterance_id: utterance_id.clone(),
                            seq,
                            text: fragment.text,
                            is_last: false,
                            timestamp: Utc::now(),
                        });
                        seq += 1;
                    }
                }

                Some(Some(UtteranceEvent::Completed)) => break,

                Some(Some(UtteranceEvent::Failed { error })) => {
                    failure = Some(error);
                    break;
                }

                // Producer hung up without a terminal event.
                Some(None) => {
                    if cancel.is_cancelled() {
                        return Err(GatewayError::Cancelled);
                    }
                    failure = Some("stream closed unexpectedly".to_string());
                    break;
                }
            }
        }

        if thinking_shown {
            let _ = self.bus.publish(SessionEvent::ThinkingStopped {
                agent_id: agent_id.to_string(),
                timestamp: Utc::now(),
            });
        }

        if let Some(error) = failure {
            warn!(agent_id, "Utterance stream failed: {}", error);
            degraded = true;
            let _ = self.bus.publish(SessionEvent::DegradedMode {
                reason: error,
                text_only: true,
                timestamp: Utc::now(),
            });
        }

        // Flush whatever never made it out — in text-only mode that is every
        // suppressed fragment plus the assembler remainder, as one text event.
        let tail = if degraded {
            let mut parts = suppressed;
            if let Some(f) = assembler.finish() {
                parts.push(f.text);
            }
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(" "))
            }
        } else {
            assembler.finish().map(|f| f.text)
        };
        if let Some(text) = tail {
            let _ = self.bus.publish(SessionEvent::SpeechFragment {
                agent_id: agent_id.to_string(),
                utterance_id: utterance_id.clone(),
                seq,
                text,
                is_last: true,
                timestamp: Utc::now(),
            });
            seq += 1;
        } else if seq > 0 {
            // Everything already went out on sentence boundaries — close
            // the utterance with an empty terminal marker.
            let _ = self.bus.publish(SessionEvent::SpeechFragment {
                agent_id: agent_id.to_string(),
                utterance_id: utterance_id.clone(),
                seq,
                text: String::new(),
                is_last: true,
                timestamp: Utc::now(),
            });
            seq += 1;
        }

        let text = full_text.trim().to_string();
        if !text.is_empty() {
            self.append_agent_speech(agent_id, &text);
        }

        Ok(DeliveryReport {
            utterance_id,
            text,
            fragments: seq,
            peak_masking: peak,
            degraded,
            spoke_candidate: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn append_agent_speech(&self, agent_id: &str, text: &str) {
        let segment = TranscriptSegment::panelist(agent_id, text, self.store.slide_index());
        if let Err(e) = self.store.append_transcript(segment) {
            warn!(agent_id, "Could not append agent speech to transcript: {}", e);
        }
    }
}
