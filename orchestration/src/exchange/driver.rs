//! Exchange driver — the per-exchange turn engine.
//!
//! Owned by the session coordinator. Records agent utterances and presenter
//! responses, applies evaluation outcomes, and enforces the turn limit and
//! the presenter-response timeout. The driver is synchronous and pure so the
//! turn protocol is testable without any runtime plumbing.

use chrono::{DateTime, Duration, Utc};

use super::state::{
    Evaluation, EvaluationOutcome, Exchange, ExchangeState, InterventionReason, PileOn, Turn,
    TurnKind, UnresolvedChallenge,
};
use crate::types::ClaimId;

/// What the driver expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Waiting for the agent's opening utterance.
    AwaitAgent,
    /// Waiting for the presenter to respond to the last agent utterance.
    AwaitPresenter,
    /// Waiting for the agent to evaluate the presenter's response.
    AwaitEvaluation,
    /// The exchange has resolved.
    Complete,
}

impl std::fmt::Display for NextStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitAgent => write!(f, "await_agent"),
            Self::AwaitPresenter => write!(f, "await_presenter"),
            Self::AwaitEvaluation => write!(f, "await_evaluation"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Error from the exchange driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("expected step {expected}, got {actual}")]
    InvalidStep { expected: String, actual: String },

    #[error("exchange already resolved")]
    AlreadyResolved,

    #[error("pile-on not allowed: {0}")]
    PileOnRejected(String),
}

/// Drives one exchange from floor grant to resolution.
pub struct ExchangeDriver {
    exchange: Exchange,
    max_turns: u32,
    timeout: Duration,
    step: NextStep,
    awaiting_presenter_since: Option<DateTime<Utc>>,
    unresolved: Option<UnresolvedChallenge>,
}

impl ExchangeDriver {
    /// Create a driver for a newly granted floor.
    pub fn new(
        exchange_id: &str,
        agent_id: &str,
        slide_index: u32,
        claim_id: Option<ClaimId>,
        max_turns: u32,
        timeout: Duration,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: Exchange::new(exchange_id, agent_id, slide_index, claim_id, opened_at),
            max_turns,
            timeout,
            step: NextStep::AwaitAgent,
            awaiting_presenter_since: None,
            unresolved: None,
        }
    }

    /// Record an agent utterance opening the next turn.
    pub fn record_agent_turn(
        &mut self,
        text: &str,
        kind: TurnKind,
        now: DateTime<Utc>,
    ) -> Result<NextStep, ExchangeError> {
        if self.exchange.is_resolved() {
            return Err(ExchangeError::AlreadyResolved);
        }
        if self.step != NextStep::AwaitAgent {
            return Err(ExchangeError::InvalidStep {
                expected: "await_agent".to_string(),
                actual: self.step.to_string(),
            });
        }

        let number = self.exchange.turn_count() + 1;
        self.exchange.turns.push(Turn {
            number,
            agent_text: text.to_string(),
            kind,
            presenter_text: None,
            outcome: None,
            asked_at: now,
            responded_at: None,
        });

        self.step = NextStep::AwaitPresenter;
        self.awaiting_presenter_since = Some(now);
        Ok(self.step)
    }

    /// Record the presenter's response to the open turn.
    pub fn record_presenter_response(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<NextStep, ExchangeError> {
        if self.exchange.is_resolved() {
            return Err(ExchangeError::AlreadyResolved);
        }
        if self.step != NextStep::AwaitPresenter {
            return Err(ExchangeError::InvalidStep {
                expected: "await_presenter".to_string(),
                actual: self.step.to_string(),
            });
        }

        let turn = self
            .exchange
            .turns
            .last_mut()
            .ok_or(ExchangeError::AlreadyResolved)?;
        turn.presenter_text = Some(text.to_string());
        turn.responded_at = Some(now);

        self.step = NextStep::AwaitEvaluation;
        self.awaiting_presenter_since = None;
        Ok(self.step)
    }

    /// Apply the agent's evaluation of the last presenter response.
    ///
    /// This is the decision point: satisfied resolves the exchange; a
    /// follow-up or escalation continues it unless the turn limit has been
    /// reached, in which case the exchange is force-resolved as intervened.
    pub fn apply_evaluation(
        &mut self,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
    ) -> Result<NextStep, ExchangeError> {
        if self.exchange.is_resolved() {
            return Err(ExchangeError::AlreadyResolved);
        }
        if self.step != NextStep::AwaitEvaluation {
            return Err(ExchangeError::InvalidStep {
                expected: "await_evaluation".to_string(),
                actual: self.step.to_string(),
            });
        }

        if let Some(turn) = self.exchange.turns.last_mut() {
            turn.outcome = Some(evaluation.outcome);
        }

        match evaluation.outcome {
            EvaluationOutcome::Satisfied => {
                self.resolve(ExchangeState::ResolvedSatisfied, None, now);
                Ok(NextStep::Complete)
            }
            EvaluationOutcome::FollowUp | EvaluationOutcome::Escalate => {
                if self.exchange.turn_count() >= self.max_turns {
                    self.resolve(
                        ExchangeState::ResolvedIntervened,
                        Some(InterventionReason::TurnLimitReached),
                        now,
                    );
                    return Ok(NextStep::Complete);
                }
                self.step = NextStep::AwaitAgent;
                Ok(self.step)
            }
        }
    }

    /// Force-resolve the exchange as intervened.
    ///
    /// Idempotent: forcing an already-resolved exchange is a no-op.
    pub fn force_resolve(&mut self, reason: InterventionReason, now: DateTime<Utc>) {
        if self.exchange.is_resolved() {
            return;
        }
        self.resolve(ExchangeState::ResolvedIntervened, Some(reason), now);
    }

    /// Whether the presenter has exceeded the response timeout.
    pub fn presenter_timed_out(&self, now: DateTime<Utc>) -> bool {
        match self.awaiting_presenter_since {
            Some(since) => now - since >= self.timeout,
            None => false,
        }
    }

    /// Attach the single pile-on record. Only valid once, after resolution.
    pub fn attach_pile_on(&mut self, pile_on: PileOn) -> Result<(), ExchangeError> {
        if !self.exchange.is_resolved() {
            return Err(ExchangeError::PileOnRejected(
                "exchange not yet resolved".to_string(),
            ));
        }
        if self.exchange.pile_on.is_some() {
            return Err(ExchangeError::PileOnRejected(
                "pile-on already attached".to_string(),
            ));
        }
        self.exchange.pile_on = Some(pile_on);
        Ok(())
    }

    /// What the driver expects next.
    pub fn next_step(&self) -> NextStep {
        self.step
    }

    /// The exchange under management.
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// The unresolved-challenge record, if the exchange was intervened.
    pub fn unresolved_challenge(&self) -> Option<&UnresolvedChallenge> {
        self.unresolved.as_ref()
    }

    /// Consume the driver, yielding the final exchange and challenge record.
    pub fn into_parts(self) -> (Exchange, Option<UnresolvedChallenge>) {
        (self.exchange, self.unresolved)
    }

    fn resolve(
        &mut self,
        state: ExchangeState,
        reason: Option<InterventionReason>,
        now: DateTime<Utc>,
    ) {
        self.exchange.state = state;
        self.exchange.resolved_at = Some(now);
        self.exchange.intervention = reason;
        self.step = NextStep::Complete;
        self.awaiting_presenter_since = None;

        if let Some(reason) = reason {
            self.unresolved = Some(UnresolvedChallenge {
                exchange_id: self.exchange.id.clone(),
                agent_id: self.exchange.agent_id.clone(),
                claim_id: self.exchange.claim_id.clone(),
                reason,
                noted_at: now,
            });
        }

        tracing::debug!(
            exchange_id = %self.exchange.id,
            state = %state,
            turns = self.exchange.turn_count(),
            "Exchange resolved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(max_turns: u32) -> ExchangeDriver {
        ExchangeDriver::new(
            "ex-1",
            "vera",
            3,
            Some("c-1".to_string()),
            max_turns,
            Duration::seconds(30),
            Utc::now(),
        )
    }

    fn eval(outcome: EvaluationOutcome) -> Evaluation {
        Evaluation {
            outcome,
            spoken_text: "...".to_string(),
        }
    }

    #[test]
    fn test_satisfied_after_two_turns() {
        let mut d = driver(3);
        let now = Utc::now();

        d.record_agent_turn("what's the churn denominator?", TurnKind::Opening, now)
            .unwrap();
        d.record_presenter_response("it's, uh, around industry norms", now)
            .unwrap();
        let step = d
            .apply_evaluation(&eval(EvaluationOutcome::FollowUp), now)
            .unwrap();
        assert_eq!(step, NextStep::AwaitAgent);

        d.record_agent_turn("which cohort, specifically?", TurnKind::FollowUp, now)
            .unwrap();
        d.record_presenter_response("the Q3 enterprise cohort, 4.2%", now)
            .unwrap();
        let step = d
            .apply_evaluation(&eval(EvaluationOutcome::Satisfied), now)
            .unwrap();
        assert_eq!(step, NextStep::Complete);

        let ex = d.exchange();
        assert_eq!(ex.state, ExchangeState::ResolvedSatisfied);
        assert_eq!(ex.turn_count(), 2);
        assert!(d.unresolved_challenge().is_none());
    }

    #[test]
    fn test_turn_limit_forces_intervention() {
        let mut d = driver(3);
        let now = Utc::now();

        // Turn 1: vague → follow up
        d.record_agent_turn("q1", TurnKind::Opening, now).unwrap();
        d.record_presenter_response("vague answer", now).unwrap();
        d.apply_evaluation(&eval(EvaluationOutcome::FollowUp), now)
            .unwrap();

        // Turn 2: same vague answer → escalate
        d.record_agent_turn("q2", TurnKind::FollowUp, now).unwrap();
        d.record_presenter_response("same vague answer", now).unwrap();
        d.apply_evaluation(&eval(EvaluationOutcome::Escalate), now)
            .unwrap();

        // Turn 3: deferred to appendix → limit reached, not satisfied
        d.record_agent_turn("q3", TurnKind::Escalation, now).unwrap();
        d.record_presenter_response("it's in the appendix", now)
            .unwrap();
        let step = d
            .apply_evaluation(&eval(EvaluationOutcome::Escalate), now)
            .unwrap();

        assert_eq!(step, NextStep::Complete);
        assert_eq!(d.exchange().state, ExchangeState::ResolvedIntervened);
        assert_eq!(
            d.exchange().intervention,
            Some(InterventionReason::TurnLimitReached)
        );

        let challenge = d.unresolved_challenge().expect("challenge record");
        assert_eq!(challenge.claim_id.as_deref(), Some("c-1"));
        assert_eq!(challenge.reason, InterventionReason::TurnLimitReached);
    }

    #[test]
    fn test_turn_count_never_exceeds_limit() {
        let mut d = driver(2);
        let now = Utc::now();
        for _ in 0..2 {
            d.record_agent_turn("q", TurnKind::Opening, now).unwrap();
            d.record_presenter_response("a", now).unwrap();
            let _ = d.apply_evaluation(&eval(EvaluationOutcome::FollowUp), now);
        }
        assert_eq!(d.exchange().turn_count(), 2);
        assert!(d.exchange().is_resolved());
        // No further turns accepted
        assert!(matches!(
            d.record_agent_turn("q3", TurnKind::FollowUp, now),
            Err(ExchangeError::AlreadyResolved)
        ));
    }

    #[test]
    fn test_presenter_timeout_detection() {
        let mut d = driver(3);
        let asked = Utc::now();
        d.record_agent_turn("q1", TurnKind::Opening, asked).unwrap();

        assert!(!d.presenter_timed_out(asked + Duration::seconds(10)));
        assert!(d.presenter_timed_out(asked + Duration::seconds(30)));

        d.force_resolve(InterventionReason::PresenterTimeout, asked);
        assert_eq!(d.exchange().state, ExchangeState::ResolvedIntervened);
        assert_eq!(
            d.unresolved_challenge().unwrap().reason,
            InterventionReason::PresenterTimeout
        );
    }

    #[test]
    fn test_no_timeout_while_awaiting_evaluation() {
        let mut d = driver(3);
        let now = Utc::now();
        d.record_agent_turn("q1", TurnKind::Opening, now).unwrap();
        d.record_presenter_response("a1", now).unwrap();
        // Clock runs but the ball is in the agent's court, not the presenter's.
        assert!(!d.presenter_timed_out(now + Duration::seconds(300)));
    }

    #[test]
    fn test_force_resolve_idempotent() {
        let mut d = driver(3);
        let now = Utc::now();
        d.record_agent_turn("q1", TurnKind::Opening, now).unwrap();
        d.force_resolve(InterventionReason::SessionEnded, now);
        let first = d.exchange().resolved_at;
        d.force_resolve(InterventionReason::PresenterTimeout, now + Duration::seconds(5));
        assert_eq!(d.exchange().resolved_at, first);
        assert_eq!(
            d.exchange().intervention,
            Some(InterventionReason::SessionEnded)
        );
    }

    #[test]
    fn test_step_guards() {
        let mut d = driver(3);
        let now = Utc::now();

        // Can't record a presenter response before the agent speaks.
        assert!(matches!(
            d.record_presenter_response("a", now),
            Err(ExchangeError::InvalidStep { .. })
        ));

        d.record_agent_turn("q1", TurnKind::Opening, now).unwrap();

        // Can't evaluate before the presenter responds.
        assert!(matches!(
            d.apply_evaluation(&eval(EvaluationOutcome::Satisfied), now),
            Err(ExchangeError::InvalidStep { .. })
        ));

        // Can't speak twice in a row.
        assert!(matches!(
            d.record_agent_turn("q2", TurnKind::FollowUp, now),
            Err(ExchangeError::InvalidStep { .. })
        ));
    }

    #[test]
    fn test_pile_on_only_after_resolution() {
        let mut d = driver(3);
        let now = Utc::now();
        let pile = PileOn {
            agent_id: "marcus".to_string(),
            statement: "And the CAC figure has the same problem.".to_string(),
            presenter_response: None,
            executed_at: now,
        };

        assert!(d.attach_pile_on(pile.clone()).is_err());

        d.record_agent_turn("q1", TurnKind::Opening, now).unwrap();
        d.record_presenter_response("a1", now).unwrap();
        d.apply_evaluation(&eval(EvaluationOutcome::Satisfied), now)
            .unwrap();

        d.attach_pile_on(pile.clone()).unwrap();
        // Second attach rejected — pile-ons never recurse.
        assert!(matches!(
            d.attach_pile_on(pile),
            Err(ExchangeError::PileOnRejected(_))
        ));
    }

    #[test]
    fn test_into_parts() {
        let mut d = driver(3);
        let now = Utc::now();
        d.record_agent_turn("q1", TurnKind::Opening, now).unwrap();
        d.force_resolve(InterventionReason::SessionEnded, now);
        let (exchange, unresolved) = d.into_parts();
        assert!(exchange.is_resolved());
        assert!(unresolved.is_some());
    }

    #[test]
    fn test_next_step_display() {
        assert_eq!(NextStep::AwaitAgent.to_string(), "await_agent");
        assert_eq!(NextStep::AwaitPresenter.to_string(), "await_presenter");
        assert_eq!(NextStep::AwaitEvaluation.to_string(), "await_evaluation");
        assert_eq!(NextStep::Complete.to_string(), "complete");
    }
}
