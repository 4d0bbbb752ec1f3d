//! Integration tests for the session coordinator.
//!
//! These tests act as hand-driven agent runners: they register, request the
//! floor, speak turns, and report evaluations through the handle, while
//! presenter speech arrives through the transcript ingest exactly as it
//! would from the speech-to-text boundary.

use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::time::timeout;

use orchestration::session::coordinator::{
    spawn as spawn_coordinator, AgentDirective, CoordinatorHandle, EvaluationVerdict,
    ExchangePrompt, FloorDecision, FloorGrant, SpokenKind,
};
use orchestration::session::floor::FloorRequest;
use orchestration::exchange::{Evaluation, EvaluationOutcome, ExchangeState, InterventionReason};
use orchestration::{
    CandidateQuestion, Claim, ClaimKind, ClaimStrength, ContextBudget, ContextStore, EventBus,
    SessionConfig, SharedContextStore, SharedEventBus, TranscriptIngest, TranscriptSegment,
};

struct Harness {
    handle: CoordinatorHandle,
    bus: SharedEventBus,
    store: SharedContextStore,
    ingest: TranscriptIngest,
}

fn harness(config: SessionConfig) -> Harness {
    let store = ContextStore::new(ContextBudget::default()).shared();
    store.load_claims(vec![Claim::new(
        "c-1",
        0,
        "Customer churn dropped 40% after the pricing change",
        ClaimKind::Metric,
        ClaimStrength::Strong,
    )]);
    let bus = EventBus::new().shared();
    let handle = spawn_coordinator(store.clone(), bus.clone(), config);
    let ingest = TranscriptIngest::new(store.clone(), bus.clone());
    Harness {
        handle,
        bus,
        store,
        ingest,
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        agent_cooldown_secs: 0,
        exchange_timeout_secs: 30,
        tick_interval_ms: 20,
        ..Default::default()
    }
}

fn request(agent_id: &str, urgency: f64) -> FloorRequest {
    FloorRequest {
        agent_id: agent_id.to_string(),
        urgency,
        focus_score: 0.5,
        candidate_generated_at: Some(Utc::now()),
        requested_at: Utc::now(),
        reason: "test trigger".to_string(),
    }
}

fn eval(outcome: EvaluationOutcome, text: &str) -> Evaluation {
    Evaluation {
        outcome,
        spoken_text: text.to_string(),
    }
}

/// Give cross-channel messages time to land in the coordinator loop.
async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(60)).await;
}

async fn recv_prompt(grant: &mut FloorGrant) -> ExchangePrompt {
    timeout(StdDuration::from_secs(3), grant.prompts.recv())
        .await
        .expect("prompt timed out")
        .expect("seat closed")
}

async fn expect_grant(h: &Harness, agent: &str, urgency: f64) -> FloorGrant {
    match h.handle.request_floor(request(agent, urgency)).await.unwrap() {
        FloorDecision::Granted(grant) => grant,
        other => panic!("expected grant for {}, got {:?}", agent, other),
    }
}

async fn presenter_says(h: &Harness, text: &str) {
    h.ingest
        .ingest(TranscriptSegment::presenter(text, 0, Utc::now()))
        .unwrap();
    settle().await;
}

/// Scenario: medium intensity, vague answer then a sourced number.
/// The exchange resolves satisfied after two turns with no intervention.
#[tokio::test]
async fn satisfied_after_follow_up() {
    let h = harness(fast_config());
    let _directives = h.handle.register_agent("vera", "Vera").await.unwrap();

    let mut grant = expect_grant(&h, "vera", 0.4).await;
    assert!(matches!(recv_prompt(&mut grant).await, ExchangePrompt::Open { .. }));

    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "What is the churn denominator?", 1_500)
        .await
        .unwrap();
    settle().await;

    presenter_says(&h, "uh, it's roughly in line with industry norms").await;
    let prompt = recv_prompt(&mut grant).await;
    assert!(matches!(prompt, ExchangePrompt::Evaluate { turn: 1, .. }));

    let verdict = h
        .handle
        .report_evaluation(&grant.exchange_id, eval(EvaluationOutcome::FollowUp, "Which cohort, specifically?"))
        .await
        .unwrap();
    assert_eq!(verdict, EvaluationVerdict::Continue);

    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::FollowUp, "Which cohort, specifically?", 1_200)
        .await
        .unwrap();
    settle().await;

    presenter_says(&h, "the Q3 enterprise cohort, 4.2 percent, from the revenue dashboard").await;
    assert!(matches!(recv_prompt(&mut grant).await, ExchangePrompt::Evaluate { turn: 2, .. }));

    let verdict = h
        .handle
        .report_evaluation(&grant.exchange_id, eval(EvaluationOutcome::Satisfied, "That answers it, thanks."))
        .await
        .unwrap();
    assert_eq!(verdict, EvaluationVerdict::ConcludeSatisfied);

    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Acknowledgment, "That answers it, thanks.", 800)
        .await
        .unwrap();

    match recv_prompt(&mut grant).await {
        ExchangePrompt::Concluded { state, .. } => {
            assert_eq!(state, ExchangeState::ResolvedSatisfied)
        }
        other => panic!("expected conclusion, got {:?}", other),
    }
    settle().await;

    let exchanges = h.store.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].state, ExchangeState::ResolvedSatisfied);
    assert_eq!(exchanges[0].turn_count(), 2);
    assert!(h.store.unresolved_challenges().is_empty());
}

/// Scenario: vague, repeated, deferred — the turn limit forces an
/// intervened resolution and an unresolved-challenge record referencing
/// the original claim.
#[tokio::test]
async fn turn_limit_forces_intervention() {
    let h = harness(fast_config()); // medium → max 3 turns
    let _directives = h.handle.register_agent("vera", "Vera").await.unwrap();

    // The opening question targets claim c-1 via the stored candidate.
    h.store.set_candidate(CandidateQuestion::new(
        "vera",
        "What's the denominator on that churn number?",
        Some("c-1".to_string()),
        h.store.fingerprint(),
    ));

    let mut grant = expect_grant(&h, "vera", 0.4).await;
    let ExchangePrompt::Open { claim_id, .. } = recv_prompt(&mut grant).await else {
        panic!("expected open prompt");
    };
    assert_eq!(claim_id.as_deref(), Some("c-1"));

    let turns: [(SpokenKind, &str, EvaluationOutcome); 3] = [
        (SpokenKind::Opening, "What's the denominator?", EvaluationOutcome::FollowUp),
        (SpokenKind::FollowUp, "That's the same answer — which cohort?", EvaluationOutcome::Escalate),
        (SpokenKind::Escalation, "Slide two says the opposite.", EvaluationOutcome::Escalate),
    ];

    for (i, (kind, text, outcome)) in turns.iter().enumerate() {
        h.handle
            .report_turn_spoken(&grant.exchange_id, "vera", *kind, text, 1_000)
            .await
            .unwrap();
        settle().await;
        presenter_says(&h, "it's, um, in the appendix somewhere").await;
        assert!(matches!(recv_prompt(&mut grant).await, ExchangePrompt::Evaluate { .. }));

        let verdict = h
            .handle
            .report_evaluation(&grant.exchange_id, eval(*outcome, "..."))
            .await
            .unwrap();
        if i < 2 {
            assert_eq!(verdict, EvaluationVerdict::Continue);
        } else {
            // Turn 3 of 3 without satisfaction — forced intervention.
            assert_eq!(verdict, EvaluationVerdict::ConcludeIntervened);
        }
    }

    match recv_prompt(&mut grant).await {
        ExchangePrompt::Concluded { state, .. } => {
            assert_eq!(state, ExchangeState::ResolvedIntervened)
        }
        other => panic!("expected conclusion, got {:?}", other),
    }
    settle().await;

    let exchanges = h.store.exchanges();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].turn_count(), 3);
    assert_eq!(
        exchanges[0].intervention,
        Some(InterventionReason::TurnLimitReached)
    );

    let challenges = h.store.unresolved_challenges();
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].claim_id.as_deref(), Some("c-1"));
    assert_eq!(challenges[0].reason, InterventionReason::TurnLimitReached);

    // The challenged claim is now flagged, and contradicted via escalation.
    let claim = &h.store.claims()[0];
    assert!(claim.challenged);
    assert!(claim.contradicted);
}

/// Scenario: competing requests while the floor is taken. The higher
/// urgency wins the replay; the loser is retained and replayed with a
/// moderator acknowledgment, never dropped.
#[tokio::test]
async fn conflict_resolved_by_urgency_and_replayed() {
    let h = harness(fast_config());
    let _v = h.handle.register_agent("vera", "Vera").await.unwrap();
    let mut marcus_rx = h.handle.register_agent("marcus", "Marcus").await.unwrap();
    let mut nadia_rx = h.handle.register_agent("nadia", "Nadia").await.unwrap();

    // Vera takes the floor.
    let mut vera_grant = expect_grant(&h, "vera", 0.4).await;
    let _ = recv_prompt(&mut vera_grant).await;

    // Marcus (urgent) and Nadia (calm) both request while the floor is taken.
    let m = h.handle.request_floor(request("marcus", 0.9)).await.unwrap();
    let n = h.handle.request_floor(request("nadia", 0.2)).await.unwrap();
    assert!(matches!(m, FloorDecision::Queued { .. }));
    assert!(matches!(n, FloorDecision::Queued { .. }));

    // Vera's exchange resolves in one satisfied turn.
    h.handle
        .report_turn_spoken(&vera_grant.exchange_id, "vera", SpokenKind::Opening, "q", 500)
        .await
        .unwrap();
    settle().await;
    presenter_says(&h, "here's the exact number with the source").await;
    let _ = recv_prompt(&mut vera_grant).await;
    let verdict = h
        .handle
        .report_evaluation(&vera_grant.exchange_id, eval(EvaluationOutcome::Satisfied, "ok"))
        .await
        .unwrap();
    assert_eq!(verdict, EvaluationVerdict::ConcludeSatisfied);
    h.handle
        .report_turn_spoken(&vera_grant.exchange_id, "vera", SpokenKind::Acknowledgment, "ok", 300)
        .await
        .unwrap();
    let _ = recv_prompt(&mut vera_grant).await; // Concluded
    settle().await;

    // Marcus outranks Nadia and is replayed first, with acknowledgment.
    let directive = timeout(StdDuration::from_secs(3), marcus_rx.recv())
        .await
        .expect("marcus replay timed out")
        .expect("directive channel closed");
    let mut marcus_grant = match directive {
        AgentDirective::FloorGranted(grant) => grant,
        other => panic!("expected grant, got {:?}", other),
    };
    assert!(marcus_grant.acknowledgment.is_some(), "replayed grant carries acknowledgment");
    let _ = recv_prompt(&mut marcus_grant).await;

    // Nadia stays queued while Marcus holds the floor.
    assert!(timeout(StdDuration::from_millis(200), nadia_rx.recv()).await.is_err());

    // Marcus resolves; Nadia's turn comes.
    h.handle
        .report_turn_spoken(&marcus_grant.exchange_id, "marcus", SpokenKind::Opening, "q", 500)
        .await
        .unwrap();
    settle().await;
    presenter_says(&h, "good question, here's the data").await;
    let _ = recv_prompt(&mut marcus_grant).await;
    let verdict = h
        .handle
        .report_evaluation(&marcus_grant.exchange_id, eval(EvaluationOutcome::Satisfied, "ok"))
        .await
        .unwrap();
    assert_eq!(verdict, EvaluationVerdict::ConcludeSatisfied);
    h.handle
        .report_turn_spoken(&marcus_grant.exchange_id, "marcus", SpokenKind::Acknowledgment, "ok", 300)
        .await
        .unwrap();
    let _ = recv_prompt(&mut marcus_grant).await;

    let directive = timeout(StdDuration::from_secs(3), nadia_rx.recv())
        .await
        .expect("nadia replay timed out")
        .expect("directive channel closed");
    assert!(matches!(directive, AgentDirective::FloorGranted(_)));
}

/// Scenario: presenter goes silent mid-exchange. The exchange resolves
/// as intervened on timeout — no crash, no indefinite wait.
#[tokio::test]
async fn presenter_timeout_force_resolves() {
    let config = SessionConfig {
        exchange_timeout_secs: 1,
        tick_interval_ms: 20,
        agent_cooldown_secs: 0,
        ..Default::default()
    };
    let h = harness(config);
    let _d = h.handle.register_agent("vera", "Vera").await.unwrap();

    let mut grant = expect_grant(&h, "vera", 0.4).await;
    let _ = recv_prompt(&mut grant).await;
    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "q", 500)
        .await
        .unwrap();

    // No presenter response at all.
    match timeout(StdDuration::from_secs(5), grant.prompts.recv()).await {
        Ok(Some(ExchangePrompt::Concluded { state, .. })) => {
            assert_eq!(state, ExchangeState::ResolvedIntervened);
        }
        other => panic!("expected timeout conclusion, got {:?}", other),
    }
    settle().await;

    let challenges = h.store.unresolved_challenges();
    assert_eq!(challenges.len(), 1);
    assert_eq!(challenges[0].reason, InterventionReason::PresenterTimeout);
}

/// The cooldown invariant: two consecutive grants to the same agent are
/// separated by at least the configured cooldown.
#[tokio::test]
async fn cooldown_spaces_repeat_grants() {
    let config = SessionConfig {
        agent_cooldown_secs: 3_600,
        tick_interval_ms: 20,
        ..Default::default()
    };
    let h = harness(config);
    let mut directives = h.handle.register_agent("vera", "Vera").await.unwrap();

    // First grant goes through.
    let mut grant = expect_grant(&h, "vera", 0.4).await;
    let _ = recv_prompt(&mut grant).await;
    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "q", 500)
        .await
        .unwrap();
    settle().await;
    presenter_says(&h, "answered").await;
    let _ = recv_prompt(&mut grant).await;
    h.handle
        .report_evaluation(&grant.exchange_id, eval(EvaluationOutcome::Satisfied, "ok"))
        .await
        .unwrap();
    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Acknowledgment, "ok", 300)
        .await
        .unwrap();
    let _ = recv_prompt(&mut grant).await;
    settle().await;

    // Second request within the cooldown queues instead of granting.
    let second = h.handle.request_floor(request("vera", 0.9)).await.unwrap();
    assert!(matches!(second, FloorDecision::Queued { .. }));

    // And no replay arrives while the cooldown holds.
    presenter_says(&h, "moving on to the next section now").await;
    assert!(timeout(StdDuration::from_millis(300), directives.recv()).await.is_err());
}

/// Mutual exclusion: a second request while an exchange is open is queued,
/// never granted concurrently.
#[tokio::test]
async fn floor_is_exclusive() {
    let h = harness(fast_config());
    let _v = h.handle.register_agent("vera", "Vera").await.unwrap();
    let mut marcus_rx = h.handle.register_agent("marcus", "Marcus").await.unwrap();

    let mut grant = expect_grant(&h, "vera", 0.4).await;
    let _ = recv_prompt(&mut grant).await;

    let decision = h.handle.request_floor(request("marcus", 0.9)).await.unwrap();
    assert!(matches!(decision, FloorDecision::Queued { .. }));
    assert!(timeout(StdDuration::from_millis(200), marcus_rx.recv()).await.is_err());
}

/// Session end mid-exchange forces an intervened resolution before any
/// agent reaches cooldown, and produces the archive.
#[tokio::test]
async fn session_end_mid_exchange() {
    let h = harness(fast_config());
    let mut directives = h.handle.register_agent("vera", "Vera").await.unwrap();

    let mut grant = expect_grant(&h, "vera", 0.4).await;
    let _ = recv_prompt(&mut grant).await;
    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "q", 500)
        .await
        .unwrap();
    settle().await;

    let archive = h.handle.end_session().await.unwrap();

    assert_eq!(archive.exchanges.len(), 1);
    assert_eq!(archive.exchanges[0].state, ExchangeState::ResolvedIntervened);
    assert_eq!(
        archive.exchanges[0].intervention,
        Some(InterventionReason::SessionEnded)
    );
    assert_eq!(archive.unresolved_challenges.len(), 1);

    // The runner was told to cool down.
    let directive = timeout(StdDuration::from_secs(1), directives.recv())
        .await
        .expect("directive timed out");
    assert!(matches!(directive, Some(AgentDirective::SessionEnding)));
}

/// A pile-on runs exactly one statement and one response, attached to the
/// just-resolved exchange.
#[tokio::test]
async fn pile_on_single_turn() {
    let h = harness(fast_config());
    let _v = h.handle.register_agent("vera", "Vera").await.unwrap();
    let mut marcus_rx = h.handle.register_agent("marcus", "Marcus").await.unwrap();

    // Vera's candidate targets c-1; Marcus also holds a candidate on c-1.
    h.store.set_candidate(CandidateQuestion::new(
        "vera",
        "What's the denominator?",
        Some("c-1".to_string()),
        h.store.fingerprint(),
    ));
    h.store.set_candidate(CandidateQuestion::new(
        "marcus",
        "And does that cohort include the legacy contracts?",
        Some("c-1".to_string()),
        h.store.fingerprint(),
    ));

    let mut grant = expect_grant(&h, "vera", 0.4).await;
    let _ = recv_prompt(&mut grant).await;
    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Opening, "q", 500)
        .await
        .unwrap();
    settle().await;
    presenter_says(&h, "4.2 percent on the enterprise cohort, from finance").await;
    let _ = recv_prompt(&mut grant).await;
    h.handle
        .report_evaluation(&grant.exchange_id, eval(EvaluationOutcome::Satisfied, "ok"))
        .await
        .unwrap();
    h.handle
        .report_turn_spoken(&grant.exchange_id, "vera", SpokenKind::Acknowledgment, "ok", 300)
        .await
        .unwrap();
    let _ = recv_prompt(&mut grant).await;
    settle().await;

    // Marcus receives the pile-on seat.
    let directive = timeout(StdDuration::from_secs(2), marcus_rx.recv())
        .await
        .expect("pile-on invite timed out")
        .expect("directive channel closed");
    let mut pile_grant = match directive {
        AgentDirective::FloorGranted(grant) => grant,
        other => panic!("expected pile-on grant, got {:?}", other),
    };
    assert!(pile_grant.is_pile_on);
    assert!(matches!(
        recv_prompt(&mut pile_grant).await,
        ExchangePrompt::Open { is_pile_on: true, .. }
    ));

    h.handle
        .report_turn_spoken(
            &pile_grant.exchange_id,
            "marcus",
            SpokenKind::PileOnStatement,
            "And does that include legacy contracts?",
            600,
        )
        .await
        .unwrap();
    settle().await;
    presenter_says(&h, "yes, legacy contracts are in that cohort").await;

    match recv_prompt(&mut pile_grant).await {
        ExchangePrompt::Concluded { .. } => {}
        other => panic!("expected pile-on conclusion, got {:?}", other),
    }
    settle().await;

    let exchanges = h.store.exchanges();
    assert_eq!(exchanges.len(), 1);
    let pile = exchanges[0].pile_on.as_ref().expect("pile-on attached");
    assert_eq!(pile.agent_id, "marcus");
    assert!(pile.presenter_response.is_some());
    // Structurally one turn: the parent exchange still has its own turns.
    assert_eq!(exchanges[0].turn_count(), 1);
}
