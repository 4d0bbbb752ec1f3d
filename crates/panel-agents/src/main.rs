//! panel-session — run a scripted rehearsal session end to end.
//!
//! Replays a scripted presenter transcript through the full engine (ingest,
//! coordinator, agent runners, latency compensator) against the scripted
//! gateway, printing the event stream as it happens.
//!
//! ```bash
//! # Built-in roster, claims, and script
//! panel-session
//!
//! # Custom inputs
//! panel-session --roster roster.toml --config session.toml --script talk.toml
//!
//! # Save the end-of-session archive
//! panel-session --archive-out archive.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orchestration::{
    spawn_coordinator, Claim, ClaimKind, ClaimStrength, CompensatorConfig, ContextBudget,
    ContextStore, EventBus, LatencyCompensator, ScriptedGateway, SessionConfig, SessionEvent,
    SharedGateway, Speaker, TranscriptIngest, TranscriptSegment,
};
use panel_agents::{AgentRunner, AgentRunnerConfig, Roster};

#[derive(Parser, Debug)]
#[command(name = "panel-session", about = "Scripted panel rehearsal session")]
struct Args {
    /// Panel roster TOML (built-in roster when omitted).
    #[arg(long)]
    roster: Option<PathBuf>,

    /// Session config TOML (defaults when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Presenter script TOML (built-in script when omitted).
    #[arg(long)]
    script: Option<PathBuf>,

    /// Artificial gateway latency in milliseconds.
    #[arg(long, default_value_t = 400)]
    gateway_latency_ms: u64,

    /// Write the session archive as JSON to this path.
    #[arg(long)]
    archive_out: Option<PathBuf>,
}

/// One scripted presenter utterance.
#[derive(Debug, Clone, Deserialize)]
struct SegmentSpec {
    /// Delay before this segment, in milliseconds.
    after_ms: u64,
    /// Slide on screen.
    slide: u32,
    /// What the presenter says.
    text: String,
}

/// One scripted deck claim.
#[derive(Debug, Clone, Deserialize)]
struct ClaimSpec {
    id: String,
    slide: u32,
    text: String,
    kind: ClaimKind,
    strength: ClaimStrength,
}

/// The full presenter script.
#[derive(Debug, Clone, Deserialize)]
struct SessionScript {
    claims: Vec<ClaimSpec>,
    segments: Vec<SegmentSpec>,
}

impl SessionScript {
    fn load(path: &PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        toml::from_str(&text).context("parsing script")
    }

    fn builtin() -> Self {
        let claims = vec![
            ClaimSpec {
                id: "c-churn".to_string(),
                slide: 1,
                text: "Customer churn dropped 40% after the pricing change".to_string(),
                kind: ClaimKind::Metric,
                strength: ClaimStrength::Strong,
            },
            ClaimSpec {
                id: "c-scale".to_string(),
                slide: 2,
                text: "The platform scales linearly to ten million concurrent users".to_string(),
                kind: ClaimKind::Comparison,
                strength: ClaimStrength::Strong,
            },
        ];
        let segments = vec![
            SegmentSpec {
                after_ms: 200,
                slide: 0,
                text: "Good morning everyone, thanks for making the time today. I want to walk \
                       you through where the business stands after a genuinely transformative \
                       two quarters, and why we believe the next twelve months are the moment \
                       to double down on this product."
                    .to_string(),
            },
            SegmentSpec {
                after_ms: 600,
                slide: 1,
                text: "Let's start with retention, because it is the headline. After the \
                       pricing change in March, customer churn dropped a full 40%. That is \
                       the single biggest retention improvement in company history."
                    .to_string(),
            },
            SegmentSpec {
                after_ms: 3_000,
                slide: 1,
                text: "We looked at the monthly numbers across every cohort and the trend \
                       holds everywhere we looked."
                    .to_string(),
            },
            SegmentSpec {
                after_ms: 3_000,
                slide: 2,
                text: "On the infrastructure side, the platform scales linearly. We have \
                       tested to ten million concurrent users with no degradation."
                    .to_string(),
            },
            SegmentSpec {
                after_ms: 3_000,
                slide: 2,
                text: "And that is with the current hardware footprint, before any of the \
                       optimization work planned for next quarter."
                    .to_string(),
            },
        ];
        Self { claims, segments }
    }
}

fn print_event(event: &SessionEvent) {
    let stamp = event.timestamp().format("%H:%M:%S%.3f");
    match event {
        SessionEvent::TranscriptAppended { segment, .. } => {
            if matches!(segment.speaker, Speaker::Presenter) {
                println!("{} [presenter] {}", stamp, segment.text);
            }
        }
        SessionEvent::SpeechFragment {
            agent_id, text, is_last, ..
        } => {
            if !text.is_empty() {
                println!("{} [{}] {}{}", stamp, agent_id, text, if *is_last { " ∎" } else { "" });
            }
        }
        SessionEvent::ModeratorSpoke { line, .. } => {
            println!("{} [moderator] {}", stamp, line);
        }
        SessionEvent::AgentStateChanged { agent_id, to, .. } => {
            println!("{}   · {} → {}", stamp, agent_id, to);
        }
        SessionEvent::PhaseChanged { to, .. } => {
            println!("{}   · phase → {}", stamp, to);
        }
        SessionEvent::ExchangeResolved { exchange_id, state, turns, .. } => {
            println!("{}   · {} resolved {} after {} turns", stamp, exchange_id, state, turns);
        }
        SessionEvent::DegradedMode { reason, .. } => {
            println!("{}   ! degraded: {}", stamp, reason);
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let roster = match &args.roster {
        Some(path) => Roster::load(path)?,
        None => Roster::builtin(),
    };
    let config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig {
            // Demo pacing: short warmup and cooldown so a two-minute script
            // produces visible exchanges.
            warmup_words: 40,
            agent_cooldown_secs: 5,
            exchange_timeout_secs: 8,
            quiet_period_secs: 20,
            ..Default::default()
        },
    };
    config.validate()?;
    let script = match &args.script {
        Some(path) => SessionScript::load(path)?,
        None => SessionScript::builtin(),
    };

    info!(
        panelists = roster.panelists.len(),
        claims = script.claims.len(),
        segments = script.segments.len(),
        "Starting scripted session"
    );

    let bus = EventBus::new().shared();
    let store = ContextStore::new(ContextBudget::default()).shared();
    store.load_claims(
        script
            .claims
            .iter()
            .map(|c| Claim::new(&c.id, c.slide, &c.text, c.kind, c.strength))
            .collect(),
    );

    let gateway: SharedGateway =
        Arc::new(ScriptedGateway::new(Duration::from_millis(args.gateway_latency_ms)));
    let compensator = Arc::new(LatencyCompensator::new(
        bus.clone(),
        store.clone(),
        gateway.clone(),
        CompensatorConfig::default(),
    ));
    let coordinator = spawn_coordinator(store.clone(), bus.clone(), config.clone());
    let ingest = TranscriptIngest::new(store.clone(), bus.clone());

    let printer = orchestration::spawn_handler(&bus, "printer", |event| {
        print_event(&event);
        Ok(())
    });

    let cancel = CancellationToken::new();
    let runner_config = AgentRunnerConfig::from_session(&config);
    let mut runner_tasks = Vec::new();
    for persona in roster.panelists.clone() {
        let runner = AgentRunner::new(
            persona,
            store.clone(),
            bus.clone(),
            gateway.clone(),
            compensator.clone(),
            coordinator.clone(),
            runner_config.clone(),
            cancel.child_token(),
        );
        runner_tasks.push(runner.spawn());
    }

    // Replay the presenter script in real time.
    for spec in &script.segments {
        tokio::time::sleep(Duration::from_millis(spec.after_ms)).await;
        let segment = TranscriptSegment::presenter(&spec.text, spec.slide, Utc::now());
        if let Err(e) = ingest.ingest(segment) {
            tracing::warn!("Segment rejected: {}", e);
        }
    }

    // Let any in-flight exchange settle before ending.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let archive = coordinator.end_session().await?;
    cancel.cancel();
    for task in runner_tasks {
        let _ = task.await;
    }
    drop(printer);

    println!("\n{}", archive.summary_line());
    if let Some(path) = &args.archive_out {
        std::fs::write(path, serde_json::to_string_pretty(&archive)?)
            .with_context(|| format!("writing archive {}", path.display()))?;
        println!("archive written to {}", path.display());
    }

    Ok(())
}
