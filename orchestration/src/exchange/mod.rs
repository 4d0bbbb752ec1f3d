//! Exchange state machine — turns, evaluation outcomes, and the driver.
//!
//! An exchange is a bounded multi-turn dialogue between one agent and the
//! presenter about one claim. The coordinator owns one [`ExchangeDriver`] at
//! a time; agents only ever see prompts and report tagged outcomes.

pub mod driver;
pub mod state;

pub use driver::{ExchangeDriver, ExchangeError, NextStep};
pub use state::{
    Evaluation, EvaluationOutcome, Exchange, ExchangeState, InterventionReason, PileOn, Turn,
    TurnKind, UnresolvedChallenge,
};
