//! Panelist personas — immutable identity and questioning configuration.
//!
//! Persona content (questioning style, satisfaction criteria) is opaque to
//! the engine: it is passed through to the generation boundary verbatim and
//! never parsed for control flow. Focus areas are the one field the runner
//! reads, for claim matching.

use orchestration::{Claim, ClaimMatcher};
use serde::{Deserialize, Serialize};

/// Voice configuration handed to the synthesis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProfile {
    /// Synthesis voice identifier.
    pub voice_id: String,
    /// Speaking rate multiplier.
    #[serde(default = "default_rate")]
    pub speaking_rate: f32,
}

fn default_rate() -> f32 {
    1.0
}

/// One panelist definition. Immutable reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Stable agent identifier.
    pub id: String,
    /// Display name used by the moderator.
    pub name: String,
    /// Role label ("skeptical CFO", "staff engineer", ...).
    pub role: String,
    /// Voice configuration.
    pub voice: VoiceProfile,
    /// Opaque questioning-style block for the generator.
    pub questioning_style: String,
    /// Opaque satisfaction-criteria block for the generator.
    pub satisfaction_criteria: String,
    /// Topic keywords this panelist zeroes in on.
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

impl Persona {
    /// Focus-match score against a claim (0.0–1.0).
    pub fn focus_score(&self, claim: &Claim, matcher: &ClaimMatcher) -> f64 {
        matcher.focus_score(&self.focus_areas, claim)
    }

    /// The opaque persona block shipped with every generation request.
    pub fn prompt_block(&self) -> String {
        format!(
            "name: {}\nrole: {}\nstyle: {}\nsatisfied when: {}",
            self.name, self.role, self.questioning_style, self.satisfaction_criteria
        )
    }
}

/// Error from roster loading.
#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("roster parse: {0}")]
    Parse(String),

    #[error("roster invalid: {0}")]
    Invalid(String),

    #[error("roster read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// The session's panel roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roster {
    pub panelists: Vec<Persona>,
}

impl Roster {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, RosterError> {
        let roster: Self = toml::from_str(text).map_err(|e| RosterError::Parse(e.to_string()))?;
        roster.validate()?;
        Ok(roster)
    }

    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self, RosterError> {
        let text = std::fs::read_to_string(path).map_err(|e| RosterError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validate: non-empty, unique ids.
    pub fn validate(&self) -> Result<(), RosterError> {
        if self.panelists.is_empty() {
            return Err(RosterError::Invalid("no panelists defined".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for persona in &self.panelists {
            if persona.id.is_empty() {
                return Err(RosterError::Invalid("panelist with empty id".to_string()));
            }
            if !seen.insert(&persona.id) {
                return Err(RosterError::Invalid(format!(
                    "duplicate panelist id '{}'",
                    persona.id
                )));
            }
        }
        Ok(())
    }

    /// A small built-in roster for demos and tests.
    pub fn builtin() -> Self {
        Self {
            panelists: vec![
                Persona {
                    id: "vera".to_string(),
                    name: "Vera".to_string(),
                    role: "skeptical CFO".to_string(),
                    voice: VoiceProfile {
                        voice_id: "en-US-f-2".to_string(),
                        speaking_rate: 1.0,
                    },
                    questioning_style: "Terse. Always asks for the denominator, the cohort, \
                                        and the source. Distrusts percentages without absolutes."
                        .to_string(),
                    satisfaction_criteria: "A concrete number with a named source, or an honest \
                                            'we don't have that yet'."
                        .to_string(),
                    focus_areas: vec![
                        "churn revenue margin".to_string(),
                        "pricing unit economics".to_string(),
                    ],
                },
                Persona {
                    id: "marcus".to_string(),
                    name: "Marcus".to_string(),
                    role: "staff engineer".to_string(),
                    voice: VoiceProfile {
                        voice_id: "en-US-m-1".to_string(),
                        speaking_rate: 0.95,
                    },
                    questioning_style: "Calm, methodical. Probes scalability claims and asks \
                                        what breaks first under load."
                        .to_string(),
                    satisfaction_criteria: "A specific bottleneck named, with the mitigation \
                                            already attempted."
                        .to_string(),
                    focus_areas: vec![
                        "latency scalability infrastructure".to_string(),
                        "reliability uptime".to_string(),
                    ],
                },
            ],
        }
    }
}
