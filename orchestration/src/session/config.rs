//! Session configuration — interaction mode, intensity, and timing knobs.
//!
//! All turn limits, cooldowns, and timeouts are configuration values, not
//! hardcoded constants. TOML-loadable for the demo binary and operators.

use serde::{Deserialize, Serialize};

/// When floor requests may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Only in the window right after a slide change.
    SectionBreaks,
    /// Requests surface as hand-raises; granted at the presenter's next pause.
    HandRaise,
    /// Granted at any detected pause.
    Opportunistic,
}

impl std::fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SectionBreaks => write!(f, "section_breaks"),
            Self::HandRaise => write!(f, "hand_raise"),
            Self::Opportunistic => write!(f, "opportunistic"),
        }
    }
}

/// Aggressiveness tier controlling exchange depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for IntensityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Max turns per exchange at each intensity tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TurnLimits {
    pub low: u32,
    pub medium: u32,
    pub high: u32,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            low: 2,
            medium: 3,
            high: 4,
        }
    }
}

impl TurnLimits {
    /// Turn limit for a tier.
    pub fn for_level(&self, level: IntensityLevel) -> u32 {
        match level {
            IntensityLevel::Low => self.low,
            IntensityLevel::Medium => self.medium,
            IntensityLevel::High => self.high,
        }
    }
}

/// Error from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid session config: {0}")]
pub struct ConfigError(pub String);

/// Full session configuration consumed by the coordinator and runners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// When floor requests may be granted.
    pub mode: InteractionMode,
    /// Exchange aggressiveness tier.
    pub intensity: IntensityLevel,
    /// Per-tier turn limits.
    pub turn_limits: TurnLimits,
    /// Minimum seconds between two floor grants to the same agent.
    pub agent_cooldown_secs: u64,
    /// Absolute presenter-response timeout for an open exchange.
    pub exchange_timeout_secs: u64,
    /// Quiet period after which the coordinator proactively prompts.
    pub quiet_period_secs: u64,
    /// Grant window after a slide change in section-breaks mode.
    pub section_break_window_secs: u64,
    /// Ceiling on agent speaking time as a fraction of elapsed time.
    pub speaking_time_ceiling: f64,
    /// Presenter words observed before any agent may leave warmup.
    pub warmup_words: u64,
    /// Total session time budget in seconds.
    pub session_budget_secs: u64,
    /// Minimum session seconds remaining for a pile-on to run.
    pub pile_on_min_remaining_secs: u64,
    /// Coordinator periodic-check interval in milliseconds.
    pub tick_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: InteractionMode::Opportunistic,
            intensity: IntensityLevel::Medium,
            turn_limits: TurnLimits::default(),
            agent_cooldown_secs: 45,
            exchange_timeout_secs: 30,
            quiet_period_secs: 150,
            section_break_window_secs: 15,
            speaking_time_ceiling: 0.4,
            warmup_words: 120,
            session_budget_secs: 1_200,
            pile_on_min_remaining_secs: 120,
            tick_interval_ms: 250,
        }
    }
}

impl SessionConfig {
    /// The turn limit implied by the configured intensity.
    pub fn max_turns(&self) -> u32 {
        self.turn_limits.for_level(self.intensity)
    }

    /// Validate the configuration.
    ///
    /// A turn limit of 0 or 1 is rejected (an exchange needs at least one
    /// meaningful turn plus room to resolve), and limits must strictly
    /// increase with intensity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tier, limit) in [
            ("low", self.turn_limits.low),
            ("medium", self.turn_limits.medium),
            ("high", self.turn_limits.high),
        ] {
            if limit < 2 {
                return Err(ConfigError(format!(
                    "turn limit for {} is {}, minimum is 2",
                    tier, limit
                )));
            }
        }
        if !(self.turn_limits.low < self.turn_limits.medium
            && self.turn_limits.medium < self.turn_limits.high)
        {
            return Err(ConfigError(
                "turn limits must strictly increase with intensity".to_string(),
            ));
        }
        if self.speaking_time_ceiling <= 0.0 || self.speaking_time_ceiling > 1.0 {
            return Err(ConfigError(format!(
                "speaking_time_ceiling {} outside (0, 1]",
                self.speaking_time_ceiling
            )));
        }
        if self.warmup_words == 0 {
            return Err(ConfigError("warmup_words must be positive".to_string()));
        }
        if self.exchange_timeout_secs == 0 {
            return Err(ConfigError(
                "exchange_timeout_secs must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError(format!("toml parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_turns(), 3);
    }

    #[test]
    fn test_higher_intensity_more_turns() {
        let limits = TurnLimits::default();
        assert!(limits.for_level(IntensityLevel::Low) < limits.for_level(IntensityLevel::Medium));
        assert!(limits.for_level(IntensityLevel::Medium) < limits.for_level(IntensityLevel::High));
    }

    #[test]
    fn test_turn_limit_zero_or_one_rejected() {
        for bad in [0, 1] {
            let config = SessionConfig {
                turn_limits: TurnLimits {
                    low: bad,
                    medium: 3,
                    high: 4,
                },
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_non_increasing_limits_rejected() {
        let config = SessionConfig {
            turn_limits: TurnLimits {
                low: 3,
                medium: 3,
                high: 4,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ceiling_bounds() {
        let mut config = SessionConfig {
            speaking_time_ceiling: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.speaking_time_ceiling = 1.5;
        assert!(config.validate().is_err());
        config.speaking_time_ceiling = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip_with_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
mode = "hand_raise"
intensity = "high"
agent_cooldown_secs = 20

[turn_limits]
low = 2
medium = 3
high = 5
"#,
        )
        .unwrap();

        assert_eq!(config.mode, InteractionMode::HandRaise);
        assert_eq!(config.intensity, IntensityLevel::High);
        assert_eq!(config.max_turns(), 5);
        assert_eq!(config.agent_cooldown_secs, 20);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.warmup_words, 120);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(SessionConfig::from_toml_str("mode = \"interpretive_dance\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "intensity = \"low\"\n").unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert_eq!(config.intensity, IntensityLevel::Low);
        assert_eq!(config.max_turns(), 2);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(InteractionMode::SectionBreaks.to_string(), "section_breaks");
        assert_eq!(InteractionMode::HandRaise.to_string(), "hand_raise");
        assert_eq!(InteractionMode::Opportunistic.to_string(), "opportunistic");
    }
}
