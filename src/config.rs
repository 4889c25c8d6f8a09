//! Engine configuration with file loading, environment overrides and
//! validation.

use crate::errors::{ConfigError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Fixed-odds payout multipliers in hundredths (190 = 1.9x the stake).
/// The house edge is built into these multipliers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiplierTable {
    pub red: u64,
    pub green: u64,
    pub violet: u64,
    pub number: u64,
}

impl Default for MultiplierTable {
    fn default() -> Self {
        Self {
            red: 190,
            green: 190,
            violet: 450,
            number: 900,
        }
    }
}

/// How winnings are computed at settlement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PayoutPolicy {
    /// Each winning sub-wager pays stake x multiplier, independent of other
    /// players
    FixedOdds { multipliers: MultiplierTable },
    /// Losing stakes (minus commission) are redistributed among winners in
    /// proportion to stake
    Parimutuel { commission_bps: u64 },
}

impl Default for PayoutPolicy {
    fn default() -> Self {
        PayoutPolicy::FixedOdds {
            multipliers: MultiplierTable::default(),
        }
    }
}

/// How the random winning pair is drawn when no operator override applies
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrawPolicy {
    /// Number and color drawn uniformly and independently
    #[default]
    Independent,
    /// Color forced to VIOLET when the number lands on 0 or 5, drawn
    /// uniformly from RED/GREEN otherwise
    ForcedViolet,
}

/// Bounded retry for balance-store credits during settlement
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 200,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Minimum stake per sub-bet, in minor currency units
    pub min_stake: u64,
    pub round_duration_ms: u64,
    /// Pause after settlement during which the outcome stays displayed
    /// before the next round opens
    pub reveal_pause_ms: u64,
    pub draw_policy: DrawPolicy,
    /// Number of settled rounds retained in the in-memory history ring
    pub history_cap: usize,
    pub payout: PayoutPolicy,
    pub settlement_retry: RetryConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_stake: 5,
            round_duration_ms: 60_000,
            reveal_pause_ms: 10_000,
            draw_policy: DrawPolicy::default(),
            payout: PayoutPolicy::default(),
            settlement_retry: RetryConfig::default(),
            history_cap: 10,
        }
    }
}

/// Configuration loader with TOML file and environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<GameConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            GameConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<GameConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadFailed(format!("failed to read {}: {}", path, e))
        })?;

        let config = toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)))?;
        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut GameConfig) -> EngineResult<()> {
        if let Ok(stake) = env::var("TRICOLOR_MIN_STAKE") {
            config.min_stake = stake.parse().map_err(|_| ConfigError::InvalidValue {
                field: "TRICOLOR_MIN_STAKE".to_string(),
                value: stake,
                reason: "not an unsigned integer".to_string(),
            })?;
        }
        if let Ok(duration) = env::var("TRICOLOR_ROUND_DURATION_MS") {
            config.round_duration_ms =
                duration.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "TRICOLOR_ROUND_DURATION_MS".to_string(),
                    value: duration,
                    reason: "not an unsigned integer".to_string(),
                })?;
        }
        if let Ok(pause) = env::var("TRICOLOR_REVEAL_PAUSE_MS") {
            config.reveal_pause_ms = pause.parse().map_err(|_| ConfigError::InvalidValue {
                field: "TRICOLOR_REVEAL_PAUSE_MS".to_string(),
                value: pause,
                reason: "not an unsigned integer".to_string(),
            })?;
        }
        if let Ok(policy) = env::var("TRICOLOR_DRAW_POLICY") {
            config.draw_policy = match policy.as_str() {
                "independent" => DrawPolicy::Independent,
                "forced_violet" => DrawPolicy::ForcedViolet,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "TRICOLOR_DRAW_POLICY".to_string(),
                        value: policy,
                        reason: "expected 'independent' or 'forced_violet'".to_string(),
                    }
                    .into())
                }
            };
        }
        Ok(())
    }

    fn validate(&self, config: &GameConfig) -> EngineResult<()> {
        if config.min_stake == 0 {
            return Err(ConfigError::InvalidValue {
                field: "min_stake".to_string(),
                value: "0".to_string(),
                reason: "minimum stake must be positive".to_string(),
            }
            .into());
        }
        if config.round_duration_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "round_duration_ms".to_string(),
                value: "0".to_string(),
                reason: "round duration must be positive".to_string(),
            }
            .into());
        }
        if let PayoutPolicy::Parimutuel { commission_bps } = config.payout {
            if commission_bps >= 10_000 {
                return Err(ConfigError::InvalidValue {
                    field: "payout.commission_bps".to_string(),
                    value: commission_bps.to_string(),
                    reason: "commission must be below 10000 basis points".to_string(),
                }
                .into());
            }
        }
        if let PayoutPolicy::FixedOdds { multipliers } = config.payout {
            for (name, value) in [
                ("red", multipliers.red),
                ("green", multipliers.green),
                ("violet", multipliers.violet),
                ("number", multipliers.number),
            ] {
                if value == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: format!("payout.multipliers.{}", name),
                        value: "0".to_string(),
                        reason: "multiplier must be positive".to_string(),
                    }
                    .into());
                }
            }
        }
        if config.settlement_retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "settlement_retry.max_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            }
            .into());
        }
        if config.history_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history_cap".to_string(),
                value: "0".to_string(),
                reason: "history cap must be positive".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save(&self, config: &GameConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to write {}: {}", path, e)))?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a sample configuration file with defaults
pub fn generate_sample_config(path: &str) -> EngineResult<()> {
    ConfigLoader::new().save(&GameConfig::default(), path)
}
