//! Error types for the tricolor game engine.

use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Wager carries neither a color nor a number selection
    #[error("wager has no valid selection")]
    NoValidSelection,

    /// Stake below the configured minimum
    #[error("stake {stake} is below the minimum of {minimum}")]
    StakeBelowMinimum { stake: u64, minimum: u64 },

    /// Wager submitted against a round that is not accepting bets
    #[error("round {0} is not accepting wagers")]
    RoundClosed(u64),

    /// Debit would take the user's balance negative
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u64 },

    /// Malformed or partial operator override
    #[error("invalid operator override: {0}")]
    InvalidOverride(String),

    /// Balance store unavailable or rejecting during payout
    #[error("settlement failed: {0}")]
    SettlementFailure(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Convenience alias used throughout the crate
pub type EngineResult<T> = Result<T, EngineError>;
