//! Tricolor - Round Lifecycle & Settlement Engine
//!
//! A repeating-round prediction game: each round accepts wagers on a color
//! (RED/GREEN/VIOLET) and/or a digit (0-9), then resolves a single winning
//! outcome and settles every wager placed in that round. This crate is the
//! engine only: round timing, the bet ledger, outcome resolution and payout
//! computation. Identity, custody and presentation live behind the
//! [`balance::BalanceStore`] trait and the [`history`] event surface.

pub mod balance;
pub mod config;
pub mod errors;
pub mod history;
pub mod ledger;
pub mod resolver;
pub mod scheduler;
pub mod settlement;
pub mod types;

pub use balance::{BalanceStore, InMemoryBalanceStore};
pub use config::{ConfigLoader, DrawPolicy, GameConfig, MultiplierTable, PayoutPolicy};
pub use errors::{EngineError, EngineResult};
pub use history::{GameEvent, RoundHistory};
pub use ledger::BetLedger;
pub use resolver::OutcomeResolver;
pub use scheduler::RoundScheduler;
pub use settlement::{RoundSettlement, SettlementCalculator, WagerSettlement};
pub use types::{
    BetSubmission, Color, ColorBet, NumberBet, Outcome, OverrideRequest, Provenance, Round,
    RoundStatus, Wager,
};

use std::sync::Arc;

/// Fully wired engine: every component sharing one config and one balance
/// store. Construction opens the first betting round.
pub struct GameEngine {
    pub ledger: Arc<BetLedger>,
    pub resolver: Arc<OutcomeResolver>,
    pub history: Arc<RoundHistory>,
    pub scheduler: Arc<RoundScheduler>,
}

impl GameEngine {
    pub fn new(config: GameConfig, balances: Arc<dyn BalanceStore>) -> Self {
        let ledger = Arc::new(BetLedger::new(config.min_stake, balances.clone()));
        let resolver = Arc::new(OutcomeResolver::new(config.draw_policy));
        let history = Arc::new(RoundHistory::new(config.history_cap));
        let scheduler = Arc::new(RoundScheduler::new(
            config,
            ledger.clone(),
            resolver.clone(),
            balances,
            history.clone(),
        ));
        Self {
            ledger,
            resolver,
            history,
            scheduler,
        }
    }
}
