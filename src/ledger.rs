//! Bet ledger: validates and records wagers against the open round.
//!
//! Placement is debit-first: the stake is reserved against the user's
//! balance before anything is written, and refunded if the round closes
//! between the debit and the record. No wager exists without its debit.

use crate::balance::BalanceStore;
use crate::errors::{EngineError, EngineResult};
use crate::types::{BetSubmission, Wager};
use dashmap::DashMap;
use log::{info, warn};
use std::sync::{Arc, RwLock};

pub struct BetLedger {
    min_stake: u64,
    balances: Arc<dyn BalanceStore>,
    /// Round currently accepting wagers, 0 when none. Writes (open/close)
    /// take the write lock; placement holds the read lock across its
    /// check-and-record so a close cannot interleave.
    betting_round: RwLock<u64>,
    /// Unsettled wagers keyed by round id
    active: DashMap<u64, Vec<Wager>>,
    /// Settled wagers retained for history queries
    settled: DashMap<u64, Vec<Wager>>,
}

impl BetLedger {
    pub fn new(min_stake: u64, balances: Arc<dyn BalanceStore>) -> Self {
        Self {
            min_stake,
            balances,
            betting_round: RwLock::new(0),
            active: DashMap::new(),
            settled: DashMap::new(),
        }
    }

    /// Mark a round as the one accepting wagers
    pub fn open_round(&self, round_id: u64) {
        let mut guard = self.betting_round.write().expect("betting round lock poisoned");
        *guard = round_id;
    }

    /// Stop accepting wagers for the given round. Idempotent; a later or
    /// unrelated round id leaves the current one open.
    pub fn close_round(&self, round_id: u64) {
        let mut guard = self.betting_round.write().expect("betting round lock poisoned");
        if *guard == round_id {
            *guard = 0;
        }
    }

    /// Validate and record a bet submission. Returns one wager per sub-bet.
    pub async fn place_wager(&self, submission: &BetSubmission) -> EngineResult<Vec<Wager>> {
        let round_id = submission.round_id;

        if submission.color_bet.is_none() && submission.number_bet.is_none() {
            return Err(EngineError::NoValidSelection);
        }
        if let Some(number_bet) = submission.number_bet {
            if number_bet.number > 9 {
                return Err(EngineError::NoValidSelection);
            }
        }

        let mut total_stake: u64 = 0;
        for stake in submission
            .color_bet
            .map(|b| b.amount)
            .into_iter()
            .chain(submission.number_bet.map(|b| b.amount))
        {
            if stake < self.min_stake {
                return Err(EngineError::StakeBelowMinimum {
                    stake,
                    minimum: self.min_stake,
                });
            }
            total_stake += stake;
        }

        // Cheap early rejection before touching the balance store
        if *self.betting_round.read().expect("betting round lock poisoned") != round_id {
            return Err(EngineError::RoundClosed(round_id));
        }

        // Reserve the full stake first
        self.balances
            .apply_delta(&submission.user_id, -(total_stake as i64))
            .await?;

        // Re-check under the lock: the round may have entered resolving
        // while the debit was in flight. Late wagers are refunded and
        // rejected, never silently settled.
        {
            let guard = self.betting_round.read().expect("betting round lock poisoned");
            if *guard != round_id {
                drop(guard);
                self.refund(&submission.user_id, total_stake).await;
                return Err(EngineError::RoundClosed(round_id));
            }

            let mut wagers = Vec::with_capacity(2);
            if let Some(color_bet) = submission.color_bet {
                wagers.push(Wager::new(
                    &submission.user_id,
                    round_id,
                    Some(color_bet.color),
                    None,
                    color_bet.amount,
                ));
            }
            if let Some(number_bet) = submission.number_bet {
                wagers.push(Wager::new(
                    &submission.user_id,
                    round_id,
                    None,
                    Some(number_bet.number),
                    number_bet.amount,
                ));
            }

            self.active
                .entry(round_id)
                .or_default()
                .extend(wagers.iter().cloned());

            info!(
                "wager placed: user={} round={} stake={} ({} sub-bets)",
                submission.user_id,
                round_id,
                total_stake,
                wagers.len()
            );
            Ok(wagers)
        }
    }

    /// Unsettled wagers for a round, in placement order
    pub fn wagers_for(&self, round_id: u64) -> Vec<Wager> {
        self.active
            .get(&round_id)
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// Apply write-once settlement fields and move the round's wagers from
    /// the active set to history. Unknown wager ids in `results` are
    /// ignored; active wagers without a result stay unsettled.
    pub fn mark_settled(&self, round_id: u64, results: &[crate::settlement::WagerSettlement]) {
        let Some((_, mut wagers)) = self.active.remove(&round_id) else {
            return;
        };

        for wager in wagers.iter_mut() {
            if wager.settled {
                continue;
            }
            if let Some(result) = results.iter().find(|r| r.wager_id == wager.id) {
                wager.settled = true;
                wager.won = result.won;
                wager.payout = result.payout;
            }
        }

        self.settled.insert(round_id, wagers);
    }

    /// Settled wagers for a past round
    pub fn settled_wagers(&self, round_id: u64) -> Vec<Wager> {
        self.settled
            .get(&round_id)
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    async fn refund(&self, user_id: &str, amount: u64) {
        if let Err(e) = self.balances.apply_delta(user_id, amount as i64).await {
            // A credit should never fail in a correct store; this is an
            // operational alert, not a recoverable path.
            warn!("refund of {} to {} failed: {}", amount, user_id, e);
        }
    }
}
