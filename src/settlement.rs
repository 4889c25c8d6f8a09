//! Payout computation.
//!
//! Pure arithmetic over integer minor units: no balance access, no clocks,
//! no randomness. The scheduler feeds it a round's outcome and wagers and
//! applies the resulting deltas.

use crate::config::{MultiplierTable, PayoutPolicy};
use crate::types::{Outcome, Wager};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-wager settlement decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerSettlement {
    pub wager_id: Uuid,
    pub user_id: String,
    pub won: bool,
    /// Payout in minor currency units; 0 for a losing wager
    pub payout: u64,
}

/// Aggregate result of settling one round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSettlement {
    pub round_id: u64,
    pub total_staked: u64,
    pub total_paid: u64,
    pub settlements: Vec<WagerSettlement>,
}

pub struct SettlementCalculator {
    policy: PayoutPolicy,
}

impl SettlementCalculator {
    pub fn new(policy: PayoutPolicy) -> Self {
        Self { policy }
    }

    /// Compute every wager's settlement for a round. Wagers not belonging
    /// to the outcome's round are ignored.
    pub fn settle(&self, outcome: &Outcome, wagers: &[Wager]) -> RoundSettlement {
        let round_wagers: Vec<&Wager> = wagers
            .iter()
            .filter(|w| w.round_id == outcome.round_id && !w.settled)
            .collect();

        let settlements = match self.policy {
            PayoutPolicy::FixedOdds { multipliers } => {
                Self::settle_fixed_odds(outcome, &round_wagers, &multipliers)
            }
            PayoutPolicy::Parimutuel { commission_bps } => {
                Self::settle_parimutuel(outcome, &round_wagers, commission_bps)
            }
        };

        let total_staked = round_wagers.iter().map(|w| w.amount).sum();
        let total_paid = settlements.iter().map(|s| s.payout).sum();

        RoundSettlement {
            round_id: outcome.round_id,
            total_staked,
            total_paid,
            settlements,
        }
    }

    fn is_winner(outcome: &Outcome, wager: &Wager) -> bool {
        wager.selected_color == Some(outcome.winning_color)
            || wager.selected_number == Some(outcome.winning_number)
    }

    /// Each winning sub-wager pays stake x multiplier independently. A wager
    /// carrying both selections can win on color, number, or both, with the
    /// payouts summed.
    fn settle_fixed_odds(
        outcome: &Outcome,
        wagers: &[&Wager],
        multipliers: &MultiplierTable,
    ) -> Vec<WagerSettlement> {
        wagers
            .iter()
            .map(|wager| {
                let mut payout: u64 = 0;

                if let Some(color) = wager.selected_color {
                    if color == outcome.winning_color {
                        let multiplier = match color {
                            crate::types::Color::Red => multipliers.red,
                            crate::types::Color::Green => multipliers.green,
                            crate::types::Color::Violet => multipliers.violet,
                        };
                        payout += scaled(wager.amount, multiplier);
                    }
                }
                if let Some(number) = wager.selected_number {
                    if number == outcome.winning_number {
                        payout += scaled(wager.amount, multipliers.number);
                    }
                }

                WagerSettlement {
                    wager_id: wager.id,
                    user_id: wager.user_id.clone(),
                    won: payout > 0,
                    payout,
                }
            })
            .collect()
    }

    /// Commission is taken off the round's total stake to form the pool; the
    /// pool is split among winners in proportion to stake. Integer division
    /// per winner; the remainder (and the whole pool when nobody won) is
    /// retained by the house.
    fn settle_parimutuel(
        outcome: &Outcome,
        wagers: &[&Wager],
        commission_bps: u64,
    ) -> Vec<WagerSettlement> {
        let total_stake: u128 = wagers.iter().map(|w| w.amount as u128).sum();
        let pool = total_stake * (10_000 - commission_bps as u128) / 10_000;

        let total_winning_stake: u128 = wagers
            .iter()
            .filter(|w| Self::is_winner(outcome, w))
            .map(|w| w.amount as u128)
            .sum();

        wagers
            .iter()
            .map(|wager| {
                let won = Self::is_winner(outcome, wager);
                let payout = if won && total_winning_stake > 0 {
                    (wager.amount as u128 * pool / total_winning_stake) as u64
                } else {
                    0
                };
                WagerSettlement {
                    wager_id: wager.id,
                    user_id: wager.user_id.clone(),
                    won,
                    payout,
                }
            })
            .collect()
    }
}

/// stake x multiplier where the multiplier is expressed in hundredths
fn scaled(amount: u64, multiplier_hundredths: u64) -> u64 {
    (amount as u128 * multiplier_hundredths as u128 / 100) as u64
}
