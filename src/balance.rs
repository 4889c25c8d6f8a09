//! Balance collaborator interface.
//!
//! The engine never holds money itself; stakes and payouts move through this
//! trait. A `DashMap`-backed reference implementation is provided for tests
//! and the demo binary.

use crate::errors::{EngineError, EngineResult};
use async_trait::async_trait;
use dashmap::DashMap;

/// External balance store consulted by the ledger (debits on placement) and
/// the scheduler (credits on settlement).
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balance in minor currency units
    async fn balance(&self, user_id: &str) -> EngineResult<u64>;

    /// Apply a signed delta and return the new balance. A debit that would
    /// take the balance negative is rejected with `InsufficientBalance` and
    /// leaves the balance untouched.
    async fn apply_delta(&self, user_id: &str, delta: i64) -> EngineResult<u64>;
}

/// In-memory balance store. Per-user updates are atomic: the DashMap entry
/// lock is held across the read-check-write.
pub struct InMemoryBalanceStore {
    accounts: DashMap<String, u64>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Seed an account, replacing any existing balance
    pub fn set_balance(&self, user_id: &str, amount: u64) {
        self.accounts.insert(user_id.to_string(), amount);
    }
}

impl Default for InMemoryBalanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn balance(&self, user_id: &str) -> EngineResult<u64> {
        Ok(self.accounts.get(user_id).map(|b| *b).unwrap_or(0))
    }

    async fn apply_delta(&self, user_id: &str, delta: i64) -> EngineResult<u64> {
        let mut entry = self.accounts.entry(user_id.to_string()).or_insert(0);
        let current = *entry;

        let updated = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            let debit = delta.unsigned_abs();
            if debit > current {
                return Err(EngineError::InsufficientBalance {
                    needed: debit,
                    available: current,
                });
            }
            current - debit
        };

        *entry = updated;
        Ok(updated)
    }
}
