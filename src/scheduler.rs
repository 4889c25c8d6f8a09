//! Round scheduler: the cycling state machine that owns round identity and
//! timing.
//!
//! One round is Betting or Resolving at any instant. The expiry handler is
//! the critical section: its re-entrancy guard is set atomically before the
//! first await, so two timer callbacks for the same round settle it exactly
//! once. A per-round failure degrades (queued payouts, random outcome) but
//! never stalls the cycle.

use crate::balance::BalanceStore;
use crate::config::GameConfig;
use crate::errors::EngineResult;
use crate::history::{GameEvent, RoundHistory};
use crate::ledger::BetLedger;
use crate::resolver::OutcomeResolver;
use crate::settlement::{RoundSettlement, SettlementCalculator, WagerSettlement};
use crate::types::{now_millis, Round, RoundStatus};
use dashmap::DashMap;
use log::{error, info, warn};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// How many recent rounds keep their expiry-guard and payout bookkeeping
/// entries before pruning.
const GUARD_WINDOW: u64 = 16;

pub struct RoundScheduler {
    config: GameConfig,
    ledger: Arc<BetLedger>,
    resolver: Arc<OutcomeResolver>,
    calculator: SettlementCalculator,
    balances: Arc<dyn BalanceStore>,
    history: Arc<RoundHistory>,
    current: RwLock<Round>,
    /// Rounds whose expiry handler has started. Insert-once semantics make
    /// the handler idempotent; checked before any suspension point.
    expiry_guard: DashMap<u64, ()>,
    /// Wagers already credited, keyed by wager id with the round for
    /// pruning. Replayed payouts consult this so money moves at most once.
    paid: DashMap<Uuid, u64>,
    /// Payouts that exhausted their retries, kept for replay
    replay_queue: Mutex<Vec<WagerSettlement>>,
    deadline_changed: Notify,
}

impl RoundScheduler {
    /// Create the scheduler and open the first betting round immediately.
    pub fn new(
        config: GameConfig,
        ledger: Arc<BetLedger>,
        resolver: Arc<OutcomeResolver>,
        balances: Arc<dyn BalanceStore>,
        history: Arc<RoundHistory>,
    ) -> Self {
        let calculator = SettlementCalculator::new(config.payout);
        let first = Round::open(1, config.round_duration_ms);
        ledger.open_round(first.id);
        history.publish(GameEvent::RoundOpened {
            round: first.clone(),
        });
        info!(
            "round {} open, betting until {}",
            first.id, first.end_time
        );

        Self {
            config,
            ledger,
            resolver,
            calculator,
            balances,
            history,
            current: RwLock::new(first),
            expiry_guard: DashMap::new(),
            paid: DashMap::new(),
            replay_queue: Mutex::new(Vec::new()),
            deadline_changed: Notify::new(),
        }
    }

    /// Snapshot of the round currently Betting, Resolving or freshly Settled
    pub fn current_round(&self) -> Round {
        self.current.read().expect("round lock poisoned").clone()
    }

    /// Advance a round's deadline to now, forcing the run loop to expire it
    /// on its next wakeup. Rounds are never deleted mid-flight.
    pub fn end_round_early(&self, round_id: u64) {
        {
            let mut current = self.current.write().expect("round lock poisoned");
            if current.id != round_id || current.status != RoundStatus::Betting {
                return;
            }
            current.end_time = now_millis();
        }
        info!("round {} deadline advanced by operator", round_id);
        self.deadline_changed.notify_waiters();
    }

    /// Expiry handler. Idempotent: the first call for a round id proceeds,
    /// every later one returns `None`. Runs the resolve -> settle -> credit
    /// pipeline and leaves the round Settled.
    pub async fn on_expiry(&self, round_id: u64) -> EngineResult<Option<RoundSettlement>> {
        // Validate against the current round before touching the guard: a
        // stray call with a stale or future round id must not leave a guard
        // entry that would block that round's real expiry later. The whole
        // check-and-set runs under the round lock, before any await.
        {
            let mut current = self.current.write().expect("round lock poisoned");
            if current.id != round_id || current.status != RoundStatus::Betting {
                return Ok(None);
            }
            if self.expiry_guard.insert(round_id, ()).is_some() {
                return Ok(None);
            }
            current.status = RoundStatus::Resolving;
        }
        self.ledger.close_round(round_id);
        self.history.publish(GameEvent::RoundResolving { round_id });

        let outcome = self.resolver.resolve(round_id);
        self.history.publish(GameEvent::OutcomeResolved {
            outcome: outcome.clone(),
        });

        let wagers = self.ledger.wagers_for(round_id);
        let settlement = self.calculator.settle(&outcome, &wagers);
        self.ledger.mark_settled(round_id, &settlement.settlements);

        self.apply_payouts(&settlement).await;

        let round = {
            let mut current = self.current.write().expect("round lock poisoned");
            current.status = RoundStatus::Settled;
            current.clone()
        };

        let settled_wagers = self.ledger.settled_wagers(round_id);
        self.history
            .record(round, outcome, settled_wagers, &settlement);
        self.history.publish(GameEvent::RoundSettled {
            round_id,
            total_staked: settlement.total_staked,
            total_paid: settlement.total_paid,
        });
        info!(
            "round {} settled: {} wagers, staked={} paid={}",
            round_id,
            settlement.settlements.len(),
            settlement.total_staked,
            settlement.total_paid
        );

        self.prune_bookkeeping(round_id);
        Ok(Some(settlement))
    }

    /// Open the next round after the current one has settled
    pub fn open_next_round(&self) -> Round {
        let round = {
            let mut current = self.current.write().expect("round lock poisoned");
            let next = Round::open(current.id + 1, self.config.round_duration_ms);
            *current = next.clone();
            next
        };
        self.ledger.open_round(round.id);
        self.history.publish(GameEvent::RoundOpened {
            round: round.clone(),
        });
        info!("round {} open, betting until {}", round.id, round.end_time);
        round
    }

    /// Drive the lifecycle forever: wait for the deadline, settle, hold the
    /// outcome on display through the reveal pause, open the next round.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.run_one_cycle().await;
        }
    }

    /// A single betting -> settled -> next-round-open cycle
    pub async fn run_one_cycle(&self) {
        // Recompute the wait from wall clock each pass so an advanced
        // deadline takes effect immediately.
        let round_id = loop {
            let (round_id, remaining) = {
                let current = self.current.read().expect("round lock poisoned");
                (current.id, current.remaining_ms())
            };
            if remaining == 0 {
                break round_id;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(remaining)) => break round_id,
                _ = self.deadline_changed.notified() => continue,
            }
        };

        if let Err(e) = self.on_expiry(round_id).await {
            // Surfaced for audit, but the cycle continues: a stalled round
            // is a liveness bug.
            error!("round {} expiry failed: {}", round_id, e);
        }

        tokio::time::sleep(Duration::from_millis(self.config.reveal_pause_ms)).await;
        self.open_next_round();
    }

    /// Credit winners with bounded retry. Payouts that still fail are queued
    /// for replay, never dropped, and never applied twice.
    async fn apply_payouts(&self, settlement: &RoundSettlement) {
        for result in &settlement.settlements {
            if result.payout == 0 {
                continue;
            }
            if self.paid.contains_key(&result.wager_id) {
                continue;
            }
            if self.credit_with_retry(result).await {
                self.paid.insert(result.wager_id, settlement.round_id);
            } else {
                error!(
                    "payout of {} to {} (wager {}) failed after {} attempts; queued for replay",
                    result.payout,
                    result.user_id,
                    result.wager_id,
                    self.config.settlement_retry.max_attempts
                );
                self.replay_queue
                    .lock()
                    .expect("replay queue poisoned")
                    .push(result.clone());
            }
        }
    }

    async fn credit_with_retry(&self, result: &WagerSettlement) -> bool {
        let retry = self.config.settlement_retry;
        for attempt in 1..=retry.max_attempts {
            match self
                .balances
                .apply_delta(&result.user_id, result.payout as i64)
                .await
            {
                Ok(_) => return true,
                Err(e) => {
                    warn!(
                        "payout attempt {}/{} for wager {} failed: {}",
                        attempt, retry.max_attempts, result.wager_id, e
                    );
                    if attempt < retry.max_attempts {
                        tokio::time::sleep(Duration::from_millis(retry.backoff_ms * attempt as u64))
                            .await;
                    }
                }
            }
        }
        false
    }

    /// Re-attempt queued payouts. Safe to call repeatedly; each wager is
    /// credited at most once.
    pub async fn replay_pending_payouts(&self) {
        let queued: Vec<WagerSettlement> = {
            let mut queue = self.replay_queue.lock().expect("replay queue poisoned");
            std::mem::take(&mut *queue)
        };
        if queued.is_empty() {
            return;
        }
        info!("replaying {} queued payouts", queued.len());

        for result in queued {
            if self.paid.contains_key(&result.wager_id) {
                continue;
            }
            match self
                .balances
                .apply_delta(&result.user_id, result.payout as i64)
                .await
            {
                Ok(_) => {
                    self.paid.insert(result.wager_id, 0);
                }
                Err(e) => {
                    warn!("replay for wager {} failed: {}", result.wager_id, e);
                    self.replay_queue
                        .lock()
                        .expect("replay queue poisoned")
                        .push(result);
                }
            }
        }
    }

    /// Number of payouts awaiting replay
    pub fn pending_replays(&self) -> usize {
        self.replay_queue.lock().expect("replay queue poisoned").len()
    }

    fn prune_bookkeeping(&self, settled_round: u64) {
        let horizon = settled_round.saturating_sub(GUARD_WINDOW);
        self.expiry_guard.retain(|round_id, _| *round_id > horizon);
        self.paid.retain(|_, round_id| *round_id > horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::InMemoryBalanceStore;
    use crate::config::{DrawPolicy, PayoutPolicy, RetryConfig};
    use crate::errors::{EngineError, EngineResult};
    use crate::types::{BetSubmission, Color, ColorBet, NumberBet, OverrideRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> GameConfig {
        GameConfig {
            min_stake: 5,
            round_duration_ms: 50,
            reveal_pause_ms: 10,
            draw_policy: DrawPolicy::Independent,
            payout: PayoutPolicy::default(),
            settlement_retry: RetryConfig {
                max_attempts: 2,
                backoff_ms: 5,
            },
            history_cap: 10,
        }
    }

    fn build_engine(config: GameConfig, balances: Arc<dyn BalanceStore>) -> crate::GameEngine {
        crate::GameEngine::new(config, balances)
    }

    /// Balance store whose credits fail a set number of times. Debits always
    /// pass through.
    struct FlakyBalanceStore {
        inner: InMemoryBalanceStore,
        failing_credits: AtomicU32,
    }

    impl FlakyBalanceStore {
        fn new(failing_credits: u32) -> Self {
            Self {
                inner: InMemoryBalanceStore::new(),
                failing_credits: AtomicU32::new(failing_credits),
            }
        }
    }

    #[async_trait]
    impl BalanceStore for FlakyBalanceStore {
        async fn balance(&self, user_id: &str) -> EngineResult<u64> {
            self.inner.balance(user_id).await
        }

        async fn apply_delta(&self, user_id: &str, delta: i64) -> EngineResult<u64> {
            if delta > 0 {
                let remaining = self.failing_credits.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.failing_credits.store(remaining - 1, Ordering::SeqCst);
                    return Err(EngineError::SettlementFailure(
                        "balance store unavailable".to_string(),
                    ));
                }
            }
            self.inner.apply_delta(user_id, delta).await
        }
    }

    #[tokio::test]
    async fn test_worked_example_end_to_end() {
        // Round duration 30s-style flow, stake 10 on RED and 10 on 7,
        // forced outcome 7/GREEN: payout 0 + 90, net balance 70 -> 160.
        let store = Arc::new(InMemoryBalanceStore::new());
        store.set_balance("alice", 90);
        let engine = build_engine(test_config(), store.clone());

        let round = engine.scheduler.current_round();
        engine
            .ledger
            .place_wager(&BetSubmission {
                user_id: "alice".to_string(),
                round_id: round.id,
                color_bet: Some(ColorBet {
                    color: Color::Red,
                    amount: 10,
                }),
                number_bet: Some(NumberBet {
                    number: 7,
                    amount: 10,
                }),
            })
            .await
            .unwrap();
        assert_eq!(store.balance("alice").await.unwrap(), 70);

        engine
            .resolver
            .set_override(OverrideRequest {
                winning_number: 7,
                winning_color: Color::Green,
            })
            .unwrap();

        let settlement = engine.scheduler.on_expiry(round.id).await.unwrap().unwrap();
        assert_eq!(settlement.total_staked, 20);
        assert_eq!(settlement.total_paid, 90);
        assert_eq!(store.balance("alice").await.unwrap(), 160);

        let settled = engine.ledger.settled_wagers(round.id);
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|w| w.settled));
    }

    #[tokio::test]
    async fn test_expiry_is_idempotent() {
        let store = Arc::new(InMemoryBalanceStore::new());
        store.set_balance("bob", 100);
        let engine = build_engine(test_config(), store.clone());

        let round = engine.scheduler.current_round();
        engine
            .ledger
            .place_wager(&BetSubmission {
                user_id: "bob".to_string(),
                round_id: round.id,
                color_bet: Some(ColorBet {
                    color: Color::Red,
                    amount: 10,
                }),
                number_bet: None,
            })
            .await
            .unwrap();
        engine
            .resolver
            .set_override(OverrideRequest {
                winning_number: 2,
                winning_color: Color::Red,
            })
            .unwrap();

        let first = engine.scheduler.on_expiry(round.id).await.unwrap();
        let second = engine.scheduler.on_expiry(round.id).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        // One outcome recorded, each wager settled exactly once, balance
        // credited exactly once: 100 - 10 + 19 = 109
        assert_eq!(engine.history.len(), 1);
        assert_eq!(store.balance("bob").await.unwrap(), 109);
    }

    #[tokio::test]
    async fn test_concurrent_expiry_settles_once() {
        let store = Arc::new(InMemoryBalanceStore::new());
        store.set_balance("carol", 100);
        let engine = build_engine(test_config(), store.clone());

        let round = engine.scheduler.current_round();
        engine
            .ledger
            .place_wager(&BetSubmission {
                user_id: "carol".to_string(),
                round_id: round.id,
                color_bet: Some(ColorBet {
                    color: Color::Violet,
                    amount: 20,
                }),
                number_bet: None,
            })
            .await
            .unwrap();
        engine
            .resolver
            .set_override(OverrideRequest {
                winning_number: 0,
                winning_color: Color::Violet,
            })
            .unwrap();

        let (a, b) = tokio::join!(
            engine.scheduler.on_expiry(round.id),
            engine.scheduler.on_expiry(round.id)
        );
        let settled = [a.unwrap(), b.unwrap()];
        assert_eq!(settled.iter().filter(|s| s.is_some()).count(), 1);
        // 100 - 20 + 90 (20 x 4.5)
        assert_eq!(store.balance("carol").await.unwrap(), 170);
    }

    #[tokio::test]
    async fn test_late_wager_rejected_after_resolving() {
        let store = Arc::new(InMemoryBalanceStore::new());
        store.set_balance("dave", 100);
        let engine = build_engine(test_config(), store.clone());

        let round = engine.scheduler.current_round();
        engine.scheduler.on_expiry(round.id).await.unwrap();

        let err = engine
            .ledger
            .place_wager(&BetSubmission {
                user_id: "dave".to_string(),
                round_id: round.id,
                color_bet: Some(ColorBet {
                    color: Color::Red,
                    amount: 10,
                }),
                number_bet: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RoundClosed(_)));
        assert_eq!(store.balance("dave").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_cycle_opens_next_round() {
        let store = Arc::new(InMemoryBalanceStore::new());
        let engine = build_engine(test_config(), store);

        let first = engine.scheduler.current_round();
        assert_eq!(first.id, 1);

        engine.scheduler.run_one_cycle().await;

        let next = engine.scheduler.current_round();
        assert_eq!(next.id, 2);
        assert_eq!(next.status, RoundStatus::Betting);
        assert!(engine.history.outcome_for(1).is_some());
    }

    #[tokio::test]
    async fn test_override_applies_to_next_round_only() {
        let store = Arc::new(InMemoryBalanceStore::new());
        let engine = build_engine(test_config(), store);

        engine
            .resolver
            .set_override(OverrideRequest {
                winning_number: 5,
                winning_color: Color::Violet,
            })
            .unwrap();

        engine.scheduler.run_one_cycle().await;
        engine.scheduler.run_one_cycle().await;

        let first = engine.history.outcome_for(1).unwrap();
        assert_eq!(first.provenance, crate::types::Provenance::Operator);
        assert_eq!(first.winning_number, 5);

        let second = engine.history.outcome_for(2).unwrap();
        assert_eq!(second.provenance, crate::types::Provenance::Random);
    }

    #[tokio::test]
    async fn test_end_round_early_advances_deadline() {
        let store = Arc::new(InMemoryBalanceStore::new());
        let mut config = test_config();
        config.round_duration_ms = 60_000;
        let engine = build_engine(config, store);

        let round = engine.scheduler.current_round();
        engine.scheduler.end_round_early(round.id);
        assert_eq!(engine.scheduler.current_round().remaining_ms(), 0);

        // The run loop picks the advanced deadline up immediately
        tokio::time::timeout(Duration::from_secs(5), engine.scheduler.run_one_cycle())
            .await
            .expect("cycle should complete after early end");
        assert_eq!(engine.scheduler.current_round().id, 2);
    }

    #[tokio::test]
    async fn test_failed_payout_queued_and_replayed_once() {
        // Credits fail past the retry budget, then recover
        let store = Arc::new(FlakyBalanceStore::new(2));
        store.inner.set_balance("erin", 100);
        let balances: Arc<dyn BalanceStore> = store.clone();
        let engine = build_engine(test_config(), balances);

        let round = engine.scheduler.current_round();
        engine
            .ledger
            .place_wager(&BetSubmission {
                user_id: "erin".to_string(),
                round_id: round.id,
                color_bet: Some(ColorBet {
                    color: Color::Green,
                    amount: 10,
                }),
                number_bet: None,
            })
            .await
            .unwrap();
        engine
            .resolver
            .set_override(OverrideRequest {
                winning_number: 1,
                winning_color: Color::Green,
            })
            .unwrap();

        let settlement = engine.scheduler.on_expiry(round.id).await.unwrap().unwrap();
        assert_eq!(settlement.total_paid, 19);
        // Both retry attempts consumed the failing credits; payout queued
        assert_eq!(engine.scheduler.pending_replays(), 1);
        assert_eq!(store.balance("erin").await.unwrap(), 90);

        engine.scheduler.replay_pending_payouts().await;
        assert_eq!(engine.scheduler.pending_replays(), 0);
        assert_eq!(store.balance("erin").await.unwrap(), 109);

        // A second replay pass must not double-pay
        engine.scheduler.replay_pending_payouts().await;
        assert_eq!(store.balance("erin").await.unwrap(), 109);
    }

    #[tokio::test]
    async fn test_expiry_with_future_round_id_does_not_block_that_round() {
        let store = Arc::new(InMemoryBalanceStore::new());
        store.set_balance("frank", 100);
        let engine = build_engine(test_config(), store.clone());

        // A stray expiry call for a round that has not opened yet is a no-op
        let stray = engine.scheduler.on_expiry(2).await.unwrap();
        assert!(stray.is_none());

        // Round 1 settles normally and round 2 opens
        assert!(engine.scheduler.on_expiry(1).await.unwrap().is_some());
        let round = engine.scheduler.open_next_round();
        assert_eq!(round.id, 2);

        engine
            .ledger
            .place_wager(&BetSubmission {
                user_id: "frank".to_string(),
                round_id: 2,
                color_bet: Some(ColorBet {
                    color: Color::Red,
                    amount: 10,
                }),
                number_bet: None,
            })
            .await
            .unwrap();
        engine
            .resolver
            .set_override(OverrideRequest {
                winning_number: 4,
                winning_color: Color::Red,
            })
            .unwrap();

        // Round 2's genuine expiry must settle it despite the earlier stray
        // call carrying the same id
        let settled = engine.scheduler.on_expiry(2).await.unwrap();
        assert!(settled.is_some());
        assert_eq!(engine.scheduler.current_round().status, RoundStatus::Settled);
        // 100 - 10 + 19
        assert_eq!(store.balance("frank").await.unwrap(), 109);
    }

    #[tokio::test]
    async fn test_round_settles_even_with_no_wagers() {
        let store = Arc::new(InMemoryBalanceStore::new());
        let engine = build_engine(test_config(), store);

        let round = engine.scheduler.current_round();
        let settlement = engine.scheduler.on_expiry(round.id).await.unwrap().unwrap();
        assert_eq!(settlement.total_staked, 0);
        assert_eq!(settlement.total_paid, 0);
        assert_eq!(engine.scheduler.current_round().status, RoundStatus::Settled);
    }
}
