//! Observability surface: settled-round history and the event channel.
//!
//! Observers (game screens, admin tooling) follow the engine through the
//! broadcast channel or by re-reading history; they never share mutable
//! state with the scheduler.

use crate::settlement::RoundSettlement;
use crate::types::{Outcome, Round, Wager};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::RwLock;
use tokio::sync::broadcast;

/// Engine lifecycle events, JSON-compatible for downstream consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    RoundOpened { round: Round },
    RoundResolving { round_id: u64 },
    OutcomeResolved { outcome: Outcome },
    RoundSettled { round_id: u64, total_staked: u64, total_paid: u64 },
}

/// One fully settled round as retained in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledRound {
    pub round: Round,
    pub outcome: Outcome,
    pub wagers: Vec<Wager>,
    pub total_staked: u64,
    pub total_paid: u64,
}

/// Bounded ring of settled rounds plus the event publisher
pub struct RoundHistory {
    cap: usize,
    rounds: RwLock<VecDeque<SettledRound>>,
    events: broadcast::Sender<GameEvent>,
}

impl RoundHistory {
    pub fn new(cap: usize) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            cap,
            rounds: RwLock::new(VecDeque::with_capacity(cap)),
            events,
        }
    }

    /// Subscribe to engine events. Slow subscribers may observe lag; they
    /// reconcile by re-reading history.
    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Send errors just mean nobody is listening.
    pub fn publish(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }

    /// Record a settled round, evicting the oldest past the cap
    pub fn record(&self, round: Round, outcome: Outcome, wagers: Vec<Wager>, settlement: &RoundSettlement) {
        let mut rounds = self.rounds.write().expect("history lock poisoned");
        if rounds.len() == self.cap {
            rounds.pop_front();
        }
        rounds.push_back(SettledRound {
            round,
            outcome,
            wagers,
            total_staked: settlement.total_staked,
            total_paid: settlement.total_paid,
        });
    }

    /// Most recent settled rounds, newest first
    pub fn recent(&self, limit: usize) -> Vec<SettledRound> {
        let rounds = self.rounds.read().expect("history lock poisoned");
        rounds.iter().rev().take(limit).cloned().collect()
    }

    /// Outcome of a retained past round
    pub fn outcome_for(&self, round_id: u64) -> Option<Outcome> {
        let rounds = self.rounds.read().expect("history lock poisoned");
        rounds
            .iter()
            .find(|r| r.round.id == round_id)
            .map(|r| r.outcome.clone())
    }

    pub fn len(&self) -> usize {
        self.rounds.read().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{now_millis, Color, Provenance, RoundStatus};

    fn settled(round_id: u64) -> (Round, Outcome, RoundSettlement) {
        let round = Round {
            id: round_id,
            start_time: now_millis(),
            end_time: now_millis(),
            status: RoundStatus::Settled,
        };
        let outcome = Outcome {
            round_id,
            winning_number: 4,
            winning_color: Color::Red,
            provenance: Provenance::Random,
            timestamp: now_millis(),
        };
        let settlement = RoundSettlement {
            round_id,
            total_staked: 0,
            total_paid: 0,
            settlements: vec![],
        };
        (round, outcome, settlement)
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let history = RoundHistory::new(3);
        for id in 1..=5 {
            let (round, outcome, settlement) = settled(id);
            history.record(round, outcome, vec![], &settlement);
        }

        assert_eq!(history.len(), 3);
        let recent = history.recent(10);
        assert_eq!(recent[0].round.id, 5);
        assert_eq!(recent[2].round.id, 3);
        assert!(history.outcome_for(1).is_none());
        assert!(history.outcome_for(4).is_some());
    }

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let history = RoundHistory::new(3);
        let mut rx = history.subscribe();

        history.publish(GameEvent::RoundResolving { round_id: 9 });
        match rx.recv().await.unwrap() {
            GameEvent::RoundResolving { round_id } => assert_eq!(round_id, 9),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let history = RoundHistory::new(1);
        history.publish(GameEvent::RoundResolving { round_id: 1 });
    }
}
