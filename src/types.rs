use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Betting colors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Color {
    Red,
    Green,
    Violet,
}

impl Color {
    pub fn all() -> [Color; 3] {
        [Color::Red, Color::Green, Color::Violet]
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Red => write!(f, "RED"),
            Color::Green => write!(f, "GREEN"),
            Color::Violet => write!(f, "VIOLET"),
        }
    }
}

/// Round lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Betting,
    Resolving,
    Settled,
}

/// One timed betting cycle. Timestamps are absolute unix milliseconds so the
/// remaining duration can be recomputed from wall-clock deltas after a
/// restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub status: RoundStatus,
}

impl Round {
    pub fn open(id: u64, duration_ms: u64) -> Self {
        let now = now_millis();
        Self {
            id,
            start_time: now,
            end_time: now + duration_ms as i64,
            status: RoundStatus::Betting,
        }
    }

    /// Milliseconds until expiry, clamped at zero
    pub fn remaining_ms(&self) -> u64 {
        (self.end_time - now_millis()).max(0) as u64
    }
}

/// A staked prediction. A placement with both a color and a number bet is
/// recorded as two wagers, but a wager carrying both selections settles each
/// component independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub user_id: String,
    pub round_id: u64,
    pub selected_color: Option<Color>,
    pub selected_number: Option<u8>,
    /// Stake in minor currency units
    pub amount: u64,
    pub timestamp: i64,
    pub settled: bool,
    pub won: bool,
    /// Payout in minor currency units, set exactly once at settlement
    pub payout: u64,
}

impl Wager {
    pub fn new(
        user_id: &str,
        round_id: u64,
        selected_color: Option<Color>,
        selected_number: Option<u8>,
        amount: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            round_id,
            selected_color,
            selected_number,
            amount,
            timestamp: now_millis(),
            settled: false,
            won: false,
            payout: 0,
        }
    }
}

/// How a winning outcome was produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Operator,
    Random,
}

/// The resolved winning number/color pair for a round. Created exactly once,
/// immediately before settlement, and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub round_id: u64,
    pub winning_number: u8,
    pub winning_color: Color,
    pub provenance: Provenance,
    pub timestamp: i64,
}

/// Raw operator override as received from the admin channel. Validated at
/// resolution time, not on submission, so a malformed override can be
/// logged and discarded rather than silently dropped on the way in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub winning_number: u8,
    pub winning_color: Color,
}

/// One sub-bet of a placement request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ColorBet {
    pub color: Color,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NumberBet {
    pub number: u8,
    pub amount: u64,
}

/// A user's bet submission for one round. Either, both, or neither sub-bet
/// may be present; the ledger rejects the empty case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetSubmission {
    pub user_id: String,
    pub round_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_bet: Option<ColorBet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_bet: Option<NumberBet>,
}

/// Current unix time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
