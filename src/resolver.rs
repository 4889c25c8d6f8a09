//! Outcome resolution: operator override first, random draw otherwise.

use crate::config::DrawPolicy;
use crate::errors::{EngineError, EngineResult};
use crate::types::{now_millis, Color, Outcome, OverrideRequest, Provenance};
use log::{info, warn};
use rand::Rng;
use std::sync::Mutex;

/// Produces the winning (number, color) pair for a round.
///
/// The override slot is one-shot: `resolve` always takes and clears it, so a
/// stale instruction can never leak into a later round. An override that
/// fails validation is logged for audit and discarded; resolution then falls
/// through to the random draw.
pub struct OutcomeResolver {
    draw_policy: DrawPolicy,
    pending_override: Mutex<Option<OverrideRequest>>,
}

impl OutcomeResolver {
    pub fn new(draw_policy: DrawPolicy) -> Self {
        Self {
            draw_policy,
            pending_override: Mutex::new(None),
        }
    }

    /// Stage an operator override for the next resolution. Replaces any
    /// previously staged instruction. Rejects an out-of-range number at the
    /// channel boundary; `resolve` still re-validates whatever is staged.
    pub fn set_override(&self, request: OverrideRequest) -> EngineResult<()> {
        if request.winning_number > 9 {
            return Err(EngineError::InvalidOverride(format!(
                "number {} out of range",
                request.winning_number
            )));
        }
        let mut slot = self.pending_override.lock().expect("override slot poisoned");
        *slot = Some(request);
        info!(
            "operator override staged: number={} color={}",
            request.winning_number, request.winning_color
        );
        Ok(())
    }

    /// Drop any staged override so the next round resolves randomly
    pub fn clear_override(&self) {
        let mut slot = self.pending_override.lock().expect("override slot poisoned");
        if slot.take().is_some() {
            info!("operator override cleared");
        }
    }

    /// Whether an override is currently staged
    pub fn has_override(&self) -> bool {
        self.pending_override
            .lock()
            .expect("override slot poisoned")
            .is_some()
    }

    /// Resolve the winning pair for a round. Infallible: any override
    /// problem degrades to the random path.
    pub fn resolve(&self, round_id: u64) -> Outcome {
        let staged = self
            .pending_override
            .lock()
            .expect("override slot poisoned")
            .take();

        if let Some(request) = staged {
            if request.winning_number <= 9 {
                info!(
                    "round {} resolved by operator: number={} color={}",
                    round_id, request.winning_number, request.winning_color
                );
                return Outcome {
                    round_id,
                    winning_number: request.winning_number,
                    winning_color: request.winning_color,
                    provenance: Provenance::Operator,
                    timestamp: now_millis(),
                };
            }
            warn!(
                "discarding invalid operator override for round {}: number {} out of range",
                round_id, request.winning_number
            );
        }

        let (winning_number, winning_color) = self.draw();
        info!(
            "round {} resolved randomly: number={} color={}",
            round_id, winning_number, winning_color
        );
        Outcome {
            round_id,
            winning_number,
            winning_color,
            provenance: Provenance::Random,
            timestamp: now_millis(),
        }
    }

    fn draw(&self) -> (u8, Color) {
        let mut rng = rand::thread_rng();
        let number: u8 = rng.gen_range(0..10);

        let color = match self.draw_policy {
            DrawPolicy::Independent => Color::all()[rng.gen_range(0..3)],
            DrawPolicy::ForcedViolet => {
                if number == 0 || number == 5 {
                    Color::Violet
                } else if rng.gen_bool(0.5) {
                    Color::Red
                } else {
                    Color::Green
                }
            }
        };

        (number, color)
    }
}
