use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The DCA executor's lifecycle state for one bot.
///
/// ```text
/// IDLE --entry_trigger--> ACCUMULATING --profit/exit--> EXITING --> IDLE
///   \______________________ PAUSED <--pause/resume--> ____________/
///                            STOPPED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotState {
    /// No position; waiting for an entry trigger.
    Idle,
    /// Position open, DCA budget remaining.
    Accumulating,
    /// A profit-taking or emergency-exit sell is in flight.
    Exiting,
    /// Externally paused; consumes no triggers or ticks.
    Paused,
    /// Terminal; the executor record is removed.
    Stopped,
}

impl BotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BotState::Stopped)
    }
}

/// Per-position, per-run flags. All of these reset on full close.
#[derive(Debug, Clone, Default)]
pub struct PositionFlags {
    /// One-shot latch per partial profit target.
    pub fired_targets: Vec<bool>,
    pub trail_armed: bool,
    /// Running peak since the trail armed.
    pub peak_price: Decimal,
}

impl PositionFlags {
    pub fn new(target_count: usize) -> Self {
        Self {
            fired_targets: vec![false; target_count],
            trail_armed: false,
            peak_price: Decimal::ZERO,
        }
    }
}
