// In crates/strategies/src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MACrossoverSettings {
    pub fast_period: u32,
    pub slow_period: u32,

    // The confidence score to assign to signals from this strategy
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Emit an exit instead of a reversal when the averages cross against
    /// the open position.
    #[serde(default)]
    pub exit_only: bool,
}

fn default_confidence() -> f64 {
    0.8
}
