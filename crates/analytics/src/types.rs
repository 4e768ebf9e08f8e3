// In crates/analytics/src/types.rs

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Performance metrics derived from a trade list and an equity curve.
///
/// Every float is finite. Degenerate inputs (no trades, flat curve, zero
/// variance) resolve to 0, except `profit_factor` which is `f64::MAX` when
/// there are wins and no losses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerformanceMetrics {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub net_pnl: Decimal,
    pub net_pnl_pct: f64,
    pub win_rate_pct: f64,
    pub profit_factor: f64,
    pub avg_profit_per_trade: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
}

impl PerformanceMetrics {
    /// Creates a new, empty set of metrics with zero values.
    pub fn new() -> Self {
        Self::default()
    }
}
