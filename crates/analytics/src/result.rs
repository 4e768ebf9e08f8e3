use crate::engine::AnalyticsEngine;
use crate::types::PerformanceMetrics;
use core_types::Symbol;
use rust_decimal::Decimal;
use serde::Serialize;

/// The record of one strategy replayed over one instrument.
///
/// Trades and equity observations are appended while the simulation runs;
/// `calculate_metrics` derives the metric set from them from scratch, so it can
/// be called any number of times.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResult {
    pub strategy_name: String,
    pub symbol: Symbol,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    trades: Vec<Decimal>,
    equity_curve: Vec<Decimal>,
    metrics: PerformanceMetrics,
}

impl SimulationResult {
    pub fn new(strategy_name: impl Into<String>, symbol: Symbol, initial_capital: Decimal) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            symbol,
            initial_capital,
            final_equity: initial_capital,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            metrics: PerformanceMetrics::new(),
        }
    }

    /// A zero-activity result with its metrics already calculated.
    /// Used for instruments or strategies that could not be simulated.
    pub fn empty(
        strategy_name: impl Into<String>,
        symbol: Symbol,
        initial_capital: Decimal,
        engine: &AnalyticsEngine,
    ) -> Self {
        let mut result = Self::new(strategy_name, symbol, initial_capital);
        result.calculate_metrics(engine);
        result
    }

    /// Records the realized P&L of a closed trade.
    pub fn add_trade(&mut self, pnl: Decimal) {
        self.trades.push(pnl);
    }

    /// Appends an observation to the equity curve.
    pub fn track_equity(&mut self, value: Decimal) {
        self.equity_curve.push(value);
    }

    pub fn calculate_metrics(&mut self, engine: &AnalyticsEngine) -> &PerformanceMetrics {
        self.metrics = engine.calculate(self.initial_capital, &self.trades, &self.equity_curve);
        &self.metrics
    }

    pub fn trades(&self) -> &[Decimal] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[Decimal] {
        &self.equity_curve
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn total_trades(&self) -> u32 {
        self.metrics.total_trades
    }
}
