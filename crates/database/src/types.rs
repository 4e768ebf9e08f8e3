// In crates/database/src/types.rs

use analytics::SimulationResult;
use core_types::{Kline, Symbol};
use rust_decimal::Decimal;
use uuid::Uuid;

/// The target table of a row. The writer keeps one batch per shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowShape {
    BacktestResults,
    Klines,
}

impl RowShape {
    pub const ALL: [RowShape; 2] = [RowShape::BacktestResults, RowShape::Klines];

    pub fn table(self) -> &'static str {
        match self {
            RowShape::BacktestResults => "backtest_results",
            RowShape::Klines => "klines",
        }
    }
}

/// Flush thresholds, one per shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub results: usize,
    pub klines: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            results: 2_000,
            klines: 500,
        }
    }
}

impl BatchSizes {
    pub fn for_shape(&self, shape: RowShape) -> usize {
        match shape {
            RowShape::BacktestResults => self.results,
            RowShape::Klines => self.klines,
        }
        .max(1)
    }
}

/// One row of the `backtest_results` table.
///
/// Metric fields are optional so degraded runs can still be written;
/// absent values are stored as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResultRow {
    pub run_id: Uuid,
    pub symbol: Symbol,
    pub strategy_name: String,
    pub initial_capital: Decimal,
    pub final_equity: Option<Decimal>,
    pub total_trades: Option<i64>,
    pub winning_trades: Option<i64>,
    pub net_pnl: Option<Decimal>,
    pub win_rate_pct: Option<f64>,
    pub profit_factor: Option<f64>,
    pub avg_profit_per_trade: Option<Decimal>,
    pub max_drawdown_pct: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub calmar_ratio: Option<f64>,
    pub error: Option<String>,
}

impl BacktestResultRow {
    pub const COLUMNS: [&'static str; 16] = [
        "run_id",
        "symbol",
        "strategy_name",
        "initial_capital",
        "final_equity",
        "total_trades",
        "winning_trades",
        "net_pnl",
        "win_rate_pct",
        "profit_factor",
        "avg_profit_per_trade",
        "max_drawdown_pct",
        "sharpe_ratio",
        "sortino_ratio",
        "calmar_ratio",
        "error",
    ];

    /// Flattens a finished simulation. The result's `symbol` field is ignored in
    /// favour of `symbol`, which is the key the run was scheduled under.
    pub fn from_result(
        run_id: Uuid,
        symbol: &Symbol,
        result: &SimulationResult,
        error: Option<String>,
    ) -> Self {
        let metrics = result.metrics();
        Self {
            run_id,
            symbol: symbol.clone(),
            strategy_name: result.strategy_name.clone(),
            initial_capital: result.initial_capital,
            final_equity: Some(result.final_equity),
            total_trades: Some(i64::from(metrics.total_trades)),
            winning_trades: Some(i64::from(metrics.winning_trades)),
            net_pnl: Some(metrics.net_pnl),
            win_rate_pct: Some(metrics.win_rate_pct),
            profit_factor: Some(metrics.profit_factor),
            avg_profit_per_trade: Some(metrics.avg_profit_per_trade),
            max_drawdown_pct: Some(metrics.max_drawdown_pct),
            sharpe_ratio: Some(metrics.sharpe_ratio),
            sortino_ratio: Some(metrics.sortino_ratio),
            calmar_ratio: Some(metrics.calmar_ratio),
            error,
        }
    }

    /// Text fields in column order. Absent numbers become `0`.
    pub fn fields(&self) -> [String; 16] {
        [
            self.run_id.to_string(),
            self.symbol.0.clone(),
            self.strategy_name.clone(),
            self.initial_capital.to_string(),
            decimal_or_zero(self.final_equity),
            self.total_trades.unwrap_or_default().to_string(),
            self.winning_trades.unwrap_or_default().to_string(),
            decimal_or_zero(self.net_pnl),
            float_or_zero(self.win_rate_pct),
            float_or_zero(self.profit_factor),
            decimal_or_zero(self.avg_profit_per_trade),
            float_or_zero(self.max_drawdown_pct),
            float_or_zero(self.sharpe_ratio),
            float_or_zero(self.sortino_ratio),
            float_or_zero(self.calmar_ratio),
            self.error.clone().unwrap_or_default(),
        ]
    }
}

/// One row of the `klines` table.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineRow {
    pub symbol: Symbol,
    pub interval: String,
    pub open_time: i64,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub close_time: i64,
}

impl KlineRow {
    pub const COLUMNS: [&'static str; 9] = [
        "symbol",
        "interval",
        "open_time",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "close_time",
    ];

    pub fn from_kline(interval: &str, kline: &Kline) -> Self {
        Self {
            symbol: kline.symbol.clone(),
            interval: interval.to_string(),
            open_time: kline.open_time,
            open: Some(kline.open),
            high: Some(kline.high),
            low: Some(kline.low),
            close: Some(kline.close),
            volume: Some(kline.volume),
            close_time: kline.close_time,
        }
    }

    pub fn fields(&self) -> [String; 9] {
        [
            self.symbol.0.clone(),
            self.interval.clone(),
            self.open_time.to_string(),
            decimal_or_zero(self.open),
            decimal_or_zero(self.high),
            decimal_or_zero(self.low),
            decimal_or_zero(self.close),
            decimal_or_zero(self.volume),
            self.close_time.to_string(),
        ]
    }
}

/// A row waiting in the result queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistableRow {
    Result(BacktestResultRow),
    Kline(KlineRow),
}

impl PersistableRow {
    pub fn shape(&self) -> RowShape {
        match self {
            PersistableRow::Result(_) => RowShape::BacktestResults,
            PersistableRow::Kline(_) => RowShape::Klines,
        }
    }

    /// The instrument inserted-row counts are attributed to.
    pub fn key(&self) -> &Symbol {
        match self {
            PersistableRow::Result(row) => &row.symbol,
            PersistableRow::Kline(row) => &row.symbol,
        }
    }

    pub fn as_result(&self) -> Option<&BacktestResultRow> {
        match self {
            PersistableRow::Result(row) => Some(row),
            PersistableRow::Kline(_) => None,
        }
    }

    pub fn as_kline(&self) -> Option<&KlineRow> {
        match self {
            PersistableRow::Kline(row) => Some(row),
            PersistableRow::Result(_) => None,
        }
    }
}

fn decimal_or_zero(value: Option<Decimal>) -> String {
    value.unwrap_or_default().to_string()
}

fn float_or_zero(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics::AnalyticsEngine;
    use rust_decimal_macros::dec;

    #[test]
    fn absent_numbers_are_written_as_zero() {
        let row = KlineRow {
            symbol: Symbol::from("BTCUSDT"),
            interval: "1h".into(),
            open_time: 1,
            open: None,
            high: Some(dec!(2.5)),
            low: None,
            close: None,
            volume: None,
            close_time: 2,
        };
        let fields = row.fields();
        assert_eq!(fields[3], "0");
        assert_eq!(fields[4], "2.5");
        assert_eq!(fields.len(), KlineRow::COLUMNS.len());
    }

    #[test]
    fn result_row_uses_scheduled_symbol() {
        let engine = AnalyticsEngine::default();
        let result = SimulationResult::empty("ma", Symbol::unknown(), dec!(1000), &engine);
        let row = BacktestResultRow::from_result(
            Uuid::nil(),
            &Symbol::from("ETHUSDT"),
            &result,
            Some("no bars".into()),
        );

        assert_eq!(row.symbol, Symbol::from("ETHUSDT"));
        assert_eq!(row.total_trades, Some(0));
        assert_eq!(row.final_equity, Some(dec!(1000)));

        let persistable = PersistableRow::Result(row);
        assert_eq!(persistable.shape(), RowShape::BacktestResults);
        assert_eq!(persistable.key(), &Symbol::from("ETHUSDT"));
    }

    #[test]
    fn batch_sizes_never_zero() {
        let sizes = BatchSizes { results: 0, klines: 500 };
        assert_eq!(sizes.for_shape(RowShape::BacktestResults), 1);
        assert_eq!(sizes.for_shape(RowShape::Klines), 500);
    }
}
