// In crates/backtester/src/lib.rs

pub mod config;
pub mod error;

pub use config::SimulationConfig;
pub use error::{Error, Result};

use analytics::{AnalyticsEngine, SimulationResult};
use core_types::{Kline, Portfolio, Side, Symbol, TradeSignal};
use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use strategies::Strategy;
use tracing::{debug, warn};

/// The engine for replaying historical bars through a strategy.
///
/// A `Backtester` holds only configuration; every call to `simulate` builds its
/// own `Portfolio`, so one instance can be shared by many worker threads.
#[derive(Debug, Clone, Default)]
pub struct Backtester {
    config: SimulationConfig,
    analytics: AnalyticsEngine,
}

impl Backtester {
    pub fn new(config: SimulationConfig) -> Self {
        let analytics = AnalyticsEngine::new(config.metrics());
        Self { config, analytics }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn analytics(&self) -> &AnalyticsEngine {
        &self.analytics
    }

    /// Replays `klines` (chronological, single instrument) through `strategy`.
    ///
    /// Always returns a result. Strategy errors are logged and treated as a
    /// neutral signal for that bar. A position still open after the last bar
    /// is closed at that bar's close and counted as a trade.
    pub fn simulate(
        &self,
        strategy: &mut dyn Strategy,
        klines: &[Kline],
        initial_capital: Decimal,
    ) -> SimulationResult {
        let symbol = klines
            .first()
            .map(|k| k.symbol.clone())
            .unwrap_or_else(Symbol::unknown);

        let mut portfolio = Portfolio::new(
            initial_capital,
            self.config.trading_mode(),
            self.config.base_quantity(),
        );
        let mut result = SimulationResult::new(strategy.name(), symbol.clone(), initial_capital);
        result.track_equity(portfolio.equity());

        for kline in klines {
            let signal = match strategy.execute(&portfolio, kline) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        strategy = strategy.name(),
                        open_time = kline.open_time,
                        error = %e,
                        "Strategy failed on bar; treating as neutral."
                    );
                    TradeSignal::neutral()
                }
            };

            self.apply_signal(&mut portfolio, &mut result, &symbol, kline, &signal);
            result.track_equity(portfolio.equity());
        }

        // --- Force-close anything still open at the last close ---
        if let Some(last) = klines.last() {
            if portfolio.side(&symbol).is_some() {
                debug!(symbol = %symbol, price = %last.close, "Force-closing position at end of data.");
                self.close(&mut portfolio, &mut result, &symbol, last.close);
                result.track_equity(portfolio.equity());
            }
        }

        result.final_equity = portfolio.equity();
        result.calculate_metrics(&self.analytics);
        result
    }

    fn apply_signal(
        &self,
        portfolio: &mut Portfolio,
        result: &mut SimulationResult,
        symbol: &Symbol,
        kline: &Kline,
        signal: &TradeSignal,
    ) {
        let price = kline.close;
        let held = portfolio.side(symbol);

        if signal.is_exit() {
            if held.is_some() {
                self.close(portfolio, result, symbol, price);
            }
            return;
        }

        match (signal.direction().side(), held) {
            (None, _) => {}
            // No pyramiding: already positioned the way the strategy wants.
            (Some(wanted), Some(current)) if wanted == current => {}
            (Some(wanted), Some(_)) => {
                self.close(portfolio, result, symbol, price);
                if self.config.reverse_on_opposite_signal() {
                    self.open(portfolio, symbol, wanted, price);
                }
            }
            (Some(wanted), None) => self.open(portfolio, symbol, wanted, price),
        }
    }

    /// Position size in lots: `floor(available_margin * utilization / price)`,
    /// rounded down to the configured lot size.
    fn position_size(&self, portfolio: &Portfolio, price: Decimal) -> i64 {
        if price <= Decimal::ZERO {
            return 0;
        }
        let budget = portfolio.available_margin() * self.config.margin_utilization();
        let raw = budget
            .checked_div(price)
            .map(|q| q.floor())
            .and_then(|q| q.to_i64())
            .unwrap_or(0);
        let lot = self.config.base_quantity();
        (raw / lot) * lot
    }

    fn open(&self, portfolio: &mut Portfolio, symbol: &Symbol, side: Side, price: Decimal) {
        let quantity = self.position_size(portfolio, price);
        if quantity <= 0 {
            debug!(symbol = %symbol, ?side, price = %price, "Position size resolved to zero; not opening.");
            return;
        }
        let fee = Decimal::from(quantity) * price * self.config.fee_rate();
        match portfolio.open_position(symbol, side, quantity, price, fee) {
            Ok(()) => debug!(symbol = %symbol, ?side, quantity, price = %price, "Opened position."),
            Err(e) => warn!(symbol = %symbol, error = %e, "Failed to open position."),
        }
    }

    fn close(
        &self,
        portfolio: &mut Portfolio,
        result: &mut SimulationResult,
        symbol: &Symbol,
        price: Decimal,
    ) {
        let quantity = portfolio.position(symbol).abs();
        let fee = Decimal::from(quantity) * price * self.config.fee_rate();
        match portfolio.close_position(symbol, price, fee) {
            Ok(closed) => {
                debug!(
                    symbol = %symbol,
                    side = ?closed.side,
                    entry = %closed.entry_price,
                    exit = %closed.exit_price,
                    pnl = %closed.pnl,
                    "Closed position."
                );
                result.add_trade(closed.pnl);
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "Failed to close position."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Direction, StrategyKind};
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    /// Replays a fixed script of signals, then stays neutral.
    struct Scripted {
        script: VecDeque<strategies::Result<TradeSignal>>,
    }

    impl Scripted {
        fn new(script: Vec<strategies::Result<TradeSignal>>) -> Self {
            Self { script: script.into() }
        }

        fn always(direction: Direction, bars: usize) -> Self {
            let signal = TradeSignal::new(direction, 1.0, false, "scripted").unwrap();
            Self::new((0..bars).map(|_| Ok(signal.clone())).collect())
        }
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn kind(&self) -> StrategyKind {
            StrategyKind::Other
        }

        fn execute(&mut self, _portfolio: &Portfolio, _kline: &Kline) -> strategies::Result<TradeSignal> {
            self.script.pop_front().unwrap_or_else(|| Ok(TradeSignal::neutral()))
        }

        fn reset(&mut self) {
            self.script.clear();
        }
    }

    fn bars(symbol: &str, closes: &[Decimal]) -> Vec<Kline> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Kline {
                symbol: Symbol::from(symbol),
                open_time: i as i64 * 60_000,
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume: dec!(1),
                close_time: i as i64 * 60_000 + 59_999,
            })
            .collect()
    }

    #[test]
    fn empty_series_keeps_capital() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::always(Direction::Long, 0);
        let result = backtester.simulate(&mut strategy, &[], dec!(10_000));

        assert_eq!(result.total_trades(), 0);
        assert_eq!(result.final_equity, dec!(10_000));
        assert_eq!(result.symbol, Symbol::unknown());
    }

    #[test]
    fn neutral_strategy_never_trades() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::always(Direction::Neutral, 1);
        let result = backtester.simulate(&mut strategy, &bars("TEST", &[dec!(100)]), dec!(10_000));

        assert_eq!(result.total_trades(), 0);
        assert_eq!(result.final_equity, dec!(10_000.0));
        assert_eq!(result.symbol, Symbol::from("TEST"));
    }

    #[test]
    fn open_position_is_force_closed_on_last_bar() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::always(Direction::Long, 1);
        let result = backtester.simulate(&mut strategy, &bars("TEST", &[dec!(100)]), dec!(10_000));

        assert_eq!(result.total_trades(), 1);
        assert_eq!(result.trades(), &[dec!(0)]);
        assert_eq!(result.final_equity, dec!(10_000));
    }

    #[test]
    fn short_reversed_by_long_realizes_loss() {
        let backtester = Backtester::new(SimulationConfig::new(0.95, 0.0, 1).unwrap());
        let mut strategy = Scripted::new(vec![
            TradeSignal::short(1.0, "enter").map_err(Into::into),
            TradeSignal::long(1.0, "reverse").map_err(Into::into),
        ]);
        let result = backtester.simulate(&mut strategy, &bars("S", &[dec!(50), dec!(100)]), dec!(99));

        assert_eq!(result.trades(), &[dec!(-50)]);
        assert_eq!(result.final_equity, dec!(49));
        assert_eq!(result.total_trades(), 1);
    }

    #[test]
    fn zero_sized_entry_is_not_a_trade() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::always(Direction::Long, 2);
        // 0.95 * 50 / 100 floors to zero lots.
        let result = backtester.simulate(&mut strategy, &bars("X", &[dec!(100), dec!(100)]), dec!(50));

        assert_eq!(result.total_trades(), 0);
        assert_eq!(result.final_equity, dec!(50));
    }

    #[test]
    fn strategy_errors_are_neutral_bars() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::new(vec![
            Err(strategies::Error::ExecutionFailed("bad bar".into())),
            TradeSignal::long(1.0, "enter").map_err(Into::into),
            Err(strategies::Error::ExecutionFailed("bad bar".into())),
            Ok(TradeSignal::exit("done")),
        ]);
        let closes = [dec!(10), dec!(10), dec!(12), dec!(15)];
        let result = backtester.simulate(&mut strategy, &bars("ERR", &closes), dec!(1000));

        // Entered at 10 with floor(950 / 10) = 95 lots, exited at 15.
        assert_eq!(result.trades(), &[dec!(475)]);
        assert_eq!(result.final_equity, dec!(1475));
    }

    #[test]
    fn exit_signal_without_position_is_ignored() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::new(vec![Ok(TradeSignal::exit("nothing to close"))]);
        let result = backtester.simulate(&mut strategy, &bars("X", &[dec!(10)]), dec!(1000));
        assert_eq!(result.total_trades(), 0);
    }

    #[test]
    fn lot_size_rounds_quantity_down() {
        let backtester = Backtester::new(SimulationConfig::new(1.0, 0.0, 10).unwrap());
        let mut strategy = Scripted::new(vec![
            TradeSignal::long(1.0, "enter").map_err(Into::into),
            Ok(TradeSignal::exit("out")),
        ]);
        // floor(1000 / 9) = 111 lots, rounded down to 110.
        let result = backtester.simulate(&mut strategy, &bars("LOT", &[dec!(9), dec!(10)]), dec!(1000));
        assert_eq!(result.trades(), &[dec!(110)]);
    }

    #[test]
    fn equity_curve_starts_at_capital_and_tracks_every_bar() {
        let backtester = Backtester::default();
        let mut strategy = Scripted::always(Direction::Neutral, 3);
        let result = backtester.simulate(&mut strategy, &bars("EQ", &[dec!(1), dec!(2), dec!(3)]), dec!(100));
        assert_eq!(result.equity_curve().len(), 4);
        assert!(result.equity_curve().iter().all(|e| *e == dec!(100)));
    }
}
