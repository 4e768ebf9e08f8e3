use crate::types::PerformanceMetrics;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;

/// Tuning values for metric calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsConfig {
    /// Number of equity observations per year. The Sharpe and Sortino
    /// ratios are scaled by its square root.
    pub periods_per_year: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            periods_per_year: 252.0,
        }
    }
}

/// The engine responsible for calculating performance metrics from trade data.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsEngine {
    config: MetricsConfig,
}

impl AnalyticsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> MetricsConfig {
        self.config
    }

    /// Calculates the full metric set from realized trade P&Ls and an equity curve.
    ///
    /// This is a pure function of its inputs.
    pub fn calculate(
        &self,
        initial_capital: Decimal,
        trades: &[Decimal],
        equity_curve: &[Decimal],
    ) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics::new();

        // --- Trade statistics ---
        metrics.total_trades = trades.len() as u32;
        if !trades.is_empty() {
            metrics.net_pnl = trades.iter().copied().sum();
            if initial_capital > Decimal::ZERO {
                metrics.net_pnl_pct = ratio_pct(metrics.net_pnl, initial_capital);
            }

            metrics.winning_trades = trades.iter().filter(|p| **p > Decimal::ZERO).count() as u32;
            metrics.win_rate_pct =
                metrics.winning_trades as f64 / metrics.total_trades as f64 * 100.0;

            metrics.profit_factor = profit_factor(trades);
            metrics.avg_profit_per_trade = metrics.net_pnl / Decimal::from(trades.len());
        }

        // --- Equity curve statistics ---
        let (max_drawdown, max_drawdown_pct) = max_drawdown(equity_curve);
        metrics.max_drawdown = max_drawdown;
        metrics.max_drawdown_pct = max_drawdown_pct;

        let returns = period_returns(equity_curve);
        let annualization = self.config.periods_per_year.max(0.0).sqrt();
        metrics.sharpe_ratio = sharpe(&returns) * annualization;
        metrics.sortino_ratio = sortino(&returns) * annualization;

        if metrics.max_drawdown_pct > 0.0 {
            metrics.calmar_ratio = metrics.net_pnl_pct / metrics.max_drawdown_pct;
        }

        sanitize(&mut metrics);
        metrics
    }
}

/// `numerator / denominator * 100`, or 0 when the division is not representable.
fn ratio_pct(numerator: Decimal, denominator: Decimal) -> f64 {
    numerator
        .checked_div(denominator)
        .and_then(|r| r.to_f64())
        .map(|r| r * 100.0)
        .unwrap_or(0.0)
}

/// Gross profit over absolute gross loss.
///
/// `f64::MAX` when there are profits but no losses, 0 when there are no profits.
pub fn profit_factor(trades: &[Decimal]) -> f64 {
    let gross_profit: Decimal = trades.iter().filter(|p| **p > Decimal::ZERO).copied().sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|p| **p < Decimal::ZERO)
        .copied()
        .sum::<Decimal>()
        .abs();

    if gross_profit <= Decimal::ZERO {
        0.0
    } else if gross_loss.is_zero() {
        f64::MAX
    } else {
        gross_profit
            .checked_div(gross_loss)
            .and_then(|r| r.to_f64())
            .unwrap_or(f64::MAX)
    }
}

/// Largest peak-to-trough decline, absolute and as a percentage of the peak.
pub fn max_drawdown(equity_curve: &[Decimal]) -> (Decimal, f64) {
    let Some(first) = equity_curve.first() else {
        return (Decimal::ZERO, 0.0);
    };

    let mut peak = *first;
    let mut max_abs = Decimal::ZERO;
    let mut max_pct = 0.0_f64;
    for value in equity_curve {
        peak = peak.max(*value);
        let drawdown = peak - *value;
        max_abs = max_abs.max(drawdown);
        if peak > Decimal::ZERO {
            max_pct = max_pct.max(ratio_pct(drawdown, peak));
        }
    }
    (max_abs, max_pct)
}

/// Simple returns between consecutive equity observations.
///
/// Observations following a non-positive value are skipped.
pub fn period_returns(equity_curve: &[Decimal]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0] > Decimal::ZERO)
        .filter_map(|w| w[1].checked_div(w[0]))
        .filter_map(|r| (r - Decimal::ONE).to_f64())
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Per-period Sharpe ratio (mean over sample standard deviation).
/// Needs at least two observations; zero variance yields 0.
pub fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean_return = mean(returns);
    let variance = returns
        .iter()
        .map(|r| (r - mean_return).powi(2))
        .sum::<f64>()
        / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();

    if std_dev > f64::EPSILON && std_dev.is_finite() {
        mean_return / std_dev
    } else {
        0.0
    }
}

/// Per-period Sortino ratio (mean over downside deviation).
/// 0 when there are fewer than two observations or no downside.
pub fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean_return = mean(returns);
    let downside = (returns
        .iter()
        .map(|r| r.min(0.0).powi(2))
        .sum::<f64>()
        / returns.len() as f64)
        .sqrt();

    if downside > f64::EPSILON && downside.is_finite() {
        mean_return / downside
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn sanitize(metrics: &mut PerformanceMetrics) {
    metrics.net_pnl_pct = finite_or_zero(metrics.net_pnl_pct);
    metrics.win_rate_pct = finite_or_zero(metrics.win_rate_pct);
    metrics.profit_factor = finite_or_zero(metrics.profit_factor);
    metrics.max_drawdown_pct = finite_or_zero(metrics.max_drawdown_pct);
    metrics.sharpe_ratio = finite_or_zero(metrics.sharpe_ratio);
    metrics.sortino_ratio = finite_or_zero(metrics.sortino_ratio);
    metrics.calmar_ratio = finite_or_zero(metrics.calmar_ratio);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn engine() -> AnalyticsEngine {
        AnalyticsEngine::new(MetricsConfig::default())
    }

    #[test]
    fn empty_inputs_produce_zero_metrics() {
        let metrics = engine().calculate(dec!(10_000), &[], &[]);
        assert_eq!(metrics, PerformanceMetrics::new());
    }

    #[test]
    fn profit_factor_sentinels() {
        assert_eq!(profit_factor(&[dec!(10), dec!(5)]), f64::MAX);
        assert_eq!(profit_factor(&[dec!(-10), dec!(-5)]), 0.0);
        assert_eq!(profit_factor(&[dec!(0)]), 0.0);
        assert_eq!(profit_factor(&[dec!(30), dec!(-10)]), 3.0);
    }

    #[test]
    fn trade_statistics() {
        let trades = [dec!(100), dec!(-50), dec!(50), dec!(-25)];
        let metrics = engine().calculate(dec!(1000), &trades, &[]);

        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.win_rate_pct, 50.0);
        assert_eq!(metrics.net_pnl, dec!(75));
        assert!((metrics.net_pnl_pct - 7.5).abs() < 1e-9);
        assert_eq!(metrics.avg_profit_per_trade, dec!(18.75));
        assert_eq!(metrics.profit_factor, 2.0);
    }

    #[test]
    fn drawdown_is_measured_from_running_peak() {
        let curve = [dec!(100), dec!(120), dec!(90), dec!(130), dec!(117)];
        let (abs, pct) = max_drawdown(&curve);
        assert_eq!(abs, dec!(30));
        assert_eq!(pct, 25.0);
    }

    #[test]
    fn flat_curve_has_no_drawdown_and_no_sharpe() {
        let curve = [dec!(100); 10];
        let metrics = engine().calculate(dec!(100), &[], &curve);
        assert_eq!(metrics.max_drawdown_pct, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
    }

    #[test]
    fn sharpe_needs_two_observations() {
        assert_eq!(sharpe(&[]), 0.0);
        assert_eq!(sharpe(&[0.05]), 0.0);
        assert!(sharpe(&[0.01, 0.03]) > 0.0);
    }

    #[test]
    fn sharpe_is_scaled_by_configured_periods() {
        let curve = [dec!(100), dec!(101), dec!(103), dec!(102), dec!(105)];
        let per_period = AnalyticsEngine::new(MetricsConfig { periods_per_year: 1.0 })
            .calculate(dec!(100), &[], &curve)
            .sharpe_ratio;
        let annual = AnalyticsEngine::new(MetricsConfig { periods_per_year: 4.0 })
            .calculate(dec!(100), &[], &curve)
            .sharpe_ratio;
        assert!((annual - per_period * 2.0).abs() < 1e-12);
    }

    fn arb_curve() -> impl Strategy<Value = Vec<Decimal>> {
        prop::collection::vec(-1_000_000i64..1_000_000i64, 0..64)
            .prop_map(|cents| cents.into_iter().map(|c| Decimal::new(c, 2)).collect())
    }

    fn arb_trades() -> impl Strategy<Value = Vec<Decimal>> {
        prop::collection::vec(-100_000i64..100_000i64, 0..64)
            .prop_map(|cents| cents.into_iter().map(|c| Decimal::new(c, 2)).collect())
    }

    proptest! {
        /// Drawdown is never negative, whatever the curve looks like.
        #[test]
        fn drawdown_is_non_negative(curve in arb_curve()) {
            let (abs, pct) = max_drawdown(&curve);
            prop_assert!(abs >= Decimal::ZERO);
            prop_assert!(pct >= 0.0);
        }

        /// Every derived float is finite for finite inputs.
        #[test]
        fn metrics_are_finite(trades in arb_trades(), curve in arb_curve()) {
            let metrics = engine().calculate(dec!(10_000), &trades, &curve);
            for value in [
                metrics.net_pnl_pct,
                metrics.win_rate_pct,
                metrics.profit_factor,
                metrics.max_drawdown_pct,
                metrics.sharpe_ratio,
                metrics.sortino_ratio,
                metrics.calmar_ratio,
            ] {
                prop_assert!(value.is_finite());
            }
        }
    }
}
