// In crates/backtester/src/config.rs

use crate::{Error, Result};
use analytics::MetricsConfig;
use core_types::TradingMode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Validated tuning values for the simulation loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    margin_utilization: Decimal,
    fee_rate: Decimal,
    base_quantity: i64,
    reverse_on_opposite_signal: bool,
    trading_mode: TradingMode,
    metrics: MetricsConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            margin_utilization: dec!(0.95),
            fee_rate: Decimal::ZERO,
            base_quantity: 1,
            reverse_on_opposite_signal: true,
            trading_mode: TradingMode::Backtest,
            metrics: MetricsConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Builds a config from raw settings values.
    ///
    /// * `margin_utilization` - share of available margin committed per entry, in `(0, 1]`.
    /// * `fee_rate` - fee charged on the notional of each fill, `>= 0`.
    /// * `base_quantity` - lot size positions are rounded down to, `>= 1`.
    pub fn new(margin_utilization: f64, fee_rate: f64, base_quantity: u32) -> Result<Self> {
        let margin_utilization = to_decimal("margin_utilization", margin_utilization)?;
        if margin_utilization <= Decimal::ZERO || margin_utilization > Decimal::ONE {
            return Err(Error::InvalidConfig(format!(
                "margin_utilization must lie in (0, 1], got {margin_utilization}"
            )));
        }
        let fee_rate = to_decimal("fee_rate", fee_rate)?;
        if fee_rate < Decimal::ZERO {
            return Err(Error::InvalidConfig(format!(
                "fee_rate must not be negative, got {fee_rate}"
            )));
        }
        if base_quantity == 0 {
            return Err(Error::InvalidConfig("base_quantity must be at least 1".into()));
        }

        Ok(Self {
            margin_utilization,
            fee_rate,
            base_quantity: i64::from(base_quantity),
            ..Self::default()
        })
    }

    pub fn with_reversal(mut self, reverse_on_opposite_signal: bool) -> Self {
        self.reverse_on_opposite_signal = reverse_on_opposite_signal;
        self
    }

    pub fn with_trading_mode(mut self, trading_mode: TradingMode) -> Self {
        self.trading_mode = trading_mode;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Result<Self> {
        if !metrics.periods_per_year.is_finite() || metrics.periods_per_year <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "periods_per_year must be positive, got {}",
                metrics.periods_per_year
            )));
        }
        self.metrics = metrics;
        Ok(self)
    }

    pub fn margin_utilization(&self) -> Decimal {
        self.margin_utilization
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_rate
    }

    pub fn base_quantity(&self) -> i64 {
        self.base_quantity
    }

    pub fn reverse_on_opposite_signal(&self) -> bool {
        self.reverse_on_opposite_signal
    }

    pub fn trading_mode(&self) -> TradingMode {
        self.trading_mode
    }

    pub fn metrics(&self) -> MetricsConfig {
        self.metrics
    }
}

// Goes through the shortest decimal rendering so 0.95 stays exactly 0.95.
fn to_decimal(field: &str, value: f64) -> Result<Decimal> {
    if !value.is_finite() {
        return Err(Error::InvalidConfig(format!("{field} must be finite, got {value}")));
    }
    Decimal::from_str(&value.to_string())
        .map_err(|e| Error::InvalidConfig(format!("{field} = {value}: {e}")))
}
