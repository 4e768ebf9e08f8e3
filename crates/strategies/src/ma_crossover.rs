// In crates/strategies/src/ma_crossover.rs

use crate::types::MACrossoverSettings;
use crate::{Error, Result, Strategy};
use core_types::{Kline, Portfolio, Side, StrategyKind, TradeSignal};
use num_traits::cast::ToPrimitive;
use ta::Next;
use ta::indicators::ExponentialMovingAverage as Ema;

/// Where the fast average sat relative to the slow one on the previous bar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum Regime {
    #[default]
    Unknown,
    Above,
    Below,
}

/// EMA crossover on closing prices.
///
/// Goes long when the fast EMA crosses above the slow EMA and short on the
/// opposite cross. Nothing is emitted until `slow_period` bars have been seen.
#[derive(Debug)]
pub struct MACrossover {
    /// The configuration for this strategy instance.
    settings: MACrossoverSettings,
    fast_ema: Ema,
    slow_ema: Ema,
    bars_seen: u32,
    regime: Regime,
}

impl MACrossover {
    /// Creates a new `MACrossover` strategy instance from its settings.
    pub fn new(settings: MACrossoverSettings) -> Result<Self> {
        if settings.fast_period == 0 || settings.fast_period >= settings.slow_period {
            return Err(Error::InvalidParameters(format!(
                "fast_period ({}) must be positive and below slow_period ({})",
                settings.fast_period, settings.slow_period
            )));
        }
        let (fast_ema, slow_ema) = Self::indicators(&settings)?;
        Ok(Self {
            settings,
            fast_ema,
            slow_ema,
            bars_seen: 0,
            regime: Regime::default(),
        })
    }

    fn indicators(settings: &MACrossoverSettings) -> Result<(Ema, Ema)> {
        let fast = Ema::new(settings.fast_period as usize)
            .map_err(|e| Error::IndicatorError(e.to_string()))?;
        let slow = Ema::new(settings.slow_period as usize)
            .map_err(|e| Error::IndicatorError(e.to_string()))?;
        Ok((fast, slow))
    }
}

impl Strategy for MACrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::TrendFollowing
    }

    fn execute(&mut self, portfolio: &Portfolio, kline: &Kline) -> Result<TradeSignal> {
        let close = kline
            .close
            .to_f64()
            .ok_or(Error::UnrepresentablePrice(kline.close))?;

        let fast = self.fast_ema.next(close);
        let slow = self.slow_ema.next(close);
        self.bars_seen += 1;

        let current = if fast > slow {
            Regime::Above
        } else if fast < slow {
            Regime::Below
        } else {
            self.regime
        };
        let previous = std::mem::replace(&mut self.regime, current);

        // Warm-up: let both averages settle before trading.
        if self.bars_seen < self.settings.slow_period || previous == Regime::Unknown {
            return Ok(TradeSignal::neutral());
        }

        let held = portfolio.side(&kline.symbol);
        let signal = match (previous, current) {
            (Regime::Below, Regime::Above) => {
                if self.settings.exit_only && held == Some(Side::Short) {
                    TradeSignal::exit("fast EMA crossed above slow EMA")
                } else {
                    TradeSignal::long(self.settings.confidence, "fast EMA crossed above slow EMA")?
                }
            }
            (Regime::Above, Regime::Below) => {
                if self.settings.exit_only && held == Some(Side::Long) {
                    TradeSignal::exit("fast EMA crossed below slow EMA")
                } else {
                    TradeSignal::short(self.settings.confidence, "fast EMA crossed below slow EMA")?
                }
            }
            _ => TradeSignal::neutral(),
        };

        Ok(signal)
    }

    fn reset(&mut self) {
        // Periods were validated in `new`, so rebuilding cannot fail.
        if let Ok((fast, slow)) = Self::indicators(&self.settings) {
            self.fast_ema = fast;
            self.slow_ema = slow;
        }
        self.bars_seen = 0;
        self.regime = Regime::Unknown;
    }
}
