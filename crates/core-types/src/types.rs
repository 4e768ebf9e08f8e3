// In crates/core-types/src/types.rs

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trading instrument identifier (e.g., "BTCUSDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Key used when no instrument can be derived from the input.
    pub const UNKNOWN: &'static str = "UNKNOWN";

    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The side of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short. Multiplying an absolute quantity by this
    /// yields the signed quantity stored in the portfolio.
    pub fn sign(self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

/// A single OHLCV bar for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: Symbol,
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// The direction a strategy wants to be positioned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    /// The position side this direction opens, if any.
    pub fn side(self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::Neutral => None,
        }
    }
}

/// The decision a strategy produces for one bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignal {
    direction: Direction,
    confidence: f64,
    is_exit: bool,
    reason: String,
}

impl TradeSignal {
    /// Builds a signal, rejecting confidences outside `[0, 1]` (including NaN).
    pub fn new(
        direction: Direction,
        confidence: f64,
        is_exit: bool,
        reason: impl Into<String>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::InvalidConfidence(confidence));
        }
        Ok(Self {
            direction,
            confidence,
            is_exit,
            reason: reason.into(),
        })
    }

    /// A "do nothing" signal.
    pub fn neutral() -> Self {
        Self {
            direction: Direction::Neutral,
            confidence: 0.0,
            is_exit: false,
            reason: String::new(),
        }
    }

    /// Closes whatever position is open.
    pub fn exit(reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::Neutral,
            confidence: 1.0,
            is_exit: true,
            reason: reason.into(),
        }
    }

    pub fn long(confidence: f64, reason: impl Into<String>) -> Result<Self> {
        Self::new(Direction::Long, confidence, false, reason)
    }

    pub fn short(confidence: f64, reason: impl Into<String>) -> Result<Self> {
        Self::new(Direction::Short, confidence, false, reason)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_exit(&self) -> bool {
        self.is_exit
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// How the portfolio is being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Backtest,
    LiveSim,
    Paper,
}

/// Broad family a strategy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
    Breakout,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_rejects_out_of_range_confidence() {
        assert!(TradeSignal::long(0.7, "cross").is_ok());
        assert_eq!(
            TradeSignal::long(1.5, "cross"),
            Err(Error::InvalidConfidence(1.5))
        );
        assert!(TradeSignal::short(f64::NAN, "cross").is_err());
    }

    #[test]
    fn exit_signal_is_neutral_with_exit_flag() {
        let signal = TradeSignal::exit("stop");
        assert_eq!(signal.direction(), Direction::Neutral);
        assert!(signal.is_exit());
        assert_eq!(signal.reason(), "stop");
    }

    #[test]
    fn unknown_symbol_sentinel() {
        assert_eq!(Symbol::unknown().as_str(), "UNKNOWN");
        assert_eq!(Symbol::from("TEST").to_string(), "TEST");
    }
}
