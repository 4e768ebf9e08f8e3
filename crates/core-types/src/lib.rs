// In crates/core-types/src/lib.rs

pub mod error;
pub mod portfolio;
pub mod strategy;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use error::{Error, Result};
pub use portfolio::{ClosedPosition, Portfolio};
pub use strategy::StrategyConfig;
pub use types::{Direction, Kline, Side, StrategyKind, Symbol, TradeSignal, TradingMode};
