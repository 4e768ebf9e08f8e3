// In crates/strategies/src/lib.rs

use core_types::{Kline, Portfolio, StrategyKind, TradeSignal};
use std::fmt;
use std::sync::Arc;

pub mod error;
pub mod factory;
pub mod ma_crossover;
pub mod types;

pub use error::{Error, Result};

/// The universal interface for a trading strategy.
///
/// A strategy is fed one bar at a time, in chronological order, and answers
/// with a `TradeSignal`. It is stateful: indicator values and anything else it
/// needs carry over between calls until `reset` is invoked.
pub trait Strategy: Send {
    /// The name of the strategy.
    fn name(&self) -> &str;

    fn kind(&self) -> StrategyKind;

    /// Assesses the newest bar. The portfolio is a read-only view of the
    /// account the strategy is trading.
    fn execute(&mut self, portfolio: &Portfolio, kline: &Kline) -> Result<TradeSignal>;

    /// Drops all accumulated state so the instance can replay a new series.
    fn reset(&mut self);
}

type Builder = dyn Fn() -> Result<Box<dyn Strategy>> + Send + Sync;

/// A named recipe producing fresh strategy instances.
///
/// Every simulation run owns its own strategy instance, so parallel workers
/// share blueprints rather than strategies.
#[derive(Clone)]
pub struct StrategyBlueprint {
    name: String,
    builder: Arc<Builder>,
}

impl StrategyBlueprint {
    pub fn new<F>(name: impl Into<String>, builder: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            builder: Arc::new(builder),
        }
    }

    /// The key results of this blueprint are stored under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(&self) -> Result<Box<dyn Strategy>> {
        (self.builder)()
    }
}

impl fmt::Debug for StrategyBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyBlueprint")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
