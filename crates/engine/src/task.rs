// In crates/engine/src/task.rs

use crate::queue::{OfferOutcome, RowSender};
use crate::source::BarSource;
use analytics::SimulationResult;
use backtester::Backtester;
use core_types::{Kline, Symbol};
use database::{BacktestResultRow, KlineRow, PersistableRow};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use strategies::StrategyBlueprint;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A strategy's result plus the note stored with it when the run degraded.
type Outcome = (SimulationResult, Option<String>);

/// Runs every blueprint against one instrument's history and queues the
/// resulting rows.
pub struct InstrumentTask {
    pub run_id: Uuid,
    pub symbol: Symbol,
    pub blueprints: Arc<[StrategyBlueprint]>,
    pub source: Arc<dyn BarSource>,
    pub backtester: Arc<Backtester>,
    pub initial_capital: Decimal,
    pub sender: RowSender,
}

impl InstrumentTask {
    /// Never fails: fetch errors and simulation panics become zero-activity
    /// results carrying an error note.
    pub async fn run(self) -> HashMap<String, SimulationResult> {
        let outcomes = match self.source.fetch_bars(&self.symbol).await {
            Ok(bars) => {
                if bars.is_empty() {
                    warn!(symbol = %self.symbol, "No bars available; results will show no activity.");
                }
                self.simulate(bars).await
            }
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Failed to fetch bar history; reporting zero-activity results.");
                self.degraded(format!("bar fetch failed: {e:#}"))
            }
        };
        self.finish(outcomes).await
    }

    /// Records zero-activity results for an instrument whose task never
    /// produced any, queueing them with `note` like any other degraded run.
    pub async fn abandon(self, note: String) -> HashMap<String, SimulationResult> {
        let outcomes = self.degraded(note);
        self.finish(outcomes).await
    }

    async fn finish(&self, outcomes: Vec<(String, Outcome)>) -> HashMap<String, SimulationResult> {
        self.queue_rows(&outcomes).await;
        outcomes
            .into_iter()
            .map(|(name, (result, _))| (name, result))
            .collect()
    }

    async fn simulate(&self, bars: Vec<Kline>) -> Vec<(String, Outcome)> {
        let backtester = self.backtester.clone();
        let blueprints = self.blueprints.clone();
        let symbol = self.symbol.clone();
        let capital = self.initial_capital;

        // Replaying bars is CPU-bound; keep it off the async workers.
        let simulated = tokio::task::spawn_blocking(move || {
            simulate_all(&backtester, &blueprints, &symbol, &bars, capital)
        })
        .await;

        match simulated {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Simulation panicked; reporting zero-activity results.");
                self.degraded(format!("simulation panicked: {e}"))
            }
        }
    }

    fn degraded(&self, note: String) -> Vec<(String, Outcome)> {
        self.blueprints
            .iter()
            .map(|blueprint| {
                let result = zero_result(&self.backtester, blueprint.name(), &self.symbol, self.initial_capital);
                (blueprint.name().to_string(), (result, Some(note.clone())))
            })
            .collect()
    }

    async fn queue_rows(&self, outcomes: &[(String, Outcome)]) {
        for (_, (result, note)) in outcomes {
            let row = BacktestResultRow::from_result(self.run_id, &self.symbol, result, note.clone());
            match self.sender.offer(PersistableRow::Result(row)).await {
                OfferOutcome::Enqueued | OfferOutcome::Dropped => {}
                OfferOutcome::Closed => {
                    warn!(symbol = %self.symbol, "Result queue closed; results will not be persisted.");
                    return;
                }
                OfferOutcome::Interrupted => {
                    debug!(symbol = %self.symbol, "Interrupted while queueing results.");
                    return;
                }
            }
        }
    }
}

/// A zero-trade result with metrics calculated, keyed like a real one.
pub fn zero_result(
    backtester: &Backtester,
    strategy_name: &str,
    symbol: &Symbol,
    initial_capital: Decimal,
) -> SimulationResult {
    SimulationResult::empty(strategy_name, symbol.clone(), initial_capital, backtester.analytics())
}

fn simulate_all(
    backtester: &Backtester,
    blueprints: &[StrategyBlueprint],
    symbol: &Symbol,
    bars: &[Kline],
    initial_capital: Decimal,
) -> Vec<(String, Outcome)> {
    blueprints
        .iter()
        .map(|blueprint| {
            let name = blueprint.name().to_string();
            let outcome = match blueprint.build() {
                Ok(mut strategy) => {
                    strategy.reset();
                    let mut result = backtester.simulate(strategy.as_mut(), bars, initial_capital);
                    result.strategy_name = name.clone();
                    result.symbol = symbol.clone();
                    debug!(
                        symbol = %symbol,
                        strategy = %name,
                        trades = result.total_trades(),
                        final_equity = %result.final_equity,
                        "Simulation finished."
                    );
                    (result, None)
                }
                Err(e) => {
                    warn!(symbol = %symbol, strategy = %name, error = %e, "Could not build strategy.");
                    let result = zero_result(backtester, &name, symbol, initial_capital);
                    (result, Some(format!("strategy build failed: {e}")))
                }
            };
            (name, outcome)
        })
        .collect()
}

/// Downloads one symbol's history page by page, queueing each page's rows
/// before asking for the next.
///
/// Returns the number of bars received. A failed page ends the download;
/// rows from earlier pages stay queued.
pub async fn ingest_symbol(symbol: Symbol, source: Arc<dyn BarSource>, sender: RowSender) -> usize {
    let interval = source.interval().to_string();
    let mut received = 0;
    let mut after = None;

    loop {
        let page = match source.fetch_page(&symbol, after).await {
            Ok(page) => page,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, received, "Kline download failed; keeping rows already queued.");
                break;
            }
        };
        let Some(last) = page.last().map(|bar| bar.open_time) else {
            break;
        };
        // A page that does not move forward would repeat forever.
        if after.is_some_and(|previous| last <= previous) {
            warn!(symbol = %symbol, open_time = last, "Source returned a page that does not advance; stopping.");
            break;
        }

        received += page.len();
        for bar in &page {
            let row = PersistableRow::Kline(KlineRow::from_kline(&interval, bar));
            match sender.offer(row).await {
                OfferOutcome::Enqueued | OfferOutcome::Dropped => {}
                OfferOutcome::Closed | OfferOutcome::Interrupted => {
                    warn!(symbol = %symbol, received, "Stopped queueing klines before the end of the history.");
                    return received;
                }
            }
        }
        debug!(symbol = %symbol, count = page.len(), received, "Queued kline page.");
        after = Some(last);
    }

    info!(symbol = %symbol, bars = received, "Queued klines for insertion.");
    received
}
