// In crates/engine/src/lib.rs

pub mod completion;
pub mod counter;
pub mod error;
pub mod orchestrator;
pub mod queue;
pub mod source;
pub mod task;
pub mod writer;

pub use completion::CompletionLatch;
pub use counter::InsertCounter;
pub use error::{Error, Result};
pub use orchestrator::{TaskOutcome, run_bounded};
pub use queue::{OfferOutcome, OfferPolicy, PollOutcome, RowReceiver, RowSender, row_queue};
pub use source::{ApiBarSource, BarSource, DbBarSource};
pub use writer::{BulkWriter, WriteBatch, WriterConfig};

use crate::task::{InstrumentTask, ingest_symbol, zero_result};
use analytics::{MetricsConfig, SimulationResult};
use app_config::{PipelineSettings, SimulationSettings};
use backtester::{Backtester, SimulationConfig};
use core_types::Symbol;
use database::{BatchSizes, BulkInserter};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use strategies::StrategyBlueprint;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything a parallel backtest produced.
#[derive(Debug)]
pub struct BacktestRunOutput {
    pub run_id: Uuid,
    /// One entry per requested instrument, each holding one result per strategy.
    pub results: HashMap<Symbol, HashMap<String, SimulationResult>>,
    /// Rows stored per instrument. When `completed` is `false` this is a
    /// snapshot taken at the timeout; writers may still be flushing.
    pub inserted_counts: HashMap<Symbol, u64>,
    pub total_inserted: u64,
    /// Rows producers gave up on because the queue stayed full.
    pub dropped_rows: u64,
    /// `false` when the writers did not finish in time or the run was cancelled.
    pub completed: bool,
}

/// Everything a kline ingestion produced.
#[derive(Debug)]
pub struct IngestionOutput {
    /// Bars fetched per symbol (0 when the fetch failed).
    pub fetched: HashMap<Symbol, usize>,
    /// A snapshot when `completed` is `false`, as for backtests.
    pub inserted_counts: HashMap<Symbol, u64>,
    pub total_inserted: u64,
    pub dropped_rows: u64,
    pub completed: bool,
}

/// Builds the validated simulation config from its settings section.
pub fn simulation_config(settings: &SimulationSettings) -> Result<SimulationConfig> {
    let config = SimulationConfig::new(settings.margin_utilization, settings.fee_rate, settings.base_quantity)?
        .with_reversal(settings.reverse_on_opposite_signal)
        .with_trading_mode(settings.trading_mode)
        .with_metrics(MetricsConfig {
            periods_per_year: settings.periods_per_year,
        })?;
    Ok(config)
}

struct WriterReport {
    inserted_counts: HashMap<Symbol, u64>,
    total_inserted: u64,
    dropped_rows: u64,
    completed: bool,
}

/// The writer side of a run: the tasks draining the queue and the state
/// they share with the driver.
struct WriterStage {
    handles: Vec<JoinHandle<u64>>,
    latch: CompletionLatch,
    counter: Arc<InsertCounter>,
    receiver: RowReceiver,
}

impl WriterStage {
    async fn finish(self, settings: &PipelineSettings, cancel: &CancellationToken) -> WriterReport {
        let completed = self
            .latch
            .await_completion(settings.completion_timeout(), cancel)
            .await;
        // On timeout or cancellation the writers are left to finish or stop on
        // their own; the counts below are whatever they had stored by then.
        if completed {
            for handle in self.handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Writer task ended abnormally.");
                }
            }
        }
        WriterReport {
            inserted_counts: self.counter.snapshot(),
            total_inserted: self.counter.total(),
            dropped_rows: self.receiver.dropped_rows(),
            completed,
        }
    }
}

/// Drives a run: starts the writers, fans work out to bounded workers,
/// then waits for the writers to drain.
pub struct Pipeline {
    settings: PipelineSettings,
    backtester: Arc<Backtester>,
    source: Arc<dyn BarSource>,
    inserter: Arc<dyn BulkInserter>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        simulation: SimulationConfig,
        source: Arc<dyn BarSource>,
        inserter: Arc<dyn BulkInserter>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            backtester: Arc::new(Backtester::new(simulation)),
            source,
            inserter,
            cancel,
        })
    }

    pub fn batch_sizes(&self) -> BatchSizes {
        BatchSizes {
            results: self.settings.result_batch_size,
            klines: self.settings.kline_batch_size,
        }
    }

    fn spawn_writers(&self) -> (RowSender, WriterStage) {
        let policy = OfferPolicy {
            timeout: self.settings.offer_timeout(),
            retries: self.settings.offer_retries,
        };
        let (sender, receiver) = row_queue(self.settings.queue_capacity, policy, self.cancel.clone());
        let counter = Arc::new(InsertCounter::new(self.settings.progress_log_every));
        let latch = CompletionLatch::new(self.settings.writer_count);
        let config = WriterConfig {
            batch_sizes: self.batch_sizes(),
            flush_timeout: self.settings.flush_timeout(),
            poll_timeout: self.settings.poll_timeout(),
        };

        let handles = (0..self.settings.writer_count)
            .map(|id| {
                let writer = BulkWriter::new(id, self.inserter.clone(), counter.clone(), config);
                let queue = receiver.clone();
                let done = latch.guard();
                tokio::spawn(async move {
                    let _done = done;
                    writer.drain(queue).await
                })
            })
            .collect();

        let stage = WriterStage {
            handles,
            latch,
            counter,
            receiver,
        };
        (sender, stage)
    }

    /// Simulates every blueprint against every instrument, at most
    /// `max_parallel_tasks` instruments at a time, and persists one result
    /// row per (instrument, strategy).
    ///
    /// Fails only on invalid input; per-instrument and per-batch problems are
    /// logged and reflected in the output.
    pub async fn run_parallel_backtest(
        &self,
        instruments: Vec<Symbol>,
        blueprints: Vec<StrategyBlueprint>,
        initial_capital: Decimal,
    ) -> Result<BacktestRunOutput> {
        if initial_capital <= Decimal::ZERO {
            return Err(Error::InvalidConfig(format!(
                "initial capital must be positive, got {initial_capital}"
            )));
        }
        if blueprints.is_empty() {
            return Err(Error::InvalidConfig("at least one strategy is required".into()));
        }
        {
            let mut names = HashSet::new();
            if let Some(duplicate) = blueprints.iter().find(|b| !names.insert(b.name())) {
                return Err(Error::InvalidConfig(format!(
                    "strategy name '{}' is used more than once; give each entry a unique label",
                    duplicate.name()
                )));
            }
        }

        let instruments = dedup(instruments);
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            %run_id,
            instruments = instruments.len(),
            strategies = blueprints.len(),
            %initial_capital,
            "Starting parallel backtest."
        );

        let blueprints: Arc<[StrategyBlueprint]> = blueprints.into();
        let (sender, writers) = self.spawn_writers();

        let task_for = |symbol: &Symbol| InstrumentTask {
            run_id,
            symbol: symbol.clone(),
            blueprints: blueprints.clone(),
            source: self.source.clone(),
            backtester: self.backtester.clone(),
            initial_capital,
            sender: sender.clone(),
        };

        let outcomes = run_bounded(
            instruments,
            self.settings.max_parallel_tasks,
            self.settings.task_timeout(),
            &self.cancel,
            |symbol| task_for(symbol).run(),
        )
        .await;

        let mut results = HashMap::with_capacity(outcomes.len());
        for (symbol, outcome) in outcomes {
            let per_strategy = match outcome {
                TaskOutcome::Completed(per_strategy) => per_strategy,
                TaskOutcome::Failed => task_for(&symbol).abandon("instrument task panicked".into()).await,
                TaskOutcome::TimedOut => {
                    let note = format!("instrument task timed out after {:?}", self.settings.task_timeout());
                    task_for(&symbol).abandon(note).await
                }
                TaskOutcome::NotStarted => blueprints
                    .iter()
                    .map(|b| {
                        let result = zero_result(&self.backtester, b.name(), &symbol, initial_capital);
                        (b.name().to_string(), result)
                    })
                    .collect(),
            };
            results.insert(symbol, per_strategy);
        }
        // Producers are done once the last sender is gone.
        drop(sender);

        let report = writers.finish(&self.settings, &self.cancel).await;
        info!(
            %run_id,
            instruments = results.len(),
            inserted = report.total_inserted,
            dropped = report.dropped_rows,
            completed = report.completed,
            elapsed = ?started.elapsed(),
            "Parallel backtest finished."
        );

        Ok(BacktestRunOutput {
            run_id,
            results,
            inserted_counts: report.inserted_counts,
            total_inserted: report.total_inserted,
            dropped_rows: report.dropped_rows,
            completed: report.completed,
        })
    }

    /// Downloads each symbol's history from `source` and persists it as kline
    /// rows through the same queue and writers.
    pub async fn ingest_klines(&self, symbols: Vec<Symbol>, source: Arc<dyn BarSource>) -> IngestionOutput {
        let symbols = dedup(symbols);
        let started = Instant::now();
        info!(symbols = symbols.len(), interval = source.interval(), "Starting kline ingestion.");

        let (sender, writers) = self.spawn_writers();
        let outcomes = run_bounded(
            symbols,
            self.settings.max_parallel_tasks,
            self.settings.task_timeout(),
            &self.cancel,
            |symbol| ingest_symbol(symbol.clone(), source.clone(), sender.clone()),
        )
        .await;
        drop(sender);

        let fetched = outcomes
            .into_iter()
            .map(|(symbol, outcome)| match outcome {
                TaskOutcome::Completed(count) => (symbol, count),
                TaskOutcome::Failed | TaskOutcome::TimedOut | TaskOutcome::NotStarted => (symbol, 0),
            })
            .collect::<HashMap<_, _>>();

        let report = writers.finish(&self.settings, &self.cancel).await;
        info!(
            symbols = fetched.len(),
            fetched = fetched.values().sum::<usize>(),
            inserted = report.total_inserted,
            completed = report.completed,
            elapsed = ?started.elapsed(),
            "Kline ingestion finished."
        );

        IngestionOutput {
            fetched,
            inserted_counts: report.inserted_counts,
            total_inserted: report.total_inserted,
            dropped_rows: report.dropped_rows,
            completed: report.completed,
        }
    }
}

/// Drops repeated symbols, keeping first occurrences in order.
fn dedup(symbols: Vec<Symbol>) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    symbols.into_iter().filter(|s| seen.insert(s.clone())).collect()
}
