// In app/src/main.rs

use anyhow::{Context, Result};
use app_config::{BacktestJob, Settings};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use core_types::Symbol;
use database::{BatchSizes, BulkInserter, Db};
use engine::{ApiBarSource, BacktestRunOutput, BarSource, DbBarSource, IngestionOutput, Pipeline};
use itertools::Itertools;
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "Parallel strategy backtester and kline ingestion for Binance Futures.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs every configured strategy against every instrument in parallel
    /// and stores one result row per pair.
    ///
    /// The `[backtest]` section of the config is the job; flags override it.
    Backtest {
        /// Comma-separated symbols (e.g. "BTCUSDT,ETHUSDT").
        #[arg(short, long, value_delimiter = ',')]
        symbols: Option<Vec<String>>,

        /// The kline interval to replay (e.g., "5m", "1h").
        #[arg(short, long)]
        interval: Option<String>,

        /// Start date in YYYY-MM-DD format.
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// End date (inclusive) in YYYY-MM-DD format.
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Starting capital for every simulation.
        #[arg(long)]
        capital: Option<f64>,
    },

    /// Backfills historical kline data from Binance.
    Backfill {
        /// Comma-separated symbols to backfill (e.g., "BTCUSDT,ETHUSDT").
        #[arg(short, long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// The interval for the klines (e.g., "5m", "1h").
        #[arg(short, long)]
        interval: String,

        /// Optional start date in YYYY-MM-DD format. Without it each symbol
        /// resumes after its newest stored kline.
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Optional end date (inclusive); defaults to the latest available kline.
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = app_config::load_settings().context("Failed to load application settings")?;
    init_tracing(&settings.app.log_level);

    tracing::info!(environment = %settings.app.environment, "Starting Atlas application");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Backtest {
            symbols,
            interval,
            start_date,
            end_date,
            capital,
        } => {
            let job = resolve_job(&settings, symbols, interval, start_date, end_date, capital)?;
            handle_backtest(&settings, job, cancel).await?;
        }
        Commands::Backfill {
            symbols,
            interval,
            start_date,
            end_date,
        } => {
            handle_backfill(&settings, symbols, interval, start_date, end_date, cancel).await?;
        }
    }

    tracing::info!("Atlas application has finished successfully.");

    Ok(())
}

fn init_tracing(log_level: &str) {
    let level = log_level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::Targets::new()
            .with_target("sqlx::query", tracing::Level::WARN) // Disable sqlx query debug logs
            .with_default(level),
    );
    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Cancels the run on Ctrl-C. Workers stop picking up new instruments and the
/// writers flush what they already hold.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupt received; cancelling the run.");
                cancel.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Could not listen for Ctrl-C."),
        }
    });
}

/// Merges command-line overrides into the configured backtest job.
fn resolve_job(
    settings: &Settings,
    symbols: Option<Vec<String>>,
    interval: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    capital: Option<f64>,
) -> Result<BacktestJob> {
    let mut job = settings
        .backtest
        .clone()
        .context("No [backtest] section is configured; it provides the strategies to run.")?;

    if let Some(symbols) = symbols {
        job.symbols = symbols;
    }
    if let Some(interval) = interval {
        job.interval = interval;
    }
    if let Some(start_date) = start_date {
        job.start_date = start_date;
    }
    if let Some(end_date) = end_date {
        job.end_date = end_date;
    }
    if let Some(capital) = capital {
        job.initial_capital = capital;
    }
    job.validate()?;
    Ok(job)
}

fn batch_sizes(settings: &Settings) -> BatchSizes {
    BatchSizes {
        results: settings.pipeline.result_batch_size,
        klines: settings.pipeline.kline_batch_size,
    }
}

fn start_of_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    let start = date.and_hms_opt(0, 0, 0).context("invalid start of day")?;
    Ok(start.and_utc())
}

fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    let end = date
        .and_hms_milli_opt(23, 59, 59, 999)
        .context("invalid end of day")?;
    Ok(end.and_utc())
}

fn to_symbols(names: &[String]) -> Vec<Symbol> {
    names.iter().map(|s| Symbol::new(s.trim().to_uppercase())).collect()
}

// --- "Backtest" Subcommand Logic ---

async fn handle_backtest(settings: &Settings, job: BacktestJob, cancel: CancellationToken) -> Result<()> {
    let started = Instant::now();
    let initial_capital = Decimal::from_f64(job.initial_capital)
        .with_context(|| format!("initial capital {} is not representable", job.initial_capital))?;
    let blueprints = strategies::factory::create_blueprints(&job.strategies)?;
    let simulation = engine::simulation_config(&settings.simulation)?;

    let db = database::connect(&settings.database).await?;
    tracing::info!("Database connection established and migrations are up-to-date.");

    let source: Arc<dyn BarSource> = Arc::new(DbBarSource::new(
        db.clone(),
        job.interval.clone(),
        start_of_day(job.start_date)?,
        end_of_day(job.end_date)?,
    ));
    let pipeline = Pipeline::new(
        settings.pipeline.clone(),
        simulation,
        source,
        inserter(&db, settings),
        cancel,
    )?;

    let output = pipeline
        .run_parallel_backtest(to_symbols(&job.symbols), blueprints, initial_capital)
        .await?;

    print_backtest_report(&job, &output);
    if !output.completed {
        tracing::warn!(run_id = %output.run_id, "Run did not complete; stored results may be partial.");
    }
    tracing::info!(duration = ?started.elapsed(), "Backtest job finished.");
    Ok(())
}

fn inserter(db: &Db, settings: &Settings) -> Arc<dyn BulkInserter> {
    Arc::new(db.bulk_inserter(batch_sizes(settings)))
}

// --- "Backfill" Subcommand Logic ---

async fn handle_backfill(
    settings: &Settings,
    symbols: Vec<String>,
    interval: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    cancel: CancellationToken,
) -> Result<()> {
    let end_time = end_date.map(end_of_day).transpose()?.map(|dt| dt.timestamp_millis());
    let symbols = to_symbols(&symbols);

    let db = database::connect(&settings.database).await?;
    let client = api_client::new(&settings.binance)?;

    let source = match start_date {
        Some(date) => {
            let start_time = start_of_day(date)?.timestamp_millis();
            if end_time.is_some_and(|end| end < start_time) {
                anyhow::bail!("end date {end_date:?} is before start date {date}");
            }
            tracing::info!(start = %date, "Using provided start date.");
            ApiBarSource::new(
                client,
                interval.clone(),
                start_time,
                end_time,
                Duration::from_millis(settings.binance.request_delay_ms),
                cancel.clone(),
            )
        }
        None => {
            tracing::info!("No start date provided. Resuming from the last saved kline.");
            let resume = resume_points(&db, &symbols, &interval).await?;
            ApiBarSource::new(
                client,
                interval.clone(),
                0,
                end_time,
                Duration::from_millis(settings.binance.request_delay_ms),
                cancel.clone(),
            )
            .resume_from(resume)
        }
    };
    tracing::info!(symbols = symbols.len(), interval = %interval, "Starting backfill process.");

    let source: Arc<dyn BarSource> = Arc::new(source);
    let pipeline = Pipeline::new(
        settings.pipeline.clone(),
        engine::simulation_config(&settings.simulation)?,
        source.clone(),
        inserter(&db, settings),
        cancel,
    )?;

    let output = pipeline.ingest_klines(symbols, source).await;
    print_backfill_report(&output);
    Ok(())
}

/// Start times just past the newest stored kline of each symbol. Fails when a
/// symbol has nothing stored, since there is then nothing to resume from.
async fn resume_points(db: &Db, symbols: &[Symbol], interval: &str) -> Result<HashMap<Symbol, i64>> {
    let mut points = HashMap::with_capacity(symbols.len());
    let mut missing = Vec::new();
    for symbol in symbols {
        match db.latest_open_time(symbol, interval).await? {
            Some(open_time) => {
                tracing::info!(symbol = %symbol, last_open_time = open_time, "Resuming after stored klines.");
                points.insert(symbol.clone(), open_time + 1);
            }
            None => missing.push(symbol.as_str()),
        }
    }
    if !missing.is_empty() {
        anyhow::bail!(
            "no stored {interval} klines for {}; pass --start-date to backfill them",
            missing.join(", ")
        );
    }
    Ok(points)
}

// --- Reporting ---

fn print_backtest_report(job: &BacktestJob, output: &BacktestRunOutput) {
    println!("\n--- Backtest Run {} ---", output.run_id);
    println!(
        "{} .. {} | interval {} | capital {}",
        job.start_date, job.end_date, job.interval, job.initial_capital
    );
    println!(
        "{:<12} {:<20} {:>7} {:>14} {:>9} {:>8} {:>8} {:>7}",
        "Symbol", "Strategy", "Trades", "Net P&L", "P&L %", "Win %", "Max DD%", "Sharpe"
    );

    for (symbol, per_strategy) in output.results.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        for (name, result) in per_strategy.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            let m = result.metrics();
            println!(
                "{:<12} {:<20} {:>7} {:>14.2} {:>9.2} {:>8.2} {:>8.2} {:>7.2}",
                symbol.as_str(),
                name,
                m.total_trades,
                m.net_pnl,
                m.net_pnl_pct,
                m.win_rate_pct,
                m.max_drawdown_pct,
                m.sharpe_ratio
            );
        }
    }

    println!("\nRows stored per symbol:");
    for (symbol, count) in output.inserted_counts.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        println!("  {:<12} {}", symbol.as_str(), count);
    }
    println!(
        "Total stored: {} | dropped: {} | completed: {}",
        output.total_inserted, output.dropped_rows, output.completed
    );
}

fn print_backfill_report(output: &IngestionOutput) {
    println!("\n--- Backfill Complete ---");
    println!("{:<12} {:>10} {:>10}", "Symbol", "Fetched", "Stored");
    for (symbol, fetched) in output.fetched.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        let stored = output.inserted_counts.get(symbol).copied().unwrap_or(0);
        println!("{:<12} {:>10} {:>10}", symbol.as_str(), fetched, stored);
    }
    println!(
        "Total stored: {} | dropped: {} | completed: {}",
        output.total_inserted, output.dropped_rows, output.completed
    );
}
