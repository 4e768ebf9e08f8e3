// In crates/app-config/src/types.rs

use crate::{Error, Result};
use chrono::NaiveDate;
use core_types::{StrategyConfig, TradingMode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    #[serde(default)]
    pub app: AppSettings,
    /// Settings for the database connection.
    pub database: DatabaseSettings,
    /// Settings for the Binance market-data API.
    #[serde(default)]
    pub binance: BinanceSettings,
    /// Worker pool, queue and writer tuning.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Simulation loop tuning.
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// The default backtest job, used when the CLI does not override it.
    pub backtest: Option<BacktestJob>,
}

impl Settings {
    /// Checks every section that has constraints beyond its type.
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.simulation.validate()?;
        if let Some(job) = &self.backtest {
            job.validate()?;
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// The log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    /// The connection URL for the PostgreSQL database.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BinanceSettings {
    /// The REST API base URL for Binance Futures.
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    /// Klines requested per page (the API caps this at 1500).
    #[serde(default = "default_page_limit")]
    pub page_limit: u16,
    /// Pause between consecutive page requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for BinanceSettings {
    fn default() -> Self {
        Self {
            rest_base_url: default_rest_base_url(),
            page_limit: default_page_limit(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

/// Tuning for the concurrent backtest and ingestion pipeline.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound on per-instrument tasks running at once.
    pub max_parallel_tasks: usize,
    /// Capacity of the row queue between workers and writers.
    pub queue_capacity: usize,
    pub offer_timeout_ms: u64,
    /// Extra offer attempts after the first timeout. 0 drops the row with a warning.
    pub offer_retries: u32,
    pub poll_timeout_ms: u64,
    pub writer_count: usize,
    /// Longest one instrument (or one symbol's download) may run before it is
    /// abandoned and its permit handed on.
    pub task_timeout_ms: u64,
    /// Flush threshold for backtest result rows.
    pub result_batch_size: usize,
    /// Flush threshold for kline rows.
    pub kline_batch_size: usize,
    pub flush_timeout_ms: u64,
    pub completion_timeout_secs: u64,
    /// The writer logs progress each time the running total crosses a multiple of this.
    pub progress_log_every: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 8,
            queue_capacity: 10_000,
            offer_timeout_ms: 5_000,
            offer_retries: 3,
            poll_timeout_ms: 250,
            writer_count: 1,
            task_timeout_ms: 1_800_000,
            result_batch_size: 2_000,
            kline_batch_size: 500,
            flush_timeout_ms: 2_000,
            completion_timeout_secs: 300,
            progress_log_every: 10_000,
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("max_parallel_tasks", self.max_parallel_tasks as u64),
            ("queue_capacity", self.queue_capacity as u64),
            ("offer_timeout_ms", self.offer_timeout_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
            ("writer_count", self.writer_count as u64),
            ("task_timeout_ms", self.task_timeout_ms),
            ("result_batch_size", self.result_batch_size as u64),
            ("kline_batch_size", self.kline_batch_size as u64),
            ("flush_timeout_ms", self.flush_timeout_ms),
            ("completion_timeout_secs", self.completion_timeout_secs),
            ("progress_log_every", self.progress_log_every),
        ];
        match sizes.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(Error::Invalid(format!("pipeline.{name} must be positive"))),
            None => Ok(()),
        }
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

/// Raw simulation tuning values. Converted into a validated
/// `backtester::SimulationConfig` by the caller.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationSettings {
    pub margin_utilization: f64,
    pub fee_rate: f64,
    pub base_quantity: u32,
    pub reverse_on_opposite_signal: bool,
    pub periods_per_year: f64,
    pub trading_mode: TradingMode,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            margin_utilization: 0.95,
            fee_rate: 0.0,
            base_quantity: 1,
            reverse_on_opposite_signal: true,
            periods_per_year: 252.0,
            trading_mode: TradingMode::Backtest,
        }
    }
}

impl SimulationSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.margin_utilization > 0.0 && self.margin_utilization <= 1.0) {
            return Err(Error::Invalid(format!(
                "simulation.margin_utilization must lie in (0, 1], got {}",
                self.margin_utilization
            )));
        }
        if !(self.fee_rate >= 0.0 && self.fee_rate.is_finite()) {
            return Err(Error::Invalid(format!(
                "simulation.fee_rate must be a non-negative number, got {}",
                self.fee_rate
            )));
        }
        if self.base_quantity == 0 {
            return Err(Error::Invalid("simulation.base_quantity must be at least 1".into()));
        }
        if !(self.periods_per_year > 0.0 && self.periods_per_year.is_finite()) {
            return Err(Error::Invalid(format!(
                "simulation.periods_per_year must be positive, got {}",
                self.periods_per_year
            )));
        }
        Ok(())
    }
}

/// A backtest run described in the config files.
#[derive(Deserialize, Debug, Clone)]
pub struct BacktestJob {
    pub symbols: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl BacktestJob {
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Invalid("backtest.symbols must not be empty".into()));
        }
        if self.start_date >= self.end_date {
            return Err(Error::Invalid(format!(
                "backtest.start_date ({}) must be before end_date ({})",
                self.start_date, self.end_date
            )));
        }
        if !(self.initial_capital > 0.0 && self.initial_capital.is_finite()) {
            return Err(Error::Invalid(format!(
                "backtest.initial_capital must be positive, got {}",
                self.initial_capital
            )));
        }
        Ok(())
    }
}

fn default_environment() -> String {
    "development".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_max_connections() -> u32 {
    5
}
fn default_rest_base_url() -> String {
    "https://fapi.binance.com".into()
}
fn default_page_limit() -> u16 {
    1000
}
fn default_request_delay_ms() -> u64 {
    250
}
fn default_interval() -> String {
    "1h".into()
}
fn default_initial_capital() -> f64 {
    10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [database]
        url = "postgres://localhost/atlas"
    "#;

    #[test]
    fn missing_sections_take_defaults() {
        let settings: Settings = toml::from_str(MINIMAL).unwrap();
        assert_eq!(settings.database.max_connections, 5);
        assert_eq!(settings.pipeline, PipelineSettings::default());
        assert_eq!(settings.pipeline.result_batch_size, 2_000);
        assert_eq!(settings.pipeline.kline_batch_size, 500);
        assert_eq!(settings.simulation.margin_utilization, 0.95);
        assert!(settings.backtest.is_none());
        settings.validate().unwrap();
    }

    #[test]
    fn partial_pipeline_section_keeps_other_defaults() {
        let settings: Settings = toml::from_str(&format!(
            "{MINIMAL}\n[pipeline]\nmax_parallel_tasks = 2\noffer_retries = 0\n"
        ))
        .unwrap();
        assert_eq!(settings.pipeline.max_parallel_tasks, 2);
        assert_eq!(settings.pipeline.offer_retries, 0);
        assert_eq!(settings.pipeline.queue_capacity, 10_000);
    }

    #[test]
    fn zero_sized_pipeline_values_are_rejected() {
        let pipeline = PipelineSettings {
            writer_count: 0,
            ..PipelineSettings::default()
        };
        let err = pipeline.validate().unwrap_err();
        assert!(err.to_string().contains("writer_count"));

        let no_task_timeout = PipelineSettings {
            task_timeout_ms: 0,
            ..PipelineSettings::default()
        };
        let err = no_task_timeout.validate().unwrap_err();
        assert!(err.to_string().contains("task_timeout_ms"));
    }

    #[test]
    fn simulation_bounds() {
        let mut simulation = SimulationSettings::default();
        simulation.margin_utilization = 1.5;
        assert!(simulation.validate().is_err());
        simulation.margin_utilization = 1.0;
        simulation.fee_rate = -0.1;
        assert!(simulation.validate().is_err());
    }

    #[test]
    fn backtest_job_parses_strategies_and_dates() {
        let settings: Settings = toml::from_str(&format!(
            r#"{MINIMAL}
            [backtest]
            symbols = ["BTCUSDT", "ETHUSDT"]
            start_date = "2024-01-01"
            end_date = "2024-06-01"

            [[backtest.strategies]]
            name = "ma_crossover"
            params = {{ fast_period = 10, slow_period = 30 }}
            "#
        ))
        .unwrap();
        let job = settings.backtest.as_ref().unwrap();
        assert_eq!(job.interval, "1h");
        assert_eq!(job.initial_capital, 10_000.0);
        assert_eq!(job.strategies.len(), 1);
        settings.validate().unwrap();
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let job = BacktestJob {
            symbols: vec!["BTCUSDT".into()],
            interval: "1h".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            initial_capital: 1_000.0,
            strategies: Vec::new(),
        };
        assert!(job.validate().is_err());
    }
}
