// In crates/database/src/lib.rs

use app_config::types::DatabaseSettings;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use core_types::{Kline, Symbol};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions};
use std::str::FromStr;

pub mod error;
pub mod insert;
pub mod types;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use insert::{BatchInserter, BulkInserter, CopyInserter, FallbackInserter};
pub use types::{BacktestResultRow, BatchSizes, KlineRow, PersistableRow, RowShape};

/// A wrapper around the `sqlx` connection pool.
#[derive(Debug, Clone)]
pub struct Db(PgPool);

/// Establishes a connection pool to the PostgreSQL database and runs migrations.
///
/// # Arguments
///
/// * `settings`: The database configuration settings.
///
/// # Returns
///
/// A `Result` containing the `Db` wrapper on success, or an `Error` on failure.
pub async fn connect(settings: &DatabaseSettings) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .connect(&settings.url)
        .await?;

    // Run database migrations. This ensures the database schema is up-to-date.
    sqlx::migrate!("../../migrations").run(&pool).await?;

    Ok(Db(pool))
}

#[derive(FromRow)]
struct KlineRecord {
    open_time: i64,
    open: BigDecimal,
    high: BigDecimal,
    low: BigDecimal,
    close: BigDecimal,
    volume: BigDecimal,
    close_time: i64,
}

fn to_decimal(value: &BigDecimal) -> Result<Decimal> {
    let text = value.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| Error::InvalidNumber(text))
}

impl Db {
    pub fn pool(&self) -> &PgPool {
        &self.0
    }

    /// The bulk sink used by the pipeline writers: COPY first, batched inserts
    /// as the fallback.
    pub fn bulk_inserter(&self, sizes: BatchSizes) -> FallbackInserter {
        FallbackInserter::postgres(self.0.clone(), sizes)
    }

    /// Open time of the newest stored kline, or `None` when nothing is stored
    /// for this symbol and interval yet.
    pub async fn latest_open_time(&self, symbol: &Symbol, interval: &str) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(open_time) FROM klines WHERE symbol = $1 AND interval = $2",
        )
        .bind(&symbol.0)
        .bind(interval)
        .fetch_one(&self.0)
        .await
        .map_err(Error::OperationFailed)
    }

    /// Fetches klines of one interval whose open time falls in `[start, end)`,
    /// oldest first.
    pub async fn get_klines_by_date_range(
        &self,
        symbol: &Symbol,
        interval: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Kline>> {
        let records: Vec<KlineRecord> = sqlx::query_as(
            r#"
            SELECT open_time, open, high, low, close, volume, close_time
            FROM klines
            WHERE symbol = $1 AND interval = $2 AND open_time >= $3 AND open_time < $4
            ORDER BY open_time ASC
            "#,
        )
        .bind(&symbol.0)
        .bind(interval)
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.0)
        .await
        .map_err(Error::OperationFailed)?;

        records
            .iter()
            .map(|r| {
                Ok(Kline {
                    symbol: symbol.clone(),
                    open_time: r.open_time,
                    open: to_decimal(&r.open)?,
                    high: to_decimal(&r.high)?,
                    low: to_decimal(&r.low)?,
                    close: to_decimal(&r.close)?,
                    volume: to_decimal(&r.volume)?,
                    close_time: r.close_time,
                })
            })
            .collect()
    }
}
