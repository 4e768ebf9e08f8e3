// In crates/database/src/insert.rs

use crate::types::{BacktestResultRow, BatchSizes, KlineRow, PersistableRow, RowShape};
use crate::{Error, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Something that can persist a batch of rows of one shape.
///
/// Returns the number of rows the store reports as written. Rows whose
/// variant does not match `shape` are skipped.
#[async_trait]
pub trait BulkInserter: Send + Sync {
    fn name(&self) -> &str;

    async fn insert(&self, shape: RowShape, rows: &[PersistableRow]) -> Result<u64>;
}

/// Postgres rejects statements with more bind parameters than this.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Rows per multi-row `INSERT`: the configured batch size, capped so one
/// statement never exceeds `MAX_BIND_PARAMS`.
pub fn rows_per_statement(shape: RowShape, batch_size: usize) -> usize {
    let columns = match shape {
        RowShape::BacktestResults => BacktestResultRow::COLUMNS.len(),
        RowShape::Klines => KlineRow::COLUMNS.len(),
    };
    batch_size.min(MAX_BIND_PARAMS / columns).max(1)
}

/// Fast path: streams the batch with `COPY ... FROM STDIN` into a staging
/// table that lives for one transaction, then merges it into the real table.
#[derive(Debug, Clone)]
pub struct CopyInserter {
    pool: PgPool,
}

impl CopyInserter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BulkInserter for CopyInserter {
    fn name(&self) -> &str {
        "copy"
    }

    async fn insert(&self, shape: RowShape, rows: &[PersistableRow]) -> Result<u64> {
        let (columns, payload): (&[&str], Vec<u8>) = match shape {
            RowShape::BacktestResults => (
                &BacktestResultRow::COLUMNS,
                encode_csv(rows.iter().filter_map(PersistableRow::as_result).map(|r| r.fields()))?,
            ),
            RowShape::Klines => (
                &KlineRow::COLUMNS,
                encode_csv(rows.iter().filter_map(PersistableRow::as_kline).map(|r| r.fields()))?,
            ),
        };
        if payload.is_empty() {
            return Ok(0);
        }

        let table = shape.table();
        let staging = format!("staging_{table}");
        let column_list = columns.join(", ");

        let mut tx = self.pool.begin().await.map_err(Error::OperationFailed)?;

        sqlx::query(&format!(
            "CREATE TEMP TABLE {staging} (LIKE {table} INCLUDING DEFAULTS) ON COMMIT DROP"
        ))
        .execute(&mut *tx)
        .await
        .map_err(Error::OperationFailed)?;

        let mut copy = tx
            .copy_in_raw(&format!(
                "COPY {staging} ({column_list}) FROM STDIN WITH (FORMAT csv)"
            ))
            .await
            .map_err(Error::OperationFailed)?;
        copy.send(payload).await.map_err(Error::OperationFailed)?;
        let copied = copy.finish().await.map_err(Error::OperationFailed)?;

        let merged = sqlx::query(&format!(
            "INSERT INTO {table} ({column_list}) SELECT {column_list} FROM {staging} {}",
            conflict_clause(shape)
        ))
        .execute(&mut *tx)
        .await
        .map_err(Error::OperationFailed)?
        .rows_affected();

        tx.commit().await.map_err(Error::OperationFailed)?;

        debug!(table, copied, merged, "COPY batch merged.");
        Ok(merged)
    }
}

/// Fallback path: multi-row parameterized inserts, chunked at the shape's
/// batch size (capped by the bind limit), all inside one transaction.
#[derive(Debug, Clone)]
pub struct BatchInserter {
    pool: PgPool,
    sizes: BatchSizes,
}

impl BatchInserter {
    pub fn new(pool: PgPool, sizes: BatchSizes) -> Self {
        Self { pool, sizes }
    }
}

#[async_trait]
impl BulkInserter for BatchInserter {
    fn name(&self) -> &str {
        "batch"
    }

    async fn insert(&self, shape: RowShape, rows: &[PersistableRow]) -> Result<u64> {
        let chunk_size = rows_per_statement(shape, self.sizes.for_shape(shape));
        let mut tx = self.pool.begin().await.map_err(Error::OperationFailed)?;
        let mut written = 0;

        match shape {
            RowShape::BacktestResults => {
                let binds = rows
                    .iter()
                    .filter_map(PersistableRow::as_result)
                    .map(ResultBinds::try_from)
                    .collect::<Result<Vec<_>>>()?;
                for chunk in binds.chunks(chunk_size) {
                    let mut builder = insert_prefix(shape, &BacktestResultRow::COLUMNS);
                    builder.push_values(chunk, |mut b, row| {
                        b.push_bind(row.run_id)
                            .push_bind(row.symbol.clone())
                            .push_bind(row.strategy_name.clone())
                            .push_bind(row.initial_capital.clone())
                            .push_bind(row.final_equity.clone())
                            .push_bind(row.total_trades)
                            .push_bind(row.winning_trades)
                            .push_bind(row.net_pnl.clone())
                            .push_bind(row.win_rate_pct)
                            .push_bind(row.profit_factor)
                            .push_bind(row.avg_profit_per_trade.clone())
                            .push_bind(row.max_drawdown_pct)
                            .push_bind(row.sharpe_ratio)
                            .push_bind(row.sortino_ratio)
                            .push_bind(row.calmar_ratio)
                            .push_bind(row.error.clone());
                    });
                    builder.push(" ").push(conflict_clause(shape));
                    written += builder
                        .build()
                        .execute(&mut *tx)
                        .await
                        .map_err(Error::OperationFailed)?
                        .rows_affected();
                }
            }
            RowShape::Klines => {
                let binds = rows
                    .iter()
                    .filter_map(PersistableRow::as_kline)
                    .map(KlineBinds::try_from)
                    .collect::<Result<Vec<_>>>()?;
                for chunk in binds.chunks(chunk_size) {
                    let mut builder = insert_prefix(shape, &KlineRow::COLUMNS);
                    builder.push_values(chunk, |mut b, row| {
                        b.push_bind(row.symbol.clone())
                            .push_bind(row.interval.clone())
                            .push_bind(row.open_time)
                            .push_bind(row.open.clone())
                            .push_bind(row.high.clone())
                            .push_bind(row.low.clone())
                            .push_bind(row.close.clone())
                            .push_bind(row.volume.clone())
                            .push_bind(row.close_time);
                    });
                    builder.push(" ").push(conflict_clause(shape));
                    written += builder
                        .build()
                        .execute(&mut *tx)
                        .await
                        .map_err(Error::OperationFailed)?
                        .rows_affected();
                }
            }
        }

        tx.commit().await.map_err(Error::OperationFailed)?;
        Ok(written)
    }
}

/// Tries `fast` first and hands the same batch to `fallback` if it fails.
#[derive(Clone)]
pub struct FallbackInserter {
    fast: Arc<dyn BulkInserter>,
    fallback: Arc<dyn BulkInserter>,
}

impl FallbackInserter {
    pub fn new(fast: Arc<dyn BulkInserter>, fallback: Arc<dyn BulkInserter>) -> Self {
        Self { fast, fallback }
    }

    /// `CopyInserter` backed by `BatchInserter`, both on the same pool.
    pub fn postgres(pool: PgPool, sizes: BatchSizes) -> Self {
        Self::new(
            Arc::new(CopyInserter::new(pool.clone())),
            Arc::new(BatchInserter::new(pool, sizes)),
        )
    }
}

#[async_trait]
impl BulkInserter for FallbackInserter {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn insert(&self, shape: RowShape, rows: &[PersistableRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        match self.fast.insert(shape, rows).await {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!(
                    table = shape.table(),
                    rows = rows.len(),
                    fast = self.fast.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "Fast insert path failed; retrying batch on fallback path."
                );
                self.fallback.insert(shape, rows).await
            }
        }
    }
}

fn insert_prefix(shape: RowShape, columns: &[&str]) -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        shape.table(),
        columns.join(", ")
    ))
}

/// Results are upserted so a re-run of the same run id overwrites its rows;
/// klines are immutable once written.
pub fn conflict_clause(shape: RowShape) -> String {
    match shape {
        RowShape::BacktestResults => {
            let updates = BacktestResultRow::COLUMNS[3..]
                .iter()
                .map(|c| format!("{c} = EXCLUDED.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("ON CONFLICT (run_id, symbol, strategy_name) DO UPDATE SET {updates}")
        }
        RowShape::Klines => "ON CONFLICT (symbol, interval, open_time) DO NOTHING".to_string(),
    }
}

/// Encodes records as headerless CSV, the format `COPY ... WITH (FORMAT csv)` reads.
/// Empty fields are read back as NULL.
pub fn encode_csv<I, R>(records: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for record in records {
        writer.write_record(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::CopyEncoding(csv::Error::from(e.into_error())))
}

fn numeric(value: Option<Decimal>) -> Result<BigDecimal> {
    let value = value.unwrap_or_default();
    BigDecimal::from_str(&value.to_string()).map_err(|_| Error::InvalidNumber(value.to_string()))
}

fn finite(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or_default()
}

/// A result row with every nullable number resolved to its stored default.
struct ResultBinds {
    run_id: Uuid,
    symbol: String,
    strategy_name: String,
    initial_capital: BigDecimal,
    final_equity: BigDecimal,
    total_trades: i64,
    winning_trades: i64,
    net_pnl: BigDecimal,
    win_rate_pct: f64,
    profit_factor: f64,
    avg_profit_per_trade: BigDecimal,
    max_drawdown_pct: f64,
    sharpe_ratio: f64,
    sortino_ratio: f64,
    calmar_ratio: f64,
    error: Option<String>,
}

impl TryFrom<&BacktestResultRow> for ResultBinds {
    type Error = Error;

    fn try_from(row: &BacktestResultRow) -> Result<Self> {
        Ok(Self {
            run_id: row.run_id,
            symbol: row.symbol.0.clone(),
            strategy_name: row.strategy_name.clone(),
            initial_capital: numeric(Some(row.initial_capital))?,
            final_equity: numeric(row.final_equity)?,
            total_trades: row.total_trades.unwrap_or_default(),
            winning_trades: row.winning_trades.unwrap_or_default(),
            net_pnl: numeric(row.net_pnl)?,
            win_rate_pct: finite(row.win_rate_pct),
            profit_factor: finite(row.profit_factor),
            avg_profit_per_trade: numeric(row.avg_profit_per_trade)?,
            max_drawdown_pct: finite(row.max_drawdown_pct),
            sharpe_ratio: finite(row.sharpe_ratio),
            sortino_ratio: finite(row.sortino_ratio),
            calmar_ratio: finite(row.calmar_ratio),
            error: row.error.clone(),
        })
    }
}

struct KlineBinds {
    symbol: String,
    interval: String,
    open_time: i64,
    open: BigDecimal,
    high: BigDecimal,
    low: BigDecimal,
    close: BigDecimal,
    volume: BigDecimal,
    close_time: i64,
}

impl TryFrom<&KlineRow> for KlineBinds {
    type Error = Error;

    fn try_from(row: &KlineRow) -> Result<Self> {
        Ok(Self {
            symbol: row.symbol.0.clone(),
            interval: row.interval.clone(),
            open_time: row.open_time,
            open: numeric(row.open)?,
            high: numeric(row.high)?,
            low: numeric(row.low)?,
            close: numeric(row.close)?,
            volume: numeric(row.volume)?,
            close_time: row.close_time,
        })
    }
}
