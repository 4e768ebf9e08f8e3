// In crates/engine/src/writer.rs

use crate::counter::InsertCounter;
use crate::queue::{PollOutcome, RowReceiver};
use core_types::Symbol;
use database::{BatchSizes, BulkInserter, PersistableRow, RowShape};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    pub batch_sizes: BatchSizes,
    /// A non-empty batch older than this is flushed even if it is not full.
    pub flush_timeout: Duration,
    pub poll_timeout: Duration,
}

/// Rows of one shape waiting to be flushed. Owned by a single writer.
#[derive(Debug)]
pub struct WriteBatch {
    shape: RowShape,
    threshold: usize,
    rows: Vec<PersistableRow>,
    last_flush: Instant,
}

impl WriteBatch {
    pub fn new(shape: RowShape, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            shape,
            threshold,
            rows: Vec::with_capacity(threshold),
            last_flush: Instant::now(),
        }
    }

    pub fn shape(&self) -> RowShape {
        self.shape
    }

    pub fn push(&mut self, row: PersistableRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rows.len() >= self.threshold
    }

    pub fn is_due(&self, now: Instant, flush_timeout: Duration) -> bool {
        !self.rows.is_empty() && now.duration_since(self.last_flush) >= flush_timeout
    }

    /// Empties the batch and restarts its flush clock.
    pub fn take(&mut self) -> Vec<PersistableRow> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.rows, Vec::with_capacity(self.threshold))
    }
}

/// Drains the row queue into the bulk sink.
pub struct BulkWriter {
    id: usize,
    inserter: Arc<dyn BulkInserter>,
    counter: Arc<InsertCounter>,
    config: WriterConfig,
}

impl BulkWriter {
    pub fn new(
        id: usize,
        inserter: Arc<dyn BulkInserter>,
        counter: Arc<InsertCounter>,
        config: WriterConfig,
    ) -> Self {
        Self {
            id,
            inserter,
            counter,
            config,
        }
    }

    /// Runs until every producer is gone and the queue is empty, or the run is
    /// cancelled. Whatever is still batched is flushed before returning.
    ///
    /// Returns the number of rows this writer got into the store. Never fails:
    /// a batch lost on every insert path is logged and counted as zero.
    pub async fn drain(&self, queue: RowReceiver) -> u64 {
        let mut batches: HashMap<RowShape, WriteBatch> = RowShape::ALL
            .iter()
            .map(|shape| {
                let threshold = self.config.batch_sizes.for_shape(*shape);
                (*shape, WriteBatch::new(*shape, threshold))
            })
            .collect();
        let mut inserted = 0;

        loop {
            match queue.poll(self.config.poll_timeout).await {
                PollOutcome::Row(row) => {
                    let shape = row.shape();
                    let batch = batches
                        .entry(shape)
                        .or_insert_with(|| WriteBatch::new(shape, self.config.batch_sizes.for_shape(shape)));
                    batch.push(row);
                    if batch.is_full() {
                        inserted += self.flush(batch).await;
                    }
                }
                PollOutcome::Empty => {}
                PollOutcome::Drained => {
                    debug!(writer = self.id, "Queue drained.");
                    break;
                }
                PollOutcome::Interrupted => {
                    info!(writer = self.id, "Writer interrupted; flushing what is batched.");
                    break;
                }
            }

            let now = Instant::now();
            for batch in batches.values_mut() {
                if batch.is_due(now, self.config.flush_timeout) {
                    inserted += self.flush(batch).await;
                }
            }
        }

        for batch in batches.values_mut() {
            if !batch.is_empty() {
                inserted += self.flush(batch).await;
            }
        }

        debug!(writer = self.id, inserted, "Writer finished.");
        inserted
    }

    async fn flush(&self, batch: &mut WriteBatch) -> u64 {
        let shape = batch.shape();
        let rows = batch.take();
        if rows.is_empty() {
            return 0;
        }

        match self.inserter.insert(shape, &rows).await {
            Ok(written) => {
                let mut per_key: HashMap<&Symbol, u64> = HashMap::new();
                for row in &rows {
                    *per_key.entry(row.key()).or_default() += 1;
                }
                for (key, count) in per_key {
                    self.counter.record(key, count);
                }
                self.counter.add_total(written);
                debug!(
                    writer = self.id,
                    table = shape.table(),
                    rows = rows.len(),
                    written,
                    "Flushed batch."
                );
                written
            }
            Err(e) => {
                error!(
                    writer = self.id,
                    table = shape.table(),
                    rows = rows.len(),
                    error = %e,
                    "Batch failed on every insert path; counting it as not inserted."
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{OfferPolicy, row_queue};
    use async_trait::async_trait;
    use database::KlineRow;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recording {
        flushes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BulkInserter for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn insert(&self, _shape: RowShape, rows: &[PersistableRow]) -> database::Result<u64> {
            self.flushes.lock().unwrap().push(rows.len());
            Ok(rows.len() as u64)
        }
    }

    struct Broken;

    #[async_trait]
    impl BulkInserter for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn insert(&self, _shape: RowShape, _rows: &[PersistableRow]) -> database::Result<u64> {
            Err(database::Error::InvalidNumber("NaN".into()))
        }
    }

    fn kline(symbol: &str, open_time: i64) -> PersistableRow {
        PersistableRow::Kline(KlineRow {
            symbol: Symbol::from(symbol),
            interval: "1m".into(),
            open_time,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            close_time: open_time,
        })
    }

    fn config(klines: usize, flush_timeout: Duration) -> WriterConfig {
        WriterConfig {
            batch_sizes: BatchSizes { results: 2_000, klines },
            flush_timeout,
            poll_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn batch_is_due_only_when_non_empty_and_stale() {
        let mut batch = WriteBatch::new(RowShape::Klines, 10);
        let later = Instant::now() + Duration::from_secs(5);
        assert!(!batch.is_due(later, Duration::from_secs(1)));

        batch.push(kline("A", 0));
        assert!(batch.is_due(later, Duration::from_secs(1)));
        assert!(!batch.is_full());
        assert_eq!(batch.take().len(), 1);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn partial_batch_is_flushed_after_timeout() {
        let sink = Arc::new(Recording::default());
        let counter = Arc::new(InsertCounter::new(1_000));
        let (tx, rx) = row_queue(16, OfferPolicy { timeout: Duration::from_secs(1), retries: 0 }, CancellationToken::new());
        let writer = BulkWriter::new(0, sink.clone(), counter.clone(), config(100, Duration::from_millis(30)));
        let handle = tokio::spawn(async move { writer.drain(rx).await });

        tx.offer(kline("A", 0)).await;
        tx.offer(kline("A", 1)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*sink.flushes.lock().unwrap(), vec![2]);

        drop(tx);
        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(counter.get(&Symbol::from("A")), 2);
    }

    #[tokio::test]
    async fn failed_batch_counts_zero_and_writer_keeps_going() {
        let counter = Arc::new(InsertCounter::new(1_000));
        let (tx, rx) = row_queue(16, OfferPolicy { timeout: Duration::from_secs(1), retries: 0 }, CancellationToken::new());
        let writer = BulkWriter::new(0, Arc::new(Broken), counter.clone(), config(2, Duration::from_secs(60)));
        let handle = tokio::spawn(async move { writer.drain(rx).await });

        for i in 0..5 {
            tx.offer(kline("A", i)).await;
        }
        drop(tx);

        assert_eq!(handle.await.unwrap(), 0);
        assert_eq!(counter.total(), 0);
        assert_eq!(counter.get(&Symbol::from("A")), 0);
    }

    #[tokio::test]
    async fn interrupted_writer_flushes_remainder() {
        let sink = Arc::new(Recording::default());
        let cancel = CancellationToken::new();
        let (tx, rx) = row_queue(16, OfferPolicy { timeout: Duration::from_secs(1), retries: 0 }, cancel.clone());
        let writer = BulkWriter::new(0, sink.clone(), Arc::new(InsertCounter::new(10)), config(100, Duration::from_secs(60)));

        tx.offer(kline("A", 0)).await;
        tx.offer(kline("B", 1)).await;
        let handle = tokio::spawn(async move { writer.drain(rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(*sink.flushes.lock().unwrap(), vec![2]);
    }
}
