// In crates/engine/src/queue.rs

use database::PersistableRow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, mpsc::error::SendTimeoutError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// What a producer does when the queue stays full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferPolicy {
    /// How long one offer attempt may wait for a free slot.
    pub timeout: Duration,
    /// Attempts after the first timeout. With 0 the row is dropped on the first timeout.
    pub retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Enqueued,
    /// Every attempt timed out; the row was discarded.
    Dropped,
    /// All receivers are gone.
    Closed,
    /// The run was cancelled while waiting.
    Interrupted,
}

#[derive(Debug)]
pub enum PollOutcome {
    Row(PersistableRow),
    /// Nothing arrived within the poll timeout.
    Empty,
    /// Every sender has been dropped and the queue is empty.
    Drained,
    Interrupted,
}

/// Creates the bounded row queue shared by workers and writers.
pub fn row_queue(
    capacity: usize,
    policy: OfferPolicy,
    cancel: CancellationToken,
) -> (RowSender, RowReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let sender = RowSender {
        tx,
        policy,
        dropped: dropped.clone(),
        cancel: cancel.clone(),
    };
    let receiver = RowReceiver {
        rx: Arc::new(Mutex::new(rx)),
        dropped,
        cancel,
    };
    (sender, receiver)
}

/// Producer half. Cheap to clone; the queue counts as finished once every
/// clone has been dropped.
#[derive(Debug, Clone)]
pub struct RowSender {
    tx: mpsc::Sender<PersistableRow>,
    policy: OfferPolicy,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl RowSender {
    /// Offers a row, waiting at most `policy.timeout` per attempt.
    pub async fn offer(&self, row: PersistableRow) -> OfferOutcome {
        let mut row = row;
        let mut attempt = 0;
        loop {
            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return OfferOutcome::Interrupted,
                sent = self.tx.send_timeout(row, self.policy.timeout) => sent,
            };

            match sent {
                Ok(()) => return OfferOutcome::Enqueued,
                Err(SendTimeoutError::Closed(_)) => return OfferOutcome::Closed,
                Err(SendTimeoutError::Timeout(returned)) => {
                    if attempt >= self.policy.retries {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            key = %returned.key(),
                            table = returned.shape().table(),
                            attempts = attempt + 1,
                            "Result queue stayed full; dropping row."
                        );
                        return OfferOutcome::Dropped;
                    }
                    attempt += 1;
                    warn!(
                        key = %returned.key(),
                        attempt,
                        retries = self.policy.retries,
                        "Result queue offer timed out; retrying."
                    );
                    row = returned;
                }
            }
        }
    }
}

/// Consumer half, shareable between writers.
#[derive(Debug, Clone)]
pub struct RowReceiver {
    rx: Arc<Mutex<mpsc::Receiver<PersistableRow>>>,
    dropped: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl RowReceiver {
    /// Waits up to `timeout` for the next row. Waiting for another writer to
    /// release the queue counts against the same timeout.
    pub async fn poll(&self, timeout: Duration) -> PollOutcome {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => PollOutcome::Interrupted,
            outcome = tokio::time::timeout(timeout, async {
                let mut rx = self.rx.lock().await;
                rx.recv().await
            }) => match outcome {
                Ok(Some(row)) => PollOutcome::Row(row),
                Ok(None) => PollOutcome::Drained,
                Err(_) => PollOutcome::Empty,
            },
        }
    }

    /// Rows producers gave up on after exhausting their offer attempts.
    pub fn dropped_rows(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
