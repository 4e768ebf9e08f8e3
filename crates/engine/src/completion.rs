// In crates/engine/src/completion.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A countdown barrier: each writer counts down once when it stops, and the
/// driver waits for zero with a bounded timeout.
#[derive(Debug, Clone)]
pub struct CompletionLatch {
    remaining: Arc<watch::Sender<usize>>,
}

impl CompletionLatch {
    pub fn new(count: usize) -> Self {
        let (remaining, _) = watch::channel(count);
        Self {
            remaining: Arc::new(remaining),
        }
    }

    pub fn count_down(&self) {
        self.remaining.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// A guard that counts down when dropped, so a writer that panics still
    /// releases the latch.
    pub fn guard(&self) -> CountDownOnDrop {
        CountDownOnDrop {
            latch: self.clone(),
        }
    }

    /// Waits until the count reaches zero.
    ///
    /// Returns `false` if `timeout` elapses first or `cancel` fires; the token
    /// is left cancelled.
    pub async fn await_completion(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let mut rx = self.remaining.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(remaining = self.remaining(), "Interrupted while waiting for writers to finish.");
                false
            }
            done = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)) => match done {
                Ok(Ok(_)) => true,
                Ok(Err(_)) => false,
                Err(_) => {
                    warn!(
                        remaining = self.remaining(),
                        ?timeout,
                        "Timed out waiting for writers to finish; reporting partial counts."
                    );
                    false
                }
            },
        }
    }
}

#[derive(Debug)]
pub struct CountDownOnDrop {
    latch: CompletionLatch,
}

impl Drop for CountDownOnDrop {
    fn drop(&mut self) {
        self.latch.count_down();
    }
}
