// In crates/engine/src/orchestrator.rs

use futures::future;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// How one fanned-out task ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task panicked or was aborted.
    Failed,
    /// The task ran past the task timeout and was dropped; its permit went to
    /// the next key.
    TimedOut,
    /// The run was cancelled before a worker permit became available.
    NotStarted,
}

/// Runs `task` once per key with at most `max_parallel` tasks in flight.
///
/// Every key gets exactly one entry in the returned list, in input order.
/// Each task is given at most `task_timeout`, so a task that never finishes
/// cannot hold its permit forever. Cancelling stops new tasks from starting;
/// tasks already running are still awaited, within their timeout.
pub async fn run_bounded<K, T, F, Fut>(
    keys: Vec<K>,
    max_parallel: usize,
    task_timeout: Duration,
    cancel: &CancellationToken,
    task: F,
) -> Vec<(K, TaskOutcome<T>)>
where
    K: Display + Send + 'static,
    T: Send + 'static,
    F: Fn(&K) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut started = Vec::with_capacity(keys.len());
    let mut not_started = Vec::new();
    let mut keys = keys.into_iter();

    for key in keys.by_ref() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            warn!(key = %key, "Interrupted while waiting for a worker permit; not starting remaining tasks.");
            not_started.push(key);
            break;
        };

        let work = task(&key);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            tokio::time::timeout(task_timeout, work).await
        });
        started.push((key, handle));
    }
    not_started.extend(keys);

    let mut outcomes: Vec<(K, TaskOutcome<T>)> =
        future::join_all(started.into_iter().map(|(key, handle)| async move {
            match handle.await {
                Ok(Ok(value)) => (key, TaskOutcome::Completed(value)),
                Ok(Err(_)) => {
                    warn!(key = %key, timeout = ?task_timeout, "Task timed out; abandoning it.");
                    (key, TaskOutcome::TimedOut)
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Task failed; reporting defaults for it.");
                    (key, TaskOutcome::Failed)
                }
            }
        }))
        .await;
    outcomes.extend(not_started.into_iter().map(|key| (key, TaskOutcome::NotStarted)));
    outcomes
}
