//! Bounded concurrent task runner
//!
//! Runs one task per key with at most `concurrency` tasks in flight and waits
//! for all of them. Each task is spawned onto the runtime, so tasks run on
//! separate worker threads; CPU-bound or blocking steps inside a task go
//! through [`run_blocking`]. A failed or panicked task never cancels its
//! siblings; every key comes back with its own [`TaskOutcome`] so callers
//! decide how to treat failures.

use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::models::{Failure, RunPolicy};

/// Result of the task run for one key.
#[derive(Debug)]
pub struct TaskOutcome<K, T> {
    pub key: K,
    pub result: Result<T>,
}

impl<K, T> TaskOutcome<K, T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    /// A pool with at least one worker.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` for every key and return once all tasks have finished.
    ///
    /// Outcomes come back in completion order, not key order. A task that
    /// panics is reported as [`EtlError::Task`].
    pub async fn run<K, T, F, Fut>(&self, label: &str, keys: Vec<K>, task: F) -> Vec<TaskOutcome<K, T>>
    where
        K: Clone + Display + Send + 'static,
        T: Send + 'static,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = keys.len();
        let start = Instant::now();
        info!(label, total, concurrency = self.concurrency, "Dispatching tasks");

        let outcomes: Vec<TaskOutcome<K, T>> = stream::iter(keys)
            .map(|key| {
                let handle = tokio::spawn(task(key.clone()));
                async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(EtlError::Task(format!("{key}: {e}"))),
                    };
                    match &result {
                        Ok(_) => debug!(label, key = %key, "Task completed"),
                        Err(e) => warn!(label, key = %key, error = %e, "Task failed"),
                    }
                    TaskOutcome { key, result }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        info!(
            label,
            total,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "All tasks finished"
        );
        outcomes
    }
}

/// Run CPU-bound or blocking work (flattening, Parquet files) on the
/// blocking thread pool.
pub async fn run_blocking<T, F>(label: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EtlError::Task(format!("{label}: {e}")))?
}

/// Split outcomes into successes and recorded failures.
///
/// Under [`RunPolicy::Strict`] the first failed outcome is returned as the
/// error instead.
pub fn settle<K, T>(
    stage: &str,
    outcomes: Vec<TaskOutcome<K, T>>,
    policy: RunPolicy,
    failures: &mut Vec<Failure>,
) -> Result<Vec<(K, T)>>
where
    K: Display,
{
    let mut succeeded = Vec::with_capacity(outcomes.len());
    for TaskOutcome { key, result } in outcomes {
        match result {
            Ok(value) => succeeded.push((key, value)),
            Err(e) if policy == RunPolicy::Strict => return Err(e),
            Err(e) => failures.push(Failure::new(stage, key, e)),
        }
    }
    Ok(succeeded)
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_WORKERS)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_key_gets_an_outcome() {
        let pool = WorkerPool::new(3);
        let keys: Vec<i64> = (1..=10).collect();

        let mut outcomes = pool
            .run("square", keys, |k| async move { Ok::<_, EtlError>(k * k) })
            .await;
        outcomes.sort_by_key(|o| o.key);

        assert_eq!(outcomes.len(), 10);
        assert_eq!(*outcomes[3].result.as_ref().unwrap(), 16);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let pool = WorkerPool::new(2);

        let outcomes = pool
            .run("flaky", vec![1, 2, 3, 4], |k| async move {
                if k == 2 {
                    Err(EtlError::fetch("http://example.org/2", "boom"))
                } else {
                    Ok(k)
                }
            })
            .await;

        assert_eq!(outcomes.len(), 4);
        let failed: Vec<_> = outcomes.iter().filter(|o| !o.is_ok()).map(|o| o.key).collect();
        assert_eq!(failed, vec![2]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.run("bounded", (0..8).collect::<Vec<i32>>(), |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, EtlError>(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_settle_respects_policy() {
        let pool = WorkerPool::new(2);
        let task = |k: i32| async move {
            if k % 2 == 0 {
                Err(EtlError::Task(format!("even {k}")))
            } else {
                Ok(k)
            }
        };

        let mut failures = Vec::new();
        let outcomes = pool.run("settle", vec![1, 2, 3], task).await;
        let ok = settle("test", outcomes, RunPolicy::Lenient, &mut failures).unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "2");

        let outcomes = pool.run("settle", vec![1, 2, 3], task).await;
        let err = settle("test", outcomes, RunPolicy::Strict, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, EtlError::Task(_)));
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let pool = WorkerPool::new(2);

        let outcomes = pool
            .run("panics", vec![1, 2], |k| async move {
                if k == 1 {
                    panic!("task {k} gave up");
                }
                Ok::<_, EtlError>(k)
            })
            .await;

        assert_eq!(outcomes.len(), 2);
        let failed = outcomes.iter().find(|o| o.key == 1).unwrap();
        assert!(matches!(failed.result, Err(EtlError::Task(_))));
        assert!(outcomes.iter().find(|o| o.key == 2).unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_tasks_overlap() {
        let pool = WorkerPool::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.run("overlap", (0..4).collect::<Vec<i32>>(), |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Holds the worker thread; overlap needs tasks on separate threads.
                std::thread::sleep(Duration::from_millis(50));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, EtlError>(())
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let value = run_blocking("sum", || Ok::<_, EtlError>((1..=4).sum::<i32>())).await;
        assert_eq!(value.unwrap(), 10);

        let err = run_blocking::<(), _>("panics", || panic!("no")).await.unwrap_err();
        assert!(matches!(err, EtlError::Task(_)));
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(WorkerPool::new(0).concurrency(), 1);
    }
}
