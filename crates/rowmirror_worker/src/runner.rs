//! Driving a worker from a job source.

use crate::error::ApplyResult;
use crate::worker::{JobOutcome, ReplicationWorker};
use rowmirror_core::JobSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Counts of what a run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Jobs applied.
    pub applied: u64,
    /// Deliveries handed back for retry.
    pub retried: u64,
    /// Jobs dropped after a permanent failure.
    pub failed: u64,
    /// Steps of the async loop that failed on the job source.
    pub source_errors: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Applied(_) => self.applied += 1,
            JobOutcome::Retry { .. } => self.retried += 1,
            JobOutcome::PermanentFailure { .. } => self.failed += 1,
        }
    }

    fn merge(&mut self, other: RunSummary) {
        self.applied += other.applied;
        self.retried += other.retried;
        self.failed += other.failed;
        self.source_errors += other.source_errors;
    }
}

/// Pulls deliveries from a job source and settles them.
///
/// Applied and permanently failed jobs are removed from the source;
/// retryable failures are handed back with the worker's backoff delay.
#[derive(Clone)]
pub struct WorkerRunner {
    worker: Arc<ReplicationWorker>,
    source: Arc<dyn JobSource>,
}

impl WorkerRunner {
    /// Creates a runner.
    pub fn new(worker: Arc<ReplicationWorker>, source: Arc<dyn JobSource>) -> Self {
        Self { worker, source }
    }

    /// Gets the worker.
    pub fn worker(&self) -> &Arc<ReplicationWorker> {
        &self.worker
    }

    /// Processes the next ready delivery, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the job source fails.
    pub fn run_once(&self) -> ApplyResult<Option<JobOutcome>> {
        let Some(delivery) = self.source.next_delivery()? else {
            return Ok(None);
        };
        let outcome = self.worker.process(&delivery);
        match &outcome {
            JobOutcome::Applied(_) => self.source.ack(delivery.id)?,
            JobOutcome::Retry { delay, .. } => self.source.retry_later(delivery, *delay)?,
            JobOutcome::PermanentFailure { .. } => self.source.discard(delivery.id)?,
        }
        Ok(Some(outcome))
    }

    /// Processes deliveries until the source holds nothing, sleeping the
    /// thread while only delayed retries remain.
    ///
    /// # Errors
    ///
    /// Returns an error if the job source fails.
    pub fn run_until_idle(&self) -> ApplyResult<RunSummary> {
        let mut summary = RunSummary::default();
        loop {
            if let Some(outcome) = self.run_once()? {
                summary.record(&outcome);
                continue;
            }
            match self.source.next_ready_in() {
                Some(wait) => std::thread::sleep(wait),
                None => break,
            }
        }
        tracing::debug!(
            applied = summary.applied,
            retried = summary.retried,
            failed = summary.failed,
            "job source drained"
        );
        Ok(summary)
    }

    /// Processes deliveries until `shutdown` turns true.
    ///
    /// Each step runs on the blocking pool, since applying a job does
    /// synchronous store work. A step that fails on the job source is
    /// logged and counted, and the loop backs off for one poll interval.
    /// When nothing is ready the loop sleeps until the next delayed retry
    /// is due, or for the configured poll interval, whichever is sooner.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let poll_interval = self.worker.config().poll_interval;
        let mut summary = RunSummary::default();

        loop {
            if *shutdown.borrow() {
                break;
            }
            let step = self.clone();
            let wait = match tokio::task::spawn_blocking(move || step.run_once()).await {
                Ok(Ok(Some(outcome))) => {
                    summary.record(&outcome);
                    continue;
                }
                Ok(Ok(None)) => self
                    .source
                    .next_ready_in()
                    .map_or(poll_interval, |due| due.min(poll_interval)),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "job source failed, backing off");
                    summary.source_errors += 1;
                    poll_interval
                }
                Err(e) => {
                    tracing::error!(error = %e, "worker step aborted, backing off");
                    summary.source_errors += 1;
                    poll_interval
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
            }
        }

        tracing::info!(
            applied = summary.applied,
            retried = summary.retried,
            failed = summary.failed,
            source_errors = summary.source_errors,
            "worker loop stopped"
        );
        summary
    }
}

/// Starts `size` runner loops sharing one worker and one job source.
///
/// Each loop stops when `shutdown` turns true; join the handles and merge
/// their summaries with [`merge_summaries`].
pub fn spawn_pool(
    runner: Arc<WorkerRunner>,
    size: usize,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<RunSummary>> {
    (0..size)
        .map(|index| {
            let runner = Arc::clone(&runner);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tracing::debug!(worker = index, "starting worker loop");
                runner.run(shutdown).await
            })
        })
        .collect()
}

/// Sums the summaries of a pool's loops.
pub fn merge_summaries(summaries: impl IntoIterator<Item = RunSummary>) -> RunSummary {
    summaries.into_iter().fold(RunSummary::default(), |mut total, s| {
        total.merge(s);
        total
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, WorkerConfig};
    use rowmirror_core::{Delivery, JobQueue, MemoryQueue, QueueError, QueueResult, Registry};
    use rowmirror_protocol::JobId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use rowmirror_model::{FieldKind, Identity, WatchedEntityType};
    use rowmirror_protocol::{ChangeEvent, Payload};
    use rowmirror_store::{MemoryStore, RecordStore};
    use serde_json::json;

    fn tag() -> WatchedEntityType {
        WatchedEntityType::new("local", "tag")
            .field("name", FieldKind::Text)
            .natural_key(["name"])
    }

    fn runner(retry: RetryConfig) -> (Arc<WorkerRunner>, Arc<MemoryQueue>, Arc<MemoryStore>) {
        let mut registry = Registry::new();
        registry.register_entity(tag()).unwrap();
        let target = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let worker = ReplicationWorker::new(
            Arc::new(registry),
            Arc::clone(&target) as Arc<dyn RecordStore>,
            WorkerConfig::new()
                .with_retry(retry)
                .with_poll_interval(Duration::from_millis(5)),
        )
        .unwrap();
        let runner = WorkerRunner::new(Arc::new(worker), Arc::clone(&queue) as Arc<dyn JobSource>);
        (Arc::new(runner), queue, target)
    }

    fn create(name: &str) -> ChangeEvent {
        let payload =
            Payload::from_json_str(&json!({"pk": [name], "name": name}).to_string()).unwrap();
        ChangeEvent::create(tag().key, payload)
    }

    /// Fails the first `failures` delivery requests.
    struct FlakySource {
        inner: Arc<MemoryQueue>,
        failures: AtomicU32,
    }

    impl JobSource for FlakySource {
        fn next_delivery(&self) -> QueueResult<Option<Delivery>> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(QueueError::Unavailable("broker restarting".into()));
            }
            self.inner.next_delivery()
        }

        fn ack(&self, id: JobId) -> QueueResult<()> {
            self.inner.ack(id)
        }

        fn retry_later(&self, delivery: Delivery, delay: Duration) -> QueueResult<()> {
            self.inner.retry_later(delivery, delay)
        }

        fn discard(&self, id: JobId) -> QueueResult<()> {
            self.inner.discard(id)
        }

        fn next_ready_in(&self) -> Option<Duration> {
            self.inner.next_ready_in()
        }
    }

    #[test]
    fn run_once_on_empty_source() {
        let (runner, _, _) = runner(RetryConfig::default());
        assert_eq!(runner.run_once().unwrap(), None);
    }

    #[test]
    fn run_until_idle_settles_every_job() {
        let (runner, queue, target) = runner(RetryConfig::immediate(3));
        queue.enqueue(create("a").to_job()).unwrap();
        queue.enqueue(create("a").to_job()).unwrap();
        queue.enqueue(create("b").to_job()).unwrap();

        let summary = runner.run_until_idle().unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.retried, 2);
        assert_eq!(summary.failed, 1);
        assert!(queue.is_empty());
        assert_eq!(target.len(&tag().key), 2);
    }

    #[test]
    fn retry_waits_for_backoff() {
        let retry = RetryConfig::new(2)
            .with_initial_delay(Duration::from_millis(20))
            .with_max_delay(Duration::from_millis(20));
        let (runner, queue, _) = runner(retry);
        let update = ChangeEvent::update(tag().key, Identity::natural(["later"]), Payload::new());
        queue.enqueue(update.to_job()).unwrap();

        let started = std::time::Instant::now();
        let summary = runner.run_until_idle().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(summary.retried, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn pool_drains_queue_and_stops() {
        let (runner, queue, target) = runner(RetryConfig::immediate(5));
        for name in ["a", "b", "c", "d", "e", "f"] {
            queue.enqueue(create(name).to_job()).unwrap();
        }

        let (stop, shutdown) = watch::channel(false);
        let handles = spawn_pool(Arc::clone(&runner), 3, shutdown);

        for _ in 0..200 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.send(true).unwrap();

        let mut summaries = Vec::new();
        for handle in handles {
            summaries.push(handle.await.unwrap());
        }
        assert_eq!(merge_summaries(summaries).applied, 6);
        assert_eq!(target.len(&tag().key), 6);
    }

    #[tokio::test]
    async fn source_errors_do_not_stop_the_loop() {
        let (runner, queue, target) = runner(RetryConfig::immediate(5));
        queue.enqueue(create("a").to_job()).unwrap();
        queue.enqueue(create("b").to_job()).unwrap();
        let flaky = WorkerRunner::new(
            Arc::clone(runner.worker()),
            Arc::new(FlakySource {
                inner: Arc::clone(&queue),
                failures: AtomicU32::new(3),
            }) as Arc<dyn JobSource>,
        );

        let (stop, shutdown) = watch::channel(false);
        let handle = tokio::spawn(async move { flaky.run(shutdown).await });

        for _ in 0..400 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stop.send(true).unwrap();

        let summary = handle.await.unwrap();
        assert_eq!(summary.source_errors, 3);
        assert_eq!(summary.applied, 2);
        assert_eq!(target.len(&tag().key), 2);
    }
}
