//! Job queue boundary and an in-memory queue.

use crate::error::{QueueError, QueueResult};
use parking_lot::Mutex;
use rowmirror_protocol::{Job, JobId};
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

/// Producer side of a durable job queue.
pub trait JobQueue: Send + Sync {
    /// Accepts a job for later delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot accept the job.
    fn enqueue(&self, job: Job) -> QueueResult<JobId>;
}

/// One hand-off of a queued job to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The job's queue id.
    pub id: JobId,
    /// The job.
    pub job: Job,
    /// 1-based delivery attempt.
    pub attempt: u32,
}

/// Consumer side of a job queue.
///
/// A delivered job stays in flight until the consumer acks it, discards
/// it, or hands it back with [`JobSource::retry_later`].
pub trait JobSource: Send + Sync {
    /// Takes the next ready job, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read.
    fn next_delivery(&self) -> QueueResult<Option<Delivery>>;

    /// Marks an in-flight job as done.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownJob`] if the job is not in flight.
    fn ack(&self, id: JobId) -> QueueResult<()>;

    /// Returns an in-flight job to the queue after `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownJob`] if the job is not in flight.
    fn retry_later(&self, delivery: Delivery, delay: Duration) -> QueueResult<()>;

    /// Drops an in-flight job for good.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownJob`] if the job is not in flight.
    fn discard(&self, id: JobId) -> QueueResult<()>;

    /// How long until a job becomes ready.
    ///
    /// `Some(Duration::ZERO)` if one is ready now, `None` if nothing is
    /// waiting at all.
    fn next_ready_in(&self) -> Option<Duration>;
}

#[derive(Debug, Clone)]
struct Entry {
    id: JobId,
    job: Job,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Entry>,
    delayed: Vec<(Instant, Entry)>,
    in_flight: HashMap<JobId, Entry>,
    accepted: u64,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(due, _)| *due);
        let split = self.delayed.partition_point(|(due, _)| *due <= now);
        for (_, entry) in self.delayed.drain(..split) {
            self.ready.push_back(entry);
        }
    }
}

/// An in-memory FIFO queue implementing both [`JobQueue`] and
/// [`JobSource`].
///
/// Retried jobs rejoin the back of the queue once their delay expires.
/// Pending jobs can be exported to and imported from JSON lines, one wire
/// array per line.
///
/// # Example
///
/// ```rust
/// use rowmirror_core::{JobQueue, JobSource, MemoryQueue};
/// use rowmirror_model::EntityKey;
/// use rowmirror_protocol::{ChangeEvent, Payload};
///
/// let queue = MemoryQueue::new();
/// let job = ChangeEvent::create(EntityKey::new("local", "tag"), Payload::new()).to_job();
/// let id = queue.enqueue(job).unwrap();
///
/// let delivery = queue.next_delivery().unwrap().unwrap();
/// assert_eq!(delivery.id, id);
/// assert_eq!(delivery.attempt, 1);
/// queue.ack(id).unwrap();
/// assert!(queue.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    unavailable: Mutex<bool>,
}

impl MemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `enqueue` fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    /// Number of jobs waiting (ready or delayed).
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.ready.len() + state.delayed.len()
    }

    /// Returns true if nothing is waiting or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.ready.is_empty() && state.delayed.is_empty() && state.in_flight.is_empty()
    }

    /// Number of jobs delivered but not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Total number of jobs ever accepted.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.state.lock().accepted
    }

    /// Returns the waiting jobs in delivery order.
    #[must_use]
    pub fn pending_jobs(&self) -> Vec<Job> {
        let state = self.state.lock();
        let mut delayed: Vec<&(Instant, Entry)> = state.delayed.iter().collect();
        delayed.sort_by_key(|(due, _)| *due);
        state
            .ready
            .iter()
            .chain(delayed.into_iter().map(|(_, e)| e))
            .map(|e| e.job.clone())
            .collect()
    }

    /// Removes and returns every waiting job in delivery order.
    pub fn drain_jobs(&self) -> Vec<Job> {
        let jobs = self.pending_jobs();
        let mut state = self.state.lock();
        state.ready.clear();
        state.delayed.clear();
        jobs
    }

    /// Writes the waiting jobs as JSON lines and returns how many.
    ///
    /// # Errors
    ///
    /// Returns an error if a job cannot be encoded or written.
    pub fn export_jsonl<W: Write>(&self, mut writer: W) -> QueueResult<usize> {
        let jobs = self.pending_jobs();
        for job in &jobs {
            writeln!(writer, "{}", job.to_wire()?)?;
        }
        writer.flush()?;
        Ok(jobs.len())
    }

    /// Enqueues every job read from JSON lines and returns how many.
    ///
    /// Blank lines are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on the first unreadable or malformed line.
    pub fn import_jsonl<R: BufRead>(&self, reader: R) -> QueueResult<usize> {
        let mut count = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            self.enqueue(Job::from_wire(&line)?)?;
            count += 1;
        }
        Ok(count)
    }
}

impl JobQueue for MemoryQueue {
    fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        if *self.unavailable.lock() {
            return Err(QueueError::Unavailable("queue marked unavailable".into()));
        }
        let id = JobId::new();
        let mut state = self.state.lock();
        state.ready.push_back(Entry {
            id,
            job,
            deliveries: 0,
        });
        state.accepted += 1;
        Ok(id)
    }
}

impl JobSource for MemoryQueue {
    fn next_delivery(&self) -> QueueResult<Option<Delivery>> {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        let Some(mut entry) = state.ready.pop_front() else {
            return Ok(None);
        };
        entry.deliveries += 1;
        let delivery = Delivery {
            id: entry.id,
            job: entry.job.clone(),
            attempt: entry.deliveries,
        };
        state.in_flight.insert(entry.id, entry);
        Ok(Some(delivery))
    }

    fn ack(&self, id: JobId) -> QueueResult<()> {
        self.state
            .lock()
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or(QueueError::UnknownJob(id))
    }

    fn retry_later(&self, delivery: Delivery, delay: Duration) -> QueueResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .in_flight
            .remove(&delivery.id)
            .ok_or(QueueError::UnknownJob(delivery.id))?;
        if delay.is_zero() {
            state.ready.push_back(entry);
        } else {
            state.delayed.push((Instant::now() + delay, entry));
        }
        Ok(())
    }

    fn discard(&self, id: JobId) -> QueueResult<()> {
        self.ack(id)
    }

    fn next_ready_in(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !state.ready.is_empty() {
            return Some(Duration::ZERO);
        }
        let now = Instant::now();
        state
            .delayed
            .iter()
            .map(|(due, _)| due.saturating_duration_since(now))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmirror_model::EntityKey;
    use rowmirror_protocol::{ChangeEvent, Payload};

    fn job(name: &str) -> Job {
        ChangeEvent::create(EntityKey::new("local", name), Payload::new()).to_job()
    }

    #[test]
    fn fifo_delivery() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("a")).unwrap();
        queue.enqueue(job("b")).unwrap();

        let first = queue.next_delivery().unwrap().unwrap();
        let second = queue.next_delivery().unwrap().unwrap();
        assert_eq!(first.job.entity.name, "a");
        assert_eq!(second.job.entity.name, "b");
        assert!(queue.next_delivery().unwrap().is_none());
        assert_eq!(queue.in_flight(), 2);
    }

    #[test]
    fn retry_increments_attempt() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("a")).unwrap();

        let first = queue.next_delivery().unwrap().unwrap();
        queue.retry_later(first, Duration::ZERO).unwrap();
        let second = queue.next_delivery().unwrap().unwrap();
        assert_eq!(second.attempt, 2);

        queue.ack(second.id).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.accepted(), 1);
    }

    #[test]
    fn delayed_retry_waits() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("a")).unwrap();
        let delivery = queue.next_delivery().unwrap().unwrap();
        queue
            .retry_later(delivery, Duration::from_secs(3600))
            .unwrap();

        assert!(queue.next_delivery().unwrap().is_none());
        let wait = queue.next_ready_in().unwrap();
        assert!(wait > Duration::from_secs(3500));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn settling_unknown_job_fails() {
        let queue = MemoryQueue::new();
        assert!(matches!(
            queue.ack(JobId::new()),
            Err(QueueError::UnknownJob(_))
        ));

        queue.enqueue(job("a")).unwrap();
        let delivery = queue.next_delivery().unwrap().unwrap();
        queue.discard(delivery.id).unwrap();
        assert!(queue.retry_later(delivery, Duration::ZERO).is_err());
        assert_eq!(queue.next_ready_in(), None);
    }

    #[test]
    fn unavailable_queue_rejects() {
        let queue = MemoryQueue::new();
        queue.set_unavailable(true);
        assert!(queue.enqueue(job("a")).unwrap_err().is_retryable());
        queue.set_unavailable(false);
        assert!(queue.enqueue(job("a")).is_ok());
    }

    #[test]
    fn jsonl_export_import() {
        let queue = MemoryQueue::new();
        queue.enqueue(job("a")).unwrap();
        queue.enqueue(job("b")).unwrap();

        let mut buf = Vec::new();
        assert_eq!(queue.export_jsonl(&mut buf).unwrap(), 2);
        let text = String::from_utf8(buf.clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with(r#"["create","local","a",null,"{}"]"#));

        let copy = MemoryQueue::new();
        assert_eq!(copy.import_jsonl(&buf[..]).unwrap(), 2);
        assert_eq!(copy.pending_jobs(), queue.pending_jobs());

        assert_eq!(queue.drain_jobs().len(), 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn import_rejects_malformed_line() {
        let queue = MemoryQueue::new();
        let input = "\n[\"create\",\"local\",\"a\",null,\"{}\"]\nnot json\n";
        assert!(matches!(
            queue.import_jsonl(input.as_bytes()),
            Err(QueueError::Protocol(_))
        ));
        assert_eq!(queue.len(), 1);
    }
}
