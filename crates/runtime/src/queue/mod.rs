//! Durable Queue Client (spec §4.1).
//!
//! At-least-once delivery with lease-based reservation, idempotent enqueue
//! keyed by caller-supplied jobId, exponential backoff, and a stalled-
//! reservation scan. The in-memory implementation here is the orchestrator's
//! own default (mirrors the teacher's `SqliteJobStore` shape but keeps state
//! in a `DashMap` since the durable backend itself is an external
//! collaborator, §1 non-goals).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::types::{DeepResearchJobData, Job, JobId, JobState, Lease, QueueError, QueueName};

/// Enqueue options.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_attempts: Option<u32>,
}

#[async_trait]
pub trait DurableQueueClient: Send + Sync {
    /// Idempotent: if a job with `job_id` is in a non-terminal state, this
    /// is a no-op that returns success (§4.1).
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: JobId,
        payload: DeepResearchJobData,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError>;

    async fn reserve(
        &self,
        queue: QueueName,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError>;

    async fn renew_lease(&self, job_id: JobId, extension: Duration) -> Result<(), QueueError>;

    async fn ack(&self, job_id: JobId) -> Result<(), QueueError>;

    async fn fail(&self, job_id: JobId, retryable: bool) -> Result<(), QueueError>;

    async fn get_state(&self, job_id: JobId) -> Result<JobState, QueueError>;

    /// Surface jobs whose worker died mid-lease. Run on a cadence of at
    /// least lease/3 (§4.1).
    async fn scan_stalled(&self, queue: QueueName) -> Result<Vec<JobId>, QueueError>;
}

/// A lease handle a worker uses to prove ownership of a reserved job while
/// running its iteration. Debug builds assert the lease hasn't expired
/// before any state mutation — enforcing the §5 invariant that the lease is
/// the single source of truth for who is running the iteration.
pub struct LeaseGuard {
    pub job_id: JobId,
    pub owner: Uuid,
    deadline: Arc<parking_lot::RwLock<DateTime<Utc>>>,
}

impl LeaseGuard {
    fn new(job_id: JobId, owner: Uuid, deadline: DateTime<Utc>) -> Self {
        Self {
            job_id,
            owner,
            deadline: Arc::new(parking_lot::RwLock::new(deadline)),
        }
    }

    fn set_deadline(&self, deadline: DateTime<Utc>) {
        *self.deadline.write() = deadline;
    }

    /// Panics in debug builds if the lease has already expired. No-op in
    /// release builds: the queue's reserve/ack trio is the real enforcement,
    /// this is a defensive check for the invariant in spec.md §5.
    pub fn assert_live(&self) {
        debug_assert!(
            Utc::now() < *self.deadline.read(),
            "lease for job {} expired while executor still held it",
            self.job_id
        );
    }
}

/// `Duration` values in this module are bounded by queue policy (minutes to
/// low hours), well inside chrono's range.
fn add_std(base: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    base + chrono::Duration::from_std(d).expect("lease/backoff duration fits in chrono's range")
}

struct QueuedEntry {
    job: Job,
}

/// In-memory durable queue. One instance serves all four queues (§2); each
/// queue name partitions its own attempt/backoff policy (§4.1).
pub struct InMemoryQueue {
    entries: DashMap<JobId, QueuedEntry>,
    pending: DashMap<QueueName, parking_lot::Mutex<Vec<JobId>>>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let pending = DashMap::new();
        for q in [
            QueueName::DeepResearch,
            QueueName::Chat,
            QueueName::FileIngest,
            QueueName::Paper,
        ] {
            pending.insert(q, parking_lot::Mutex::new(Vec::new()));
        }
        Self {
            entries: DashMap::new(),
            pending,
        }
    }

    fn ready_for_retry(now: DateTime<Utc>, job: &Job) -> bool {
        match job.lease {
            None => true,
            Some(lease) => lease.is_expired(now),
        }
    }
}

#[async_trait]
impl DurableQueueClient for InMemoryQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: JobId,
        payload: DeepResearchJobData,
        opts: EnqueueOptions,
    ) -> Result<(), QueueError> {
        if let Some(entry) = self.entries.get(&job_id) {
            if !entry.job.is_terminal() {
                tracing::info!(job_id = %job_id, "enqueue: idempotent no-op, job already in flight");
                return Ok(());
            }
        }

        let max_attempts = opts.max_attempts.unwrap_or(queue.policy().max_attempts);
        let job = Job::new(job_id, queue, payload, max_attempts);
        self.entries.insert(job_id, QueuedEntry { job });
        self.pending
            .get(&queue)
            .expect("all queue names registered at construction")
            .lock()
            .push(job_id);
        tracing::info!(job_id = %job_id, queue = ?queue, "enqueued job");
        Ok(())
    }

    async fn reserve(
        &self,
        queue: QueueName,
        lease_duration: Duration,
    ) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let pending = self
            .pending
            .get(&queue)
            .expect("all queue names registered at construction");
        let mut guard = pending.lock();

        let mut idx = None;
        for (i, job_id) in guard.iter().enumerate() {
            if let Some(entry) = self.entries.get(job_id) {
                if matches!(entry.job.state, JobState::Pending | JobState::FailedRetrying)
                    && Self::ready_for_retry(now, &entry.job)
                {
                    idx = Some(i);
                    break;
                }
            }
        }

        let Some(i) = idx else {
            return Ok(None);
        };
        let job_id = guard.remove(i);
        drop(guard);

        let mut entry = self
            .entries
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        entry.job.state = JobState::Reserved;
        entry.job.attempts += 1;
        entry.job.lease = Some(Lease {
            owner: Uuid::new_v4(),
            deadline: add_std(now, lease_duration),
        });
        tracing::info!(job_id = %job_id, attempt = entry.job.attempts, "reserved job");
        Ok(Some(entry.job.clone()))
    }

    async fn renew_lease(&self, job_id: JobId, extension: Duration) -> Result<(), QueueError> {
        let mut entry = self
            .entries
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        let lease = entry
            .job
            .lease
            .as_mut()
            .ok_or(QueueError::LeaseExpired(job_id))?;
        lease.deadline = add_std(Utc::now(), extension);
        Ok(())
    }

    async fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut entry = self
            .entries
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        // Idempotent: acking an already-completed job is a no-op (§4.1).
        entry.job.state = JobState::Completed;
        entry.job.lease = None;
        tracing::info!(job_id = %job_id, "job acked");
        Ok(())
    }

    async fn fail(&self, job_id: JobId, retryable: bool) -> Result<(), QueueError> {
        let mut entry = self
            .entries
            .get_mut(&job_id)
            .ok_or(QueueError::NotFound(job_id))?;
        entry.job.lease = None;

        if !retryable || entry.job.attempts >= entry.job.max_attempts {
            entry.job.state = JobState::FailedFinal;
            tracing::warn!(job_id = %job_id, attempts = entry.job.attempts, "job failed final");
            return Ok(());
        }

        entry.job.state = JobState::FailedRetrying;
        let queue = entry.job.queue;
        let attempt = entry.job.attempts;
        drop(entry);

        let backoff = queue.policy().base_backoff * (1u32 << attempt.min(8));
        tracing::warn!(job_id = %job_id, attempt, backoff = ?backoff, "job failed, will retry");

        self.pending
            .get(&queue)
            .expect("all queue names registered at construction")
            .lock()
            .push(job_id);
        Ok(())
    }

    async fn get_state(&self, job_id: JobId) -> Result<JobState, QueueError> {
        self.entries
            .get(&job_id)
            .map(|e| e.job.state)
            .ok_or(QueueError::NotFound(job_id))
    }

    async fn scan_stalled(&self, queue: QueueName) -> Result<Vec<JobId>, QueueError> {
        let now = Utc::now();
        let mut stalled = Vec::new();
        for entry in self.entries.iter() {
            if entry.job.queue != queue {
                continue;
            }
            if entry.job.state == JobState::Reserved {
                if let Some(lease) = entry.job.lease {
                    if lease.is_expired(now) {
                        stalled.push(*entry.key());
                    }
                }
            }
        }
        if !stalled.is_empty() {
            tracing::warn!(queue = ?queue, count = stalled.len(), "stalled reservations found");
            let pending = self
                .pending
                .get(&queue)
                .expect("all queue names registered at construction");
            let mut guard = pending.lock();
            for job_id in &stalled {
                if let Some(mut entry) = self.entries.get_mut(job_id) {
                    entry.job.state = JobState::FailedRetrying;
                    entry.job.lease = None;
                }
                guard.push(*job_id);
            }
        }
        Ok(stalled)
    }
}

/// Build a `LeaseGuard` for a reserved job, for callers (the executor) that
/// need to assert liveness mid-iteration.
pub fn lease_guard_for(job: &Job) -> Option<LeaseGuard> {
    job.lease
        .map(|lease| LeaseGuard::new(job.id, lease.owner, lease.deadline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationId, ConversationStateId, IterationStateId, MessageId, ResearchMode, UserId};

    fn test_payload() -> DeepResearchJobData {
        DeepResearchJobData {
            user_id: UserId::new(),
            conversation_id: ConversationId::new(),
            message_id: MessageId::new(),
            state_id: IterationStateId::new(),
            conversation_state_id: ConversationStateId::new(),
            requested_at: Utc::now(),
            research_mode: ResearchMode::SemiAutonomous,
            iteration_number: 1,
            root_job_id: JobId::new(),
            is_initial_iteration: true,
            message: "what causes tides?".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_while_non_terminal() {
        let queue = InMemoryQueue::new();
        let job_id = JobId::new();
        let payload = test_payload();

        queue
            .enqueue(QueueName::DeepResearch, job_id, payload.clone(), EnqueueOptions::default())
            .await
            .unwrap();
        queue
            .enqueue(QueueName::DeepResearch, job_id, payload, EnqueueOptions::default())
            .await
            .unwrap();

        // Only one job should be reservable.
        let first = queue
            .reserve(QueueName::DeepResearch, Duration::from_secs(1800))
            .await
            .unwrap();
        assert!(first.is_some());
        let second = queue
            .reserve(QueueName::DeepResearch, Duration::from_secs(1800))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_reservable_again() {
        let queue = InMemoryQueue::new();
        let job_id = JobId::new();
        queue
            .enqueue(QueueName::DeepResearch, job_id, test_payload(), EnqueueOptions::default())
            .await
            .unwrap();

        let reserved = queue
            .reserve(QueueName::DeepResearch, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reserved.attempts, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let stalled = queue.scan_stalled(QueueName::DeepResearch).await.unwrap();
        assert_eq!(stalled, vec![job_id]);

        let redelivered = queue
            .reserve(QueueName::DeepResearch, Duration::from_secs(1800))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.id, job_id);
        assert_eq!(redelivered.attempts, 2);
    }

    #[tokio::test]
    async fn fail_final_after_max_attempts() {
        let queue = InMemoryQueue::new();
        let job_id = JobId::new();
        // paper queue: max_attempts = 1
        queue
            .enqueue(QueueName::Paper, job_id, test_payload(), EnqueueOptions::default())
            .await
            .unwrap();
        queue
            .reserve(QueueName::Paper, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();

        queue.fail(job_id, true).await.unwrap();
        assert_eq!(queue.get_state(job_id).await.unwrap(), JobState::FailedFinal);
    }

    #[tokio::test]
    async fn ack_marks_completed() {
        let queue = InMemoryQueue::new();
        let job_id = JobId::new();
        queue
            .enqueue(QueueName::Chat, job_id, test_payload(), EnqueueOptions::default())
            .await
            .unwrap();
        queue
            .reserve(QueueName::Chat, Duration::from_secs(60))
            .await
            .unwrap();
        queue.ack(job_id).await.unwrap();
        assert_eq!(queue.get_state(job_id).await.unwrap(), JobState::Completed);
    }
}
