//! Worker Runtime (spec §4.9).
//!
//! One concurrency-limited poll loop per queue: reserve, run the matching
//! handler, ack or fail. A second loop per queue sweeps stalled
//! reservations back onto the pending list. Shutdown stops reservation but
//! lets in-flight iterations run to completion (mirrors the teacher
//! scheduler's drain in `scheduler/mod.rs::shutdown`).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::executor::{self, ExecutorDeps};
use crate::queue::DurableQueueClient;
use crate::types::{ConversationId, ExecutorError, IterationStateId, Job, JobId, JobState, QueueName, WorkerError};

/// Per-queue pool sizing and timing (§6 defaults).
#[derive(Debug, Clone, Copy)]
pub struct QueueWorkerConfig {
    pub concurrency: usize,
    pub lease_duration: Duration,
    pub heartbeat_interval: Duration,
    pub stalled_sweep_interval: Duration,
    pub poll_interval: Duration,
}

impl QueueWorkerConfig {
    fn deep_research() -> Self {
        Self {
            concurrency: 3,
            lease_duration: Duration::from_secs(30 * 60),
            heartbeat_interval: Duration::from_secs(5 * 60),
            stalled_sweep_interval: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(2),
        }
    }

    fn chat() -> Self {
        Self {
            concurrency: 5,
            lease_duration: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(60),
            stalled_sweep_interval: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }

    fn file_ingest() -> Self {
        Self {
            concurrency: 5,
            lease_duration: Duration::from_secs(10 * 60),
            heartbeat_interval: Duration::from_secs(2 * 60),
            stalled_sweep_interval: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }

    fn paper() -> Self {
        Self {
            concurrency: 1,
            lease_duration: Duration::from_secs(15 * 60),
            heartbeat_interval: Duration::from_secs(3 * 60),
            stalled_sweep_interval: Duration::from_secs(10 * 60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub deep_research: QueueWorkerConfig,
    pub chat: QueueWorkerConfig,
    pub file_ingest: QueueWorkerConfig,
    pub paper: QueueWorkerConfig,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            deep_research: QueueWorkerConfig::deep_research(),
            chat: QueueWorkerConfig::chat(),
            file_ingest: QueueWorkerConfig::file_ingest(),
            paper: QueueWorkerConfig::paper(),
        }
    }
}

impl WorkerPoolConfig {
    fn for_queue(&self, queue: QueueName) -> QueueWorkerConfig {
        match queue {
            QueueName::DeepResearch => self.deep_research,
            QueueName::Chat => self.chat,
            QueueName::FileIngest => self.file_ingest,
            QueueName::Paper => self.paper,
        }
    }
}

/// Drives the deep-research queue only; chat/file-ingest/paper queues are
/// served by other handlers outside this crate's scope (§1 non-goals name
/// the chat/paper agents themselves as out of scope, not their queues, so
/// the pool sizing for all four lives here even though only deep-research
/// has a handler wired in).
pub struct WorkerRuntime {
    queue: Arc<dyn DurableQueueClient>,
    config: WorkerPoolConfig,
    shutdown: Arc<Notify>,
    draining: Arc<RwLock<bool>>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
    deep_research_semaphore: Arc<Semaphore>,
}

impl WorkerRuntime {
    pub fn new(queue: Arc<dyn DurableQueueClient>, config: WorkerPoolConfig) -> Self {
        let concurrency = config.deep_research.concurrency;
        Self {
            queue,
            config,
            shutdown: Arc::new(Notify::new()),
            draining: Arc::new(RwLock::new(false)),
            handles: std::sync::Mutex::new(Vec::new()),
            deep_research_semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Start the deep-research reserve/run/ack loop plus its stalled sweep.
    /// `deps` is cloned per reserved job.
    pub fn spawn_deep_research(&self, deps: ExecutorDeps) {
        let cfg = self.config.for_queue(QueueName::DeepResearch);
        let queue = self.queue.clone();
        let draining = self.draining.clone();
        let shutdown = self.shutdown.clone();
        let semaphore = self.deep_research_semaphore.clone();

        let reserve_handle = tokio::spawn(reserve_loop(
            queue.clone(),
            QueueName::DeepResearch,
            cfg,
            semaphore,
            deps,
            draining.clone(),
            shutdown.clone(),
        ));
        self.handles.lock().expect("not poisoned").push(reserve_handle);

        let sweep_handle = tokio::spawn(stalled_sweep_loop(
            queue,
            QueueName::DeepResearch,
            cfg.stalled_sweep_interval,
            self.shutdown.clone(),
        ));
        self.handles.lock().expect("not poisoned").push(sweep_handle);
    }

    /// Stop reserving new jobs, then wait (up to `grace`) for every in-flight
    /// iteration to return its concurrency permit, which only happens once
    /// `run_one_job` has finished acking or failing the job.
    pub async fn shutdown(&self, grace: Duration) {
        *self.draining.write() = true;
        self.shutdown.notify_waiters();
        tracing::info!("worker runtime draining, waiting up to {:?} for in-flight jobs", grace);

        let concurrency = self.config.deep_research.concurrency as u32;
        let drain_in_flight = self.deep_research_semaphore.acquire_many(concurrency);
        if tokio::time::timeout(grace, drain_in_flight).await.is_err() {
            tracing::warn!("worker shutdown grace period elapsed with jobs still in flight");
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().expect("not poisoned"));
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_millis(200), handle).await;
        }
    }

    pub fn is_draining(&self) -> bool {
        *self.draining.read()
    }
}

async fn reserve_loop(
    queue: Arc<dyn DurableQueueClient>,
    queue_name: QueueName,
    cfg: QueueWorkerConfig,
    semaphore: Arc<Semaphore>,
    deps: ExecutorDeps,
    draining: Arc<RwLock<bool>>,
    shutdown: Arc<Notify>,
) {
    let mut poll = tokio::time::interval(cfg.poll_interval);
    loop {
        if *draining.read() {
            break;
        }
        tokio::select! {
            _ = poll.tick() => {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    continue;
                };
                match queue.reserve(queue_name, cfg.lease_duration).await {
                    Ok(Some(job)) => {
                        let queue = queue.clone();
                        let deps = deps.clone();
                        tokio::spawn(async move {
                            run_one_job(queue, job, deps, cfg).await;
                            drop(permit);
                        });
                    }
                    Ok(None) => drop(permit),
                    Err(e) => {
                        tracing::error!(error = %e, queue = ?queue_name, "reserve failed");
                        drop(permit);
                    }
                }
            }
            _ = shutdown.notified() => {
                if *draining.read() {
                    break;
                }
            }
        }
    }
}

/// Run one reserved job to completion: heartbeat its lease while the
/// executor runs, then ack or fail. The executor has already enqueued any
/// successor before returning `Continue`, so acking here is always safe
/// (§5 enqueue-before-ack ordering).
async fn run_one_job(queue: Arc<dyn DurableQueueClient>, job: Job, deps: ExecutorDeps, cfg: QueueWorkerConfig) {
    let job_id = job.id;
    let conversation_id = job.payload.conversation_id;
    let root_job_id = job.payload.root_job_id;
    let iteration_state_id = job.payload.state_id;
    let heartbeat = tokio::spawn(heartbeat_loop(queue.clone(), job_id, cfg));

    let outcome = executor::run_iteration(deps.clone(), job).await;
    heartbeat.abort();

    match outcome {
        Ok(_) => {
            if let Err(e) = queue.ack(job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "ack failed");
            }
        }
        Err(e) => {
            let retryable = e.is_retryable();
            tracing::warn!(job_id = %job_id, error = %e, retryable, "iteration failed");
            if let Err(fail_err) = queue.fail(job_id, retryable).await {
                tracing::error!(job_id = %job_id, error = %fail_err, "fail failed");
            }

            // Only the queue knows whether this attempt was the last one;
            // the refund/notify/status-failed side effects below must run
            // exactly once per job, so they're gated on that state rather
            // than on this particular call having failed.
            match queue.get_state(job_id).await {
                Ok(JobState::FailedFinal) => {
                    finalize_failed_iteration(&deps, job_id, conversation_id, root_job_id, iteration_state_id, &e).await;
                }
                Ok(_) => {
                    tracing::info!(job_id = %job_id, "iteration will be retried, deferring finalization");
                }
                Err(state_err) => {
                    tracing::error!(job_id = %job_id, error = %state_err, "could not read job state after fail");
                }
            }
        }
    }
}

/// §7's "on final failure" side effects: mark the iteration failed, publish
/// `job:failed`, and refund credit. Runs at most once per job, called only
/// once `run_one_job` has confirmed the queue will not redeliver it. A
/// missing-record failure never had an iteration to refund (S1 bootstrap
/// never ran past record lookup), so it skips the credit hook.
async fn finalize_failed_iteration(
    deps: &ExecutorDeps,
    job_id: JobId,
    conversation_id: ConversationId,
    root_job_id: JobId,
    iteration_state_id: IterationStateId,
    error: &ExecutorError,
) {
    let _ = deps
        .store
        .update_state(
            iteration_state_id,
            crate::state_store::IterationStateUpdate {
                status: Some(crate::types::IterationStatus::Failed),
                error: Some(error.to_string()),
                is_deep_research: None,
            },
        )
        .await;
    deps.notify
        .publish(
            conversation_id,
            crate::notify::OrchestratorEvent::JobFailed { job_id, conversation_id, error: error.to_string() },
        )
        .await;
    if !matches!(error, ExecutorError::MissingRecord(_)) {
        deps.chain.finalize_failure(root_job_id).await;
    }
}

async fn heartbeat_loop(queue: Arc<dyn DurableQueueClient>, job_id: crate::types::JobId, cfg: QueueWorkerConfig) {
    let mut tick = tokio::time::interval(cfg.heartbeat_interval);
    tick.tick().await; // first tick fires immediately; skip it, the lease just started
    loop {
        tick.tick().await;
        if let Err(e) = queue.renew_lease(job_id, cfg.lease_duration).await {
            tracing::warn!(job_id = %job_id, error = %e, "lease renewal failed");
        }
    }
}

async fn stalled_sweep_loop(queue: Arc<dyn DurableQueueClient>, queue_name: QueueName, interval: Duration, shutdown: Arc<Notify>) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match queue.scan_stalled(queue_name).await {
                    Ok(stalled) if !stalled.is_empty() => {
                        tracing::warn!(queue = ?queue_name, count = stalled.len(), "recovered stalled reservations");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(queue = ?queue_name, error = %e, "stalled sweep failed"),
                }
            }
            _ = shutdown.notified() => break,
        }
    }
}

impl From<crate::types::ExecutorError> for WorkerError {
    fn from(e: crate::types::ExecutorError) -> Self {
        WorkerError::Executor(e)
    }
}
