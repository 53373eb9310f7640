//! The six literal end-to-end scenarios enumerated in spec.md §8, run
//! against the in-memory `DurableQueueClient` + `StateStore` +
//! `NotificationBus` (no network, no external processes).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use research_orchestrator_runtime::agents::stub::{
    StubContinueDecisionAgent, StubDiscoveryAgent, StubHypothesisAgent, StubPlanningAgent,
    StubReflectionAgent, StubRemoteAgent, StubReplyAgent,
};
use research_orchestrator_runtime::agents::{ContinueDecisionAgent, ContinueDecisionOutput};
use research_orchestrator_runtime::types::AgentError;
use research_orchestrator_runtime::chain::ChainController;
use research_orchestrator_runtime::credit::{CreditEvent, RecordingCreditCollaborator};
use research_orchestrator_runtime::executor::{run_iteration, DefaultDiscoveryGate, ExecutorConfig, ExecutorDeps, IterationOutcome};
use research_orchestrator_runtime::file_barrier::{FileIngestJob, FileIngestQueue, FileIngestState, FileReadyBarrier};
use research_orchestrator_runtime::lock::{conversation_state_lock_name, DistributedLock, InMemoryLock};
use research_orchestrator_runtime::notify::InMemoryNotificationBus;
use research_orchestrator_runtime::queue::{DurableQueueClient, EnqueueOptions, InMemoryQueue};
use research_orchestrator_runtime::state_store::{ConversationStateUpdate, InMemoryStateStore, StateStore};
use research_orchestrator_runtime::types::{
    ConversationId, ConversationState, ConversationStateId, Dataset, DatasetId, DeepResearchJobData, ExecutorError,
    IterationState, Job, JobId, JobState, Message, MessageSource, QueueName, ResearchMode, UserId,
};

struct EmptyFileQueue;
#[async_trait]
impl FileIngestQueue for EmptyFileQueue {
    async fn jobs_for(&self, _id: ConversationStateId) -> Vec<FileIngestJob> {
        vec![]
    }
}

/// Returns `true` for the first `continue_for` calls, then `false`.
struct ContinueForNCalls {
    calls: AtomicU32,
    continue_for: u32,
}

impl ContinueForNCalls {
    fn new(continue_for: u32) -> Self {
        Self { calls: AtomicU32::new(0), continue_for }
    }
}

#[async_trait]
impl ContinueDecisionAgent for ContinueForNCalls {
    async fn invoke(&self, _context: &str) -> Result<ContinueDecisionOutput, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ContinueDecisionOutput {
            should_continue: call < self.continue_for,
            confidence: 0.9,
            reasoning: "test-driven".into(),
            trigger_reason: "suggestions pending".into(),
        })
    }
}

fn test_deps(
    store: Arc<InMemoryStateStore>,
    queue: Arc<InMemoryQueue>,
    credit: Arc<RecordingCreditCollaborator>,
    continue_decision: Arc<dyn ContinueDecisionAgent>,
) -> ExecutorDeps {
    let notify = Arc::new(InMemoryNotificationBus::default());
    let chain = Arc::new(ChainController::new(queue.clone(), credit));
    ExecutorDeps {
        queue: queue.clone(),
        notify,
        store,
        lock: Arc::new(InMemoryLock::new()),
        file_ingest: Arc::new(EmptyFileQueue),
        planning: Arc::new(StubPlanningAgent),
        primary_literature: Arc::new(StubRemoteAgent { agent_name: "edison".into() }),
        optional_literature: vec![],
        analysis: Arc::new(StubRemoteAgent { agent_name: "bio".into() }),
        hypothesis: Arc::new(StubHypothesisAgent),
        reflection: Arc::new(StubReflectionAgent),
        discovery: Arc::new(StubDiscoveryAgent),
        discovery_gate: Arc::new(DefaultDiscoveryGate),
        continue_decision,
        reply: Arc::new(StubReplyAgent),
        chain,
        config: ExecutorConfig { poll_interval: Duration::from_millis(5), ..ExecutorConfig::default() },
    }
}

/// Seeds the ConversationState/Message/IterationState/Job for a fresh root
/// job, the same shape any incoming user question starts a chain with.
async fn seed_root_job(store: &InMemoryStateStore, mode: ResearchMode) -> Job {
    let conversation_id = ConversationId::new();
    let user_id = UserId::new();
    let mut conversation_state = ConversationState::new(conversation_id, "does caffeine improve reaction time".into());
    conversation_state.research_mode = mode;
    let conversation_state_id = conversation_state.id;
    store.create_conversation_state(conversation_state).await.unwrap();

    let iteration_state = IterationState::new(
        research_orchestrator_runtime::types::MessageId::new(),
        conversation_id,
        user_id,
        MessageSource::User,
        mode,
    );
    let message = Message::new_user(conversation_id, user_id, "does caffeine improve reaction time".into(), iteration_state.id);
    let iteration_state = IterationState { message_id: message.id, ..iteration_state };
    store.create_message(message.clone()).await.unwrap();
    store.create_iteration_state(iteration_state.clone()).await.unwrap();

    let payload = DeepResearchJobData {
        user_id,
        conversation_id,
        message_id: message.id,
        state_id: iteration_state.id,
        conversation_state_id,
        requested_at: Utc::now(),
        research_mode: mode,
        iteration_number: 1,
        root_job_id: JobId::new(),
        is_initial_iteration: true,
        message: "does caffeine improve reaction time".into(),
    };
    Job::new(JobId(message.id.0), QueueName::DeepResearch, payload, 2)
}

fn successor_job(successor: DeepResearchJobData) -> Job {
    Job::new(JobId(successor.message_id.0), QueueName::DeepResearch, successor, 2)
}

/// Scenario 1: semi-autonomous chain of length 3 (spec.md §8).
#[tokio::test]
async fn semi_autonomous_chain_of_length_three() {
    let store = Arc::new(InMemoryStateStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let credit = Arc::new(RecordingCreditCollaborator::new());
    let continue_decision = Arc::new(ContinueForNCalls::new(2));

    let root_job = seed_root_job(&store, ResearchMode::SemiAutonomous).await;
    let root_job_id = root_job.payload.root_job_id;

    let mut job = root_job;
    let mut message_ids = Vec::new();
    let mut iterations_run = 0u32;
    loop {
        message_ids.push(job.payload.message_id);
        let deps = test_deps(store.clone(), queue.clone(), credit.clone(), continue_decision.clone());
        let outcome = run_iteration(deps, job).await.unwrap();
        iterations_run += 1;
        match outcome {
            IterationOutcome::Continue { successor } => job = successor_job(successor),
            IterationOutcome::Complete => break,
        }
        assert!(iterations_run <= 5, "chain should have terminated by now");
    }

    assert_eq!(iterations_run, 3);
    assert_eq!(message_ids.len(), 3);

    for message_id in &message_ids {
        let message = store.get_message(*message_id).await.unwrap();
        assert!(!message.content.is_empty());
        assert!(message.response_time.is_some());
    }

    let final_payload_conversation_state_id = {
        let last = store.get_message(*message_ids.last().unwrap()).await.unwrap();
        store.get_state(last.state_id).await.unwrap().conversation_id
    };
    let _ = final_payload_conversation_state_id;

    assert_eq!(
        credit.events(),
        vec![CreditEvent::Completed { root_job_id, iterations: 3 }]
    );
}

/// Scenario 2: steering mode forces chain depth 1 regardless of the
/// continue-decision agent (spec.md §8).
#[tokio::test]
async fn steering_mode_single_iteration() {
    let store = Arc::new(InMemoryStateStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let credit = Arc::new(RecordingCreditCollaborator::new());
    let always_continue = Arc::new(ContinueForNCalls::new(u32::MAX));

    let job = seed_root_job(&store, ResearchMode::Steering).await;
    let root_job_id = job.payload.root_job_id;
    let conversation_state_id = job.payload.conversation_state_id;

    let deps = test_deps(store.clone(), queue.clone(), credit.clone(), always_continue);
    let outcome = run_iteration(deps, job).await.unwrap();

    assert!(matches!(outcome, IterationOutcome::Complete));
    assert_eq!(credit.events(), vec![CreditEvent::Completed { root_job_id, iterations: 1 }]);

    let conversation_state = store.get_conversation_state(conversation_state_id).await.unwrap();
    assert!(!conversation_state.suggested_next_steps.is_empty());
}

/// Scenario 3: a worker dies mid-processing; its lease expires, the queue's
/// stalled scan flips it back to a reservable state, and a second
/// reservation completes it (spec.md §8).
#[tokio::test]
async fn worker_crash_lease_expires_and_job_is_redelivered() {
    let store = Arc::new(InMemoryStateStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let credit = Arc::new(RecordingCreditCollaborator::new());

    let job = seed_root_job(&store, ResearchMode::SemiAutonomous).await;
    let job_id = job.id;
    queue
        .enqueue(QueueName::DeepResearch, job.id, job.payload.clone(), EnqueueOptions::default())
        .await
        .unwrap();

    let short_lease = Duration::from_millis(20);
    let reserved = queue.reserve(QueueName::DeepResearch, short_lease).await.unwrap();
    assert!(reserved.is_some(), "first worker reserves the job");
    assert_eq!(queue.get_state(job_id).await.unwrap(), JobState::Reserved);

    // Worker crashes: never acks, never renews. Wait past the lease.
    tokio::time::sleep(short_lease * 2).await;
    let stalled = queue.scan_stalled(QueueName::DeepResearch).await.unwrap();
    assert_eq!(stalled, vec![job_id]);
    assert_eq!(queue.get_state(job_id).await.unwrap(), JobState::FailedRetrying);

    let reserved_again = queue.reserve(QueueName::DeepResearch, Duration::from_secs(30)).await.unwrap();
    let job = reserved_again.expect("second worker reserves the recovered job");
    assert_eq!(job.id, job_id);
    assert_eq!(job.attempts, 2, "reservation after a stalled sweep counts as a new attempt");

    let continue_decision = Arc::new(StubContinueDecisionAgent);
    let deps = test_deps(store.clone(), queue.clone(), credit.clone(), continue_decision);
    let outcome = run_iteration(deps, job).await.unwrap();
    assert!(matches!(outcome, IterationOutcome::Complete));
    queue.ack(job_id).await.unwrap();
    assert_eq!(queue.get_state(job_id).await.unwrap(), JobState::Completed);
}

/// Scenario 4: the file-ready barrier waits for pending ingest jobs, then
/// either refreshes on ready or times out and proceeds anyway (spec.md §8).
#[tokio::test]
async fn file_barrier_waits_then_refreshes_on_ready() {
    struct ScriptedQueue {
        states: Arc<tokio::sync::Mutex<Vec<FileIngestState>>>,
    }
    #[async_trait]
    impl FileIngestQueue for ScriptedQueue {
        async fn jobs_for(&self, _id: ConversationStateId) -> Vec<FileIngestJob> {
            self.states
                .lock()
                .await
                .iter()
                .enumerate()
                .map(|(i, s)| FileIngestJob { file_id: format!("file-{i}"), state: *s })
                .collect()
        }
    }

    let states = Arc::new(tokio::sync::Mutex::new(vec![FileIngestState::Processing]));
    let queue = ScriptedQueue { states: states.clone() };
    let flipper = {
        let states = states.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            states.lock().await[0] = FileIngestState::Ready;
        })
    };

    let barrier = FileReadyBarrier { poll_interval: Duration::from_millis(5), timeout: Duration::from_secs(5) };
    let outcome = barrier.wait(&queue, ConversationStateId::new()).await.unwrap();
    flipper.await.unwrap();

    assert!(!outcome.timed_out);
    assert_eq!(outcome.ready, vec!["file-0".to_string()]);
}

#[tokio::test]
async fn file_barrier_times_out_and_proceeds_without_the_pending_file() {
    struct StuckQueue;
    #[async_trait]
    impl FileIngestQueue for StuckQueue {
        async fn jobs_for(&self, _id: ConversationStateId) -> Vec<FileIngestJob> {
            vec![FileIngestJob { file_id: "file-0".into(), state: FileIngestState::Processing }]
        }
    }

    let barrier = FileReadyBarrier { poll_interval: Duration::from_millis(5), timeout: Duration::from_millis(30) };
    let outcome = barrier.wait(&StuckQueue, ConversationStateId::new()).await.unwrap();
    assert!(outcome.timed_out);
    assert!(outcome.ready.is_empty());
}

/// Scenario 5: two file-ingest completions race to add datasets to the same
/// ConversationState; the lock serializes them and both survive (spec.md §8).
#[tokio::test]
async fn concurrent_dataset_uploads_serialize_with_no_lost_update() {
    let store = Arc::new(InMemoryStateStore::new());
    let lock = Arc::new(InMemoryLock::new());

    let conversation_id = ConversationId::new();
    let conversation_state = ConversationState::new(conversation_id, "what changed in v2".into());
    let conversation_state_id = conversation_state.id;
    store.create_conversation_state(conversation_state).await.unwrap();

    let lock_name = conversation_state_lock_name(conversation_state_id);

    async fn add_dataset_under_lock(
        store: &InMemoryStateStore,
        lock: &InMemoryLock,
        lock_name: &str,
        conversation_state_id: ConversationStateId,
        filename: &str,
    ) {
        let handle = lock.acquire(lock_name, Duration::from_secs(5)).await.unwrap();
        store
            .add_uploaded_dataset(conversation_state_id, Dataset { id: DatasetId::new(), filename: filename.into() })
            .await
            .unwrap();
        lock.release(lock_name, handle).await.unwrap();
    }

    let (store_a, lock_a, name_a) = (store.clone(), lock.clone(), lock_name.clone());
    let (store_b, lock_b, name_b) = (store.clone(), lock.clone(), lock_name.clone());
    let a = tokio::spawn(async move {
        add_dataset_under_lock(&store_a, &lock_a, &name_a, conversation_state_id, "alpha.csv").await;
    });
    let b = tokio::spawn(async move {
        add_dataset_under_lock(&store_b, &lock_b, &name_b, conversation_state_id, "beta.csv").await;
    });
    a.await.unwrap();
    b.await.unwrap();

    let conversation_state = store.get_conversation_state(conversation_state_id).await.unwrap();
    let filenames: Vec<_> = conversation_state.uploaded_datasets.iter().map(|d| d.filename.clone()).collect();
    assert_eq!(filenames.len(), 2);
    assert!(filenames.contains(&"alpha.csv".to_string()));
    assert!(filenames.contains(&"beta.csv".to_string()));
}

/// Scenario 6: the IterationState lookup returns nothing. Non-retryable,
/// no credit hook, `job:failed` published once (spec.md §8).
#[tokio::test]
async fn missing_iteration_state_is_a_non_retryable_failure_with_no_credit_hook() {
    let store = Arc::new(InMemoryStateStore::new());
    let queue = Arc::new(InMemoryQueue::new());
    let credit = Arc::new(RecordingCreditCollaborator::new());

    let conversation_id = ConversationId::new();
    let user_id = UserId::new();
    let conversation_state = ConversationState::new(conversation_id, "q".into());
    let conversation_state_id = conversation_state.id;
    store.create_conversation_state(conversation_state).await.unwrap();

    // Message is seeded, but its IterationState is not — get_state() will fail.
    let missing_state_id = research_orchestrator_runtime::types::IterationStateId::new();
    let message = Message::new_user(conversation_id, user_id, "q".into(), missing_state_id);
    store.create_message(message.clone()).await.unwrap();

    let payload = DeepResearchJobData {
        user_id,
        conversation_id,
        message_id: message.id,
        state_id: missing_state_id,
        conversation_state_id,
        requested_at: Utc::now(),
        research_mode: ResearchMode::SemiAutonomous,
        iteration_number: 1,
        root_job_id: JobId::new(),
        is_initial_iteration: true,
        message: "q".into(),
    };
    let job = Job::new(JobId(message.id.0), QueueName::DeepResearch, payload, 1);
    let job_id = job.id;
    queue
        .enqueue(QueueName::DeepResearch, job.id, job.payload.clone(), EnqueueOptions::default())
        .await
        .unwrap();
    let reserved = queue.reserve(QueueName::DeepResearch, Duration::from_secs(30)).await.unwrap().unwrap();

    let continue_decision = Arc::new(StubContinueDecisionAgent);
    let deps = test_deps(store, queue.clone(), credit.clone(), continue_decision);
    let result = run_iteration(deps, reserved).await;
    assert!(matches!(result, Err(ExecutorError::MissingRecord(_))));

    assert!(credit.events().is_empty(), "no payment was ever associated with this attempt");

    queue.fail(job_id, false).await.unwrap();
    assert_eq!(queue.get_state(job_id).await.unwrap(), JobState::FailedFinal);
    assert_eq!(queue.reserve(QueueName::DeepResearch, Duration::from_secs(30)).await.unwrap(), None);
}
