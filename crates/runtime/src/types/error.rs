//! Error taxonomy for the orchestrator.
//!
//! Each module defines its own error enum; `OrchestratorError` aggregates
//! them for code that spans components (chiefly the iteration executor).

use thiserror::Error;

use super::{ConversationStateId, IterationStateId, JobId, MessageId};

/// Top-level error type for cross-component code.
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("state store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("file barrier error: {0}")]
    FileBarrier(#[from] FileBarrierError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl OrchestratorError {
    /// §7: transient and capacity errors are retryable, data and most agent
    /// errors are not (agent errors absorbed into task output in S3 never
    /// reach here as an `AgentError` in the first place).
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestratorError::Queue(e) => e.is_retryable(),
            OrchestratorError::Notification(_) => true,
            OrchestratorError::Lock(e) => e.is_retryable(),
            OrchestratorError::Agent(e) => e.is_retryable(),
            OrchestratorError::StateStore(_) => false,
            OrchestratorError::FileBarrier(_) => true,
            OrchestratorError::Executor(e) => e.is_retryable(),
            OrchestratorError::Chain(_) => false,
            OrchestratorError::Worker(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {0} is not reserved by this lease")]
    LeaseExpired(JobId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("job {0} exceeded max attempts")]
    AttemptsExhausted(JobId),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Transport(_) | QueueError::LeaseExpired(_))
    }
}

#[derive(Error, Debug, Clone)]
pub enum NotificationError {
    #[error("publish failed on channel {channel}: {reason}")]
    PublishFailed { channel: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum StateStoreError {
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("conversation state not found: {0}")]
    ConversationStateNotFound(ConversationStateId),

    #[error("iteration state not found: {0}")]
    IterationStateNotFound(IterationStateId),

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone)]
pub enum LockError {
    #[error("could not acquire lock '{name}' after {attempts} attempts")]
    AcquireFailed { name: String, attempts: u32 },

    #[error("lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::AcquireFailed { .. })
    }
}

#[derive(Error, Debug, Clone)]
pub enum AgentError {
    #[error("agent '{agent}' timed out after {timeout:?}")]
    Timeout { agent: String, timeout: std::time::Duration },

    #[error("agent '{agent}' returned an error: {message}")]
    Remote { agent: String, message: String },

    #[error("agent '{agent}' transport failure: {message}")]
    Transport { agent: String, message: String },
}

impl AgentError {
    /// Agent failures are treated as transient for the enclosing iteration
    /// (§7), except where S3 absorbs them into task output instead of
    /// propagating them at all.
    pub fn is_retryable(&self) -> bool {
        true
    }

    pub fn agent_name(&self) -> &str {
        match self {
            AgentError::Timeout { agent, .. } => agent,
            AgentError::Remote { agent, .. } => agent,
            AgentError::Transport { agent, .. } => agent,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum FileBarrierError {
    #[error("file ingest queue error: {0}")]
    QueueBackend(String),

    #[error("barrier timed out after {0:?} waiting on conversation state {1}")]
    TimedOut(std::time::Duration, ConversationStateId),
}

#[derive(Error, Debug, Clone)]
pub enum ExecutorError {
    #[error("required record missing: {0}")]
    MissingRecord(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    FileBarrier(#[from] FileBarrierError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl ExecutorError {
    /// S1's missing-record case is `data` (non-retryable, §7); everything
    /// funneled up from a collaborator keeps that collaborator's verdict.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutorError::MissingRecord(_) => false,
            ExecutorError::Agent(e) => e.is_retryable(),
            ExecutorError::StateStore(_) => false,
            ExecutorError::Lock(e) => e.is_retryable(),
            ExecutorError::Notification(_) => true,
            ExecutorError::FileBarrier(_) => true,
            ExecutorError::Chain(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("max auto iterations ({0}) reached")]
    MaxIterationsReached(u32),

    #[error("successor enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("credit collaborator hook failed: {0}")]
    CreditHookFailed(String),
}

#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("worker pool is draining")]
    Draining,
}
