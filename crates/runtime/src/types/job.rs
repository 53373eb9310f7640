//! Job and its payload (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConversationId, ConversationStateId, JobId, MessageId, ResearchMode, UserId};

/// Queue this job was enqueued on; each has its own retry/concurrency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    DeepResearch,
    Chat,
    FileIngest,
    Paper,
}

/// DeepResearchJobData: the payload carried by a deep-research job (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepResearchJobData {
    pub user_id: UserId,
    pub conversation_id: ConversationId,
    /// This iteration's target message.
    pub message_id: MessageId,
    pub state_id: super::IterationStateId,
    pub conversation_state_id: ConversationStateId,
    pub requested_at: DateTime<Utc>,
    pub research_mode: ResearchMode,
    /// 1-based.
    pub iteration_number: u32,
    /// The first job in the chain.
    pub root_job_id: JobId,
    /// True only for iterationNumber == 1.
    pub is_initial_iteration: bool,
    /// Original user text, carried for context.
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Reserved,
    Completed,
    FailedRetrying,
    FailedFinal,
}

/// A lease held by whichever worker currently owns the job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Lease {
    pub owner: uuid::Uuid,
    pub deadline: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// Durable scheduling record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: QueueName,
    pub payload: DeepResearchJobData,
    pub attempts: u32,
    pub max_attempts: u32,
    pub lease: Option<Lease>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: JobId, queue: QueueName, payload: DeepResearchJobData, max_attempts: u32) -> Self {
        Self {
            id,
            queue,
            payload,
            attempts: 0,
            max_attempts,
            lease: None,
            state: JobState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Completed | JobState::FailedFinal)
    }
}

/// Per-queue retry/retention policy (§4.1).
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub success_retention: Duration,
    pub failure_retention: Duration,
}

impl QueueName {
    pub fn policy(self) -> QueuePolicy {
        match self {
            QueueName::DeepResearch => QueuePolicy {
                max_attempts: 2,
                base_backoff: Duration::from_secs(5),
                success_retention: Duration::from_secs(24 * 3600),
                failure_retention: Duration::from_secs(7 * 24 * 3600),
            },
            QueueName::Chat => QueuePolicy {
                max_attempts: 3,
                base_backoff: Duration::from_secs(1),
                success_retention: Duration::from_secs(24 * 3600),
                failure_retention: Duration::from_secs(24 * 3600),
            },
            QueueName::FileIngest => QueuePolicy {
                max_attempts: 3,
                base_backoff: Duration::from_secs(1),
                success_retention: Duration::from_secs(24 * 3600),
                failure_retention: Duration::from_secs(24 * 3600),
            },
            QueueName::Paper => QueuePolicy {
                max_attempts: 1,
                base_backoff: Duration::from_secs(1),
                success_retention: Duration::from_secs(24 * 3600),
                failure_retention: Duration::from_secs(24 * 3600),
            },
        }
    }
}
