//! Chain Controller (spec §4.8).
//!
//! Constructs successor jobs and maintains chain identity: `rootJobId` is
//! set by the first job and propagated unchanged; the successor's jobId
//! equals its Message id, which keeps `enqueue` idempotent across retries.
//! Finalization (credit complete/refund) is also owned here since both are
//! one-shot chain-lifecycle events, not iteration-local ones.

use std::sync::Arc;

use crate::credit::CreditCollaborator;
use crate::queue::{DurableQueueClient, EnqueueOptions};
use crate::types::{ChainError, ConversationStateId, DeepResearchJobData, IterationStateId, JobId, MessageId, QueueName, ResearchMode};

pub struct ChainController {
    queue: Arc<dyn DurableQueueClient>,
    credit: Arc<dyn CreditCollaborator>,
}

impl ChainController {
    pub fn new(queue: Arc<dyn DurableQueueClient>, credit: Arc<dyn CreditCollaborator>) -> Self {
        Self { queue, credit }
    }

    /// §4.8: maxAutoIterations gates chain depth; steering forces depth 1.
    pub fn max_depth(&self, mode: ResearchMode, semi_autonomous_cap: u32) -> u32 {
        mode.max_auto_iterations(semi_autonomous_cap)
    }

    pub fn is_at_max_depth(&self, iteration_number: u32, mode: ResearchMode, semi_autonomous_cap: u32) -> bool {
        iteration_number >= self.max_depth(mode, semi_autonomous_cap)
    }

    /// Build the successor payload, preserving `rootJobId` and carrying
    /// forward the mode and original user text.
    pub fn build_successor(
        &self,
        predecessor: &DeepResearchJobData,
        next_message_id: MessageId,
        next_state_id: IterationStateId,
        next_conversation_state_id: ConversationStateId,
    ) -> DeepResearchJobData {
        DeepResearchJobData {
            user_id: predecessor.user_id,
            conversation_id: predecessor.conversation_id,
            message_id: next_message_id,
            state_id: next_state_id,
            conversation_state_id: next_conversation_state_id,
            requested_at: chrono::Utc::now(),
            research_mode: predecessor.research_mode,
            iteration_number: predecessor.iteration_number + 1,
            root_job_id: predecessor.root_job_id,
            is_initial_iteration: false,
            message: predecessor.message.clone(),
        }
    }

    /// §5 ordering: caller must enqueue the successor before acking the
    /// predecessor job. jobId = successor's messageId makes this idempotent
    /// on redelivery.
    pub async fn enqueue_successor(&self, successor: DeepResearchJobData) -> Result<(), ChainError> {
        let job_id = JobId(successor.message_id.0);
        self.queue
            .enqueue(QueueName::DeepResearch, job_id, successor, EnqueueOptions::default())
            .await
            .map_err(|e| ChainError::EnqueueFailed(e.to_string()))
    }

    pub async fn finalize_success(&self, root_job_id: JobId, iterations: u32) {
        self.credit.complete(root_job_id, iterations).await;
    }

    pub async fn finalize_failure(&self, root_job_id: JobId) {
        self.credit.refund(root_job_id).await;
    }
}
