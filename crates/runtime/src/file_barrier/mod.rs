//! File-Ready Barrier (spec §4.6).
//!
//! Before planning on an initial iteration, waits for any pending
//! file-ingest jobs attached to the conversation state. Polls at a fixed
//! cadence for at most a fixed timeout; files in `error` are logged and
//! excluded from planning.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{ConversationStateId, FileBarrierError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileIngestState {
    Pending,
    Processing,
    Ready,
    Error,
}

#[derive(Debug, Clone)]
pub struct FileIngestJob {
    pub file_id: String,
    pub state: FileIngestState,
}

/// The file-ingest queue, queried by conversation state id. An external
/// collaborator per §1 non-goals; this trait is the narrow interface the
/// orchestrator calls through.
#[async_trait]
pub trait FileIngestQueue: Send + Sync {
    async fn jobs_for(&self, conversation_state_id: ConversationStateId) -> Vec<FileIngestJob>;
}

/// Default when no file-ingest backend is configured: reports no pending
/// jobs, so the barrier passes immediately.
#[derive(Debug, Default)]
pub struct EmptyFileQueue;

#[async_trait]
impl FileIngestQueue for EmptyFileQueue {
    async fn jobs_for(&self, _conversation_state_id: ConversationStateId) -> Vec<FileIngestJob> {
        Vec::new()
    }
}

pub struct FileReadyBarrier {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for FileReadyBarrier {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Outcome of waiting at the barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierOutcome {
    /// file ids that reached `ready`.
    pub ready: Vec<String>,
    /// file ids that reached `error`, logged and excluded from planning.
    pub errored: Vec<String>,
    /// true if the barrier hit its timeout with jobs still pending.
    pub timed_out: bool,
}

impl FileReadyBarrier {
    /// Wait for every file-ingest job attached to `conversation_state_id` to
    /// reach a terminal state (ready, error, or absent). On timeout,
    /// proceeds anyway and reports which jobs were still outstanding.
    pub async fn wait(
        &self,
        queue: &dyn FileIngestQueue,
        conversation_state_id: ConversationStateId,
    ) -> Result<BarrierOutcome, FileBarrierError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut ready = Vec::new();
        let mut errored = Vec::new();

        loop {
            let jobs = queue.jobs_for(conversation_state_id).await;
            ready.clear();
            errored.clear();
            let mut outstanding = false;

            for job in &jobs {
                match job.state {
                    FileIngestState::Ready => ready.push(job.file_id.clone()),
                    FileIngestState::Error => {
                        tracing::warn!(file_id = %job.file_id, "file ingest errored, excluding from planning");
                        errored.push(job.file_id.clone());
                    }
                    FileIngestState::Pending | FileIngestState::Processing => {
                        outstanding = true;
                    }
                }
            }

            if !outstanding {
                return Ok(BarrierOutcome {
                    ready,
                    errored,
                    timed_out: false,
                });
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    conversation_state_id = %conversation_state_id,
                    "file-ready barrier timed out with jobs still pending, proceeding without them"
                );
                return Ok(BarrierOutcome {
                    ready,
                    errored,
                    timed_out: true,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
