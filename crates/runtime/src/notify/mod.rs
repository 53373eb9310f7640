//! Notification Bus (spec §4.2).
//!
//! Publish/subscribe on per-conversation channels. Publication is
//! best-effort: failures are logged and never fail the job.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ConversationId, JobId, MessageId, NotificationError};

/// Progress detail attached to `job:progress` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub stage: String,
    pub percent: u8,
}

/// Closed set of event types the bus will publish (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestratorEvent {
    #[serde(rename = "job:started")]
    JobStarted { job_id: JobId, conversation_id: ConversationId },
    #[serde(rename = "job:progress")]
    JobProgress {
        job_id: JobId,
        conversation_id: ConversationId,
        progress: Progress,
    },
    #[serde(rename = "job:completed")]
    JobCompleted { job_id: JobId, conversation_id: ConversationId },
    #[serde(rename = "job:failed")]
    JobFailed {
        job_id: JobId,
        conversation_id: ConversationId,
        error: String,
    },
    #[serde(rename = "message:updated")]
    MessageUpdated {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    #[serde(rename = "state:updated")]
    StateUpdated { conversation_id: ConversationId },
    #[serde(rename = "file:ready")]
    FileReady {
        conversation_id: ConversationId,
        file_id: String,
    },
    #[serde(rename = "file:error")]
    FileError {
        conversation_id: ConversationId,
        file_id: String,
        error: String,
    },
    #[serde(rename = "paper:started")]
    PaperStarted { conversation_id: ConversationId, paper_id: String },
    #[serde(rename = "paper:progress")]
    PaperProgress {
        conversation_id: ConversationId,
        paper_id: String,
        progress: Progress,
    },
    #[serde(rename = "paper:completed")]
    PaperCompleted { conversation_id: ConversationId, paper_id: String },
    #[serde(rename = "paper:failed")]
    PaperFailed {
        conversation_id: ConversationId,
        paper_id: String,
        error: String,
    },
    /// Supplemental event (spec.md §9): surfaces a silent `objective`
    /// rewrite by reflection for observability.
    #[serde(rename = "root_objective:changed")]
    RootObjectiveChange {
        conversation_id: ConversationId,
        previous: String,
        new: String,
    },
}

fn channel_name(conversation_id: ConversationId) -> String {
    format!("conversation:{conversation_id}")
}

#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, conversation_id: ConversationId, event: OrchestratorEvent);

    fn subscribe(&self, conversation_id: ConversationId) -> broadcast::Receiver<OrchestratorEvent>;
}

/// In-memory fan-out bus: one broadcast channel per conversation.
pub struct InMemoryNotificationBus {
    channels: DashMap<String, broadcast::Sender<OrchestratorEvent>>,
    capacity: usize,
}

impl InMemoryNotificationBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    fn sender(&self, conversation_id: ConversationId) -> broadcast::Sender<OrchestratorEvent> {
        self.channels
            .entry(channel_name(conversation_id))
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for InMemoryNotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationBus for InMemoryNotificationBus {
    async fn publish(&self, conversation_id: ConversationId, event: OrchestratorEvent) {
        let channel = channel_name(conversation_id);
        let sender = self.sender(conversation_id);
        // broadcast::send fails only when there are no receivers; that's not
        // a publication failure worth aborting the job over (§4.2).
        if let Err(e) = sender.send(event) {
            let err = NotificationError::PublishFailed {
                channel,
                reason: e.to_string(),
            };
            tracing::warn!(%err, "notification publish had no subscribers");
        }
    }

    fn subscribe(&self, conversation_id: ConversationId) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender(conversation_id).subscribe()
    }
}
