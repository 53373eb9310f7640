//! Message and IterationState (spec §3).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConversationId, IterationStateId, MessageId, ResearchMode, UserId};

/// Where a message originated (chat UI, API, agent-initiated continuation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageSource {
    User,
    AgentContinuation,
}

/// Immutable once terminal (content + response_time written exactly once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    /// Empty for agent-initiated continuation messages.
    pub question: String,
    /// Reply text, empty until written by S8.
    pub content: String,
    pub summary: String,
    pub source: MessageSource,
    pub state_id: IterationStateId,
    pub response_time: Option<Duration>,
}

impl Message {
    pub fn new_user(
        conversation_id: ConversationId,
        user_id: UserId,
        question: String,
        state_id: IterationStateId,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            user_id,
            question,
            content: String::new(),
            summary: String::new(),
            source: MessageSource::User,
            state_id,
            response_time: None,
        }
    }

    /// §4.8/§9: a continuation message created by the chain controller when
    /// promoting suggested steps, question/content both empty at creation.
    pub fn new_agent_continuation(
        conversation_id: ConversationId,
        user_id: UserId,
        state_id: IterationStateId,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            user_id,
            question: String::new(),
            content: String::new(),
            summary: String::new(),
            source: MessageSource::AgentContinuation,
            state_id,
            response_time: None,
        }
    }

    /// S8: last-write-wins on retry since agents are non-deterministic.
    pub fn write_reply(&mut self, content: String, summary: String, elapsed: Duration) {
        self.content = content;
        self.summary = summary;
        self.response_time = Some(elapsed);
    }
}

/// Terminal status of an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationStatus {
    Running,
    Completed,
    Failed,
}

/// Per-iteration scratch record. Written on fatal failure to record the error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationState {
    pub id: IterationStateId,
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub source: MessageSource,
    pub is_deep_research: bool,
    pub status: IterationStatus,
    pub error: Option<String>,
    pub research_mode: ResearchMode,
}

impl IterationState {
    pub fn new(
        message_id: MessageId,
        conversation_id: ConversationId,
        user_id: UserId,
        source: MessageSource,
        research_mode: ResearchMode,
    ) -> Self {
        Self {
            id: IterationStateId::new(),
            message_id,
            conversation_id,
            user_id,
            source,
            is_deep_research: false,
            status: IterationStatus::Running,
            error: None,
            research_mode,
        }
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = IterationStatus::Failed;
        self.error = Some(error);
    }

    pub fn mark_completed(&mut self) {
        self.status = IterationStatus::Completed;
    }
}
