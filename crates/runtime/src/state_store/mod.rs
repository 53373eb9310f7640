//! State Store Adapter (spec §4.3).
//!
//! Transactional read/modify/write of ConversationState, IterationState, and
//! Message records. Last-write-wins at the record level; cross-record
//! atomicity is only required where §5 demands it (the executor achieves
//! that via the distributed lock, not the store).

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::{
    ConversationId, ConversationStateId, Dataset, IterationState, IterationStateId, Message,
    MessageId, StateStoreError,
};

/// Fields an executor may overwrite on a Message (§4.3).
#[derive(Debug, Clone, Default)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub response_time: Option<std::time::Duration>,
}

/// Arbitrary IterationState field updates.
#[derive(Debug, Clone, Default)]
pub struct IterationStateUpdate {
    pub status: Option<crate::types::IterationStatus>,
    pub error: Option<String>,
    pub is_deep_research: Option<bool>,
}

/// ConversationState update, with the `preserveUploadedDatasets` flag from
/// §4.3: when set, the caller's new state's `uploaded_datasets` is ignored
/// in favor of the currently stored value (used when the write is racing
/// against a concurrent file-ingest completion that goes through the lock
/// instead).
#[derive(Debug, Clone)]
pub struct ConversationStateUpdate {
    pub new_state: crate::types::ConversationState,
    pub preserve_uploaded_datasets: bool,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_message(&self, id: MessageId) -> Result<Message, StateStoreError>;
    async fn get_state(&self, id: IterationStateId) -> Result<IterationState, StateStoreError>;
    async fn get_conversation_state(
        &self,
        id: ConversationStateId,
    ) -> Result<crate::types::ConversationState, StateStoreError>;
    async fn conversation_exists(&self, id: ConversationId) -> Result<bool, StateStoreError>;

    async fn create_message(&self, message: Message) -> Result<(), StateStoreError>;
    async fn update_message(&self, id: MessageId, update: MessageUpdate) -> Result<(), StateStoreError>;
    async fn update_state(
        &self,
        id: IterationStateId,
        update: IterationStateUpdate,
    ) -> Result<(), StateStoreError>;
    async fn update_conversation_state(
        &self,
        update: ConversationStateUpdate,
    ) -> Result<(), StateStoreError>;

    async fn create_iteration_state(&self, state: IterationState) -> Result<(), StateStoreError>;
    async fn create_conversation_state(
        &self,
        state: crate::types::ConversationState,
    ) -> Result<(), StateStoreError>;

    /// Directly append a dataset under the distributed lock (§4.4); bypasses
    /// `update_conversation_state`'s preserve flag since the caller already
    /// holds exclusivity.
    async fn add_uploaded_dataset(
        &self,
        id: ConversationStateId,
        dataset: Dataset,
    ) -> Result<(), StateStoreError>;
}

#[derive(Default)]
struct Tables {
    messages: HashMap<MessageId, Message>,
    iteration_states: HashMap<IterationStateId, IterationState>,
    conversation_states: HashMap<ConversationStateId, crate::types::ConversationState>,
    conversations: std::collections::HashSet<ConversationId>,
}

/// In-memory store, the orchestrator's own default (the real backend is an
/// external collaborator per §1 non-goals).
pub struct InMemoryStateStore {
    tables: RwLock<Tables>,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_message(&self, id: MessageId) -> Result<Message, StateStoreError> {
        self.tables
            .read()
            .messages
            .get(&id)
            .cloned()
            .ok_or(StateStoreError::MessageNotFound(id))
    }

    async fn get_state(&self, id: IterationStateId) -> Result<IterationState, StateStoreError> {
        self.tables
            .read()
            .iteration_states
            .get(&id)
            .cloned()
            .ok_or(StateStoreError::IterationStateNotFound(id))
    }

    async fn get_conversation_state(
        &self,
        id: ConversationStateId,
    ) -> Result<crate::types::ConversationState, StateStoreError> {
        self.tables
            .read()
            .conversation_states
            .get(&id)
            .cloned()
            .ok_or(StateStoreError::ConversationStateNotFound(id))
    }

    async fn conversation_exists(&self, id: ConversationId) -> Result<bool, StateStoreError> {
        Ok(self.tables.read().conversations.contains(&id))
    }

    async fn create_message(&self, message: Message) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write();
        tables.conversations.insert(message.conversation_id);
        tables.messages.insert(message.id, message);
        Ok(())
    }

    async fn update_message(&self, id: MessageId, update: MessageUpdate) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write();
        let message = tables
            .messages
            .get_mut(&id)
            .ok_or(StateStoreError::MessageNotFound(id))?;
        if let Some(content) = update.content {
            message.content = content;
        }
        if let Some(summary) = update.summary {
            message.summary = summary;
        }
        if let Some(response_time) = update.response_time {
            message.response_time = Some(response_time);
        }
        Ok(())
    }

    async fn update_state(
        &self,
        id: IterationStateId,
        update: IterationStateUpdate,
    ) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write();
        let state = tables
            .iteration_states
            .get_mut(&id)
            .ok_or(StateStoreError::IterationStateNotFound(id))?;
        if let Some(status) = update.status {
            state.status = status;
        }
        if let Some(error) = update.error {
            state.error = Some(error);
        }
        if let Some(is_deep_research) = update.is_deep_research {
            state.is_deep_research = is_deep_research;
        }
        Ok(())
    }

    async fn update_conversation_state(
        &self,
        update: ConversationStateUpdate,
    ) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write();
        let id = update.new_state.id;
        let mut new_state = update.new_state;
        if update.preserve_uploaded_datasets {
            if let Some(existing) = tables.conversation_states.get(&id) {
                new_state.uploaded_datasets = existing.uploaded_datasets.clone();
            }
        }
        tables.conversation_states.insert(id, new_state);
        Ok(())
    }

    async fn create_iteration_state(&self, state: IterationState) -> Result<(), StateStoreError> {
        self.tables.write().iteration_states.insert(state.id, state);
        Ok(())
    }

    async fn create_conversation_state(
        &self,
        state: crate::types::ConversationState,
    ) -> Result<(), StateStoreError> {
        self.tables.write().conversation_states.insert(state.id, state);
        Ok(())
    }

    async fn add_uploaded_dataset(
        &self,
        id: ConversationStateId,
        dataset: Dataset,
    ) -> Result<(), StateStoreError> {
        let mut tables = self.tables.write();
        let state = tables
            .conversation_states
            .get_mut(&id)
            .ok_or(StateStoreError::ConversationStateNotFound(id))?;
        state.add_dataset(dataset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationState, IterationStatus, MessageSource, ResearchMode, UserId};

    #[tokio::test]
    async fn preserve_uploaded_datasets_keeps_existing_value() {
        let store = InMemoryStateStore::new();
        let conversation_id = ConversationId::new();
        let mut state = ConversationState::new(conversation_id, "why is the sky blue".into());
        state.add_dataset(Dataset {
            id: crate::types::DatasetId::new(),
            filename: "original.csv".into(),
        });
        store.create_conversation_state(state.clone()).await.unwrap();

        let mut overwrite = state.clone();
        overwrite.uploaded_datasets.clear();
        overwrite.current_objective = "changed".into();

        store
            .update_conversation_state(ConversationStateUpdate {
                new_state: overwrite,
                preserve_uploaded_datasets: true,
            })
            .await
            .unwrap();

        let loaded = store.get_conversation_state(state.id).await.unwrap();
        assert_eq!(loaded.current_objective, "changed");
        assert_eq!(loaded.uploaded_datasets.len(), 1);
    }

    #[tokio::test]
    async fn update_message_is_last_write_wins() {
        let store = InMemoryStateStore::new();
        let conversation_id = ConversationId::new();
        let user_id = UserId::new();
        let iteration_state = IterationState::new(
            MessageId::new(),
            conversation_id,
            user_id,
            MessageSource::User,
            ResearchMode::SemiAutonomous,
        );
        let message = Message::new_user(conversation_id, user_id, "q".into(), iteration_state.id);
        let message_id = message.id;
        store.create_message(message).await.unwrap();

        store
            .update_message(
                message_id,
                MessageUpdate {
                    content: Some("first answer".into()),
                    summary: None,
                    response_time: None,
                },
            )
            .await
            .unwrap();
        store
            .update_message(
                message_id,
                MessageUpdate {
                    content: Some("second answer".into()),
                    summary: None,
                    response_time: None,
                },
            )
            .await
            .unwrap();

        let loaded = store.get_message(message_id).await.unwrap();
        assert_eq!(loaded.content, "second answer");
    }

    #[tokio::test]
    async fn update_state_marks_failed_with_error() {
        let store = InMemoryStateStore::new();
        let conversation_id = ConversationId::new();
        let user_id = UserId::new();
        let state = IterationState::new(
            MessageId::new(),
            conversation_id,
            user_id,
            MessageSource::User,
            ResearchMode::SemiAutonomous,
        );
        let state_id = state.id;
        store.create_iteration_state(state).await.unwrap();

        store
            .update_state(
                state_id,
                IterationStateUpdate {
                    status: Some(IterationStatus::Failed),
                    error: Some("boom".into()),
                    is_deep_research: None,
                },
            )
            .await
            .unwrap();

        let loaded = store.get_state(state_id).await.unwrap();
        assert_eq!(loaded.status, IterationStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
    }
}
