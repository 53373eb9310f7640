//! ConversationState and the PlanTask it owns (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, ConversationStateId, DatasetId, ResearchMode};

/// A dataset reference held by a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub filename: String,
}

/// A unit of work created by planning. Tagged over Literature/Analysis so
/// stage code never needs an `if task.type == ..` ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum PlanTask {
    Literature {
        id: String,
        level: u32,
        objective: String,
        #[serde(default)]
        output: String,
        #[serde(default)]
        job_id: Option<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    Analysis {
        id: String,
        level: u32,
        objective: String,
        datasets: Vec<DatasetId>,
        #[serde(default)]
        output: String,
        #[serde(default)]
        artifacts: Vec<String>,
        #[serde(default)]
        job_id: Option<String>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl PlanTask {
    pub fn id(&self) -> &str {
        match self {
            PlanTask::Literature { id, .. } => id,
            PlanTask::Analysis { id, .. } => id,
        }
    }

    pub fn level(&self) -> u32 {
        match self {
            PlanTask::Literature { level, .. } => *level,
            PlanTask::Analysis { level, .. } => *level,
        }
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        match self {
            PlanTask::Literature { end, .. } => *end,
            PlanTask::Analysis { end, .. } => *end,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.end().is_some()
    }

    pub fn append_output(&mut self, text: &str) {
        match self {
            PlanTask::Literature { output, .. } => {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(text);
            }
            PlanTask::Analysis { output, .. } => {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(text);
            }
        }
    }

    pub fn mark_start(&mut self, at: DateTime<Utc>) {
        match self {
            PlanTask::Literature { start, .. } => *start = Some(at),
            PlanTask::Analysis { start, .. } => *start = Some(at),
        }
    }

    pub fn mark_end(&mut self, at: DateTime<Utc>) {
        match self {
            PlanTask::Literature { end, .. } => *end = Some(at),
            PlanTask::Analysis { end, .. } => *end = Some(at),
        }
    }

    /// Build the canonical `<type-prefix>-<level>` id (§3 invariant).
    pub fn make_id(kind: PlanTaskKind, level: u32) -> String {
        match kind {
            PlanTaskKind::Literature => format!("lit-{level}"),
            PlanTaskKind::Analysis => format!("ana-{level}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTaskKind {
    Literature,
    Analysis,
}

/// A candidate task produced by next-mode planning, not yet promoted into
/// `plan`. Carries no level until promotion (§4.8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum SuggestedTask {
    Literature { objective: String },
    Analysis { objective: String, datasets: Vec<DatasetId> },
}

impl SuggestedTask {
    /// Promote into a full PlanTask at `level`, minting a fresh id.
    pub fn promote(self, level: u32) -> PlanTask {
        match self {
            SuggestedTask::Literature { objective } => PlanTask::Literature {
                id: PlanTask::make_id(PlanTaskKind::Literature, level),
                level,
                objective,
                output: String::new(),
                job_id: None,
                start: None,
                end: None,
            },
            SuggestedTask::Analysis { objective, datasets } => PlanTask::Analysis {
                id: PlanTask::make_id(PlanTaskKind::Analysis, level),
                level,
                objective,
                datasets,
                output: String::new(),
                artifacts: Vec::new(),
                job_id: None,
                start: None,
                end: None,
            },
        }
    }
}

/// Mutable research-scoped state shared across all iterations of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: ConversationStateId,
    pub conversation_id: ConversationId,
    pub objective: String,
    pub current_objective: String,
    pub plan: Vec<PlanTask>,
    pub current_level: i64,
    pub suggested_next_steps: Vec<SuggestedTask>,
    pub current_hypothesis: String,
    pub key_insights: Vec<String>,
    pub discoveries: Vec<String>,
    pub methodology: String,
    pub conversation_title: String,
    pub uploaded_datasets: Vec<Dataset>,
    pub research_mode: ResearchMode,
    /// Append-only, open-ended sidebar for agent-produced data with no typed
    /// field (spec.md §9's "agent free-form bag"). Never read by orchestrator
    /// logic; only merged and persisted.
    #[serde(default)]
    pub agent_notes: serde_json::Value,
}

impl ConversationState {
    pub fn new(conversation_id: ConversationId, objective: String) -> Self {
        Self {
            id: ConversationStateId::new(),
            conversation_id,
            objective: objective.clone(),
            current_objective: objective,
            plan: Vec::new(),
            current_level: -1,
            suggested_next_steps: Vec::new(),
            current_hypothesis: String::new(),
            key_insights: Vec::new(),
            discoveries: Vec::new(),
            methodology: String::new(),
            conversation_title: String::new(),
            uploaded_datasets: Vec::new(),
            research_mode: ResearchMode::default(),
            agent_notes: serde_json::Value::Null,
        }
    }

    /// §3 invariant: `currentLevel == max(level) over plan`, or -1 if empty.
    pub fn recompute_current_level(&mut self) {
        self.current_level = self
            .plan
            .iter()
            .map(|t| t.level() as i64)
            .max()
            .unwrap_or(-1);
    }

    /// Tasks at exactly `level` that have not yet finished.
    pub fn pending_tasks_at_level(&mut self, level: u32) -> Vec<&mut PlanTask> {
        self.plan
            .iter_mut()
            .filter(|t| t.level() == level && !t.is_terminal())
            .collect()
    }

    /// §3 invariant: insertion order most-recent-first, at most one entry
    /// per filename.
    pub fn add_dataset(&mut self, dataset: Dataset) {
        self.uploaded_datasets.retain(|d| d.filename != dataset.filename);
        self.uploaded_datasets.insert(0, dataset);
    }

    /// §GLOSSARY: bounds reply context to the last three levels of the
    /// current user session.
    pub fn session_start_level(&self) -> i64 {
        (self.current_level - 2).max(0)
    }
}
