//! Agent Invoker (spec §4.5, supplemental transport in SPEC_FULL.md §4.5.1).
//!
//! Each agent is a capability with signature `invoke(params) -> result`.
//! Literature and analysis agents are additionally modeled as `RemoteAgent`s
//! behind a submit/poll transport, since §6 describes them as remote
//! task-start + poll-status collaborators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{AgentError, DatasetId};

pub mod stub;

#[cfg(feature = "http-agents")]
pub mod http;

/// Planning mode: initial (first iteration) or next (produces suggestions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningMode {
    Initial,
    Next,
}

#[derive(Debug, Clone)]
pub struct PlanTaskDraft {
    pub kind: crate::types::PlanTaskKind,
    pub objective: String,
    pub datasets: Vec<DatasetId>,
}

#[derive(Debug, Clone)]
pub struct PlanningOutput {
    pub plan: Vec<PlanTaskDraft>,
    pub current_objective: String,
}

#[async_trait]
pub trait PlanningAgent: Send + Sync {
    async fn invoke(
        &self,
        mode: PlanningMode,
        objective: &str,
        conversation_context: &str,
    ) -> Result<PlanningOutput, AgentError>;
}

/// Literature source selected by configuration (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiteratureSource {
    Edison,
    BioLitDeep,
    BioLit,
    OpenScholar,
    Knowledge,
}

#[derive(Debug, Clone)]
pub struct LiteratureOutput {
    pub output: String,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisAgentKind {
    Edison,
    Bio,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub output: String,
    pub artifacts: Vec<String>,
    pub job_id: String,
}

#[derive(Debug, Clone)]
pub struct HypothesisOutput {
    pub hypothesis: String,
    pub mode: String,
}

#[derive(Debug, Clone)]
pub struct ReflectionOutput {
    /// Only set when reflection detects a fundamental direction change.
    pub objective: Option<String>,
    pub conversation_title: String,
    pub current_objective: String,
    pub key_insights: Vec<String>,
    pub methodology: String,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutput {
    pub discoveries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContinueDecisionOutput {
    pub should_continue: bool,
    pub confidence: f32,
    pub reasoning: String,
    pub trigger_reason: String,
}

#[derive(Debug, Clone)]
pub struct ReplyOutput {
    pub reply: String,
    pub summary: String,
}

#[async_trait]
pub trait HypothesisAgent: Send + Sync {
    async fn invoke(&self, context: &str) -> Result<HypothesisOutput, AgentError>;
}

#[async_trait]
pub trait ReflectionAgent: Send + Sync {
    async fn invoke(&self, context: &str) -> Result<ReflectionOutput, AgentError>;
}

#[async_trait]
pub trait DiscoveryAgent: Send + Sync {
    async fn invoke(&self, context: &str) -> Result<DiscoveryOutput, AgentError>;
}

#[async_trait]
pub trait ContinueDecisionAgent: Send + Sync {
    async fn invoke(&self, context: &str) -> Result<ContinueDecisionOutput, AgentError>;
}

#[async_trait]
pub trait ReplyAgent: Send + Sync {
    async fn invoke(&self, context: &str, is_final: bool) -> Result<ReplyOutput, AgentError>;
}

/// Terminal/non-terminal state of a remote long-running agent task (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTaskState {
    Queued,
    InProgress,
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RemoteTaskStatus {
    pub state: RemoteTaskState,
    pub answer: Option<String>,
    pub error: Option<String>,
}

/// submit(query, refs) -> taskId; poll(taskId) -> status (§6).
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, query: &str, refs: &[String]) -> Result<String, AgentError>;

    async fn poll(&self, task_id: &str) -> Result<RemoteTaskStatus, AgentError>;
}

/// Loops `poll` at the configured cadence until a terminal state or timeout
/// (SPEC_FULL.md §4.5.1). Used by the Literature and Analysis wrappers,
/// which are the only agents spec.md §6 describes as remote task-start +
/// poll-status collaborators.
pub struct PollingAgentInvoker {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl PollingAgentInvoker {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self { poll_interval, timeout }
    }

    pub async fn run(
        &self,
        agent: &dyn RemoteAgent,
        query: &str,
        refs: &[String],
    ) -> Result<RemoteTaskStatus, AgentError> {
        let task_id = agent.submit(query, refs).await?;
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let status = agent.poll(&task_id).await?;
            match status.state {
                RemoteTaskState::Success | RemoteTaskState::Failed => return Ok(status),
                RemoteTaskState::Queued | RemoteTaskState::InProgress => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(AgentError::Timeout {
                            agent: agent.name().to_string(),
                            timeout: self.timeout,
                        });
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
