//! Deterministic in-process agent implementations.
//!
//! Used by tests and as the default wiring when `http-agents` is not
//! enabled (SPEC_FULL.md §4.5.1: no poll-loop transport configured).

use async_trait::async_trait;

use super::*;
use crate::types::PlanTaskKind;

/// Planning stub: on `Initial`, emits one literature and one analysis task;
/// on `Next`, emits a single literature follow-up.
pub struct StubPlanningAgent;

#[async_trait]
impl PlanningAgent for StubPlanningAgent {
    async fn invoke(
        &self,
        mode: PlanningMode,
        objective: &str,
        _conversation_context: &str,
    ) -> Result<PlanningOutput, AgentError> {
        let plan = match mode {
            PlanningMode::Initial => vec![
                PlanTaskDraft {
                    kind: PlanTaskKind::Literature,
                    objective: format!("survey prior work on: {objective}"),
                    datasets: vec![],
                },
                PlanTaskDraft {
                    kind: PlanTaskKind::Analysis,
                    objective: format!("analyze available data for: {objective}"),
                    datasets: vec![],
                },
            ],
            PlanningMode::Next => vec![PlanTaskDraft {
                kind: PlanTaskKind::Literature,
                objective: format!("follow up on: {objective}"),
                datasets: vec![],
            }],
        };
        Ok(PlanningOutput {
            plan,
            current_objective: objective.to_string(),
        })
    }
}

pub struct StubRemoteAgent {
    pub agent_name: String,
}

#[async_trait]
impl RemoteAgent for StubRemoteAgent {
    fn name(&self) -> &str {
        &self.agent_name
    }

    async fn submit(&self, query: &str, _refs: &[String]) -> Result<String, AgentError> {
        Ok(format!("{}-{}", self.agent_name, query.len()))
    }

    async fn poll(&self, task_id: &str) -> Result<RemoteTaskStatus, AgentError> {
        Ok(RemoteTaskStatus {
            state: RemoteTaskState::Success,
            answer: Some(format!("findings for task {task_id}")),
            error: None,
        })
    }
}

pub struct StubHypothesisAgent;

#[async_trait]
impl HypothesisAgent for StubHypothesisAgent {
    async fn invoke(&self, context: &str) -> Result<HypothesisOutput, AgentError> {
        Ok(HypothesisOutput {
            hypothesis: format!("hypothesis derived from: {context}"),
            mode: "generated".into(),
        })
    }
}

pub struct StubReflectionAgent;

#[async_trait]
impl ReflectionAgent for StubReflectionAgent {
    async fn invoke(&self, context: &str) -> Result<ReflectionOutput, AgentError> {
        Ok(ReflectionOutput {
            objective: None,
            conversation_title: "Research session".into(),
            current_objective: context.to_string(),
            key_insights: vec![],
            methodology: "iterative literature + analysis".into(),
        })
    }
}

pub struct StubDiscoveryAgent;

#[async_trait]
impl DiscoveryAgent for StubDiscoveryAgent {
    async fn invoke(&self, _context: &str) -> Result<DiscoveryOutput, AgentError> {
        Ok(DiscoveryOutput { discoveries: vec![] })
    }
}

/// Always declines to continue; deployments wire in a real policy.
pub struct StubContinueDecisionAgent;

#[async_trait]
impl ContinueDecisionAgent for StubContinueDecisionAgent {
    async fn invoke(&self, _context: &str) -> Result<ContinueDecisionOutput, AgentError> {
        Ok(ContinueDecisionOutput {
            should_continue: false,
            confidence: 1.0,
            reasoning: "stub always concludes".into(),
            trigger_reason: "none".into(),
        })
    }
}

pub struct StubReplyAgent;

#[async_trait]
impl ReplyAgent for StubReplyAgent {
    async fn invoke(&self, context: &str, is_final: bool) -> Result<ReplyOutput, AgentError> {
        Ok(ReplyOutput {
            reply: format!("{}: {}", if is_final { "Final answer" } else { "Update" }, context),
            summary: context.chars().take(80).collect(),
        })
    }
}
