//! HTTP-backed `RemoteAgent` transport (SPEC_FULL.md §4.5.1, `http-agents` feature).
//!
//! POSTs to `{base_url}/submit` to start a task, GETs `{base_url}/tasks/{id}`
//! to poll it. Used in place of the in-process stubs in `stub.rs` once a
//! real literature/analysis backend is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::AgentError;

use super::{RemoteAgent, RemoteTaskState, RemoteTaskStatus};

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    query: &'a str,
    refs: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    state: WireState,
    answer: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireState {
    Queued,
    InProgress,
    Success,
    Failed,
}

impl From<WireState> for RemoteTaskState {
    fn from(s: WireState) -> Self {
        match s {
            WireState::Queued => RemoteTaskState::Queued,
            WireState::InProgress => RemoteTaskState::InProgress,
            WireState::Success => RemoteTaskState::Success,
            WireState::Failed => RemoteTaskState::Failed,
        }
    }
}

pub struct HttpRemoteAgent {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteAgent {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RemoteAgent for HttpRemoteAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, query: &str, refs: &[String]) -> Result<String, AgentError> {
        let url = format!("{}/submit", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&SubmitRequest { query, refs })
            .send()
            .await
            .map_err(|e| AgentError::Transport { agent: self.name.clone(), message: e.to_string() })?;

        if !resp.status().is_success() {
            return Err(AgentError::Remote {
                agent: self.name.clone(),
                message: format!("submit returned {}", resp.status()),
            });
        }

        resp.json::<SubmitResponse>()
            .await
            .map(|r| r.task_id)
            .map_err(|e| AgentError::Transport { agent: self.name.clone(), message: e.to_string() })
    }

    async fn poll(&self, task_id: &str) -> Result<RemoteTaskStatus, AgentError> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Transport { agent: self.name.clone(), message: e.to_string() })?;

        if !resp.status().is_success() {
            return Err(AgentError::Remote {
                agent: self.name.clone(),
                message: format!("poll returned {}", resp.status()),
            });
        }

        let body: PollResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::Transport { agent: self.name.clone(), message: e.to_string() })?;

        Ok(RemoteTaskStatus {
            state: body.state.into(),
            answer: body.answer,
            error: body.error,
        })
    }
}
