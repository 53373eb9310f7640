//! Credit/payment collaborator hooks (spec §6).
//!
//! Two lifecycle hooks invoked by the Chain Controller: `complete` on final
//! success, `refund` on final failure. The real settlement backend is an
//! external collaborator per §1 non-goals; this module only defines the
//! narrow interface and an in-memory recorder for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::types::JobId;

#[async_trait]
pub trait CreditCollaborator: Send + Sync {
    async fn complete(&self, root_job_id: JobId, iterations: u32);
    async fn refund(&self, root_job_id: JobId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditEvent {
    Completed { root_job_id: JobId, iterations: u32 },
    Refunded { root_job_id: JobId },
}

/// Default production collaborator when no real settlement backend is
/// wired in: logs the lifecycle event and otherwise does nothing.
pub struct LoggingCreditCollaborator;

#[async_trait]
impl CreditCollaborator for LoggingCreditCollaborator {
    async fn complete(&self, root_job_id: JobId, iterations: u32) {
        tracing::info!(root_job_id = %root_job_id, iterations, "credit complete (no settlement backend configured)");
    }

    async fn refund(&self, root_job_id: JobId) {
        tracing::info!(root_job_id = %root_job_id, "credit refund (no settlement backend configured)");
    }
}

/// Records every hook invocation for assertions in tests.
#[derive(Default)]
pub struct RecordingCreditCollaborator {
    events: Mutex<Vec<CreditEvent>>,
}

impl RecordingCreditCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CreditEvent> {
        self.events.lock().expect("not poisoned").clone()
    }
}

#[async_trait]
impl CreditCollaborator for RecordingCreditCollaborator {
    async fn complete(&self, root_job_id: JobId, iterations: u32) {
        tracing::info!(root_job_id = %root_job_id, iterations, "credit complete");
        self.events
            .lock()
            .expect("not poisoned")
            .push(CreditEvent::Completed { root_job_id, iterations });
    }

    async fn refund(&self, root_job_id: JobId) {
        tracing::info!(root_job_id = %root_job_id, "credit refund");
        self.events
            .lock()
            .expect("not poisoned")
            .push(CreditEvent::Refunded { root_job_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_complete_then_refund() {
        let credit = RecordingCreditCollaborator::new();
        let root = JobId::new();
        credit.complete(root, 3).await;
        credit.refund(root).await;
        assert_eq!(
            credit.events(),
            vec![
                CreditEvent::Completed { root_job_id: root, iterations: 3 },
                CreditEvent::Refunded { root_job_id: root },
            ]
        );
    }
}
