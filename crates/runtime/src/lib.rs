//! Research job orchestrator runtime.
//!
//! Wires the Durable Queue, Notification Bus, State Store, Distributed Lock,
//! File-Ready Barrier, Agent Invoker, Iteration Executor, Chain Controller
//! and Worker Runtime into a single assembled [`Orchestrator`].

pub mod agents;
pub mod chain;
pub mod config;
pub mod credit;
pub mod executor;
pub mod file_barrier;
pub mod lock;
pub mod notify;
pub mod queue;
pub mod state_store;
pub mod types;
pub mod worker;

pub use chain::ChainController;
pub use config::{ConfigError, OrchestratorConfig};
pub use executor::{ExecutorConfig, ExecutorDeps};
pub use queue::{DurableQueueClient, InMemoryQueue};
pub use types::*;
pub use worker::{WorkerPoolConfig, WorkerRuntime};

use std::sync::Arc;

use thiserror::Error;

use agents::stub::{
    StubContinueDecisionAgent, StubDiscoveryAgent, StubHypothesisAgent, StubPlanningAgent,
    StubReflectionAgent, StubRemoteAgent, StubReplyAgent,
};
use credit::{CreditCollaborator, LoggingCreditCollaborator};
use executor::DefaultDiscoveryGate;
use file_barrier::EmptyFileQueue;
use lock::InMemoryLock;
use notify::InMemoryNotificationBus;
use state_store::InMemoryStateStore;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Top-level assembly of every collaborator plus the worker pool that
/// drives the deep-research queue. Analogous to the teacher's
/// `AgentRuntime`: one struct holding `Arc<dyn Trait>` per component, built
/// by a single async constructor.
#[derive(Clone)]
pub struct Orchestrator {
    pub deps: ExecutorDeps,
    pub chain: Arc<ChainController>,
    pub worker: Arc<WorkerRuntime>,
}

impl Orchestrator {
    /// Assemble the orchestrator from config, using the in-memory/stub
    /// collaborators as defaults for every external dependency (§1
    /// non-goals: the durable backend, settlement backend, file-ingest
    /// queue and remote agent backends are all external collaborators).
    /// Swap individual fields on the returned `ExecutorDeps` to wire in
    /// real backends.
    pub fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let queue: Arc<dyn DurableQueueClient> = Arc::new(InMemoryQueue::new());
        let notify = Arc::new(InMemoryNotificationBus::default());
        let store = Arc::new(InMemoryStateStore::new());
        let lock = Arc::new(InMemoryLock::new());
        let file_ingest = Arc::new(EmptyFileQueue);
        let credit: Arc<dyn CreditCollaborator> = Arc::new(LoggingCreditCollaborator);

        let chain = Arc::new(ChainController::new(queue.clone(), credit));

        let deps = ExecutorDeps {
            queue: queue.clone(),
            notify,
            store,
            lock,
            file_ingest,
            planning: Arc::new(StubPlanningAgent),
            primary_literature: Arc::new(StubRemoteAgent {
                agent_name: format!("{:?}", config.agents.primary_literature),
            }),
            optional_literature: Vec::new(),
            analysis: Arc::new(StubRemoteAgent {
                agent_name: config.agents.primary_analysis.clone(),
            }),
            hypothesis: Arc::new(StubHypothesisAgent),
            reflection: Arc::new(StubReflectionAgent),
            discovery: Arc::new(StubDiscoveryAgent),
            discovery_gate: Arc::new(DefaultDiscoveryGate),
            continue_decision: Arc::new(StubContinueDecisionAgent),
            reply: Arc::new(StubReplyAgent),
            chain: chain.clone(),
            config: config.iterations.to_executor_config(config.workers.deep_research.poll_interval),
        };

        let worker = Arc::new(WorkerRuntime::new(queue, config.workers));

        Ok(Self { deps, chain, worker })
    }

    /// Start the deep-research worker loop. Call once; further calls would
    /// spawn duplicate reserve loops.
    pub fn start(&self) {
        self.worker.spawn_deep_research(self.deps.clone());
    }

    pub async fn shutdown(&self, grace: std::time::Duration) {
        self.worker.shutdown(grace).await;
    }
}
