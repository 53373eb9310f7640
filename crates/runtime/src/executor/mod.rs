//! Iteration Executor (spec §4.7) — the per-job state machine.
//!
//! One reserved deep-research job drives exactly one pass through
//! S1 Bootstrap → S2 Planning → S3 Fan-out → S4 Hypothesis → S5 Reflect+Discover
//! → S6 Plan-next → S7 Decide-continue → S8 Reply → S9 Chain-or-complete.
//!
//! Implemented as a typestate machine: each stage consumes `self` and
//! returns the next stage's type, so calling stages out of order or
//! skipping one is a compile-time error.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;

use crate::agents::{
    ContinueDecisionAgent, DiscoveryAgent, HypothesisAgent, PlanningAgent, PlanningMode,
    PollingAgentInvoker, RemoteAgent, RemoteTaskState, ReflectionAgent, ReplyAgent,
};
use crate::chain::ChainController;
use crate::file_barrier::{FileIngestQueue, FileReadyBarrier};
use crate::lock::DistributedLock;
use crate::notify::{NotificationBus, OrchestratorEvent, Progress};
use crate::queue::DurableQueueClient;
use crate::state_store::{ConversationStateUpdate, IterationStateUpdate, MessageUpdate, StateStore};
use crate::types::{
    ConversationState, DeepResearchJobData, ExecutorError, IterationState, IterationStateId,
    IterationStatus, Job, Message, MessageId, MessageSource, PlanTask, PlanTaskKind, ResearchMode,
};

/// Deployment-specific policy deciding whether discovery runs alongside
/// reflection (glossary: *discovery gate*).
pub trait DiscoveryGate: Send + Sync {
    fn should_run(&self, conversation_state: &ConversationState, tasks_completed_this_iteration: usize) -> bool;
}

/// Runs discovery once the conversation is past its first planning level, or
/// whenever more than one task closed out this iteration.
pub struct DefaultDiscoveryGate;

impl DiscoveryGate for DefaultDiscoveryGate {
    fn should_run(&self, conversation_state: &ConversationState, tasks_completed_this_iteration: usize) -> bool {
        conversation_state.current_level >= 1 || tasks_completed_this_iteration >= 2
    }
}

#[derive(Clone, Copy)]
pub struct ExecutorConfig {
    pub semi_autonomous_cap: u32,
    pub literature_timeout: Duration,
    pub analysis_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            semi_autonomous_cap: 5,
            literature_timeout: Duration::from_secs(30 * 60),
            analysis_timeout: Duration::from_secs(60 * 60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Every collaborator the executor calls through. Cloning is cheap (all
/// fields are `Arc`).
#[derive(Clone)]
pub struct ExecutorDeps {
    pub queue: Arc<dyn DurableQueueClient>,
    pub notify: Arc<dyn NotificationBus>,
    pub store: Arc<dyn StateStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub file_ingest: Arc<dyn FileIngestQueue>,
    pub planning: Arc<dyn PlanningAgent>,
    pub primary_literature: Arc<dyn RemoteAgent>,
    pub optional_literature: Vec<Arc<dyn RemoteAgent>>,
    pub analysis: Arc<dyn RemoteAgent>,
    pub hypothesis: Arc<dyn HypothesisAgent>,
    pub reflection: Arc<dyn ReflectionAgent>,
    pub discovery: Arc<dyn DiscoveryAgent>,
    pub discovery_gate: Arc<dyn DiscoveryGate>,
    pub continue_decision: Arc<dyn ContinueDecisionAgent>,
    pub reply: Arc<dyn ReplyAgent>,
    pub chain: Arc<ChainController>,
    pub config: ExecutorConfig,
}

/// What S9 decided: finish the chain here, or hand a successor payload back
/// to the worker to enqueue-then-ack.
pub enum IterationOutcome {
    Complete,
    Continue { successor: DeepResearchJobData },
}

trait ExecutorPhase {}
pub struct Bootstrap;
pub struct Planning;
pub struct FanOut;
pub struct Hypothesis;
pub struct ReflectDiscover;
pub struct PlanNext;
pub struct DecideContinue;
pub struct Reply;
pub struct ChainOrComplete;
impl ExecutorPhase for Bootstrap {}
impl ExecutorPhase for Planning {}
impl ExecutorPhase for FanOut {}
impl ExecutorPhase for Hypothesis {}
impl ExecutorPhase for ReflectDiscover {}
impl ExecutorPhase for PlanNext {}
impl ExecutorPhase for DecideContinue {}
impl ExecutorPhase for Reply {}
impl ExecutorPhase for ChainOrComplete {}

/// Data threaded through every stage of one iteration.
pub struct IterationRun {
    pub job: Job,
    pub message: Message,
    pub iteration_state: IterationState,
    pub conversation_state: ConversationState,
    pub effective_mode: ResearchMode,
    pub max_auto_iterations: u32,
    pub session_start_level: i64,
    pub new_level: u32,
    pub tasks_completed_this_iteration: usize,
    pub will_continue: bool,
    pub is_final: bool,
    pub started_at: Instant,
}

pub struct Executor<Phase: ExecutorPhase> {
    run: IterationRun,
    deps: ExecutorDeps,
    _phase: PhantomData<Phase>,
}

fn build_context(cs: &ConversationState) -> String {
    format!(
        "objective: {}\ncurrent_objective: {}\nhypothesis: {}\ninsights: {}\nmethodology: {}",
        cs.objective,
        cs.current_objective,
        cs.current_hypothesis,
        cs.key_insights.join("; "),
        cs.methodology,
    )
}

async fn publish_progress(deps: &ExecutorDeps, run: &IterationRun, stage: &str, percent: u8) {
    deps.notify
        .publish(
            run.message.conversation_id,
            OrchestratorEvent::JobProgress {
                job_id: run.job.id,
                conversation_id: run.message.conversation_id,
                progress: Progress {
                    stage: stage.to_string(),
                    percent,
                },
            },
        )
        .await;
}

impl Executor<Bootstrap> {
    /// S1: load records, validate, reconcile mode, compute derived fields.
    /// A missing record is non-retryable and is the only failure that does
    /// not invoke the credit refund hook (no iteration ever started).
    pub async fn bootstrap(deps: ExecutorDeps, job: Job) -> Result<Executor<Planning>, ExecutorError> {
        let payload = job.payload.clone();

        let message = deps
            .store
            .get_message(payload.message_id)
            .await
            .map_err(|_| ExecutorError::MissingRecord(format!("message {}", payload.message_id)))?;
        let iteration_state = deps
            .store
            .get_state(payload.state_id)
            .await
            .map_err(|_| ExecutorError::MissingRecord(format!("iteration state {}", payload.state_id)))?;
        let mut conversation_state = deps
            .store
            .get_conversation_state(payload.conversation_state_id)
            .await
            .map_err(|_| ExecutorError::MissingRecord(format!("conversation state {}", payload.conversation_state_id)))?;

        deps.store
            .update_state(
                iteration_state.id,
                IterationStateUpdate {
                    is_deep_research: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let effective_mode = payload.research_mode;
        let max_auto_iterations = effective_mode.max_auto_iterations(deps.config.semi_autonomous_cap);
        let session_start_level = conversation_state.session_start_level();

        deps.notify
            .publish(
                message.conversation_id,
                OrchestratorEvent::JobStarted {
                    job_id: job.id,
                    conversation_id: message.conversation_id,
                },
            )
            .await;

        if payload.is_initial_iteration {
            let barrier = FileReadyBarrier::default();
            let outcome = barrier
                .wait(deps.file_ingest.as_ref(), payload.conversation_state_id)
                .await?;
            if !outcome.ready.is_empty() || outcome.timed_out {
                conversation_state = deps.store.get_conversation_state(payload.conversation_state_id).await?;
            }
        }

        let run = IterationRun {
            job,
            message,
            iteration_state,
            conversation_state,
            effective_mode,
            max_auto_iterations,
            session_start_level,
            new_level: 0,
            tasks_completed_this_iteration: 0,
            will_continue: false,
            is_final: false,
            started_at: Instant::now(),
        };
        Ok(Executor { run, deps, _phase: PhantomData })
    }
}

impl Executor<Planning> {
    /// S2: initial iterations plan fresh tasks at a new level; continuation
    /// iterations use the level the predecessor already promoted into `plan`.
    pub async fn plan(mut self) -> Result<Executor<FanOut>, ExecutorError> {
        publish_progress(&self.deps, &self.run, "planning", 5).await;

        if self.run.job.payload.is_initial_iteration {
            let output = self
                .deps
                .planning
                .invoke(PlanningMode::Initial, &self.run.conversation_state.objective, &build_context(&self.run.conversation_state))
                .await?;

            let new_level = (self.run.conversation_state.current_level + 1).max(0) as u32;
            for draft in output.plan {
                let id = PlanTask::make_id(draft.kind, new_level);
                let task = match draft.kind {
                    PlanTaskKind::Literature => PlanTask::Literature {
                        id,
                        level: new_level,
                        objective: draft.objective,
                        output: String::new(),
                        job_id: None,
                        start: None,
                        end: None,
                    },
                    PlanTaskKind::Analysis => PlanTask::Analysis {
                        id,
                        level: new_level,
                        objective: draft.objective,
                        datasets: draft.datasets,
                        output: String::new(),
                        artifacts: Vec::new(),
                        job_id: None,
                        start: None,
                        end: None,
                    },
                };
                self.run.conversation_state.plan.push(task);
            }
            self.run.conversation_state.suggested_next_steps.clear();
            self.run.conversation_state.current_objective = output.current_objective;
            self.run.conversation_state.recompute_current_level();
            self.run.new_level = new_level;
        } else {
            self.run.new_level = self.run.conversation_state.current_level.max(0) as u32;
        }

        self.deps
            .store
            .update_conversation_state(ConversationStateUpdate {
                new_state: self.run.conversation_state.clone(),
                preserve_uploaded_datasets: true,
            })
            .await?;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<FanOut> {
    /// S3: run every unfinished task at `new_level` concurrently; task
    /// failures are absorbed into `task.output`, never abort the iteration.
    pub async fn fan_out(mut self) -> Result<Executor<Hypothesis>, ExecutorError> {
        publish_progress(&self.deps, &self.run, "fan_out", 20).await;

        let new_level = self.run.new_level;
        let pending_indices: Vec<usize> = self
            .run
            .conversation_state
            .plan
            .iter()
            .enumerate()
            .filter(|(_, t)| t.level() == new_level && !t.is_terminal())
            .map(|(i, _)| i)
            .collect();

        let literature_invoker = PollingAgentInvoker::new(self.deps.config.poll_interval, self.deps.config.literature_timeout);
        let analysis_invoker = PollingAgentInvoker::new(self.deps.config.poll_interval, self.deps.config.analysis_timeout);

        let mut completed = 0usize;
        for idx in pending_indices {
            let kind = match &self.run.conversation_state.plan[idx] {
                PlanTask::Literature { .. } => PlanTaskKind::Literature,
                PlanTask::Analysis { .. } => PlanTaskKind::Analysis,
            };
            self.run.conversation_state.plan[idx].mark_start(Utc::now());

            match kind {
                PlanTaskKind::Literature => {
                    let objective = match &self.run.conversation_state.plan[idx] {
                        PlanTask::Literature { objective, .. } => objective.clone(),
                        _ => unreachable!(),
                    };
                    let mut sources: Vec<&Arc<dyn RemoteAgent>> = vec![&self.deps.primary_literature];
                    sources.extend(self.deps.optional_literature.iter());
                    let results = join_all(sources.into_iter().map(|agent| {
                        let invoker = &literature_invoker;
                        async move { invoker.run(agent.as_ref(), &objective, &[]).await }
                    }))
                    .await;
                    for result in results {
                        match result {
                            Ok(status) => {
                                if let Some(answer) = status.answer {
                                    self.run.conversation_state.plan[idx].append_output(&answer);
                                }
                                if let Some(err) = status.error {
                                    self.run.conversation_state.plan[idx].append_output(&format!("[error] {err}"));
                                }
                            }
                            Err(e) => self.run.conversation_state.plan[idx].append_output(&format!("[error] {e}")),
                        }
                    }
                }
                PlanTaskKind::Analysis => {
                    let objective = match &self.run.conversation_state.plan[idx] {
                        PlanTask::Analysis { objective, .. } => objective.clone(),
                        _ => unreachable!(),
                    };
                    match analysis_invoker.run(self.deps.analysis.as_ref(), &objective, &[]).await {
                        Ok(status) => {
                            if status.state == RemoteTaskState::Success {
                                if let Some(answer) = status.answer {
                                    self.run.conversation_state.plan[idx].append_output(&answer);
                                }
                            } else if let Some(err) = status.error {
                                self.run.conversation_state.plan[idx].append_output(&format!("[error] {err}"));
                            }
                        }
                        Err(e) => self.run.conversation_state.plan[idx].append_output(&format!("[error] {e}")),
                    }
                }
            }

            self.run.conversation_state.plan[idx].mark_end(Utc::now());
            completed += 1;

            self.deps
                .store
                .update_conversation_state(ConversationStateUpdate {
                    new_state: self.run.conversation_state.clone(),
                    preserve_uploaded_datasets: true,
                })
                .await?;
        }
        self.run.tasks_completed_this_iteration = completed;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<Hypothesis> {
    /// S4: always runs, regardless of whether S3 tasks fully succeeded.
    pub async fn hypothesize(mut self) -> Result<Executor<ReflectDiscover>, ExecutorError> {
        publish_progress(&self.deps, &self.run, "hypothesis", 70).await;

        let output = self.deps.hypothesis.invoke(&build_context(&self.run.conversation_state)).await?;
        self.run.conversation_state.current_hypothesis = output.hypothesis;

        self.deps
            .store
            .update_conversation_state(ConversationStateUpdate {
                new_state: self.run.conversation_state.clone(),
                preserve_uploaded_datasets: true,
            })
            .await?;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<ReflectDiscover> {
    /// S5: reflection is unconditional; discovery is gated and non-fatal.
    pub async fn reflect_and_discover(mut self) -> Result<Executor<PlanNext>, ExecutorError> {
        publish_progress(&self.deps, &self.run, "reflect_discover", 85).await;

        let context = build_context(&self.run.conversation_state);
        let run_discovery = self
            .deps
            .discovery_gate
            .should_run(&self.run.conversation_state, self.run.tasks_completed_this_iteration);

        let (reflection, discovery) = tokio::join!(
            self.deps.reflection.invoke(&context),
            async {
                if run_discovery {
                    Some(self.deps.discovery.invoke(&context).await)
                } else {
                    None
                }
            }
        );
        let reflection = reflection?;

        if let Some(new_objective) = reflection.objective {
            if new_objective != self.run.conversation_state.objective {
                self.deps
                    .notify
                    .publish(
                        self.run.message.conversation_id,
                        OrchestratorEvent::RootObjectiveChange {
                            conversation_id: self.run.message.conversation_id,
                            previous: self.run.conversation_state.objective.clone(),
                            new: new_objective.clone(),
                        },
                    )
                    .await;
                self.run.conversation_state.objective = new_objective;
            }
        }
        self.run.conversation_state.conversation_title = reflection.conversation_title;
        self.run.conversation_state.current_objective = reflection.current_objective;
        self.run.conversation_state.key_insights = reflection.key_insights;
        self.run.conversation_state.methodology = reflection.methodology;

        match discovery {
            Some(Ok(output)) => self.run.conversation_state.discoveries = output.discoveries,
            Some(Err(e)) => tracing::warn!(error = %e, "discovery agent failed, continuing without discoveries"),
            None => {}
        }

        self.deps
            .store
            .update_conversation_state(ConversationStateUpdate {
                new_state: self.run.conversation_state.clone(),
                preserve_uploaded_datasets: true,
            })
            .await?;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<PlanNext> {
    /// S6: produces `suggestedNextSteps`, not yet promoted into `plan`.
    pub async fn plan_next(mut self) -> Result<Executor<DecideContinue>, ExecutorError> {
        let output = self
            .deps
            .planning
            .invoke(PlanningMode::Next, &self.run.conversation_state.current_objective, &build_context(&self.run.conversation_state))
            .await?;

        if !output.plan.is_empty() {
            self.run.conversation_state.suggested_next_steps = output
                .plan
                .into_iter()
                .map(|draft| match draft.kind {
                    PlanTaskKind::Literature => crate::types::SuggestedTask::Literature { objective: draft.objective },
                    PlanTaskKind::Analysis => crate::types::SuggestedTask::Analysis {
                        objective: draft.objective,
                        datasets: draft.datasets,
                    },
                })
                .collect();
            self.run.conversation_state.current_objective = output.current_objective;
        }

        self.deps
            .store
            .update_conversation_state(ConversationStateUpdate {
                new_state: self.run.conversation_state.clone(),
                preserve_uploaded_datasets: true,
            })
            .await?;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<DecideContinue> {
    /// S7: continue only below the iteration cap and with suggestions in hand.
    pub async fn decide_continue(mut self) -> Result<Executor<Reply>, ExecutorError> {
        let eligible = self.run.job.payload.iteration_number < self.run.max_auto_iterations
            && !self.run.conversation_state.suggested_next_steps.is_empty();

        self.run.will_continue = if eligible {
            let output = self.deps.continue_decision.invoke(&build_context(&self.run.conversation_state)).await?;
            output.should_continue
        } else {
            false
        };
        self.run.is_final = !self.run.will_continue;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<Reply> {
    /// S8: writes Message.content + response_time exactly once per attempt;
    /// last-write-wins on retry since agents are non-deterministic.
    pub async fn reply(mut self) -> Result<Executor<ChainOrComplete>, ExecutorError> {
        publish_progress(&self.deps, &self.run, "reply", 95).await;

        let session_completed_tasks: Vec<String> = self
            .run
            .conversation_state
            .plan
            .iter()
            .filter(|t| {
                let level = t.level() as i64;
                level >= self.run.session_start_level && level <= self.run.new_level as i64 && t.is_terminal()
            })
            .map(|t| t.id().to_string())
            .collect();
        tracing::info!(count = session_completed_tasks.len(), "computed session completed tasks");

        let output = self
            .deps
            .reply
            .invoke(&build_context(&self.run.conversation_state), self.run.is_final)
            .await?;

        let elapsed = self.run.started_at.elapsed();
        self.run.message.write_reply(output.reply, output.summary, elapsed);

        self.deps
            .store
            .update_message(
                self.run.message.id,
                MessageUpdate {
                    content: Some(self.run.message.content.clone()),
                    summary: Some(self.run.message.summary.clone()),
                    response_time: Some(elapsed),
                },
            )
            .await?;

        // §5 ordering: message:updated strictly before job:completed.
        self.deps
            .notify
            .publish(
                self.run.message.conversation_id,
                OrchestratorEvent::MessageUpdated {
                    conversation_id: self.run.message.conversation_id,
                    message_id: self.run.message.id,
                },
            )
            .await;

        Ok(Executor { run: self.run, deps: self.deps, _phase: PhantomData })
    }
}

impl Executor<ChainOrComplete> {
    /// S9: promote suggestions and hand a successor payload back to the
    /// caller, or finalize the chain. The caller (worker) is responsible for
    /// acking this job only after any successor has been enqueued.
    pub async fn chain_or_complete(mut self) -> Result<IterationOutcome, ExecutorError> {
        let conversation_id = self.run.message.conversation_id;
        let root_job_id = self.run.job.payload.root_job_id;

        if self.run.will_continue {
            let promote_level = self.run.new_level + 1;
            let promoted: Vec<_> = std::mem::take(&mut self.run.conversation_state.suggested_next_steps)
                .into_iter()
                .map(|s| s.promote(promote_level))
                .collect();
            self.run.conversation_state.plan.extend(promoted);
            self.run.conversation_state.current_level = promote_level as i64;

            self.deps
                .store
                .update_conversation_state(ConversationStateUpdate {
                    new_state: self.run.conversation_state.clone(),
                    preserve_uploaded_datasets: true,
                })
                .await?;

            // Message and IterationState reference each other by id, so both
            // ids are minted up front rather than through either type's
            // single-argument constructor.
            let next_message_id = MessageId::new();
            let next_state_id = IterationStateId::new();
            let next_message = Message {
                id: next_message_id,
                conversation_id,
                user_id: self.run.message.user_id,
                question: String::new(),
                content: String::new(),
                summary: String::new(),
                source: MessageSource::AgentContinuation,
                state_id: next_state_id,
                response_time: None,
            };
            let next_state = IterationState {
                id: next_state_id,
                message_id: next_message_id,
                conversation_id,
                user_id: self.run.message.user_id,
                source: MessageSource::AgentContinuation,
                is_deep_research: false,
                status: IterationStatus::Running,
                error: None,
                research_mode: self.run.effective_mode,
            };
            self.deps.store.create_message(next_message.clone()).await?;
            self.deps.store.create_iteration_state(next_state.clone()).await?;

            let successor = self.deps.chain.build_successor(
                &self.run.job.payload,
                next_message.id,
                next_state.id,
                self.run.conversation_state.id,
            );
            self.deps.chain.enqueue_successor(successor.clone()).await?;

            self.deps
                .notify
                .publish(
                    conversation_id,
                    OrchestratorEvent::JobCompleted { job_id: self.run.job.id, conversation_id },
                )
                .await;

            Ok(IterationOutcome::Continue { successor })
        } else {
            self.deps
                .notify
                .publish(
                    conversation_id,
                    OrchestratorEvent::JobCompleted { job_id: self.run.job.id, conversation_id },
                )
                .await;
            self.deps.chain.finalize_success(root_job_id, self.run.job.payload.iteration_number).await;
            Ok(IterationOutcome::Complete)
        }
    }
}

/// Drive one full iteration through every stage. Bootstrap failures and
/// later-stage failures both just propagate here: this function has no
/// visibility into whether this is the job's last attempt, so it cannot
/// decide whether a failure is final. That decision — and the credit
/// refund/`job:failed`/status-failed side effects that follow from it — is
/// the worker's job (`worker::run_one_job`), since only the worker sees the
/// queue's post-`fail` state.
pub async fn run_iteration(deps: ExecutorDeps, job: Job) -> Result<IterationOutcome, ExecutorError> {
    let bootstrapped = Executor::<Bootstrap>::bootstrap(deps, job).await?;
    run_stages(bootstrapped).await
}

async fn run_stages(executor: Executor<Bootstrap>) -> Result<IterationOutcome, ExecutorError> {
    executor
        .plan()
        .await?
        .fan_out()
        .await?
        .hypothesize()
        .await?
        .reflect_and_discover()
        .await?
        .plan_next()
        .await?
        .decide_continue()
        .await?
        .reply()
        .await?
        .chain_or_complete()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::stub::*;
    use crate::chain::ChainController;
    use crate::credit::RecordingCreditCollaborator;
    use crate::file_barrier::{FileIngestJob, FileIngestState};
    use crate::notify::InMemoryNotificationBus;
    use crate::queue::InMemoryQueue;
    use crate::state_store::InMemoryStateStore;
    use crate::types::{ConversationId, IterationStateId, JobId, MessageSource, QueueName, UserId};
    use async_trait::async_trait;

    struct EmptyFileQueue;
    #[async_trait]
    impl FileIngestQueue for EmptyFileQueue {
        async fn jobs_for(&self, _id: crate::types::ConversationStateId) -> Vec<FileIngestJob> {
            vec![]
        }
    }

    struct AlwaysContinueDecision;
    #[async_trait]
    impl ContinueDecisionAgent for AlwaysContinueDecision {
        async fn invoke(&self, _context: &str) -> Result<crate::agents::ContinueDecisionOutput, crate::types::AgentError> {
            Ok(crate::agents::ContinueDecisionOutput {
                should_continue: true,
                confidence: 0.9,
                reasoning: "more to learn".into(),
                trigger_reason: "suggestions pending".into(),
            })
        }
    }

    fn deps(store: Arc<InMemoryStateStore>, queue: Arc<InMemoryQueue>, continue_always: bool) -> ExecutorDeps {
        let notify = Arc::new(InMemoryNotificationBus::default());
        let credit = Arc::new(RecordingCreditCollaborator::new());
        let chain = Arc::new(ChainController::new(queue.clone(), credit.clone()));
        ExecutorDeps {
            queue: queue.clone(),
            notify,
            store,
            lock: Arc::new(crate::lock::InMemoryLock::new()),
            file_ingest: Arc::new(EmptyFileQueue),
            planning: Arc::new(StubPlanningAgent),
            primary_literature: Arc::new(StubRemoteAgent { agent_name: "edison".into() }),
            optional_literature: vec![],
            analysis: Arc::new(StubRemoteAgent { agent_name: "bio".into() }),
            hypothesis: Arc::new(StubHypothesisAgent),
            reflection: Arc::new(StubReflectionAgent),
            discovery: Arc::new(StubDiscoveryAgent),
            discovery_gate: Arc::new(DefaultDiscoveryGate),
            continue_decision: if continue_always {
                Arc::new(AlwaysContinueDecision)
            } else {
                Arc::new(StubContinueDecisionAgent)
            },
            reply: Arc::new(StubReplyAgent),
            chain,
            config: ExecutorConfig {
                poll_interval: Duration::from_millis(5),
                ..ExecutorConfig::default()
            },
        }
    }

    async fn seed_initial_job(store: &InMemoryStateStore) -> (Job, crate::types::ConversationStateId) {
        let conversation_id = ConversationId::new();
        let user_id = UserId::new();
        let conversation_state = ConversationState::new(conversation_id, "why is the sky blue".into());
        let conversation_state_id = conversation_state.id;
        store.create_conversation_state(conversation_state).await.unwrap();

        let iteration_state = IterationState::new(
            MessageId::new(),
            conversation_id,
            user_id,
            MessageSource::User,
            ResearchMode::SemiAutonomous,
        );
        let message = Message::new_user(conversation_id, user_id, "why is the sky blue".into(), iteration_state.id);
        let iteration_state = IterationState {
            message_id: message.id,
            ..iteration_state
        };
        store.create_message(message.clone()).await.unwrap();
        store.create_iteration_state(iteration_state.clone()).await.unwrap();

        let payload = DeepResearchJobData {
            user_id,
            conversation_id,
            message_id: message.id,
            state_id: iteration_state.id,
            conversation_state_id,
            requested_at: Utc::now(),
            research_mode: ResearchMode::SemiAutonomous,
            iteration_number: 1,
            root_job_id: JobId::new(),
            is_initial_iteration: true,
            message: "why is the sky blue".into(),
        };
        let job = Job::new(JobId(message.id.0), QueueName::DeepResearch, payload, 2);
        (job, conversation_state_id)
    }

    #[tokio::test]
    async fn final_iteration_writes_reply_and_calls_credit_complete() {
        let store = Arc::new(InMemoryStateStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (job, _cs_id) = seed_initial_job(&store).await;
        let message_id = job.payload.message_id;
        let deps = deps(store.clone(), queue, false);

        let outcome = run_iteration(deps, job).await.unwrap();
        assert!(matches!(outcome, IterationOutcome::Complete));

        let message = store.get_message(message_id).await.unwrap();
        assert!(!message.content.is_empty());
        assert!(message.response_time.is_some());
    }

    #[tokio::test]
    async fn continuing_iteration_enqueues_successor_with_bumped_iteration_number() {
        let store = Arc::new(InMemoryStateStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (job, _cs_id) = seed_initial_job(&store).await;
        let deps = deps(store.clone(), queue.clone(), true);
        let root_job_id = job.payload.root_job_id;

        let outcome = run_iteration(deps, job).await.unwrap();
        match outcome {
            IterationOutcome::Continue { successor } => {
                assert_eq!(successor.iteration_number, 2);
                assert_eq!(successor.root_job_id, root_job_id);
                assert!(!successor.is_initial_iteration);
            }
            IterationOutcome::Complete => panic!("expected continuation"),
        }
    }

    #[tokio::test]
    async fn missing_conversation_state_is_non_retryable_bootstrap_failure() {
        let store = Arc::new(InMemoryStateStore::new());
        let queue = Arc::new(InMemoryQueue::new());
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
        store.create_message(message.clone()).await.unwrap();
        store.create_iteration_state(iteration_state.clone()).await.unwrap();

        let payload = DeepResearchJobData {
            user_id,
            conversation_id,
            message_id: message.id,
            state_id: iteration_state.id,
            conversation_state_id: crate::types::ConversationStateId::new(),
            requested_at: Utc::now(),
            research_mode: ResearchMode::SemiAutonomous,
            iteration_number: 1,
            root_job_id: JobId::new(),
            is_initial_iteration: true,
            message: "q".into(),
        };
        let job = Job::new(JobId(message.id.0), QueueName::DeepResearch, payload, 2);
        let deps = deps(store, queue, false);

        let result = run_iteration(deps, job).await;
        assert!(matches!(result, Err(ExecutorError::MissingRecord(_))));
    }

    /// Simulates a worker dying after one of S3's two tasks finished: the
    /// stored plan already has one task with `end` set before `fan_out` is
    /// called again by whatever re-reserved the job.
    #[tokio::test]
    async fn fan_out_skips_terminal_tasks_and_reruns_the_incomplete_one() {
        let store = Arc::new(InMemoryStateStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let (job, _cs_id) = seed_initial_job(&store).await;
        let deps = deps(store.clone(), queue, false);

        let bootstrapped = Executor::<Bootstrap>::bootstrap(deps.clone(), job).await.unwrap();
        let mut planned = bootstrapped.plan().await.unwrap();

        assert_eq!(planned.run.conversation_state.plan.len(), 2);
        planned.run.conversation_state.plan[0].mark_start(Utc::now());
        planned.run.conversation_state.plan[0].mark_end(Utc::now());

        let fanned_out = planned.fan_out().await.unwrap();
        let plan = &fanned_out.run.conversation_state.plan;
        let output_of = |t: &PlanTask| match t {
            PlanTask::Literature { output, .. } => output.clone(),
            PlanTask::Analysis { output, .. } => output.clone(),
        };
        assert!(plan[0].is_terminal());
        assert!(output_of(&plan[0]).is_empty(), "a task already marked terminal must not be re-run");
        assert!(plan[1].is_terminal(), "the previously incomplete task should have run to completion");
        assert!(!output_of(&plan[1]).is_empty());
    }
}
