//! The run state machine driver.
//!
//! Claims a queued or resumed run with a status-guarded update, rebuilds its
//! agent trace, then consumes the executor stream and persists every step:
//! continuations become messages and `tool_calls` steps, observations
//! complete the trailing step, a pause parks the run in `requires_action`,
//! and a finish performs the single terminal write. Child rows are always
//! written before the run row so a crash leaves a consistent prefix.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use aria_contract::agent::{AgentFinish, AgentStep, ToolCallMessage, ToolMessage};
use aria_contract::entity::{
    LastError, Message, MessageRole, Metadata, RequiredAction, Run, RunStatus, RunStep,
    RunStepStatus, RunStepType, StepDetails, StepToolCall, ToolCallKind,
};
use aria_contract::storage::{
    EntityStores, ListQuery, RunPatch, RunStepPatch, SortOrder, StoreError,
};
use aria_contract::tool::ToolRegistry;
use aria_contract::{ids, now_millis};

use crate::chat::ChatProvider;
use crate::executor::{AgentExecutor, EarlyStop, ExecutorConfig};
use crate::reconstruct::{ReconstructError, StateReconstructor};
use crate::scheduler::{HandlerError, Task, TaskHandler};

/// Task category owned by this handler.
pub const RUN_TASK_CATEGORY: &str = "run_object";

#[derive(Debug, Error)]
pub enum RunEngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),

    #[error("inconsistent run state: {0}")]
    Inconsistent(String),
}

pub struct RunTaskHandler<S: ?Sized> {
    stores: Arc<S>,
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
}

#[async_trait]
impl<S: EntityStores + ?Sized + 'static> TaskHandler for RunTaskHandler<S> {
    fn accept(&self, task: &Task) -> bool {
        task.category == RUN_TASK_CATEGORY
    }

    async fn handle(&self, task: Task) -> Result<(), HandlerError> {
        let run: Run = match serde_json::from_slice(&task.payload) {
            Ok(run) => run,
            Err(e) => {
                warn!(task_id = %task.task_id, error = %e, "undecodable run payload, dropping");
                return Ok(());
            }
        };
        match run.status {
            status if RunStatus::CLAIMABLE.contains(&status) => self.execute(run).await?,
            // A cancel with no active worker lands here and gets finalized.
            RunStatus::Cancelling => self.finalize_unclaimed(&run).await?,
            status => {
                warn!(run_id = %run.id, ?status, "run payload fails precondition, dropping");
            }
        }
        Ok(())
    }
}

impl<S: EntityStores + ?Sized + 'static> RunTaskHandler<S> {
    pub fn new(
        stores: Arc<S>,
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            stores,
            provider,
            registry,
        }
    }

    async fn execute(&self, run: Run) -> Result<(), RunEngineError> {
        let claim = RunPatch {
            status: Some(RunStatus::InProgress),
            started_at: run.started_at.is_none().then(now_millis),
            ..RunPatch::default()
        };
        let claimed = self
            .stores
            .update_run_status_guarded(&run.thread_id, &run.id, &RunStatus::CLAIMABLE, claim)
            .await?;
        if claimed.is_none() {
            return self.finalize_unclaimed(&run).await;
        }
        info!(run_id = %run.id, thread_id = %run.thread_id, "run claimed");

        let assistant = self.stores.get_assistant(&run.assistant_id).await?;
        let state = match StateReconstructor::new(self.stores.clone())
            .recover(&run, &assistant)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                error!(run_id = %run.id, error = %e, "agent state recovery failed");
                self.on_finish(
                    &run,
                    &AgentFinish::failed(LastError::server_error(e.to_string())),
                )
                .await?;
                return Ok(());
            }
        };

        let instructions = if run.instructions.trim().is_empty() {
            assistant.instructions.clone()
        } else {
            run.instructions.clone()
        };
        let executor = Arc::new(
            AgentExecutor::new(
                self.provider.clone(),
                self.registry.clone(),
                ExecutorConfig {
                    model: run.model.clone(),
                    instructions,
                    temperature: run.temperature.or(assistant.temperature),
                },
            )
            .with_early_stop(Arc::new(RunEarlyStop {
                stores: self.stores.clone(),
                thread_id: run.thread_id.clone(),
                run_id: run.id.clone(),
            })),
        );

        let mut steps = executor.stream(state);
        while let Some(step) = steps.recv().await {
            let outcome = match &step {
                AgentStep::Continuation { message } => self.on_continuation(&run, message).await,
                AgentStep::Observation { tool_messages } => {
                    self.on_observation(&run, tool_messages).await
                }
                AgentStep::Pause { completed, .. } => {
                    match self.on_pause(&run, completed).await {
                        // Worker releases the run; submit-tool-outputs
                        // re-enqueues it.
                        Ok(()) => return Ok(()),
                        Err(e) => Err(e),
                    }
                }
                AgentStep::Finish { finish } => {
                    self.on_finish(&run, finish).await?;
                    return Ok(());
                }
            };
            if let Err(e) = outcome {
                error!(run_id = %run.id, error = %e, "step persistence failed");
                self.on_finish(
                    &run,
                    &AgentFinish::failed(LastError::server_error(e.to_string())),
                )
                .await?;
                return Ok(());
            }
        }
        Ok(())
    }

    /// The claim guard did not match: either another worker owns the run, or
    /// an external cancel landed first and this dequeue finalizes it.
    async fn finalize_unclaimed(&self, run: &Run) -> Result<(), RunEngineError> {
        let current = self.stores.get_run(&run.thread_id, &run.id).await?;
        match current.status {
            RunStatus::Cancelling => {
                info!(run_id = %run.id, "finalizing cancelled run");
                self.on_finish(run, &AgentFinish::cancelled()).await
            }
            status => {
                debug!(run_id = %run.id, ?status, "run not claimable, dropping task");
                Ok(())
            }
        }
    }

    /// Persist a continuation: narration text becomes an assistant message
    /// plus a `message_creation` step; tool calls open a `tool_calls` step.
    async fn on_continuation(
        &self,
        run: &Run,
        message: &ToolCallMessage,
    ) -> Result<(), RunEngineError> {
        debug!(run_id = %run.id, calls = message.tool_calls.len(), "continuation");
        if !message.content.trim().is_empty() {
            self.create_message_step(run, &message.content).await?;
        }

        if !message.tool_calls.is_empty() {
            let now = now_millis();
            let tool_calls: Vec<StepToolCall> = message
                .tool_calls
                .iter()
                .map(|c| StepToolCall {
                    id: c.id.clone(),
                    kind: tool_call_kind(&c.name),
                    function: aria_contract::entity::FunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                        output: None,
                    },
                })
                .collect();
            self.stores
                .create_run_step(RunStep {
                    id: ids::run_step_id(),
                    run_id: run.id.clone(),
                    thread_id: run.thread_id.clone(),
                    assistant_id: run.assistant_id.clone(),
                    step_type: RunStepType::ToolCalls,
                    status: RunStepStatus::InProgress,
                    step_details: StepDetails::ToolCalls { tool_calls },
                    last_error: None,
                    created_at: now,
                    modified_at: now,
                    completed_at: None,
                    failed_at: None,
                    cancelled_at: None,
                    expired_at: None,
                    metadata: Metadata::new(),
                })
                .await?;
        }

        self.touch_in_progress(run).await
    }

    /// Merge resolved outputs into the trailing step and park the run in
    /// `requires_action`, mirroring the unresolved calls.
    async fn on_pause(&self, run: &Run, completed: &[ToolMessage]) -> Result<(), RunEngineError> {
        let step = self.trailing_tool_calls_step(run).await?;
        let mut details = step.step_details.clone();
        for tm in completed {
            details.set_tool_output(&tm.tool_call_id, &tm.content);
        }
        self.stores
            .update_run_step(
                &run.thread_id,
                &run.id,
                &step.id,
                RunStepPatch {
                    step_details: Some(details.clone()),
                    ..RunStepPatch::default()
                },
            )
            .await?;

        let unresolved: Vec<StepToolCall> = details
            .tool_calls()
            .unwrap_or_default()
            .iter()
            .filter(|c| !c.has_output())
            .cloned()
            .collect();
        let updated = self
            .stores
            .update_run_status_guarded(
                &run.thread_id,
                &run.id,
                &[RunStatus::InProgress],
                RunPatch {
                    status: Some(RunStatus::RequiresAction),
                    required_action: Some(Some(RequiredAction::submit_tool_outputs(unresolved))),
                    ..RunPatch::default()
                },
            )
            .await?;
        if updated.is_none() {
            debug!(run_id = %run.id, "run left in_progress before pause could park it");
        } else {
            info!(run_id = %run.id, "run suspended on requires_action");
        }
        Ok(())
    }

    /// Merge outputs into the trailing step and complete it.
    async fn on_observation(
        &self,
        run: &Run,
        tool_messages: &[ToolMessage],
    ) -> Result<(), RunEngineError> {
        debug!(run_id = %run.id, outputs = tool_messages.len(), "observation");
        let step = self.trailing_tool_calls_step(run).await?;
        let mut details = step.step_details.clone();
        for tm in tool_messages {
            details.set_tool_output(&tm.tool_call_id, &tm.content);
        }
        self.stores
            .update_run_step(
                &run.thread_id,
                &run.id,
                &step.id,
                RunStepPatch {
                    status: Some(RunStepStatus::Completed),
                    step_details: Some(details),
                    completed_at: Some(now_millis()),
                    ..RunStepPatch::default()
                },
            )
            .await?;
        self.touch_in_progress(run).await
    }

    /// The single terminal write for a run, plus the trailing-step bookkeeping
    /// the terminal status implies.
    async fn on_finish(&self, run: &Run, finish: &AgentFinish) -> Result<(), RunEngineError> {
        let now = now_millis();

        let (run_patch, step_patch) = if finish.is_cancelled {
            (
                RunPatch {
                    status: Some(RunStatus::Cancelled),
                    cancelled_at: Some(now),
                    ..RunPatch::default()
                },
                Some(RunStepPatch {
                    status: Some(RunStepStatus::Cancelled),
                    cancelled_at: Some(now),
                    ..RunStepPatch::default()
                }),
            )
        } else if finish.is_expired {
            (
                RunPatch {
                    status: Some(RunStatus::Expired),
                    expired_at: Some(now),
                    ..RunPatch::default()
                },
                Some(RunStepPatch {
                    status: Some(RunStepStatus::Expired),
                    expired_at: Some(now),
                    ..RunStepPatch::default()
                }),
            )
        } else if finish.is_failed {
            let last_error = finish
                .last_error
                .clone()
                .unwrap_or_else(|| LastError::invalid_request("run failed without error detail"));
            (
                RunPatch {
                    status: Some(RunStatus::Failed),
                    failed_at: Some(now),
                    last_error: Some(last_error.clone()),
                    ..RunPatch::default()
                },
                Some(RunStepPatch {
                    status: Some(RunStepStatus::Failed),
                    failed_at: Some(now),
                    last_error: Some(last_error),
                    ..RunStepPatch::default()
                }),
            )
        } else {
            // Success: the final answer becomes a message + message_creation
            // step; the trailing tool step was already completed by its
            // observation.
            let response = finish.response.clone().unwrap_or_default();
            self.create_message_step(run, &response).await?;
            (
                RunPatch {
                    status: Some(RunStatus::Completed),
                    completed_at: Some(now),
                    ..RunPatch::default()
                },
                None,
            )
        };

        // Step before run: a crash in between leaves a consistent tail.
        if let Some(step_patch) = step_patch {
            match self.trailing_tool_calls_step(run).await {
                Ok(step) if !step.status.is_terminal() => {
                    self.stores
                        .update_run_step(&run.thread_id, &run.id, &step.id, step_patch)
                        .await?;
                }
                Ok(_) => {}
                // A run interrupted before its first step has nothing to mark.
                Err(RunEngineError::Inconsistent(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let updated = self
            .stores
            .update_run_status_guarded(&run.thread_id, &run.id, &RunStatus::NON_TERMINAL, run_patch)
            .await?;
        match updated {
            Some(run) => info!(run_id = %run.id, status = ?run.status, "run finished"),
            None => debug!(run_id = %run.id, "run already terminal, skipping finish write"),
        }
        Ok(())
    }

    /// Assistant message plus its `message_creation` step.
    async fn create_message_step(&self, run: &Run, content: &str) -> Result<(), RunEngineError> {
        let now = now_millis();
        let message = self
            .stores
            .create_message(Message {
                id: ids::message_id(),
                thread_id: run.thread_id.clone(),
                role: MessageRole::Assistant,
                content: content.to_string(),
                assistant_id: Some(run.assistant_id.clone()),
                run_id: Some(run.id.clone()),
                metadata: Metadata::new(),
                created_at: now,
                modified_at: now,
            })
            .await?;
        self.stores
            .create_run_step(RunStep {
                id: ids::run_step_id(),
                run_id: run.id.clone(),
                thread_id: run.thread_id.clone(),
                assistant_id: run.assistant_id.clone(),
                step_type: RunStepType::MessageCreation,
                status: RunStepStatus::Completed,
                step_details: StepDetails::MessageCreation {
                    message_id: message.id,
                },
                last_error: None,
                created_at: now,
                modified_at: now,
                completed_at: Some(now),
                failed_at: None,
                cancelled_at: None,
                expired_at: None,
                metadata: Metadata::new(),
            })
            .await?;
        Ok(())
    }

    async fn trailing_tool_calls_step(&self, run: &Run) -> Result<RunStep, RunEngineError> {
        let page = self
            .stores
            .list_run_steps(
                &run.thread_id,
                &run.id,
                &ListQuery {
                    order: SortOrder::Desc,
                    limit: 1,
                    ..ListQuery::default()
                },
            )
            .await?;
        page.data
            .into_iter()
            .next()
            .filter(|s| s.step_type == RunStepType::ToolCalls)
            .ok_or_else(|| {
                RunEngineError::Inconsistent(format!(
                    "run {} has no trailing tool_calls step",
                    run.id
                ))
            })
    }

    /// Keep the run row marked in_progress while steps land. A miss means an
    /// external transition (cancel) won; the early-stop check handles it.
    async fn touch_in_progress(&self, run: &Run) -> Result<(), RunEngineError> {
        let updated = self
            .stores
            .update_run_status_guarded(
                &run.thread_id,
                &run.id,
                &[RunStatus::InProgress],
                RunPatch::status(RunStatus::InProgress),
            )
            .await?;
        if updated.is_none() {
            debug!(run_id = %run.id, "run no longer in_progress");
        }
        Ok(())
    }
}

fn tool_call_kind(name: &str) -> ToolCallKind {
    match name {
        "code_interpreter" => ToolCallKind::CodeInterpreter,
        "file_search" => ToolCallKind::FileSearch,
        _ => ToolCallKind::Function,
    }
}

/// Early-stop hook that re-reads the run row once per agent step, turning
/// external cancel/expire transitions into the matching finish.
struct RunEarlyStop<S: ?Sized> {
    stores: Arc<S>,
    thread_id: String,
    run_id: String,
}

#[async_trait]
impl<S: EntityStores + ?Sized + 'static> EarlyStop for RunEarlyStop<S> {
    async fn check(
        &self,
        _state: &aria_contract::agent::AgentState,
    ) -> Option<AgentFinish> {
        match self.stores.get_run(&self.thread_id, &self.run_id).await {
            Ok(run) => match run.status {
                RunStatus::Cancelling | RunStatus::Cancelled => Some(AgentFinish::cancelled()),
                RunStatus::Expired => Some(AgentFinish::expired()),
                _ => None,
            },
            Err(StoreError::NotFound(_)) => Some(AgentFinish::failed(LastError::invalid_request(
                "run deleted mid-flight",
            ))),
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "early-stop run read failed");
                None
            }
        }
    }
}
