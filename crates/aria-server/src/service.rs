//! API-facing services: request validation, id minting, entity mutation, and
//! run queueing. These are the only mutators besides the worker itself, and
//! the two that may race with it (`submit_tool_outputs`, `cancel_run`) go
//! through status-guarded updates.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use aria_contract::entity::{
    Assistant, AssistantTool, Message, MessageRole, Metadata, Run, RunStatus, RunStep,
    RunStepType, Thread,
};
use aria_contract::storage::{
    AssistantPatch, EntityStores, ListPage, ListQuery, MessagePatch, RunPatch, RunStepPatch,
    SortOrder, StoreError, ThreadPatch,
};
use aria_contract::{ids, now_millis};
use aria_runtime::scheduler::{SchedulerError, Task, TaskScheduler};
use aria_runtime::RUN_TASK_CATEGORY;

/// Queued runs expire if no worker finishes them in time.
const RUN_EXPIRY_MS: i64 = 10 * 60 * 1000;

pub type SharedStores = Arc<dyn EntityStores>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A status guard refused the transition.
    #[error("illegal run state: {0}")]
    IllegalState(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

fn require_non_blank(value: &str, field: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(format!(
            "{field} must not be blank"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Assistants
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CreateAssistantRequest {
    pub model: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModifyAssistantRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<AssistantTool>>,
    #[serde(default)]
    pub file_ids: Option<Vec<String>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

pub struct AssistantService {
    stores: SharedStores,
}

impl AssistantService {
    pub fn new(stores: SharedStores) -> Self {
        Self { stores }
    }

    pub async fn create(&self, request: CreateAssistantRequest) -> Result<Assistant, ServiceError> {
        require_non_blank(&request.model, "model")?;
        let now = now_millis();
        let assistant = self
            .stores
            .create_assistant(Assistant {
                id: ids::assistant_id(),
                model: request.model,
                instructions: request.instructions,
                tools: request.tools,
                file_ids: request.file_ids,
                temperature: request.temperature,
                metadata: request.metadata,
                created_at: now,
                modified_at: now,
            })
            .await?;
        info!(assistant_id = %assistant.id, model = %assistant.model, "assistant created");
        Ok(assistant)
    }

    pub async fn get(&self, id: &str) -> Result<Assistant, ServiceError> {
        Ok(self.stores.get_assistant(id).await?)
    }

    pub async fn modify(
        &self,
        id: &str,
        request: ModifyAssistantRequest,
    ) -> Result<Assistant, ServiceError> {
        if let Some(model) = &request.model {
            require_non_blank(model, "model")?;
        }
        Ok(self
            .stores
            .update_assistant(
                id,
                AssistantPatch {
                    model: request.model,
                    instructions: request.instructions,
                    tools: request.tools,
                    file_ids: request.file_ids,
                    temperature: request.temperature,
                    metadata: request.metadata,
                },
            )
            .await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        Ok(self.stores.delete_assistant(id).await?)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListPage<Assistant>, ServiceError> {
        Ok(self.stores.list_assistants(query).await?)
    }
}

// ---------------------------------------------------------------------------
// Threads & messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ThreadMessageInput {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub messages: Vec<ThreadMessageInput>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModifyMetadataRequest {
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

pub struct ThreadService {
    stores: SharedStores,
}

impl ThreadService {
    pub fn new(stores: SharedStores) -> Self {
        Self { stores }
    }

    pub async fn create(&self, request: CreateThreadRequest) -> Result<Thread, ServiceError> {
        let now = now_millis();
        let thread = self
            .stores
            .create_thread(Thread {
                id: ids::thread_id(),
                metadata: request.metadata,
                created_at: now,
                modified_at: now,
            })
            .await?;
        for input in request.messages {
            require_non_blank(&input.content, "message content")?;
            self.stores
                .create_message(Message {
                    id: ids::message_id(),
                    thread_id: thread.id.clone(),
                    role: input.role,
                    content: input.content,
                    assistant_id: None,
                    run_id: None,
                    metadata: input.metadata,
                    created_at: now_millis(),
                    modified_at: now_millis(),
                })
                .await?;
        }
        info!(thread_id = %thread.id, "thread created");
        Ok(thread)
    }

    pub async fn get(&self, id: &str) -> Result<Thread, ServiceError> {
        Ok(self.stores.get_thread(id).await?)
    }

    pub async fn modify(
        &self,
        id: &str,
        request: ModifyMetadataRequest,
    ) -> Result<Thread, ServiceError> {
        Ok(self
            .stores
            .update_thread(
                id,
                ThreadPatch {
                    metadata: request.metadata,
                },
            )
            .await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        Ok(self.stores.delete_thread(id).await?)
    }

    pub async fn list(&self, query: &ListQuery) -> Result<ListPage<Thread>, ServiceError> {
        Ok(self.stores.list_threads(query).await?)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

pub struct MessageService {
    stores: SharedStores,
}

impl MessageService {
    pub fn new(stores: SharedStores) -> Self {
        Self { stores }
    }

    pub async fn create(
        &self,
        thread_id: &str,
        request: CreateMessageRequest,
    ) -> Result<Message, ServiceError> {
        require_non_blank(thread_id, "thread_id")?;
        require_non_blank(&request.content, "content")?;
        let now = now_millis();
        Ok(self
            .stores
            .create_message(Message {
                id: ids::message_id(),
                thread_id: thread_id.to_string(),
                role: request.role,
                content: request.content,
                assistant_id: None,
                run_id: None,
                metadata: request.metadata,
                created_at: now,
                modified_at: now,
            })
            .await?)
    }

    pub async fn get(&self, thread_id: &str, id: &str) -> Result<Message, ServiceError> {
        Ok(self.stores.get_message(thread_id, id).await?)
    }

    pub async fn modify(
        &self,
        thread_id: &str,
        id: &str,
        request: ModifyMetadataRequest,
    ) -> Result<Message, ServiceError> {
        Ok(self
            .stores
            .update_message(
                thread_id,
                id,
                MessagePatch {
                    metadata: request.metadata,
                },
            )
            .await?)
    }

    pub async fn list(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Message>, ServiceError> {
        Ok(self.stores.list_messages(thread_id, query).await?)
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<AssistantTool>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub additional_messages: Vec<ThreadMessageInput>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadAndRunRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub thread: Option<CreateThreadRequest>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<AssistantTool>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct ToolOutputInput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitToolOutputsRequest {
    pub tool_outputs: Vec<ToolOutputInput>,
}

pub struct RunService {
    stores: SharedStores,
    scheduler: Arc<TaskScheduler>,
    threads: Arc<ThreadService>,
}

impl RunService {
    pub fn new(
        stores: SharedStores,
        scheduler: Arc<TaskScheduler>,
        threads: Arc<ThreadService>,
    ) -> Self {
        Self {
            stores,
            scheduler,
            threads,
        }
    }

    pub async fn create(
        &self,
        thread_id: &str,
        request: CreateRunRequest,
    ) -> Result<Run, ServiceError> {
        require_non_blank(&request.assistant_id, "assistant_id")?;
        let thread = self.stores.get_thread(thread_id).await?;
        let assistant = self.stores.get_assistant(&request.assistant_id).await?;

        for input in request.additional_messages {
            require_non_blank(&input.content, "message content")?;
            let now = now_millis();
            self.stores
                .create_message(Message {
                    id: ids::message_id(),
                    thread_id: thread.id.clone(),
                    role: input.role,
                    content: input.content,
                    assistant_id: None,
                    run_id: None,
                    metadata: input.metadata,
                    created_at: now,
                    modified_at: now,
                })
                .await?;
        }

        let now = now_millis();
        let run = self
            .stores
            .create_run(Run {
                id: ids::run_id(),
                thread_id: thread.id.clone(),
                assistant_id: assistant.id.clone(),
                model: request.model.unwrap_or_else(|| assistant.model.clone()),
                instructions: request.instructions.unwrap_or_default(),
                tools: request.tools.unwrap_or_default(),
                temperature: request.temperature,
                status: RunStatus::Queued,
                required_action: None,
                last_error: None,
                created_at: now,
                modified_at: now,
                started_at: None,
                expires_at: Some(now + RUN_EXPIRY_MS),
                completed_at: None,
                cancelled_at: None,
                failed_at: None,
                expired_at: None,
                metadata: request.metadata,
            })
            .await?;
        self.enqueue(&run).await?;
        info!(run_id = %run.id, thread_id = %thread.id, "run created and queued");
        Ok(run)
    }

    pub async fn create_thread_and_run(
        &self,
        request: CreateThreadAndRunRequest,
    ) -> Result<Run, ServiceError> {
        require_non_blank(&request.assistant_id, "assistant_id")?;
        let thread = self
            .threads
            .create(request.thread.unwrap_or_default())
            .await?;
        self.create(
            &thread.id,
            CreateRunRequest {
                assistant_id: request.assistant_id,
                model: request.model,
                instructions: request.instructions,
                tools: request.tools,
                temperature: request.temperature,
                additional_messages: vec![],
                metadata: request.metadata,
            },
        )
        .await
    }

    pub async fn get(&self, thread_id: &str, run_id: &str) -> Result<Run, ServiceError> {
        Ok(self.stores.get_run(thread_id, run_id).await?)
    }

    pub async fn modify(
        &self,
        thread_id: &str,
        run_id: &str,
        request: ModifyMetadataRequest,
    ) -> Result<Run, ServiceError> {
        Ok(self
            .stores
            .update_run(
                thread_id,
                run_id,
                RunPatch {
                    metadata: request.metadata,
                    ..RunPatch::default()
                },
            )
            .await?)
    }

    pub async fn list(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Run>, ServiceError> {
        Ok(self.stores.list_runs(thread_id, query).await?)
    }

    pub async fn get_step(
        &self,
        thread_id: &str,
        run_id: &str,
        step_id: &str,
    ) -> Result<RunStep, ServiceError> {
        Ok(self.stores.get_run_step(thread_id, run_id, step_id).await?)
    }

    pub async fn list_steps(
        &self,
        thread_id: &str,
        run_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<RunStep>, ServiceError> {
        Ok(self.stores.list_run_steps(thread_id, run_id, query).await?)
    }

    /// Write the submitted outputs into the trailing `tool_calls` step and
    /// requeue the run. The trace replays from rows on the next claim, so the
    /// executor's next step is the lifted observation.
    pub async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        request: SubmitToolOutputsRequest,
    ) -> Result<Run, ServiceError> {
        if request.tool_outputs.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "tool_outputs must not be empty".into(),
            ));
        }
        let run = self.stores.get_run(thread_id, run_id).await?;
        if run.status != RunStatus::RequiresAction {
            return Err(ServiceError::IllegalState(format!(
                "run {run_id} is not awaiting tool outputs"
            )));
        }

        let step = self.trailing_tool_calls_step(&run).await?;
        let mut details = step.step_details.clone();
        for output in &request.tool_outputs {
            if !details.set_tool_output(&output.tool_call_id, &output.output) {
                return Err(ServiceError::InvalidRequest(format!(
                    "unknown tool_call_id {}",
                    output.tool_call_id
                )));
            }
        }
        self.stores
            .update_run_step(
                thread_id,
                run_id,
                &step.id,
                RunStepPatch {
                    step_details: Some(details),
                    ..RunStepPatch::default()
                },
            )
            .await?;

        let requeued = self
            .stores
            .update_run_status_guarded(
                thread_id,
                run_id,
                &[RunStatus::RequiresAction],
                RunPatch {
                    status: Some(RunStatus::Queued),
                    required_action: Some(None),
                    ..RunPatch::default()
                },
            )
            .await?
            .ok_or_else(|| {
                ServiceError::IllegalState(format!("run {run_id} left requires_action mid-submit"))
            })?;
        self.enqueue(&requeued).await?;
        info!(run_id = %run_id, "tool outputs submitted, run requeued");
        Ok(requeued)
    }

    /// Guarded flip to `cancelling`.
    ///
    /// An in-flight run is left to its worker, which observes the flip at the
    /// next step boundary. A queued or suspended run has no worker watching
    /// it, so a task is enqueued for the finalization.
    pub async fn cancel(&self, thread_id: &str, run_id: &str) -> Result<Run, ServiceError> {
        if let Some(run) = self
            .stores
            .update_run_status_guarded(
                thread_id,
                run_id,
                &[RunStatus::InProgress],
                RunPatch::status(RunStatus::Cancelling),
            )
            .await?
        {
            info!(run_id = %run_id, "run cancelling, worker will finalize");
            return Ok(run);
        }

        let idle = self
            .stores
            .update_run_status_guarded(
                thread_id,
                run_id,
                &[RunStatus::Queued, RunStatus::RequiresAction],
                RunPatch::status(RunStatus::Cancelling),
            )
            .await?;
        let Some(run) = idle else {
            let current = self.stores.get_run(thread_id, run_id).await?;
            return Err(ServiceError::IllegalState(format!(
                "run {run_id} cannot be cancelled from status {:?}",
                current.status
            )));
        };
        self.enqueue(&run).await?;
        info!(run_id = %run_id, "run cancelling, finalization queued");
        Ok(run)
    }

    async fn trailing_tool_calls_step(&self, run: &Run) -> Result<RunStep, ServiceError> {
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
                ServiceError::IllegalState(format!(
                    "run {} has no trailing tool_calls step",
                    run.id
                ))
            })
    }

    async fn enqueue(&self, run: &Run) -> Result<(), ServiceError> {
        let payload = serde_json::to_vec(run)
            .map_err(|e| ServiceError::InvalidRequest(format!("unencodable run: {e}")))?;
        self.scheduler
            .enqueue(Task::new(run.id.clone(), RUN_TASK_CATEGORY, payload))
            .await?;
        Ok(())
    }
}
