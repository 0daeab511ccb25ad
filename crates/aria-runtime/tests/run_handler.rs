//! End-to-end run engine tests over the in-memory store with scripted
//! inference.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use genai::chat::{ChatOptions, ChatRequest};
use tokio::sync::Notify;

use aria_contract::agent::AgentStep;
use aria_contract::entity::{
    Assistant, AssistantTool, ErrorKind, FunctionDecl, Message, MessageRole, Metadata, Run,
    RunStatus, RunStep, RunStepStatus, RunStepType, StepDetails, StepToolCall, Thread,
};
use aria_contract::storage::{
    AssistantStore, ListQuery, MessageStore, RunPatch, RunStepPatch, RunStepStore, RunStore,
    SortOrder, ThreadStore,
};
use aria_contract::tool::ToolRegistry;
use aria_contract::{ids, now_millis};
use aria_runtime::chat::{ChatProvider, ChatTurn, LlmError};
use aria_runtime::reconstruct::{ReconstructError, StateReconstructor};
use aria_runtime::run_handler::{RunTaskHandler, RUN_TASK_CATEGORY};
use aria_runtime::scheduler::{Task, TaskHandler};
use aria_store_adapters::MemoryStore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct ScriptedProvider {
    turns: Mutex<Vec<Result<ChatTurn, LlmError>>>,
}

impl ScriptedProvider {
    fn new(turns: Vec<Result<ChatTurn, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns),
        })
    }

    fn text(text: &str) -> Result<ChatTurn, LlmError> {
        Ok(ChatTurn {
            text: text.into(),
            tool_calls: vec![],
        })
    }

    fn tool_call(id: &str, name: &str) -> Result<ChatTurn, LlmError> {
        Ok(ChatTurn {
            text: String::new(),
            tool_calls: vec![aria_contract::agent::ToolCallRequest::new(id, name, "{}")],
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn exec_chat_turn(
        &self,
        _model: &str,
        _request: ChatRequest,
        _options: Option<&ChatOptions>,
    ) -> Result<ChatTurn, LlmError> {
        let mut turns = self.turns.lock().expect("lock poisoned");
        assert!(!turns.is_empty(), "provider script exhausted");
        turns.remove(0)
    }
}

/// Provider that blocks mid-inference until the test says go; lets a cancel
/// land at a deterministic point inside a run.
struct GatedProvider {
    ready: Arc<Notify>,
    proceed: Arc<Notify>,
    turn: Mutex<Option<Result<ChatTurn, LlmError>>>,
}

#[async_trait]
impl ChatProvider for GatedProvider {
    async fn exec_chat_turn(
        &self,
        _model: &str,
        _request: ChatRequest,
        _options: Option<&ChatOptions>,
    ) -> Result<ChatTurn, LlmError> {
        self.ready.notify_one();
        self.proceed.notified().await;
        self.turn
            .lock()
            .expect("lock poisoned")
            .take()
            .expect("gated provider called twice")
    }
}

fn function_tool(name: &str) -> AssistantTool {
    AssistantTool::function(FunctionDecl::new(name).with_description(format!("{name} tool")))
}

async fn seed(
    store: &MemoryStore,
    tools: Vec<AssistantTool>,
    prompt: &str,
) -> (Assistant, Thread, Run) {
    let now = now_millis();
    let assistant = store
        .create_assistant(Assistant {
            id: ids::assistant_id(),
            model: "test-model".into(),
            instructions: "Assist the user.".into(),
            tools,
            file_ids: vec![],
            temperature: None,
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    let thread = store
        .create_thread(Thread {
            id: ids::thread_id(),
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    store
        .create_message(Message {
            id: ids::message_id(),
            thread_id: thread.id.clone(),
            role: MessageRole::User,
            content: prompt.into(),
            assistant_id: None,
            run_id: None,
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    let run = store
        .create_run(Run {
            id: ids::run_id(),
            thread_id: thread.id.clone(),
            assistant_id: assistant.id.clone(),
            model: assistant.model.clone(),
            instructions: String::new(),
            tools: vec![],
            temperature: None,
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
            created_at: now,
            modified_at: now,
            started_at: None,
            expires_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            expired_at: None,
            metadata: Metadata::new(),
        })
        .await
        .unwrap();
    (assistant, thread, run)
}

fn run_task(run: &Run) -> Task {
    Task::new(
        run.id.clone(),
        RUN_TASK_CATEGORY,
        serde_json::to_vec(run).unwrap(),
    )
}

fn handler(
    store: &Arc<MemoryStore>,
    provider: Arc<dyn ChatProvider>,
    registry: ToolRegistry,
) -> RunTaskHandler<MemoryStore> {
    RunTaskHandler::new(store.clone(), provider, Arc::new(registry))
}

async fn steps_asc(store: &MemoryStore, run: &Run) -> Vec<RunStep> {
    store
        .list_run_steps(&run.thread_id, &run.id, &ListQuery::default().with_limit(50))
        .await
        .unwrap()
        .data
}

async fn assistant_messages(store: &MemoryStore, thread_id: &str) -> Vec<Message> {
    store
        .list_messages(thread_id, &ListQuery::default().with_limit(50))
        .await
        .unwrap()
        .data
        .into_iter()
        .filter(|m| m.role == MessageRole::Assistant)
        .collect()
}

/// What the run service does on submit-tool-outputs: write outputs into the
/// trailing step, requeue the run, and hand back the fresh payload.
async fn submit_tool_outputs(store: &MemoryStore, run: &Run, outputs: &[(&str, &str)]) -> Run {
    let page = store
        .list_run_steps(
            &run.thread_id,
            &run.id,
            &ListQuery {
                order: SortOrder::Desc,
                limit: 1,
                ..ListQuery::default()
            },
        )
        .await
        .unwrap();
    let step = page.data.into_iter().next().expect("trailing step");
    let mut details = step.step_details.clone();
    for (call_id, output) in outputs {
        assert!(details.set_tool_output(call_id, *output));
    }
    store
        .update_run_step(
            &run.thread_id,
            &run.id,
            &step.id,
            RunStepPatch {
                step_details: Some(details),
                ..RunStepPatch::default()
            },
        )
        .await
        .unwrap();
    store
        .update_run_status_guarded(
            &run.thread_id,
            &run.id,
            &[RunStatus::RequiresAction],
            RunPatch {
                status: Some(RunStatus::Queued),
                required_action: Some(None),
                ..RunPatch::default()
            },
        )
        .await
        .unwrap()
        .expect("run was not awaiting action")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn queued_run_completes_without_tools() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![], "ping").await;
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("pong")]);

    handler(&store, provider, ToolRegistry::new())
        .handle(run_task(&run))
        .await
        .unwrap();

    let finished = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.completed_at.is_some());
    assert!(finished.started_at.is_some());

    let steps = steps_asc(&store, &run).await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_type, RunStepType::MessageCreation);
    assert_eq!(steps[0].status, RunStepStatus::Completed);

    let replies = assistant_messages(&store, &thread.id).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, "pong");
    assert_eq!(replies[0].run_id.as_deref(), Some(run.id.as_str()));
}

#[tokio::test]
async fn function_tool_suspends_then_submit_completes() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![function_tool("foo")], "call foo").await;
    let provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call("c1", "foo"),
        ScriptedProvider::text("done:bar"),
    ]);
    let handler = handler(&store, provider, ToolRegistry::new());

    handler.handle(run_task(&run)).await.unwrap();

    let suspended = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(suspended.status, RunStatus::RequiresAction);
    let action = suspended.required_action.as_ref().expect("required action");
    let aria_contract::entity::RequiredAction::SubmitToolOutputs {
        submit_tool_outputs: submit_tool_outputs_action,
    } = action;
    assert_eq!(submit_tool_outputs_action.tool_calls.len(), 1);
    assert_eq!(submit_tool_outputs_action.tool_calls[0].id, "c1");

    let steps = steps_asc(&store, &run).await;
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].step_type, RunStepType::ToolCalls);
    assert_eq!(steps[0].status, RunStepStatus::InProgress);

    // Client answers the call; the run requeues and finishes.
    let requeued = submit_tool_outputs(&store, &suspended, &[("c1", "bar")]).await;
    assert_eq!(requeued.status, RunStatus::Queued);
    assert!(requeued.required_action.is_none());

    handler.handle(run_task(&requeued)).await.unwrap();

    let finished = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);

    let steps = steps_asc(&store, &run).await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].status, RunStepStatus::Completed);
    let calls = steps[0].step_details.tool_calls().unwrap();
    assert_eq!(calls[0].function.output.as_deref(), Some("bar"));
    assert_eq!(steps[1].step_type, RunStepType::MessageCreation);

    let replies = assistant_messages(&store, &thread.id).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, "done:bar");
}

#[tokio::test]
async fn cancel_lands_at_the_next_step_boundary() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![function_tool("foo")], "call foo").await;

    let ready = Arc::new(Notify::new());
    let proceed = Arc::new(Notify::new());
    let provider = Arc::new(GatedProvider {
        ready: ready.clone(),
        proceed: proceed.clone(),
        turn: Mutex::new(Some(ScriptedProvider::tool_call("c1", "foo"))),
    });
    let handler = Arc::new(handler(&store, provider, ToolRegistry::new()));

    let worker = {
        let handler = handler.clone();
        let task = run_task(&run);
        tokio::spawn(async move { handler.handle(task).await })
    };

    // Inference is in flight; cancel now, then let the model answer. The
    // continuation still lands, and the cancel takes effect at the next step
    // boundary with the tool step still open.
    ready.notified().await;
    store
        .update_run_status_guarded(
            &thread.id,
            &run.id,
            &RunStatus::CANCELLABLE,
            RunPatch::status(RunStatus::Cancelling),
        )
        .await
        .unwrap()
        .expect("cancel transition");
    proceed.notify_one();

    worker.await.unwrap().unwrap();

    let cancelled = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let steps = steps_asc(&store, &run).await;
    let trailing = steps.last().unwrap();
    assert_eq!(trailing.step_type, RunStepType::ToolCalls);
    assert_eq!(trailing.status, RunStepStatus::Cancelled);
    assert!(trailing.cancelled_at.is_some());
}

#[tokio::test]
async fn llm_failure_fails_the_run() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![], "ping").await;
    let provider = ScriptedProvider::new(vec![Err(LlmError("upstream 500".into()))]);

    handler(&store, provider, ToolRegistry::new())
        .handle(run_task(&run))
        .await
        .unwrap();

    let failed = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed.failed_at.is_some());
    let last_error = failed.last_error.expect("last error");
    assert_eq!(last_error.kind, ErrorKind::ServerError);
    assert!(!last_error.message.is_empty());
}

#[tokio::test]
async fn resumption_on_a_fresh_process_matches_in_process_resumption() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![function_tool("foo")], "call foo").await;

    {
        let provider = ScriptedProvider::new(vec![ScriptedProvider::tool_call("c1", "foo")]);
        handler(&store, provider, ToolRegistry::new())
            .handle(run_task(&run))
            .await
            .unwrap();
    }
    let suspended = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(suspended.status, RunStatus::RequiresAction);

    // The first executor is gone; a brand-new handler picks the run up after
    // outputs arrive, rebuilding the trace from rows alone.
    let requeued = submit_tool_outputs(&store, &suspended, &[("c1", "bar")]).await;
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("done:bar")]);
    handler(&store, provider, ToolRegistry::new())
        .handle(run_task(&requeued))
        .await
        .unwrap();

    let finished = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    let replies = assistant_messages(&store, &thread.id).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, "done:bar");
}

#[tokio::test]
async fn duplicate_tasks_converge_to_one_completion() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![], "ping").await;
    let provider = ScriptedProvider::new(vec![ScriptedProvider::text("pong")]);
    let handler = Arc::new(handler(&store, provider, ToolRegistry::new()));

    // Same payload delivered twice: exactly one worker claims the run, the
    // other aborts on the guard.
    handler.handle(run_task(&run)).await.unwrap();
    handler.handle(run_task(&run)).await.unwrap();

    let finished = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(assistant_messages(&store, &thread.id).await.len(), 1);
    assert_eq!(steps_asc(&store, &run).await.len(), 1);
}

#[tokio::test]
async fn cancelling_run_with_no_worker_finalizes_on_dequeue() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![], "ping").await;

    store
        .update_run_status_guarded(
            &thread.id,
            &run.id,
            &RunStatus::CANCELLABLE,
            RunPatch::status(RunStatus::Cancelling),
        )
        .await
        .unwrap()
        .unwrap();

    // Payload still says queued; the guard miss routes to finalization.
    let provider = ScriptedProvider::new(vec![]);
    handler(&store, provider, ToolRegistry::new())
        .handle(run_task(&run))
        .await
        .unwrap();

    let cancelled = store.get_run(&thread.id, &run.id).await.unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
}

#[tokio::test]
async fn narration_before_tool_calls_is_persisted_as_message_step() {
    let store = Arc::new(MemoryStore::new());
    let (_, thread, run) = seed(&store, vec![function_tool("foo")], "call foo").await;
    let provider = ScriptedProvider::new(vec![Ok(ChatTurn {
        text: "Let me call foo.".into(),
        tool_calls: vec![aria_contract::agent::ToolCallRequest::new("c1", "foo", "{}")],
    })]);

    handler(&store, provider, ToolRegistry::new())
        .handle(run_task(&run))
        .await
        .unwrap();

    let steps = steps_asc(&store, &run).await;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].step_type, RunStepType::MessageCreation);
    assert_eq!(steps[1].step_type, RunStepType::ToolCalls);

    let replies = assistant_messages(&store, &thread.id).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, "Let me call foo.");
}

// ---------------------------------------------------------------------------
// Reconstruction
// ---------------------------------------------------------------------------

fn tool_calls_step(run: &Run, call: StepToolCall, status: RunStepStatus) -> RunStep {
    let now = now_millis();
    RunStep {
        id: ids::run_step_id(),
        run_id: run.id.clone(),
        thread_id: run.thread_id.clone(),
        assistant_id: run.assistant_id.clone(),
        step_type: RunStepType::ToolCalls,
        status,
        step_details: StepDetails::ToolCalls {
            tool_calls: vec![call],
        },
        last_error: None,
        created_at: now,
        modified_at: now,
        completed_at: None,
        failed_at: None,
        cancelled_at: None,
        expired_at: None,
        metadata: Metadata::new(),
    }
}

#[tokio::test]
async fn recover_initial_state_has_input_and_no_steps() {
    let store = Arc::new(MemoryStore::new());
    let (assistant, _, run) = seed(
        &store,
        vec![function_tool("foo")],
        "What's the population of India?",
    )
    .await;

    let state = StateReconstructor::new(store.clone())
        .recover(&run, &assistant)
        .await
        .unwrap();
    assert_eq!(state.input_message, "What's the population of India?");
    assert!(state.previous_steps.is_empty());
    assert_eq!(state.function_tools.len(), 1);
    assert_eq!(state.function_tools[0].name, "foo");
}

#[tokio::test]
async fn recover_in_progress_tool_step_yields_continuation_then_pause() {
    let store = Arc::new(MemoryStore::new());
    let (assistant, _, run) = seed(&store, vec![function_tool("foo")], "call foo").await;
    store
        .create_run_step(tool_calls_step(
            &run,
            StepToolCall::function("call-1", "foo", "{}"),
            RunStepStatus::InProgress,
        ))
        .await
        .unwrap();

    let reconstructor = StateReconstructor::new(store.clone());
    let state = reconstructor.recover(&run, &assistant).await.unwrap();

    assert_eq!(state.previous_steps.len(), 2);
    let AgentStep::Continuation { message } = &state.previous_steps[0] else {
        panic!("expected continuation, got {:?}", state.previous_steps[0]);
    };
    assert_eq!(message.tool_calls.len(), 1);
    assert_eq!(message.tool_calls[0].id, "call-1");
    assert_eq!(message.tool_calls[0].name, "foo");
    let AgentStep::Pause {
        message: paused,
        completed,
    } = &state.previous_steps[1]
    else {
        panic!("expected pause, got {:?}", state.previous_steps[1]);
    };
    assert_eq!(paused, message);
    assert!(completed.is_empty());

    // Same rows, same state.
    let again = reconstructor.recover(&run, &assistant).await.unwrap();
    assert_eq!(again, state);
}

#[tokio::test]
async fn recover_completed_tool_step_yields_observation() {
    let store = Arc::new(MemoryStore::new());
    let (assistant, _, run) = seed(&store, vec![function_tool("foo")], "call foo").await;
    let mut call = StepToolCall::function("call-1", "foo", "{}");
    call.function.output = Some("bar".into());
    store
        .create_run_step(tool_calls_step(&run, call, RunStepStatus::Completed))
        .await
        .unwrap();

    let state = StateReconstructor::new(store.clone())
        .recover(&run, &assistant)
        .await
        .unwrap();

    assert_eq!(state.previous_steps.len(), 2);
    let AgentStep::Observation { tool_messages } = &state.previous_steps[1] else {
        panic!("expected observation, got {:?}", state.previous_steps[1]);
    };
    assert_eq!(tool_messages.len(), 1);
    assert_eq!(tool_messages[0].tool_call_id, "call-1");
    assert_eq!(tool_messages[0].content, "bar");
}

#[tokio::test]
async fn recover_completed_run_ends_with_finish_response() {
    let store = Arc::new(MemoryStore::new());
    let (assistant, thread, run) = seed(&store, vec![function_tool("foo")], "call foo").await;

    let mut call = StepToolCall::function("call-1", "foo", "{}");
    call.function.output = Some("bar".into());
    store
        .create_run_step(tool_calls_step(&run, call, RunStepStatus::Completed))
        .await
        .unwrap();

    let now = now_millis();
    let reply = store
        .create_message(Message {
            id: ids::message_id(),
            thread_id: thread.id.clone(),
            role: MessageRole::Assistant,
            content: "hello!".into(),
            assistant_id: Some(run.assistant_id.clone()),
            run_id: Some(run.id.clone()),
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    store
        .create_run_step(RunStep {
            id: ids::run_step_id(),
            run_id: run.id.clone(),
            thread_id: thread.id.clone(),
            assistant_id: run.assistant_id.clone(),
            step_type: RunStepType::MessageCreation,
            status: RunStepStatus::Completed,
            step_details: StepDetails::MessageCreation {
                message_id: reply.id,
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
        .await
        .unwrap();

    let mut completed_run = run.clone();
    completed_run.status = RunStatus::Completed;

    let state = StateReconstructor::new(store.clone())
        .recover(&completed_run, &assistant)
        .await
        .unwrap();

    assert_eq!(state.previous_steps.len(), 3);
    let finish = state.previous_steps[2].as_finish().expect("finish step");
    assert_eq!(finish.response.as_deref(), Some("hello!"));
}

#[tokio::test]
async fn recover_terminal_steps_yield_matching_finishes() {
    for (step_status, run_status) in [
        (RunStepStatus::Cancelled, RunStatus::Cancelled),
        (RunStepStatus::Expired, RunStatus::Expired),
        (RunStepStatus::Failed, RunStatus::Failed),
    ] {
        let store = Arc::new(MemoryStore::new());
        let (assistant, _, run) = seed(&store, vec![function_tool("foo")], "call foo").await;
        store
            .create_run_step(tool_calls_step(
                &run,
                StepToolCall::function("call-1", "foo", "{}"),
                step_status,
            ))
            .await
            .unwrap();

        let mut terminal_run = run.clone();
        terminal_run.status = run_status;

        let state = StateReconstructor::new(store.clone())
            .recover(&terminal_run, &assistant)
            .await
            .unwrap();
        assert_eq!(state.previous_steps.len(), 2);
        let finish = state.previous_steps[1].as_finish().expect("finish step");
        match step_status {
            RunStepStatus::Cancelled => assert!(finish.is_cancelled),
            RunStepStatus::Expired => assert!(finish.is_expired),
            _ => assert!(finish.is_failed),
        }
    }
}

#[tokio::test]
async fn recover_rejects_step_status_mismatch() {
    let store = Arc::new(MemoryStore::new());
    let (assistant, _, run) = seed(&store, vec![function_tool("foo")], "call foo").await;
    store
        .create_run_step(tool_calls_step(
            &run,
            StepToolCall::function("call-1", "foo", "{}"),
            RunStepStatus::Cancelled,
        ))
        .await
        .unwrap();

    // Run claims completion but its trailing step says cancelled.
    let mut mismatched = run.clone();
    mismatched.status = RunStatus::Completed;

    let err = StateReconstructor::new(store.clone())
        .recover(&mismatched, &assistant)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconstructError::InconsistentState(_)));
}

#[tokio::test]
async fn recover_without_user_message_fails() {
    let store = Arc::new(MemoryStore::new());
    let now = now_millis();
    let assistant = store
        .create_assistant(Assistant {
            id: ids::assistant_id(),
            model: "m".into(),
            instructions: String::new(),
            tools: vec![],
            file_ids: vec![],
            temperature: None,
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    let thread = store
        .create_thread(Thread {
            id: ids::thread_id(),
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    let run = store
        .create_run(Run {
            id: ids::run_id(),
            thread_id: thread.id.clone(),
            assistant_id: assistant.id.clone(),
            model: "m".into(),
            instructions: String::new(),
            tools: vec![],
            temperature: None,
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
            created_at: now,
            modified_at: now,
            started_at: None,
            expires_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            expired_at: None,
            metadata: Metadata::new(),
        })
        .await
        .unwrap();

    let err = StateReconstructor::new(store.clone())
        .recover(&run, &assistant)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconstructError::NoUserMessage(_)));
}

#[tokio::test]
async fn recover_folds_narration_into_continuation_content() {
    let store = Arc::new(MemoryStore::new());
    let (assistant, thread, run) = seed(&store, vec![function_tool("foo")], "call foo").await;

    let now = now_millis();
    let narration = store
        .create_message(Message {
            id: ids::message_id(),
            thread_id: thread.id.clone(),
            role: MessageRole::Assistant,
            content: "Let me check.".into(),
            assistant_id: Some(run.assistant_id.clone()),
            run_id: Some(run.id.clone()),
            metadata: Metadata::new(),
            created_at: now,
            modified_at: now,
        })
        .await
        .unwrap();
    store
        .create_run_step(RunStep {
            id: ids::run_step_id(),
            run_id: run.id.clone(),
            thread_id: thread.id.clone(),
            assistant_id: run.assistant_id.clone(),
            step_type: RunStepType::MessageCreation,
            status: RunStepStatus::Completed,
            step_details: StepDetails::MessageCreation {
                message_id: narration.id,
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
        .await
        .unwrap();
    store
        .create_run_step(tool_calls_step(
            &run,
            StepToolCall::function("call-1", "foo", "{}"),
            RunStepStatus::InProgress,
        ))
        .await
        .unwrap();

    let state = StateReconstructor::new(store.clone())
        .recover(&run, &assistant)
        .await
        .unwrap();

    assert_eq!(state.previous_steps.len(), 2);
    let AgentStep::Continuation { message } = &state.previous_steps[0] else {
        panic!("expected continuation");
    };
    assert_eq!(message.content, "Let me check.");
}
