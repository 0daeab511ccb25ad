//! `/v1` REST surface in the OpenAI Assistants v2 shape.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use aria_contract::storage::{ListPage, ListQuery, SortOrder, StoreError};

use crate::service::{
    AssistantService, CreateAssistantRequest, CreateMessageRequest, CreateRunRequest,
    CreateThreadAndRunRequest, CreateThreadRequest, MessageService, ModifyAssistantRequest,
    ModifyMetadataRequest, RunService, ServiceError, SubmitToolOutputsRequest, ThreadService,
};

#[derive(Clone)]
pub struct AppState {
    pub assistants: Arc<AssistantService>,
    pub threads: Arc<ThreadService>,
    pub messages: Arc<MessageService>,
    pub runs: Arc<RunService>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, kind) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "invalid_request_error"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        };
        let body = Json(json!({
            "error": { "type": kind, "message": self.to_string() }
        }));
        (code, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            ServiceError::IllegalState(msg) => ApiError::Conflict(msg),
            ServiceError::Store(StoreError::NotFound(msg)) => ApiError::NotFound(msg),
            ServiceError::Store(StoreError::Conflict(msg)) => ApiError::Conflict(msg),
            ServiceError::Store(StoreError::InvalidArgument(msg)) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// `limit`/`order`/`after`/`before` list parameters.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: Option<SortOrder>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

impl From<ListParams> for ListQuery {
    fn from(params: ListParams) -> Self {
        let defaults = ListQuery::default();
        ListQuery {
            order: params.order.unwrap_or(defaults.order),
            after: params.after,
            before: params.before,
            limit: params.limit.unwrap_or(defaults.limit),
        }
    }
}

/// Inject the `object` tag the wire shape carries on every entity.
fn tagged<T: Serialize>(entity: &T, object: &str) -> Result<Json<Value>, ApiError> {
    let mut value =
        serde_json::to_value(entity).map_err(|e| ApiError::Internal(e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("object".into(), json!(object));
    }
    Ok(Json(value))
}

fn list_response<T: Serialize>(
    page: ListPage<T>,
    object: &str,
) -> Result<Json<Value>, ApiError> {
    let data: Vec<Value> = page
        .data
        .iter()
        .map(|item| tagged(item, object).map(|Json(v)| v))
        .collect::<Result<_, _>>()?;
    Ok(Json(json!({
        "object": "list",
        "data": data,
        "first_id": page.first_id,
        "last_id": page.last_id,
        "has_more": page.has_more,
    })))
}

fn deleted_response(id: &str, object: &str) -> Json<Value> {
    Json(json!({ "id": id, "object": format!("{object}.deleted"), "deleted": true }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/assistants", post(create_assistant).get(list_assistants))
        .route(
            "/v1/assistants/:assistant_id",
            get(get_assistant)
                .post(modify_assistant)
                .delete(delete_assistant),
        )
        .route("/v1/threads", post(create_thread).get(list_threads))
        .route(
            "/v1/threads/:thread_id",
            get(get_thread).post(modify_thread).delete(delete_thread),
        )
        .route(
            "/v1/threads/:thread_id/messages",
            post(create_message).get(list_messages),
        )
        .route(
            "/v1/threads/:thread_id/messages/:message_id",
            get(get_message).post(modify_message),
        )
        .route("/v1/threads/runs", post(create_thread_and_run))
        .route(
            "/v1/threads/:thread_id/runs",
            post(create_run).get(list_runs),
        )
        .route(
            "/v1/threads/:thread_id/runs/:run_id",
            get(get_run).post(modify_run),
        )
        .route("/v1/threads/:thread_id/runs/:run_id/cancel", post(cancel_run))
        .route(
            "/v1/threads/:thread_id/runs/:run_id/submit_tool_outputs",
            post(submit_tool_outputs),
        )
        .route("/v1/threads/:thread_id/runs/:run_id/steps", get(list_run_steps))
        .route(
            "/v1/threads/:thread_id/runs/:run_id/steps/:step_id",
            get(get_run_step),
        )
        .fallback(not_found)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn not_found() -> ApiError {
    ApiError::NotFound("no such route".into())
}

// ---------------------------------------------------------------------------
// Assistants
// ---------------------------------------------------------------------------

async fn create_assistant(
    State(state): State<AppState>,
    Json(request): Json<CreateAssistantRequest>,
) -> Result<Json<Value>, ApiError> {
    let assistant = state.assistants.create(request).await?;
    tagged(&assistant, "assistant")
}

async fn get_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.assistants.get(&assistant_id).await?, "assistant")
}

async fn modify_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    Json(request): Json<ModifyAssistantRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state.assistants.modify(&assistant_id, request).await?,
        "assistant",
    )
}

async fn delete_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.assistants.delete(&assistant_id).await?;
    Ok(deleted_response(&assistant_id, "assistant"))
}

async fn list_assistants(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_response(state.assistants.list(&params.into()).await?, "assistant")
}

// ---------------------------------------------------------------------------
// Threads
// ---------------------------------------------------------------------------

async fn create_thread(
    State(state): State<AppState>,
    Json(request): Json<CreateThreadRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.threads.create(request).await?, "thread")
}

async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.threads.get(&thread_id).await?, "thread")
}

async fn modify_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(request): Json<ModifyMetadataRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.threads.modify(&thread_id, request).await?, "thread")
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.threads.delete(&thread_id).await?;
    Ok(deleted_response(&thread_id, "thread"))
}

async fn list_threads(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_response(state.threads.list(&params.into()).await?, "thread")
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn create_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(request): Json<CreateMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state.messages.create(&thread_id, request).await?,
        "thread.message",
    )
}

async fn get_message(
    State(state): State<AppState>,
    Path((thread_id, message_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state.messages.get(&thread_id, &message_id).await?,
        "thread.message",
    )
}

async fn modify_message(
    State(state): State<AppState>,
    Path((thread_id, message_id)): Path<(String, String)>,
    Json(request): Json<ModifyMetadataRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state
            .messages
            .modify(&thread_id, &message_id, request)
            .await?,
        "thread.message",
    )
}

async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_response(
        state.messages.list(&thread_id, &params.into()).await?,
        "thread.message",
    )
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn create_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(request): Json<CreateRunRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.runs.create(&thread_id, request).await?, "thread.run")
}

async fn create_thread_and_run(
    State(state): State<AppState>,
    Json(request): Json<CreateThreadAndRunRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state.runs.create_thread_and_run(request).await?,
        "thread.run",
    )
}

async fn get_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.runs.get(&thread_id, &run_id).await?, "thread.run")
}

async fn modify_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Json(request): Json<ModifyMetadataRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state.runs.modify(&thread_id, &run_id, request).await?,
        "thread.run",
    )
}

async fn list_runs(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_response(
        state.runs.list(&thread_id, &params.into()).await?,
        "thread.run",
    )
}

async fn cancel_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    tagged(&state.runs.cancel(&thread_id, &run_id).await?, "thread.run")
}

async fn submit_tool_outputs(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Json(request): Json<SubmitToolOutputsRequest>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state
            .runs
            .submit_tool_outputs(&thread_id, &run_id, request)
            .await?,
        "thread.run",
    )
}

async fn list_run_steps(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_response(
        state
            .runs
            .list_steps(&thread_id, &run_id, &params.into())
            .await?,
        "thread.run.step",
    )
}

async fn get_run_step(
    State(state): State<AppState>,
    Path((thread_id, run_id, step_id)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    tagged(
        &state.runs.get_step(&thread_id, &run_id, &step_id).await?,
        "thread.run.step",
    )
}
