use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{
    Assistant, AssistantTool, LastError, Message, Metadata, RequiredAction, Run, RunStatus,
    RunStep, RunStepStatus, StepDetails, Thread,
};

/// Sort order for paginated queries, consistent with `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Cursor-based pagination parameters.
///
/// `after`/`before` are exclusive id cursors interpreted in the requested
/// order.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub order: SortOrder,
    pub after: Option<String>,
    pub before: Option<String>,
    /// Maximum number of items to return (clamped to 1..=100).
    pub limit: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            order: SortOrder::Asc,
            after: None,
            before: None,
            limit: 20,
        }
    }
}

impl ListQuery {
    pub const MAX_LIMIT: usize = 100;

    pub fn desc() -> Self {
        Self {
            order: SortOrder::Desc,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

/// One page of a list result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPage<T> {
    pub data: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl<T> ListPage<T> {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            first_id: None,
            last_id: None,
            has_more: false,
        }
    }
}

/// Paginate rows already sorted ascending by canonical order.
///
/// Queries `limit + 1` conceptually: the look-ahead row only feeds
/// `has_more` and is not returned.
pub fn paginate_in_memory<T: Clone>(
    rows: &[T],
    id_of: impl Fn(&T) -> &str,
    query: &ListQuery,
) -> ListPage<T> {
    let mut ordered: Vec<&T> = rows.iter().collect();
    if query.order == SortOrder::Desc {
        ordered.reverse();
    }

    let start = match &query.after {
        Some(after) => match ordered.iter().position(|r| id_of(r) == after.as_str()) {
            Some(pos) => pos + 1,
            None => return ListPage::empty(),
        },
        None => 0,
    };
    let end = match &query.before {
        Some(before) => match ordered.iter().position(|r| id_of(r) == before.as_str()) {
            Some(pos) => pos,
            None => return ListPage::empty(),
        },
        None => ordered.len(),
    };
    if start >= end {
        return ListPage::empty();
    }

    let window = &ordered[start..end];
    let limit = query.effective_limit();
    let has_more = window.len() > limit;
    let data: Vec<T> = window.iter().take(limit).map(|r| (*r).clone()).collect();

    ListPage {
        first_id: data.first().map(|r| id_of(r).to_string()),
        last_id: data.last().map(|r| id_of(r).to_string()),
        data,
        has_more,
    }
}

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

// ---------------------------------------------------------------------------
// Patches: last-writer-wins at field granularity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AssistantPatch {
    pub model: Option<String>,
    pub instructions: Option<String>,
    pub tools: Option<Vec<AssistantTool>>,
    pub file_ids: Option<Vec<String>>,
    pub temperature: Option<f64>,
    pub metadata: Option<Metadata>,
}

impl AssistantPatch {
    pub fn apply(&self, assistant: &mut Assistant, now: i64) {
        if let Some(model) = &self.model {
            assistant.model = model.clone();
        }
        if let Some(instructions) = &self.instructions {
            assistant.instructions = instructions.clone();
        }
        if let Some(tools) = &self.tools {
            assistant.tools = tools.clone();
        }
        if let Some(file_ids) = &self.file_ids {
            assistant.file_ids = file_ids.clone();
        }
        if let Some(temperature) = self.temperature {
            assistant.temperature = Some(temperature);
        }
        if let Some(metadata) = &self.metadata {
            assistant.metadata = metadata.clone();
        }
        assistant.modified_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadPatch {
    pub metadata: Option<Metadata>,
}

impl ThreadPatch {
    pub fn apply(&self, thread: &mut Thread, now: i64) {
        if let Some(metadata) = &self.metadata {
            thread.metadata = metadata.clone();
        }
        thread.modified_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessagePatch {
    pub metadata: Option<Metadata>,
}

impl MessagePatch {
    pub fn apply(&self, message: &mut Message, now: i64) {
        if let Some(metadata) = &self.metadata {
            message.metadata = metadata.clone();
        }
        message.modified_at = now;
    }
}

/// Run patch. `required_action` uses the double-option convention:
/// `Some(None)` clears the field, `None` leaves it untouched.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub required_action: Option<Option<RequiredAction>>,
    pub last_error: Option<LastError>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub expired_at: Option<i64>,
    pub metadata: Option<Metadata>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Whether the patch touches anything besides metadata.
    pub fn is_metadata_only(&self) -> bool {
        self.status.is_none()
            && self.required_action.is_none()
            && self.last_error.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
            && self.cancelled_at.is_none()
            && self.failed_at.is_none()
            && self.expired_at.is_none()
    }

    pub fn apply(&self, run: &mut Run, now: i64) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(required_action) = &self.required_action {
            run.required_action = required_action.clone();
        }
        if let Some(last_error) = &self.last_error {
            run.last_error = Some(last_error.clone());
        }
        if let Some(started_at) = self.started_at {
            run.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            run.completed_at = Some(completed_at);
        }
        if let Some(cancelled_at) = self.cancelled_at {
            run.cancelled_at = Some(cancelled_at);
        }
        if let Some(failed_at) = self.failed_at {
            run.failed_at = Some(failed_at);
        }
        if let Some(expired_at) = self.expired_at {
            run.expired_at = Some(expired_at);
        }
        if let Some(metadata) = &self.metadata {
            run.metadata = metadata.clone();
        }
        run.modified_at = now;
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStepPatch {
    pub status: Option<RunStepStatus>,
    pub step_details: Option<StepDetails>,
    pub last_error: Option<LastError>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub expired_at: Option<i64>,
}

impl RunStepPatch {
    pub fn apply(&self, step: &mut RunStep, now: i64) {
        if let Some(status) = self.status {
            step.status = status;
        }
        if let Some(step_details) = &self.step_details {
            step.step_details = step_details.clone();
            step.step_type = step.step_details.step_type();
        }
        if let Some(last_error) = &self.last_error {
            step.last_error = Some(last_error.clone());
        }
        if let Some(completed_at) = self.completed_at {
            step.completed_at = Some(completed_at);
        }
        if let Some(failed_at) = self.failed_at {
            step.failed_at = Some(failed_at);
        }
        if let Some(cancelled_at) = self.cancelled_at {
            step.cancelled_at = Some(cancelled_at);
        }
        if let Some(expired_at) = self.expired_at {
            step.expired_at = Some(expired_at);
        }
        step.modified_at = now;
    }
}
