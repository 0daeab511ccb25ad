use serde::{Deserialize, Serialize};

use super::run_step::StepToolCall;
use super::{AssistantTool, Metadata};

/// Run lifecycle status.
///
/// ```text
/// queued ──> in_progress ──> completed
///   ^            │ ^
///   │            v │
///   └─────── requires_action
///
/// any non-terminal ──> cancelling ──> cancelled
/// any non-terminal ──> expired
/// any non-terminal ──> failed
/// ```
///
/// `requires_action → queued` is the resumption edge taken by
/// submit-tool-outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
}

impl RunStatus {
    /// Every status a run can still move out of.
    pub const NON_TERMINAL: [RunStatus; 4] = [
        RunStatus::Queued,
        RunStatus::InProgress,
        RunStatus::RequiresAction,
        RunStatus::Cancelling,
    ];

    /// The statuses a worker may claim a run from.
    pub const CLAIMABLE: [RunStatus; 2] = [RunStatus::Queued, RunStatus::RequiresAction];

    /// The statuses a cancel request may interrupt.
    pub const CANCELLABLE: [RunStatus; 3] = [
        RunStatus::Queued,
        RunStatus::InProgress,
        RunStatus::RequiresAction,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired
        )
    }

    /// Validate a transition from `self` to `next`.
    ///
    /// Self-transitions are allowed for non-terminal statuses; terminal
    /// statuses accept nothing.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        match self {
            RunStatus::Queued => matches!(
                next,
                RunStatus::InProgress
                    | RunStatus::Cancelling
                    | RunStatus::Expired
                    | RunStatus::Failed
            ),
            RunStatus::InProgress => matches!(
                next,
                RunStatus::RequiresAction
                    | RunStatus::Completed
                    | RunStatus::Cancelling
                    | RunStatus::Expired
                    | RunStatus::Failed
            ),
            RunStatus::RequiresAction => matches!(
                next,
                RunStatus::Queued
                    | RunStatus::InProgress
                    | RunStatus::Cancelling
                    | RunStatus::Expired
                    | RunStatus::Failed
            ),
            RunStatus::Cancelling => matches!(
                next,
                RunStatus::Cancelled | RunStatus::Expired | RunStatus::Failed
            ),
            _ => false,
        }
    }
}

/// API-visible error kind carried on failed runs and run steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequestError,
    NotFound,
    ServerError,
    ToolNotFound,
    LlmError,
}

/// Terminal error detail attached to a failed run or run step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

impl LastError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequestError, message)
    }
}

/// The unresolved tool calls an external caller must answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitToolOutputsAction {
    pub tool_calls: Vec<StepToolCall>,
}

/// Action required to resume a suspended run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredAction {
    SubmitToolOutputs {
        submit_tool_outputs: SubmitToolOutputsAction,
    },
}

impl RequiredAction {
    pub fn submit_tool_outputs(tool_calls: Vec<StepToolCall>) -> Self {
        Self::SubmitToolOutputs {
            submit_tool_outputs: SubmitToolOutputsAction { tool_calls },
        }
    }
}

/// One agent execution over a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    pub created_at: i64,
    pub modified_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<i64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Run {
    /// Function tools declared on this run, in declaration order.
    pub fn function_tools(&self) -> impl Iterator<Item = &super::FunctionDecl> {
        self.tools.iter().filter_map(AssistantTool::as_function)
    }
}
