use serde::{Deserialize, Serialize};

use super::{LastError, Metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepType {
    MessageCreation,
    ToolCalls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStepStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    Function,
    CodeInterpreter,
    FileSearch,
}

/// Invocation record for one tool call inside a `tool_calls` step.
///
/// `output` is absent until the call is resolved, either by the in-process
/// registry or through submit-tool-outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ToolCallKind,
    pub function: FunctionCall,
}

impl StepToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
                output: None,
            },
        }
    }

    pub fn has_output(&self) -> bool {
        self.function
            .output
            .as_deref()
            .is_some_and(|o| !o.trim().is_empty())
    }
}

/// Type-discriminated step payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    MessageCreation { message_id: String },
    ToolCalls { tool_calls: Vec<StepToolCall> },
}

impl StepDetails {
    pub fn step_type(&self) -> RunStepType {
        match self {
            Self::MessageCreation { .. } => RunStepType::MessageCreation,
            Self::ToolCalls { .. } => RunStepType::ToolCalls,
        }
    }

    pub fn tool_calls(&self) -> Option<&[StepToolCall]> {
        match self {
            Self::ToolCalls { tool_calls } => Some(tool_calls),
            _ => None,
        }
    }

    pub fn tool_calls_mut(&mut self) -> Option<&mut Vec<StepToolCall>> {
        match self {
            Self::ToolCalls { tool_calls } => Some(tool_calls),
            _ => None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::MessageCreation { message_id } => Some(message_id),
            _ => None,
        }
    }

    /// Write `output` into the call with the given id. Returns false when no
    /// call matches.
    pub fn set_tool_output(&mut self, tool_call_id: &str, output: impl Into<String>) -> bool {
        let Some(calls) = self.tool_calls_mut() else {
            return false;
        };
        for call in calls.iter_mut() {
            if call.id == tool_call_id {
                call.function.output = Some(output.into());
                return true;
            }
        }
        false
    }
}

/// Durable record of one unit of agent progress: a message creation or a
/// batch of tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub run_id: String,
    pub thread_id: String,
    pub assistant_id: String,
    #[serde(rename = "type")]
    pub step_type: RunStepType,
    pub status: RunStepStatus,
    pub step_details: StepDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    pub created_at: i64,
    pub modified_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<i64>,
    #[serde(default)]
    pub metadata: Metadata,
}
