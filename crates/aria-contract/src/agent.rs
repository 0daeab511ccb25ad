//! Transient agent-trace model.
//!
//! An [`AgentState`] is the in-memory projection of a run: the user input,
//! the function tool schemas in play, and the ordered steps produced so far.
//! It is rebuilt from persisted rows on every claim and never stored.

use serde::{Deserialize, Serialize};

use crate::entity::{FunctionDecl, LastError};

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text as produced by the model.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Assistant turn carrying zero or more tool-call requests plus optional
/// leading text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCallMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// A resolved tool output, keyed by the call it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub tool_call_id: String,
    pub content: String,
}

/// Why and how a run ended.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentFinish {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub is_failed: bool,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub is_expired: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
}

impl AgentFinish {
    pub fn success(response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            is_cancelled: true,
            ..Self::default()
        }
    }

    pub fn expired() -> Self {
        Self {
            is_expired: true,
            ..Self::default()
        }
    }

    pub fn failed(error: LastError) -> Self {
        Self {
            is_failed: true,
            last_error: Some(error),
            ..Self::default()
        }
    }
}

/// One step of agent progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentStep {
    /// The model asked for tool calls (or narrated before doing so).
    Continuation { message: ToolCallMessage },
    /// Function tool calls await external outputs; `completed` holds the
    /// subset already resolved.
    Pause {
        message: ToolCallMessage,
        completed: Vec<ToolMessage>,
    },
    /// All tool calls of the preceding continuation are resolved.
    Observation { tool_messages: Vec<ToolMessage> },
    /// Terminal step.
    Finish { finish: AgentFinish },
}

impl AgentStep {
    pub fn continuation(message: ToolCallMessage) -> Self {
        Self::Continuation { message }
    }

    pub fn finish(finish: AgentFinish) -> Self {
        Self::Finish { finish }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    pub fn as_finish(&self) -> Option<&AgentFinish> {
        match self {
            Self::Finish { finish } => Some(finish),
            _ => None,
        }
    }
}

/// In-memory projection of a run, owned by a single worker invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentState {
    /// Text of the latest user message in the thread.
    pub input_message: String,
    /// Function tool schemas available to the model (assistant ∪ run,
    /// first occurrence wins on duplicate names).
    pub function_tools: Vec<FunctionDecl>,
    /// Ordered steps reconstructed from persisted rows, then extended by the
    /// executor as it produces new ones.
    pub previous_steps: Vec<AgentStep>,
}

impl AgentState {
    pub fn new(input_message: impl Into<String>) -> Self {
        Self {
            input_message: input_message.into(),
            ..Self::default()
        }
    }

    pub fn last_step(&self) -> Option<&AgentStep> {
        self.previous_steps.last()
    }

    /// Whether a function tool with this name is declared on the state.
    pub fn has_function_tool(&self, name: &str) -> bool {
        self.function_tools.iter().any(|f| f.name == name)
    }
}
