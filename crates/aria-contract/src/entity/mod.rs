//! Persistent entity model: assistants, threads, messages, runs, run steps.

pub mod assistant;
pub mod message;
pub mod run;
pub mod run_step;
pub mod thread;

pub use assistant::{Assistant, AssistantTool, FunctionDecl};
pub use message::{Message, MessageRole};
pub use run::{ErrorKind, LastError, RequiredAction, Run, RunStatus, SubmitToolOutputsAction};
pub use run_step::{
    FunctionCall, RunStep, RunStepStatus, RunStepType, StepDetails, StepToolCall, ToolCallKind,
};
pub use thread::Thread;

/// Free-form key/value metadata attached to every entity.
pub type Metadata = serde_json::Map<String, serde_json::Value>;
