//! Shared contracts for the aria assistants service.
//!
//! This crate defines the persistent entity model (assistants, threads,
//! messages, runs, run steps), the transient agent-step model driven by the
//! run engine, the storage traits every backend implements, and the tool
//! contract used for function calling.

pub mod agent;
pub mod clock;
pub mod entity;
pub mod ids;
pub mod storage;
pub mod tool;

pub use agent::{AgentFinish, AgentState, AgentStep, ToolCallMessage, ToolCallRequest, ToolMessage};
pub use clock::now_millis;
pub use entity::{
    Assistant, AssistantTool, ErrorKind, FunctionCall, FunctionDecl, LastError, Message,
    MessageRole, RequiredAction, Run, RunStatus, RunStep, RunStepStatus, RunStepType, StepDetails,
    StepToolCall, SubmitToolOutputsAction, Thread, ToolCallKind,
};
pub use ids::generate_id;
pub use storage::{
    AssistantStore, EntityStores, ListPage, ListQuery, MessageStore, RunPatch, RunStepPatch,
    RunStepStore, RunStore, SortOrder, StoreError, ThreadStore,
};
pub use tool::{
    validate_against_schema, Tool, ToolDescriptor, ToolError, ToolRegistry, ToolRegistryError,
    TypedTool,
};
