//! Agent executor: produces the next step of a trace, one at a time.
//!
//! `step` is a pure decision over the trace tail plus at most one suspension
//! point (LLM call or built-in tool invocation). `stream` repeats `step`
//! through a capacity-1 channel (one producer, one consumer, blocking
//! back-pressure), consulting the early-stop hook before every step and
//! terminating on a pause or finish.

use std::sync::Arc;

use async_trait::async_trait;
use genai::chat::ChatOptions;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aria_contract::agent::{
    AgentFinish, AgentState, AgentStep, ToolCallMessage, ToolCallRequest, ToolMessage,
};
use aria_contract::entity::{ErrorKind, LastError};
use aria_contract::tool::{ToolError, ToolRegistry};

use crate::chat::{build_request, ChatProvider, LlmError};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("tool {name} failed: {source}")]
    Tool { name: String, source: ToolError },

    #[error("agent trace cannot advance: {0}")]
    Stuck(String),
}

impl ExecutorError {
    /// Error shape persisted on the run when a step blows up.
    pub fn to_last_error(&self) -> LastError {
        match self {
            ExecutorError::Tool {
                source: ToolError::NotFound(_),
                ..
            } => LastError::new(ErrorKind::ToolNotFound, self.to_string()),
            _ => LastError::server_error(self.to_string()),
        }
    }
}

/// Hook consulted before each step; returning a finish ends the stream.
///
/// The run handler uses this to observe external cancel/expire transitions,
/// re-reading the run row once per step.
#[async_trait]
pub trait EarlyStop: Send + Sync {
    async fn check(&self, state: &AgentState) -> Option<AgentFinish>;
}

/// Early-stop that never fires.
pub struct NeverStop;

#[async_trait]
impl EarlyStop for NeverStop {
    async fn check(&self, _state: &AgentState) -> Option<AgentFinish> {
        None
    }
}

/// Model settings for one run: assistant defaults overridden by run fields.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub model: String,
    pub instructions: String,
    pub temperature: Option<f64>,
}

pub struct AgentExecutor {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
    early_stop: Arc<dyn EarlyStop>,
}

impl AgentExecutor {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<ToolRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            config,
            early_stop: Arc::new(NeverStop),
        }
    }

    pub fn with_early_stop(mut self, early_stop: Arc<dyn EarlyStop>) -> Self {
        self.early_stop = early_stop;
        self
    }

    /// Produce the next step for the given trace.
    pub async fn step(&self, state: &AgentState) -> Result<AgentStep, ExecutorError> {
        match state.last_step() {
            None | Some(AgentStep::Observation { .. }) => self.infer(state).await,
            Some(AgentStep::Continuation { message }) => {
                let message = message.clone();
                self.advance_continuation(state, &message).await
            }
            Some(AgentStep::Pause { message, completed }) => Ok(lift_pause(message, completed)),
            Some(AgentStep::Finish { .. }) => Err(ExecutorError::Stuck(
                "step requested after a finish".into(),
            )),
        }
    }

    /// Run the trace to its next suspension: emits steps until a pause or a
    /// finish, appending each to the state as it goes.
    pub fn stream(self: Arc<Self>, state: AgentState) -> mpsc::Receiver<AgentStep> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut state = state;
            loop {
                if let Some(finish) = self.early_stop.check(&state).await {
                    let _ = tx.send(AgentStep::finish(finish)).await;
                    break;
                }
                let step = match self.step(&state).await {
                    Ok(step) => step,
                    Err(e) => {
                        warn!(error = %e, "agent step failed");
                        AgentStep::finish(AgentFinish::failed(e.to_last_error()))
                    }
                };
                let done = matches!(step, AgentStep::Pause { .. } | AgentStep::Finish { .. });
                state.previous_steps.push(step.clone());
                if tx.send(step).await.is_err() {
                    // Consumer released the run.
                    break;
                }
                if done {
                    break;
                }
            }
        });
        rx
    }

    async fn infer(&self, state: &AgentState) -> Result<AgentStep, ExecutorError> {
        let options = self
            .config
            .temperature
            .map(|t| ChatOptions::default().with_temperature(t));
        let request = build_request(&self.config.instructions, state, &self.registry.schemas());
        let turn = self
            .provider
            .exec_chat_turn(&self.config.model, request, options.as_ref())
            .await?;

        if turn.tool_calls.is_empty() {
            debug!("model produced a final answer");
            return Ok(AgentStep::finish(AgentFinish::success(turn.text)));
        }
        Ok(AgentStep::continuation(ToolCallMessage {
            content: turn.text,
            tool_calls: dedupe_calls(turn.tool_calls),
        }))
    }

    /// A continuation advances to a pause when any call needs external
    /// outputs, otherwise the built-in calls run right here.
    async fn advance_continuation(
        &self,
        state: &AgentState,
        message: &ToolCallMessage,
    ) -> Result<AgentStep, ExecutorError> {
        if message.tool_calls.is_empty() {
            return Err(ExecutorError::Stuck(
                "continuation without tool calls".into(),
            ));
        }
        if message
            .tool_calls
            .iter()
            .any(|c| state.has_function_tool(&c.name))
        {
            return Ok(AgentStep::Pause {
                message: message.clone(),
                completed: Vec::new(),
            });
        }

        let mut tool_messages = Vec::with_capacity(message.tool_calls.len());
        for call in &message.tool_calls {
            let content = match self.registry.invoke(&call.name, &call.arguments).await {
                Ok(output) => output,
                // Schema violations go back to the model as the tool output.
                Err(ToolError::InvalidArguments(text)) => text,
                Err(source) => {
                    return Err(ExecutorError::Tool {
                        name: call.name.clone(),
                        source,
                    })
                }
            };
            tool_messages.push(ToolMessage {
                tool_call_id: call.id.clone(),
                content,
            });
        }
        Ok(AgentStep::Observation { tool_messages })
    }
}

/// A pause whose calls are all answered becomes an observation; otherwise it
/// re-emits with the current completion set.
fn lift_pause(message: &ToolCallMessage, completed: &[ToolMessage]) -> AgentStep {
    let output_for = |id: &str| {
        // First submission wins on duplicates.
        completed.iter().find(|tm| tm.tool_call_id == id)
    };
    let unresolved: Vec<&ToolCallRequest> = message
        .tool_calls
        .iter()
        .filter(|c| output_for(&c.id).is_none())
        .collect();
    if !unresolved.is_empty() {
        debug!(
            unresolved = unresolved.len(),
            "pause still waiting for tool outputs"
        );
        return AgentStep::Pause {
            message: message.clone(),
            completed: completed.to_vec(),
        };
    }

    // Preserve the request order of the continuation.
    let tool_messages = message
        .tool_calls
        .iter()
        .filter_map(|c| output_for(&c.id))
        .cloned()
        .collect();
    AgentStep::Observation { tool_messages }
}

fn dedupe_calls(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(calls.len());
    for call in calls {
        if seen.insert(call.id.clone()) {
            out.push(call);
        } else {
            warn!(tool_call_id = %call.id, "duplicate tool call id from model, dropping");
        }
    }
    out
}
