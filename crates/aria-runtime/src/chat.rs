//! Chat provider seam and conversion between the agent trace and genai types.
//!
//! The engine never talks to `genai::Client` directly; it goes through
//! [`ChatProvider`] so tests can script inference turn by turn.

use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ContentPart, MessageContent, ToolResponse};
use genai::Client;
use serde_json::Value;
use thiserror::Error;

use aria_contract::agent::{AgentState, AgentStep, ToolCallMessage, ToolCallRequest};
use aria_contract::tool::ToolDescriptor;

#[derive(Debug, Error)]
#[error("llm call failed: {0}")]
pub struct LlmError(pub String);

/// Result of one model turn: plain text, tool-call requests, or both.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn exec_chat_turn(
        &self,
        model: &str,
        request: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> Result<ChatTurn, LlmError>;
}

#[async_trait]
impl ChatProvider for Client {
    async fn exec_chat_turn(
        &self,
        model: &str,
        request: ChatRequest,
        options: Option<&ChatOptions>,
    ) -> Result<ChatTurn, LlmError> {
        let response = self
            .exec_chat(model, request, options)
            .await
            .map_err(|e| LlmError(e.to_string()))?;

        let text = response
            .first_text()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let tool_calls = response
            .tool_calls()
            .into_iter()
            .map(|tc| {
                ToolCallRequest::new(
                    &tc.call_id,
                    &tc.fn_name,
                    arguments_text(&tc.fn_arguments),
                )
            })
            .collect();
        Ok(ChatTurn { text, tool_calls })
    }
}

/// Providers hand arguments back either as raw JSON text or a parsed value.
fn arguments_text(arguments: &Value) -> String {
    match arguments {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a tool descriptor to a genai tool declaration.
pub fn to_genai_tool(desc: &ToolDescriptor) -> genai::chat::Tool {
    genai::chat::Tool::new(&desc.name)
        .with_description(&desc.description)
        .with_schema(desc.parameters.clone())
}

fn assistant_message(message: &ToolCallMessage) -> ChatMessage {
    if message.tool_calls.is_empty() {
        return ChatMessage::assistant(message.content.as_str());
    }
    let mut content = MessageContent::from(message.content.as_str());
    for call in &message.tool_calls {
        content.push(ContentPart::ToolCall(genai::chat::ToolCall {
            call_id: call.id.clone(),
            fn_name: call.name.clone(),
            fn_arguments: serde_json::from_str(&call.arguments)
                .unwrap_or(Value::String(call.arguments.clone())),
        }));
    }
    ChatMessage::assistant(content)
}

/// Collapse the agent trace into a chat message list.
///
/// Pauses and finishes are never rendered: inference only happens while the
/// trace ends in observations or is empty.
pub fn render_messages(instructions: &str, state: &AgentState) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if !instructions.trim().is_empty() {
        messages.push(ChatMessage::system(instructions));
    }
    messages.push(ChatMessage::user(state.input_message.as_str()));

    for step in &state.previous_steps {
        match step {
            AgentStep::Continuation { message } => messages.push(assistant_message(message)),
            AgentStep::Observation { tool_messages } => {
                for tm in tool_messages {
                    messages.push(ChatMessage::from(ToolResponse {
                        call_id: tm.tool_call_id.clone(),
                        content: tm.content.clone(),
                    }));
                }
            }
            AgentStep::Pause { .. } | AgentStep::Finish { .. } => {}
        }
    }
    messages
}

/// Build the inference request: rendered messages plus every tool schema in
/// play (registry built-ins and the state's function tools; function tools
/// win on a name clash).
pub fn build_request(
    instructions: &str,
    state: &AgentState,
    builtin_schemas: &[ToolDescriptor],
) -> ChatRequest {
    let messages = render_messages(instructions, state);

    let mut tools: Vec<genai::chat::Tool> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for decl in &state.function_tools {
        if seen.insert(decl.name.clone()) {
            tools.push(to_genai_tool(
                &ToolDescriptor::new(&decl.name, &decl.description)
                    .with_parameters(decl.parameters.clone()),
            ));
        }
    }
    for desc in builtin_schemas {
        if seen.insert(desc.name.clone()) {
            tools.push(to_genai_tool(desc));
        }
    }

    let mut request = ChatRequest::new(messages);
    if !tools.is_empty() {
        request = request.with_tools(tools);
    }
    request
}
