//! Agent state reconstruction.
//!
//! Rebuilds the in-memory trace of a run purely from persisted rows: the
//! latest user message, the function tool schemas in play, and one or two
//! agent steps per run step according to the step's type and status. The
//! same rows always produce the same state; nothing is written.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use aria_contract::agent::{
    AgentFinish, AgentState, AgentStep, ToolCallMessage, ToolCallRequest, ToolMessage,
};
use aria_contract::entity::{
    Assistant, FunctionDecl, Message, MessageRole, Run, RunStatus, RunStep, RunStepStatus,
    RunStepType,
};
use aria_contract::storage::{EntityStores, ListQuery, SortOrder, StoreError};

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error("no user message in thread {0}")]
    NoUserMessage(String),

    #[error("inconsistent persisted state: {0}")]
    InconsistentState(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct StateReconstructor<S: ?Sized> {
    stores: Arc<S>,
}

impl<S: EntityStores + ?Sized> StateReconstructor<S> {
    pub fn new(stores: Arc<S>) -> Self {
        Self { stores }
    }

    /// Rebuild the [`AgentState`] for a run as of its persisted rows.
    pub async fn recover(
        &self,
        run: &Run,
        assistant: &Assistant,
    ) -> Result<AgentState, ReconstructError> {
        let input = self.latest_user_message(&run.thread_id).await?;

        let mut state = AgentState::new(input.content);
        state.function_tools = collect_function_tools(assistant, run);

        let steps = self.list_all_steps(run).await?;
        debug!(run_id = %run.id, steps = steps.len(), "reconstructing agent state");

        for (i, step) in steps.iter().enumerate() {
            let is_last = i + 1 == steps.len();
            match step.step_type {
                RunStepType::ToolCalls => {
                    self.expand_tool_calls_step(run, &steps, i, is_last, &mut state)
                        .await?;
                }
                RunStepType::MessageCreation => {
                    // Non-trailing message steps are folded into the next
                    // tool_calls continuation as its content text.
                    if is_last && run.status == RunStatus::Completed {
                        let message_id = step.step_details.message_id().ok_or_else(|| {
                            ReconstructError::InconsistentState(format!(
                                "step {} has message_creation type without message id",
                                step.id
                            ))
                        })?;
                        let message = self.stores.get_message(&run.thread_id, message_id).await?;
                        state
                            .previous_steps
                            .push(AgentStep::finish(AgentFinish::success(message.content)));
                    }
                }
            }
        }

        Ok(state)
    }

    async fn expand_tool_calls_step(
        &self,
        run: &Run,
        steps: &[RunStep],
        i: usize,
        is_last: bool,
        state: &mut AgentState,
    ) -> Result<(), ReconstructError> {
        let step = &steps[i];
        let calls = step.step_details.tool_calls().ok_or_else(|| {
            ReconstructError::InconsistentState(format!(
                "step {} has tool_calls type without tool calls",
                step.id
            ))
        })?;
        if calls.is_empty() {
            return Err(ReconstructError::InconsistentState(format!(
                "step {} has an empty tool_calls batch",
                step.id
            )));
        }

        // The continuation that requested these calls. Content text lives on
        // the message created just before the batch, when there is one.
        let mut message = ToolCallMessage {
            content: String::new(),
            tool_calls: calls
                .iter()
                .map(|c| ToolCallRequest::new(&c.id, &c.function.name, &c.function.arguments))
                .collect(),
        };
        if i > 0 && steps[i - 1].step_type == RunStepType::MessageCreation {
            if let Some(message_id) = steps[i - 1].step_details.message_id() {
                let narration = self.stores.get_message(&run.thread_id, message_id).await?;
                message.content = narration.content;
            }
        }
        state.previous_steps.push(AgentStep::Continuation {
            message: message.clone(),
        });

        match step.status {
            RunStepStatus::Completed => {
                let tool_messages = calls
                    .iter()
                    .map(|c| ToolMessage {
                        tool_call_id: c.id.clone(),
                        content: c.function.output.clone().unwrap_or_default(),
                    })
                    .collect();
                state
                    .previous_steps
                    .push(AgentStep::Observation { tool_messages });
            }
            RunStepStatus::InProgress => {
                if !is_last {
                    return Err(ReconstructError::InconsistentState(format!(
                        "step {} is in_progress but not the trailing step",
                        step.id
                    )));
                }
                let completed = calls
                    .iter()
                    .filter(|c| c.has_output())
                    .map(|c| ToolMessage {
                        tool_call_id: c.id.clone(),
                        content: c.function.output.clone().unwrap_or_default(),
                    })
                    .collect();
                state
                    .previous_steps
                    .push(AgentStep::Pause { message, completed });
            }
            RunStepStatus::Cancelled | RunStepStatus::Expired | RunStepStatus::Failed => {
                let expected_run_status = match step.status {
                    RunStepStatus::Cancelled => RunStatus::Cancelled,
                    RunStepStatus::Expired => RunStatus::Expired,
                    _ => RunStatus::Failed,
                };
                if !is_last {
                    return Err(ReconstructError::InconsistentState(format!(
                        "terminal step {} is not the trailing step",
                        step.id
                    )));
                }
                if run.status != expected_run_status {
                    return Err(ReconstructError::InconsistentState(format!(
                        "step {} is {:?} but run {} is {:?}",
                        step.id, step.status, run.id, run.status
                    )));
                }
                let finish = match step.status {
                    RunStepStatus::Cancelled => AgentFinish::cancelled(),
                    RunStepStatus::Expired => AgentFinish::expired(),
                    _ => AgentFinish {
                        is_failed: true,
                        last_error: step.last_error.clone(),
                        ..AgentFinish::default()
                    },
                };
                state.previous_steps.push(AgentStep::finish(finish));
            }
        }
        Ok(())
    }

    /// Latest user message in the thread, paging newest-first until found.
    async fn latest_user_message(&self, thread_id: &str) -> Result<Message, ReconstructError> {
        let mut query = ListQuery {
            order: SortOrder::Desc,
            limit: 50,
            ..ListQuery::default()
        };
        loop {
            let page = self.stores.list_messages(thread_id, &query).await?;
            if let Some(found) = page.data.iter().find(|m| m.role == MessageRole::User) {
                return Ok(found.clone());
            }
            if !page.has_more {
                return Err(ReconstructError::NoUserMessage(thread_id.to_string()));
            }
            query.after = page.last_id;
        }
    }

    /// Every run step, ascending, paged until exhausted.
    async fn list_all_steps(&self, run: &Run) -> Result<Vec<RunStep>, ReconstructError> {
        let mut steps = Vec::new();
        let mut query = ListQuery {
            limit: 50,
            ..ListQuery::default()
        };
        loop {
            let page = self
                .stores
                .list_run_steps(&run.thread_id, &run.id, &query)
                .await?;
            steps.extend(page.data);
            if !page.has_more {
                return Ok(steps);
            }
            query.after = page.last_id;
        }
    }
}

/// Assistant function tools then run function tools, first occurrence of a
/// name wins.
fn collect_function_tools(assistant: &Assistant, run: &Run) -> Vec<FunctionDecl> {
    let mut tools: Vec<FunctionDecl> = Vec::new();
    for decl in assistant.function_tools().chain(run.function_tools()) {
        if !tools.iter().any(|t| t.name == decl.name) {
            tools.push(decl.clone());
        }
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use aria_contract::entity::{AssistantTool, Metadata};

    fn assistant_with_tools(tools: Vec<AssistantTool>) -> Assistant {
        Assistant {
            id: "asst_1".into(),
            model: "m".into(),
            instructions: String::new(),
            tools,
            file_ids: vec![],
            temperature: None,
            metadata: Metadata::new(),
            created_at: 1,
            modified_at: 1,
        }
    }

    fn run_with_tools(tools: Vec<AssistantTool>) -> Run {
        Run {
            id: "run_1".into(),
            thread_id: "thread_1".into(),
            assistant_id: "asst_1".into(),
            model: "m".into(),
            instructions: String::new(),
            tools,
            temperature: None,
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
            created_at: 1,
            modified_at: 1,
            started_at: None,
            expires_at: None,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            expired_at: None,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn tool_union_keeps_first_occurrence_per_name() {
        let assistant = assistant_with_tools(vec![
            AssistantTool::function(FunctionDecl::new("foo").with_description("assistant foo")),
            AssistantTool::CodeInterpreter,
        ]);
        let run = run_with_tools(vec![
            AssistantTool::function(FunctionDecl::new("foo").with_description("run foo")),
            AssistantTool::function(FunctionDecl::new("bar")),
        ]);

        let tools = collect_function_tools(&assistant, &run);
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "foo");
        assert_eq!(tools[0].description, "assistant foo");
        assert_eq!(tools[1].name, "bar");
    }
}
