use async_trait::async_trait;
use tokio::sync::RwLock;

use aria_contract::entity::{Assistant, Message, Run, RunStatus, RunStep, Thread};
use aria_contract::now_millis;
use aria_contract::storage::{
    paginate_in_memory, AssistantPatch, AssistantStore, ListPage, ListQuery, MessagePatch,
    MessageStore, RunPatch, RunStepPatch, RunStepStore, RunStore, StoreError, ThreadPatch,
    ThreadStore,
};

#[derive(Default)]
struct Inner {
    // Insertion order doubles as created_at order.
    assistants: Vec<Assistant>,
    threads: Vec<Thread>,
    messages: Vec<Message>,
    runs: Vec<Run>,
    run_steps: Vec<RunStep>,
}

/// In-memory store for testing and local development.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity: &str, id: &str) -> StoreError {
    StoreError::NotFound(format!("{entity} {id}"))
}

fn conflict(entity: &str, id: &str) -> StoreError {
    StoreError::Conflict(format!("{entity} {id} already exists"))
}

#[async_trait]
impl AssistantStore for MemoryStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.assistants.iter().any(|a| a.id == assistant.id) {
            return Err(conflict("assistant", &assistant.id));
        }
        inner.assistants.push(assistant.clone());
        Ok(assistant)
    }

    async fn get_assistant(&self, id: &str) -> Result<Assistant, StoreError> {
        let inner = self.inner.read().await;
        inner
            .assistants
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| not_found("assistant", id))
    }

    async fn update_assistant(
        &self,
        id: &str,
        patch: AssistantPatch,
    ) -> Result<Assistant, StoreError> {
        let mut inner = self.inner.write().await;
        let assistant = inner
            .assistants
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("assistant", id))?;
        patch.apply(assistant, now_millis());
        Ok(assistant.clone())
    }

    async fn delete_assistant(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.assistants.len();
        inner.assistants.retain(|a| a.id != id);
        if inner.assistants.len() == before {
            return Err(not_found("assistant", id));
        }
        Ok(())
    }

    async fn list_assistants(&self, query: &ListQuery) -> Result<ListPage<Assistant>, StoreError> {
        let inner = self.inner.read().await;
        Ok(paginate_in_memory(&inner.assistants, |a| &a.id, query))
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    async fn create_thread(&self, thread: Thread) -> Result<Thread, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.threads.iter().any(|t| t.id == thread.id) {
            return Err(conflict("thread", &thread.id));
        }
        inner.threads.push(thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, id: &str) -> Result<Thread, StoreError> {
        let inner = self.inner.read().await;
        inner
            .threads
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| not_found("thread", id))
    }

    async fn update_thread(&self, id: &str, patch: ThreadPatch) -> Result<Thread, StoreError> {
        let mut inner = self.inner.write().await;
        let thread = inner
            .threads
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| not_found("thread", id))?;
        patch.apply(thread, now_millis());
        Ok(thread.clone())
    }

    async fn delete_thread(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.threads.len();
        inner.threads.retain(|t| t.id != id);
        if inner.threads.len() == before {
            return Err(not_found("thread", id));
        }
        inner.messages.retain(|m| m.thread_id != id);
        inner.runs.retain(|r| r.thread_id != id);
        inner.run_steps.retain(|s| s.thread_id != id);
        Ok(())
    }

    async fn list_threads(&self, query: &ListQuery) -> Result<ListPage<Thread>, StoreError> {
        let inner = self.inner.read().await;
        Ok(paginate_in_memory(&inner.threads, |t| &t.id, query))
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: Message) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.threads.iter().any(|t| t.id == message.thread_id) {
            return Err(not_found("thread", &message.thread_id));
        }
        if inner.messages.iter().any(|m| m.id == message.id) {
            return Err(conflict("message", &message.id));
        }
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Message, StoreError> {
        let inner = self.inner.read().await;
        inner
            .messages
            .iter()
            .find(|m| m.thread_id == thread_id && m.id == id)
            .cloned()
            .ok_or_else(|| not_found("message", id))
    }

    async fn update_message(
        &self,
        thread_id: &str,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .iter_mut()
            .find(|m| m.thread_id == thread_id && m.id == id)
            .ok_or_else(|| not_found("message", id))?;
        patch.apply(message, now_millis());
        Ok(message.clone())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Message>, StoreError> {
        let inner = self.inner.read().await;
        let rows: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        Ok(paginate_in_memory(&rows, |m| &m.id, query))
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, run: Run) -> Result<Run, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.threads.iter().any(|t| t.id == run.thread_id) {
            return Err(not_found("thread", &run.thread_id));
        }
        if inner.runs.iter().any(|r| r.id == run.id) {
            return Err(conflict("run", &run.id));
        }
        inner.runs.push(run.clone());
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Run, StoreError> {
        let inner = self.inner.read().await;
        inner
            .runs
            .iter()
            .find(|r| r.thread_id == thread_id && r.id == id)
            .cloned()
            .ok_or_else(|| not_found("run", id))
    }

    async fn update_run(
        &self,
        thread_id: &str,
        id: &str,
        patch: RunPatch,
    ) -> Result<Run, StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.thread_id == thread_id && r.id == id)
            .ok_or_else(|| not_found("run", id))?;
        if run.status.is_terminal() && !patch.is_metadata_only() {
            return Err(StoreError::InvalidArgument(format!(
                "run {id} is terminal; only metadata may change"
            )));
        }
        patch.apply(run, now_millis());
        Ok(run.clone())
    }

    async fn update_run_status_guarded(
        &self,
        thread_id: &str,
        id: &str,
        expected: &[RunStatus],
        patch: RunPatch,
    ) -> Result<Option<Run>, StoreError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.thread_id == thread_id && r.id == id)
            .ok_or_else(|| not_found("run", id))?;
        if !expected.contains(&run.status) {
            return Ok(None);
        }
        patch.apply(run, now_millis());
        Ok(Some(run.clone()))
    }

    async fn list_runs(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Run>, StoreError> {
        let inner = self.inner.read().await;
        let rows: Vec<Run> = inner
            .runs
            .iter()
            .filter(|r| r.thread_id == thread_id)
            .cloned()
            .collect();
        Ok(paginate_in_memory(&rows, |r| &r.id, query))
    }
}

#[async_trait]
impl RunStepStore for MemoryStore {
    async fn create_run_step(&self, step: RunStep) -> Result<RunStep, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner
            .runs
            .iter()
            .any(|r| r.thread_id == step.thread_id && r.id == step.run_id)
        {
            return Err(not_found("run", &step.run_id));
        }
        if inner.run_steps.iter().any(|s| s.id == step.id) {
            return Err(conflict("run step", &step.id));
        }
        inner.run_steps.push(step.clone());
        Ok(step)
    }

    async fn get_run_step(
        &self,
        thread_id: &str,
        run_id: &str,
        id: &str,
    ) -> Result<RunStep, StoreError> {
        let inner = self.inner.read().await;
        inner
            .run_steps
            .iter()
            .find(|s| s.thread_id == thread_id && s.run_id == run_id && s.id == id)
            .cloned()
            .ok_or_else(|| not_found("run step", id))
    }

    async fn update_run_step(
        &self,
        thread_id: &str,
        run_id: &str,
        id: &str,
        patch: RunStepPatch,
    ) -> Result<RunStep, StoreError> {
        let mut inner = self.inner.write().await;
        let step = inner
            .run_steps
            .iter_mut()
            .find(|s| s.thread_id == thread_id && s.run_id == run_id && s.id == id)
            .ok_or_else(|| not_found("run step", id))?;
        patch.apply(step, now_millis());
        Ok(step.clone())
    }

    async fn list_run_steps(
        &self,
        thread_id: &str,
        run_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<RunStep>, StoreError> {
        let inner = self.inner.read().await;
        let rows: Vec<RunStep> = inner
            .run_steps
            .iter()
            .filter(|s| s.thread_id == thread_id && s.run_id == run_id)
            .cloned()
            .collect();
        Ok(paginate_in_memory(&rows, |s| &s.id, query))
    }
}
