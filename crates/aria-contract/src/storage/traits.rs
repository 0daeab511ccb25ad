use async_trait::async_trait;

use super::{
    AssistantPatch, ListPage, ListQuery, MessagePatch, RunPatch, RunStepPatch, StoreError,
    ThreadPatch,
};
use crate::entity::{Assistant, Message, Run, RunStatus, RunStep, Thread};

#[async_trait]
pub trait AssistantStore: Send + Sync {
    /// Insert a new assistant. Fails with `Conflict` when the id exists.
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant, StoreError>;

    async fn get_assistant(&self, id: &str) -> Result<Assistant, StoreError>;

    async fn update_assistant(
        &self,
        id: &str,
        patch: AssistantPatch,
    ) -> Result<Assistant, StoreError>;

    async fn delete_assistant(&self, id: &str) -> Result<(), StoreError>;

    async fn list_assistants(&self, query: &ListQuery) -> Result<ListPage<Assistant>, StoreError>;
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_thread(&self, thread: Thread) -> Result<Thread, StoreError>;

    async fn get_thread(&self, id: &str) -> Result<Thread, StoreError>;

    async fn update_thread(&self, id: &str, patch: ThreadPatch) -> Result<Thread, StoreError>;

    /// Delete a thread and cascade to its messages, runs, and run steps.
    async fn delete_thread(&self, id: &str) -> Result<(), StoreError>;

    async fn list_threads(&self, query: &ListQuery) -> Result<ListPage<Thread>, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a new message. Fails with `NotFound` when the thread is absent.
    async fn create_message(&self, message: Message) -> Result<Message, StoreError>;

    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Message, StoreError>;

    async fn update_message(
        &self,
        thread_id: &str,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Message, StoreError>;

    async fn list_messages(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Message>, StoreError>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run. Fails with `NotFound` when the thread is absent.
    async fn create_run(&self, run: Run) -> Result<Run, StoreError>;

    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Run, StoreError>;

    /// Unconditional field update. Rejects non-metadata patches on terminal
    /// runs with `InvalidArgument`; status changes must go through
    /// [`RunStore::update_run_status_guarded`].
    async fn update_run(
        &self,
        thread_id: &str,
        id: &str,
        patch: RunPatch,
    ) -> Result<Run, StoreError>;

    /// Conditional update: the patch is applied only while the run status is
    /// in `expected`, atomically with the status check.
    ///
    /// Returns `Ok(None)` when the guard does not match (the caller lost the
    /// race or the transition is illegal) and `Err(NotFound)` when the run is
    /// absent.
    async fn update_run_status_guarded(
        &self,
        thread_id: &str,
        id: &str,
        expected: &[RunStatus],
        patch: RunPatch,
    ) -> Result<Option<Run>, StoreError>;

    async fn list_runs(
        &self,
        thread_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<Run>, StoreError>;
}

#[async_trait]
pub trait RunStepStore: Send + Sync {
    /// Insert a new run step. Fails with `NotFound` when the run is absent.
    async fn create_run_step(&self, step: RunStep) -> Result<RunStep, StoreError>;

    async fn get_run_step(
        &self,
        thread_id: &str,
        run_id: &str,
        id: &str,
    ) -> Result<RunStep, StoreError>;

    async fn update_run_step(
        &self,
        thread_id: &str,
        run_id: &str,
        id: &str,
        patch: RunStepPatch,
    ) -> Result<RunStep, StoreError>;

    async fn list_run_steps(
        &self,
        thread_id: &str,
        run_id: &str,
        query: &ListQuery,
    ) -> Result<ListPage<RunStep>, StoreError>;
}

/// Full entity store.
pub trait EntityStores:
    AssistantStore + ThreadStore + MessageStore + RunStore + RunStepStore
{
}

impl<T: AssistantStore + ThreadStore + MessageStore + RunStore + RunStepStore + ?Sized> EntityStores
    for T
{
}
