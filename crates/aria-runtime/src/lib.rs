//! Run execution engine.
//!
//! A queued run is handed to a worker by the [`scheduler`], which invokes the
//! [`run_handler`]. The handler claims the run with a status-guarded update,
//! rebuilds the in-memory agent trace with the [`reconstruct`]or, then drives
//! the [`executor`] step by step, persisting every transition until the run
//! suspends on external tool outputs or reaches a terminal status.

pub mod chat;
pub mod executor;
pub mod reconstruct;
pub mod run_handler;
pub mod scheduler;

pub use chat::{ChatProvider, ChatTurn, LlmError};
pub use executor::{AgentExecutor, EarlyStop, ExecutorConfig, NeverStop};
pub use reconstruct::{ReconstructError, StateReconstructor};
pub use run_handler::{RunTaskHandler, RUN_TASK_CATEGORY};
pub use scheduler::{
    EnqueuePolicy, SchedulerConfig, SchedulerError, Task, TaskHandler, TaskScheduler,
};
