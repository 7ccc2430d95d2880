// ABOUTME: Task store and the task lifecycle service behind every taskbox command
// ABOUTME: Sequences worktree, sandbox, workflow and status components for create/run/stop/delete

pub mod reporter;
pub mod service;
pub mod shell;
pub mod store;

pub use reporter::LogReporter;
pub use service::{
    CreateTaskOptions, RemovalScope, StopReport, TaskDetails, TaskRun, TaskService,
};
pub use shell::ShellTarget;
pub use store::TaskStore;

use taskbox_core::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task {0} not found")]
    NotFound(u64),

    #[error("Invalid task: {0}")]
    Validation(String),

    #[error("Task {id} is {status}; cannot {operation} it")]
    InvalidState {
        id: u64,
        status: TaskStatus,
        operation: &'static str,
    },

    #[error("No logs recorded for task {0}")]
    NoLogs(u64),

    #[error(transparent)]
    Core(#[from] taskbox_core::CoreError),

    #[error(transparent)]
    Config(#[from] taskbox_config::ConfigError),

    #[error(transparent)]
    Git(#[from] taskbox_git_utils::GitError),

    #[error(transparent)]
    Status(#[from] taskbox_executions::StatusError),

    #[error(transparent)]
    Agent(#[from] taskbox_agents::AgentError),

    #[error(transparent)]
    Sandbox(#[from] taskbox_sandbox::SandboxError),

    #[error(transparent)]
    Backend(#[from] taskbox_sandbox::BackendError),

    #[error(transparent)]
    Workflow(#[from] taskbox_workflows::WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
